//! # Google Compute Engine (GCE) Client
//!
//! This module provides a client for interacting with the Google Compute Engine API.
//! It is used for managing GCE virtual machine instances: looking them up,
//! creating them from a startup-script configuration and waiting on the
//! resulting long-running operations.
//!
//! ## Submodules
//! - `client`: Contains the core client logic for making API requests to GCE.
//! - `defaults`: Builds complete insert requests from a short instance description.
//! - `types`: Defines the data structures that are serialized to and deserialized from
//!   the GCE API.

/// Core client for GCE API requests.
pub mod client;
/// Helper functions for creating default GCE instance configurations.
pub mod defaults;
/// Data structures for the GCE API.
pub mod types;

// Re-export key components to provide a convenient public API for this module.
pub use crate::gcp::gce::client::{GceClient, last_segment};
pub use crate::gcp::gce::defaults::{create_instance_request, resolve_source_image};
pub use crate::gcp::gce::types::*;
