// # gce-provision: one VM, from nothing to serving HTTP
//
// Creates a Compute Engine instance with a startup script, waits for the
// create operation, reads the instance's external IP and polls it until the
// web server on it answers 200.
//
// The `provision` module holds the provider-agnostic workflow; `gcp` is the
// Compute Engine side of it.

/// Shared HTTP client.
pub mod client;

/// Google Cloud Platform utilities: authentication and the Compute Engine API.
pub mod gcp;

/// The provisioning workflow and its readiness probe.
pub mod provision;

/// Built-in startup-script templates.
pub mod startup;

pub use provision::{
    InstanceRequest, Orchestrator, ProvisionError, ProvisionOutcome, ReadinessPolicy,
};
