//! # Provisioning
//!
//! Creates one VM and waits until it serves HTTP:
//!
//! `CHECKING_EXISTENCE -> ALREADY_EXISTS | CREATING -> AWAITING_OPERATION ->
//! FETCHING_METADATA -> POLLING_READY -> READY`
//!
//! The orchestrator reaches the cloud only through [`ComputeApi`] and the
//! instance only through [`ReadinessProbe`], so both can be replaced in tests.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;

use crate::gcp::gce::types::{Instance, Operation};

pub mod error;
pub mod orchestrator;
pub mod probe;

pub use error::{MissingNetworkInfo, ProvisionError};
pub use orchestrator::{Orchestrator, ProvisionOutcome, external_ip};
pub use probe::{HttpProbe, ProbeFailure, ReadinessPolicy, ReadinessProbe};

pub const DEFAULT_ZONE: &str = "us-west1-b";
pub const DEFAULT_MACHINE_TYPE: &str = "n1-standard-1";
pub const DEFAULT_OS: &str = "ubuntu";

/// What to create. Built once per run and not changed after the create call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRequest {
    pub name: String,
    pub zone: String,
    /// Short OS name (`ubuntu`, `debian`, ...) or a full image path.
    pub os: String,
    pub machine_type: String,
    /// Shell script run by the instance on boot. Passed through untouched.
    pub startup_script: Option<String>,
    /// Tag the instance `http-server` and make sure port 80 is open to it.
    pub http_enabled: bool,
    pub spot: bool,
}

impl InstanceRequest {
    pub fn new(name: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            zone: zone.into(),
            os: DEFAULT_OS.to_string(),
            machine_type: DEFAULT_MACHINE_TYPE.to_string(),
            startup_script: None,
            http_enabled: true,
            spot: false,
        }
    }

    pub fn with_startup_script(mut self, script: impl Into<String>) -> Self {
        self.startup_script = Some(script.into());
        self
    }

    pub fn with_os(mut self, os: impl Into<String>) -> Self {
        self.os = os.into();
        self
    }

    pub fn with_machine_type(mut self, machine_type: impl Into<String>) -> Self {
        self.machine_type = machine_type.into();
        self
    }
}

/// The provider calls a provisioning run is made of.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn instance_exists(&self, zone: &str, name: &str) -> Result<bool>;

    /// Submits the create request and returns the long-running operation.
    async fn create_instance(&self, request: &InstanceRequest) -> Result<Operation>;

    /// Resolves once `operation` is terminal. A failed operation is returned
    /// as `Ok` with its `error` set; `Err` means the wait itself failed.
    async fn wait_operation(&self, operation: &Operation) -> Result<Operation>;

    async fn get_instance(&self, zone: &str, name: &str) -> Result<Instance>;
}

/// Where a run is in its sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CheckingExistence,
    Creating,
    AwaitingOperation,
    FetchingMetadata,
    PollingReady,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::CheckingExistence => "checking existence",
            Stage::Creating => "creating",
            Stage::AwaitingOperation => "awaiting operation",
            Stage::FetchingMetadata => "fetching metadata",
            Stage::PollingReady => "polling readiness",
        };
        f.write_str(s)
    }
}
