use std::net::IpAddr;
use std::time::Duration;

use thiserror::Error;

use crate::provision::Stage;

/// Fatal outcomes of a provisioning run.
///
/// An instance that already exists is not an error; see
/// [`ProvisionOutcome::AlreadyExists`](crate::provision::ProvisionOutcome).
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The provider rejected the create request or the operation ended in error.
    #[error("failed to create instance {name}: {reason}")]
    CreationFailed { name: String, reason: String },

    #[error("instance {name} has no usable external IP: {missing}")]
    MissingNetworkInfo {
        name: String,
        missing: MissingNetworkInfo,
    },

    #[error("http://{ip}/ did not answer 200 after {attempts} probes in {elapsed:?}")]
    ReadinessTimeout {
        ip: IpAddr,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("provider call failed while {stage}")]
    Provider {
        stage: Stage,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("cancelled while {stage}")]
    Cancelled { stage: Stage },
}

impl ProvisionError {
    pub(crate) fn provider(stage: Stage, source: anyhow::Error) -> Self {
        ProvisionError::Provider {
            stage,
            source: source.into(),
        }
    }

    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            ProvisionError::CreationFailed { .. }
            | ProvisionError::MissingNetworkInfo { .. }
            | ProvisionError::Provider { .. } => 1,
            ProvisionError::ReadinessTimeout { .. } => 3,
            ProvisionError::Cancelled { .. } => 130,
        }
    }
}

/// Which step of `networkInterfaces[0].accessConfigs[0].natIP` was missing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MissingNetworkInfo {
    #[error("no network interfaces")]
    NoNetworkInterface,
    #[error("first network interface has no access configs")]
    NoAccessConfig,
    #[error("first access config has no natIP")]
    NoExternalIp,
    #[error("natIP {0:?} is not an IP address")]
    InvalidAddress(String),
}
