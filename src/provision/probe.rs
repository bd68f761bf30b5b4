use std::net::IpAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

/// Bounds on the readiness loop. At least `max_attempts` always applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Sleep before every probe, including the first.
    pub interval: Duration,
    pub max_attempts: u32,
    /// Wall-clock budget measured from the start of polling.
    pub timeout: Option<Duration>,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 150,
            timeout: Some(Duration::from_secs(600)),
        }
    }
}

/// Why one probe did not count as ready. Always retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeFailure {
    #[error("status {0}")]
    Status(u16),
    #[error("{0}")]
    Transport(String),
}

#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// `Ok` iff the instance at `ip` answered with exactly 200.
    async fn probe(&self, ip: IpAddr) -> Result<(), ProbeFailure>;
}

/// Plain `GET http://<ip>[:port]<path>`.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    port: u16,
    path: String,
}

impl HttpProbe {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build probe HTTP client")?;
        Ok(Self {
            client,
            port: 80,
            path: "/".to_string(),
        })
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        self
    }

    pub fn url(&self, ip: IpAddr) -> String {
        let host = match ip {
            IpAddr::V4(v4) => v4.to_string(),
            IpAddr::V6(v6) => format!("[{}]", v6),
        };
        if self.port == 80 {
            format!("http://{}{}", host, self.path)
        } else {
            format!("http://{}:{}{}", host, self.port, self.path)
        }
    }
}

#[async_trait]
impl ReadinessProbe for HttpProbe {
    async fn probe(&self, ip: IpAddr) -> Result<(), ProbeFailure> {
        let res = self
            .client
            .get(self.url(ip))
            .send()
            .await
            .map_err(|e| ProbeFailure::Transport(e.to_string()))?;
        match res.status() {
            StatusCode::OK => Ok(()),
            status => Err(ProbeFailure::Status(status.as_u16())),
        }
    }
}
