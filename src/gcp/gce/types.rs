//! # Google Compute Engine (GCE) Data Types
//!
//! This module defines the Rust structs that model the JSON objects used in the
//! Google Compute Engine API: the `instances.insert` request body, the
//! `Instance` and `Operation` resources read back from the API, and the
//! firewall rule created for HTTP-enabled instances.
//!
//! Response types default every field the provider may omit, so callers see a
//! missing value as `None` or an empty list instead of a decode failure.
//!
//! For detailed information on each field, refer to the official GCE API documentation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Represents the request body for creating a new GCE virtual machine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertInstanceRequest {
    /// The name of the instance.
    pub name: String,
    /// A brief description of the instance.
    pub description: String,
    /// The machine type URL for this instance.
    #[serde(rename = "machineType")]
    pub machine_type: String,
    /// The disks attached to the instance.
    pub disks: Vec<Disk>,
    /// Metadata key/value pairs available to the instance.
    pub metadata: Metadata,
    /// The network interfaces for the instance.
    #[serde(rename = "networkInterfaces")]
    pub network_interfaces: Vec<NetworkInterface>,
    /// Scheduling options for the instance.
    pub scheduling: Scheduling,
    /// The service accounts associated with the instance.
    #[serde(rename = "serviceAccounts")]
    pub service_accounts: Vec<ServiceAccountRef>,
    /// A list of network tags for the instance.
    pub tags: Tags,
    /// User-defined labels for the instance.
    pub labels: HashMap<String, String>,
}

/// An attached disk configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disk {
    #[serde(rename = "autoDelete")]
    pub auto_delete: bool,
    pub boot: bool,
    #[serde(rename = "deviceName")]
    pub device_name: String,
    #[serde(rename = "initializeParams")]
    pub initialize_params: InitializeParams,
    pub mode: String,
    #[serde(rename = "type")]
    pub disk_type: String,
}

/// Parameters for initializing a disk from a source image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeParams {
    #[serde(rename = "diskSizeGb")]
    pub disk_size_gb: String,
    #[serde(rename = "diskType")]
    pub disk_type: String,
    #[serde(rename = "sourceImage")]
    pub source_image: String,
}

/// Instance metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub items: Vec<MetadataItem>,
}

impl Metadata {
    /// Returns the value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|item| item.key == key)
            .map(|item| item.value.as_str())
    }
}

/// A single metadata key-value pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataItem {
    pub key: String,
    pub value: String,
}

/// A network interface in an insert request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInterface {
    #[serde(rename = "accessConfigs")]
    pub access_configs: Vec<AccessConfig>,
    #[serde(rename = "stackType")]
    pub stack_type: String,
    pub subnetwork: String,
}

/// Configuration for external network access in an insert request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub access_type: String,
    #[serde(rename = "networkTier")]
    pub network_tier: String,
}

/// Instance scheduling options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scheduling {
    #[serde(rename = "automaticRestart")]
    pub automatic_restart: bool,
    #[serde(rename = "onHostMaintenance")]
    pub on_host_maintenance: String,
    #[serde(rename = "provisioningModel")]
    pub provisioning_model: String,
    #[serde(rename = "instanceTerminationAction")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_termination_action: Option<String>,
}

/// A reference to a service account and its scopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccountRef {
    pub email: String,
    pub scopes: Vec<String>,
}

/// A list of network tags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tags {
    #[serde(default)]
    pub items: Vec<String>,
}

/// An instance resource as returned by `instances.get` and `instances.list`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Instance {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(rename = "machineType")]
    #[serde(default)]
    pub machine_type: Option<String>,
    #[serde(rename = "networkInterfaces")]
    #[serde(default)]
    pub network_interfaces: Vec<InstanceNetworkInterface>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Instance {
    /// The first interface's first external NAT address, if assigned.
    pub fn nat_ip(&self) -> Option<&str> {
        self.network_interfaces
            .first()?
            .access_configs
            .first()?
            .nat_ip
            .as_deref()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstanceNetworkInterface {
    #[serde(rename = "networkIP")]
    #[serde(default)]
    pub network_ip: Option<String>,
    #[serde(rename = "accessConfigs")]
    #[serde(default)]
    pub access_configs: Vec<InstanceAccessConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstanceAccessConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "natIP")]
    #[serde(default)]
    pub nat_ip: Option<String>,
}

/// One page of `instances.list`.
#[derive(Debug, Default, Deserialize)]
pub struct InstanceList {
    #[serde(default)]
    pub items: Vec<Instance>,
    #[serde(rename = "nextPageToken")]
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Lifecycle of a long-running operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Running,
    Done,
}

/// A zonal or global long-running operation.
#[derive(Debug, Clone, Deserialize)]
pub struct Operation {
    /// Numeric id, serialized by the API as a string.
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub status: OperationStatus,
    /// Zone URL for zonal operations; absent for global ones.
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(rename = "operationType")]
    #[serde(default)]
    pub operation_type: Option<String>,
    #[serde(rename = "targetLink")]
    #[serde(default)]
    pub target_link: Option<String>,
    #[serde(default)]
    pub error: Option<OperationError>,
    #[serde(rename = "httpErrorMessage")]
    #[serde(default)]
    pub http_error_message: Option<String>,
}

impl Operation {
    pub fn is_done(&self) -> bool {
        self.status == OperationStatus::Done
    }

    /// Joins the operation's error messages, or `None` if it succeeded.
    pub fn error_message(&self) -> Option<String> {
        let error = self.error.as_ref()?;
        let messages: Vec<String> = error
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.code, e.message))
            .collect();
        if messages.is_empty() {
            Some(
                self.http_error_message
                    .clone()
                    .unwrap_or_else(|| "operation failed".to_string()),
            )
        } else {
            Some(messages.join("; "))
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub errors: Vec<OperationErrorItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperationErrorItem {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// A VPC firewall rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Firewall {
    pub name: String,
    pub network: String,
    pub direction: String,
    pub allowed: Vec<FirewallAllowed>,
    #[serde(rename = "sourceRanges")]
    pub source_ranges: Vec<String>,
    #[serde(rename = "targetTags")]
    pub target_tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallAllowed {
    #[serde(rename = "IPProtocol")]
    pub ip_protocol: String,
    pub ports: Vec<String>,
}
