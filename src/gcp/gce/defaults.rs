//! # GCE Instance Default Configurations
//!
//! This module turns a provider-neutral [`InstanceRequest`] into the
//! `instances.insert` body, filling in the fields the GCE API requires but a
//! caller rarely cares about (disk layout, NAT access config, scheduling).

use std::collections::HashMap;

use crate::gcp::gce::types::*;
use crate::provision::InstanceRequest;

/// Network tag that the HTTP firewall rule targets.
pub const HTTP_SERVER_TAG: &str = "http-server";

/// Name of the firewall rule that opens port 80 to tagged instances.
pub const HTTP_FIREWALL_RULE: &str = "default-allow-http";

/// Metadata key that GCE runs as a shell script on every boot.
pub const STARTUP_SCRIPT_KEY: &str = "startup-script";

/// Maps a short OS name to a public image family URL.
///
/// Anything that already looks like an image path (`projects/...` or a full
/// `https://` URL) is returned unchanged; unknown short names are treated as
/// an image family in the caller's own project.
pub fn resolve_source_image(project_id: &str, os: &str) -> String {
    if os.starts_with("projects/") || os.starts_with("https://") || os.starts_with("global/") {
        return os.to_string();
    }
    let (image_project, family) = match os.to_ascii_lowercase().as_str() {
        "ubuntu" => ("ubuntu-os-cloud", "ubuntu-2404-lts-amd64"),
        "ubuntu-2204" => ("ubuntu-os-cloud", "ubuntu-2204-lts"),
        "debian" => ("debian-cloud", "debian-12"),
        "centos" | "rocky" => ("rocky-linux-cloud", "rocky-linux-9"),
        "cos" => ("cos-cloud", "cos-stable"),
        _ => return format!("projects/{}/global/images/family/{}", project_id, os),
    };
    format!("projects/{}/global/images/family/{}", image_project, family)
}

/// Infers the region from a zone name (`us-west1-b` -> `us-west1`).
pub fn region_of(zone: &str) -> &str {
    zone.rsplit_once('-')
        .map(|(prefix, _)| prefix)
        .unwrap_or(zone)
}

/// Builds the `instances.insert` body for `request`.
///
/// # Arguments
/// * `project_id` - The GCP project ID.
/// * `request` - What to create: name, zone, image, machine type, startup script.
pub fn create_instance_request(project_id: &str, request: &InstanceRequest) -> InsertInstanceRequest {
    let zone = request.zone.as_str();
    let region = region_of(zone);

    let mut labels = HashMap::new();
    labels.insert("managed-by".to_string(), "gce-provision".to_string());

    let mut metadata_items = Vec::new();
    if let Some(script) = request.startup_script.as_deref() {
        metadata_items.push(MetadataItem {
            key: STARTUP_SCRIPT_KEY.to_string(),
            value: script.to_string(),
        });
    }

    let mut tags = Vec::new();
    if request.http_enabled {
        tags.push(HTTP_SERVER_TAG.to_string());
    }

    let machine_type = if request.machine_type.contains('/') {
        request.machine_type.clone()
    } else {
        format!("zones/{}/machineTypes/{}", zone, request.machine_type)
    };

    let scheduling = if request.spot {
        Scheduling {
            automatic_restart: false,
            // SPOT VMs can be preempted at any time.
            on_host_maintenance: "TERMINATE".to_string(),
            provisioning_model: "SPOT".to_string(),
            instance_termination_action: Some("STOP".to_string()),
        }
    } else {
        Scheduling {
            automatic_restart: true,
            on_host_maintenance: "MIGRATE".to_string(),
            provisioning_model: "STANDARD".to_string(),
            instance_termination_action: None,
        }
    };

    InsertInstanceRequest {
        name: request.name.clone(),
        description: String::new(),
        machine_type,
        disks: vec![Disk {
            auto_delete: true,
            boot: true,
            device_name: request.name.clone(),
            initialize_params: InitializeParams {
                disk_size_gb: "10".to_string(),
                disk_type: format!("zones/{}/diskTypes/pd-balanced", zone),
                source_image: resolve_source_image(project_id, &request.os),
            },
            mode: "READ_WRITE".to_string(),
            disk_type: "PERSISTENT".to_string(),
        }],
        metadata: Metadata {
            items: metadata_items,
        },
        network_interfaces: vec![NetworkInterface {
            access_configs: vec![AccessConfig {
                name: "External NAT".to_string(),
                access_type: "ONE_TO_ONE_NAT".to_string(),
                network_tier: "PREMIUM".to_string(),
            }],
            stack_type: "IPV4_ONLY".to_string(),
            subnetwork: format!(
                "projects/{}/regions/{}/subnetworks/default",
                project_id, region
            ),
        }],
        scheduling,
        service_accounts: vec![ServiceAccountRef {
            email: "default".to_string(),
            scopes: vec!["https://www.googleapis.com/auth/cloud-platform".to_string()],
        }],
        tags: Tags { items: tags },
        labels,
    }
}

/// The rule that lets tagged instances receive HTTP from anywhere.
pub fn http_firewall_rule() -> Firewall {
    Firewall {
        name: HTTP_FIREWALL_RULE.to_string(),
        network: "global/networks/default".to_string(),
        direction: "INGRESS".to_string(),
        allowed: vec![FirewallAllowed {
            ip_protocol: "tcp".to_string(),
            ports: vec!["80".to_string()],
        }],
        source_ranges: vec!["0.0.0.0/0".to_string()],
        target_tags: vec![HTTP_SERVER_TAG.to_string()],
    }
}
