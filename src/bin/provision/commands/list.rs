use anyhow::{Context, Result};
use gce_provision::gcp::gce::{GceClient, last_segment};

use crate::common::format_table;

pub async fn run(project_id: &str, zone: &str) -> Result<()> {
    let client = GceClient::new(project_id);
    let instances = client
        .list_instances(zone)
        .await
        .with_context(|| format!("Failed to list instances in {}", zone))?;

    println!("Found {} VMs!", instances.len());
    let rows: Vec<[String; 5]> = instances
        .iter()
        .map(|it| {
            [
                it.status.clone().unwrap_or_else(|| "UNKNOWN".to_string()),
                it.name.clone(),
                it.machine_type
                    .as_deref()
                    .map(|s| last_segment(s).to_string())
                    .unwrap_or_default(),
                it.zone
                    .as_deref()
                    .map(|s| last_segment(s).to_string())
                    .unwrap_or_else(|| zone.to_string()),
                it.nat_ip().unwrap_or("-").to_string(),
            ]
        })
        .collect();

    print!(
        "{}",
        format_table(["Status", "Name", "Machine Type", "Zone", "External IP"], &rows)
    );
    Ok(())
}
