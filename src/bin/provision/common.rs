use anyhow::{Result, bail};
use gce_provision::gcp::auth::{CREDENTIALS_ENV, load_service_account};
use tracing_subscriber::EnvFilter;

/// Logs go to stderr; `RUST_LOG` overrides the default `info` level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// `--project`, else the project of the configured service account.
pub fn resolve_project(flag: Option<&str>) -> Result<String> {
    if let Some(project) = flag {
        return Ok(project.to_string());
    }
    match load_service_account()? {
        Some(sa) => Ok(sa.project_id),
        None => bail!(
            "No project: pass --project, set GOOGLE_CLOUD_PROJECT, or point {} at a service account file",
            CREDENTIALS_ENV
        ),
    }
}

/// Left-aligned columns under a dashed rule, two spaces apart, no trailing blanks.
pub fn format_table<const N: usize>(headers: [&str; N], rows: &[[String; N]]) -> String {
    let widths: [usize; N] = std::array::from_fn(|col| {
        rows.iter()
            .map(|row| row[col].chars().count())
            .fold(headers[col].chars().count(), usize::max)
    });
    let rule = widths.map(|w| "-".repeat(w));

    let mut out = String::new();
    let lines = std::iter::once(headers)
        .chain(std::iter::once(rule.each_ref().map(String::as_str)))
        .chain(rows.iter().map(|row| row.each_ref().map(String::as_str)));
    for cells in lines {
        let line: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{:<width$}", cell))
            .collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
    }
    out
}
