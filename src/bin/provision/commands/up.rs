use std::time::Duration;

use anyhow::{Context, Result};
use gce_provision::gcp::gce::GceClient;
use gce_provision::provision::{
    HttpProbe, InstanceRequest, Orchestrator, ProvisionOutcome, ReadinessPolicy,
};
use gce_provision::startup::{Template, default_vars, render};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use crate::Cli;

pub async fn run(project_id: &str, cli: &Cli) -> Result<i32> {
    let mut request = InstanceRequest::new(&cli.name, &cli.zone)
        .with_os(&cli.os)
        .with_machine_type(&cli.machine_type)
        .with_startup_script(startup_script(cli)?);
    request.http_enabled = !cli.no_http;
    request.spot = cli.spot;

    let policy = ReadinessPolicy {
        interval: Duration::from_secs(cli.interval_secs),
        max_attempts: cli.max_attempts,
        timeout: (cli.timeout_secs > 0).then(|| Duration::from_secs(cli.timeout_secs)),
    };
    let probe = HttpProbe::new(HttpProbe::DEFAULT_TIMEOUT)?
        .with_port(cli.probe_port)
        .with_path(&cli.probe_path);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.cancel()).context("Failed to install Ctrl+C handler")?;
    }

    // Not drawn until the orchestrator starts polling; the log lines before it own stderr.
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template(
        "{spinner} {msg} [{pos} failed probes, {elapsed}]",
    )?);

    let orchestrator =
        Orchestrator::new(GceClient::new(project_id), probe, policy).with_progress(spinner.clone());
    let outcome = orchestrator.ensure_instance(&request, &cancel).await;
    spinner.finish_and_clear();

    match outcome? {
        ProvisionOutcome::Ready(ip) => {
            println!("{} created successfully", request.name);
            println!("Virtual machine ready at http://{}/", ip);
            Ok(0)
        }
        ProvisionOutcome::AlreadyExists => {
            println!("VM {} already exists; nothing to do", request.name);
            Ok(2)
        }
    }
}

fn startup_script(cli: &Cli) -> Result<String> {
    if let Some(path) = &cli.startup_script {
        return std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read startup script {}", path.display()));
    }

    let template = cli.template.unwrap_or(Template::Watcher);
    let mut vars = default_vars(&cli.zone);
    if let Some(repo) = &cli.repo {
        vars.insert("repo".to_string(), repo.clone());
    }
    vars.extend(cli.vars.iter().cloned());
    render(template, &vars)
}
