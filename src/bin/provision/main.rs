use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use gce_provision::provision::{DEFAULT_MACHINE_TYPE, DEFAULT_OS, DEFAULT_ZONE, ProvisionError};
use gce_provision::startup::{Template, parse_var};

#[derive(Parser, Debug)]
#[command(
    name = "provision",
    about = "Create a GCE instance with a startup script and wait until it serves HTTP"
)]
struct Cli {
    #[arg(name = "INSTANCE_NAME", default_value = "start-script-example")]
    name: String,

    /// Defaults to the project of the service account in GOOGLE_APPLICATION_CREDENTIALS.
    #[arg(long, env = "GOOGLE_CLOUD_PROJECT")]
    project: Option<String>,

    #[arg(long, default_value = DEFAULT_ZONE)]
    zone: String,

    #[arg(long, default_value = DEFAULT_MACHINE_TYPE)]
    machine_type: String,

    /// Short OS name (ubuntu, debian, rocky, cos) or an image path.
    #[arg(long, default_value = DEFAULT_OS)]
    os: String,

    /// Do not tag the instance http-server or open port 80.
    #[arg(long)]
    no_http: bool,

    #[arg(long)]
    spot: bool,

    /// Use this file as the startup script instead of a built-in template.
    #[arg(long, value_name = "FILE", conflicts_with_all = ["template", "repo", "vars"])]
    startup_script: Option<PathBuf>,

    /// Built-in startup script: watcher (default) or webapp.
    #[arg(long)]
    template: Option<Template>,

    /// Git repository cloned by the webapp template.
    #[arg(long)]
    repo: Option<String>,

    /// Template variable override, repeatable.
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_var)]
    vars: Vec<(String, String)>,

    /// Seconds to sleep before each readiness probe.
    #[arg(long, default_value_t = 2)]
    interval_secs: u64,

    /// Give up after this many failed probes; at least 1.
    #[arg(long, default_value_t = 150, value_parser = clap::value_parser!(u32).range(1..))]
    max_attempts: u32,

    /// Give up after this many seconds of polling; 0 disables the limit.
    #[arg(long, default_value_t = 600)]
    timeout_secs: u64,

    #[arg(long, default_value_t = 80)]
    probe_port: u16,

    #[arg(long, default_value = "/")]
    probe_path: String,

    /// List the instances in the zone and exit.
    #[arg(long)]
    list: bool,
}

#[tokio::main]
async fn main() {
    common::init_tracing();
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<ProvisionError>()
                .map(ProvisionError::exit_code)
                .unwrap_or(1)
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let project_id = common::resolve_project(cli.project.as_deref())?;
    if cli.list {
        commands::list::run(&project_id, &cli.zone).await?;
        return Ok(0);
    }
    commands::up::run(&project_id, &cli).await
}

mod commands;
mod common;
