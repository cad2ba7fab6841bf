mod compose;
mod config;
mod device;
mod inventory;
mod models;
mod provision;
mod render;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use compose::Composer;
use config::{Config, Settings};
use device::NetconfConnector;
use models::ProvisioningOutcome;
use provision::{provision_all, Provisioner};

#[derive(Parser)]
#[command(
    name = "forge-provision",
    version,
    about = "Render and push Junos configuration from a data hierarchy"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the rendered candidate configuration for a host without touching the device
    Render {
        host: String,
        /// Print the merged host data instead of the rendered templates
        #[arg(long)]
        data: bool,
    },
    /// Push configuration to hosts; all inventory hosts when none are named
    Provision {
        /// Commit changes instead of rolling them back after the diff
        #[arg(long)]
        commit: bool,
        /// Print outcomes as JSON
        #[arg(long)]
        json: bool,
        hosts: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "forge_provision=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let cfg = Config::load();
    tracing::debug!("Config dir: {}", cfg.config_dir.display());

    let composer = Composer::load(&cfg.config_dir)?;
    let hosts = inventory::load_inventory(&cfg.inventory_file)?;

    match cli.command {
        Command::Render { host, data } => {
            let mut host = inventory::select_hosts(hosts, &[host])?
                .pop()
                .context("Host not found in inventory")?;
            if data {
                print!("{}", serde_yaml::to_string(&composer.data_for_host(&host))?);
                return Ok(ExitCode::SUCCESS);
            }

            let candidate = composer.render_candidate(&mut host);
            println!("{}", candidate.fragments.join("\n"));
            if candidate.failed.is_empty() {
                Ok(ExitCode::SUCCESS)
            } else {
                tracing::error!("{} template(s) failed to render", candidate.failed.len());
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Provision { commit, json, hosts: names } => {
            let settings = Settings::load(&cfg.settings_file)?;
            let selected = inventory::select_hosts(hosts, &names)?;
            tracing::info!(
                "Provisioning {} hosts (commit={}, concurrency={})",
                selected.len(),
                commit,
                cfg.concurrency
            );

            let provisioner = Arc::new(Provisioner::new(
                composer,
                NetconfConnector,
                settings.junos,
                settings.push,
            ));
            let outcomes = provision_all(provisioner, selected, commit, cfg.concurrency).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcomes)?);
            }

            let failed = outcomes.iter().filter(|o| !report(o)).count();
            if failed > 0 {
                tracing::error!("{} of {} hosts failed", failed, outcomes.len());
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Log a one-line summary of an outcome. Returns false when the host needs attention.
fn report(outcome: &ProvisioningOutcome) -> bool {
    let elapsed = outcome.finished_at - outcome.started_at;
    if let Some(error) = &outcome.error {
        tracing::error!("{}: {:?}, {}", outcome.host, outcome.decision, error);
    } else if let Some(failure) = outcome.first_failure() {
        tracing::warn!(
            "{}: {:?}, {} failed: {}",
            outcome.host,
            outcome.decision,
            failure.stage,
            failure.error.as_deref().unwrap_or_default()
        );
    } else if !outcome.failed_templates.is_empty() {
        tracing::warn!(
            "{}: {:?} with {} failed template(s): {}",
            outcome.host,
            outcome.decision,
            outcome.failed_templates.len(),
            outcome.failed_templates.join(", ")
        );
    } else {
        tracing::info!(
            "{}: {:?} in {}ms",
            outcome.host,
            outcome.decision,
            elapsed.num_milliseconds()
        );
    }
    outcome.succeeded()
}
