//! ---
//! corral_section: "04-provisioning-orchestration"
//! corral_subsection: "binary"
//! corral_type: "source"
//! corral_scope: "code"
//! corral_description: "Binary entrypoint for the Corral daemon."
//! corral_version: "v0.1.0-alpha"
//! corral_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use corral_common::config::AppConfig;
use corral_common::logging::init_tracing;
use corral_service::{FleetRuntime, MemoryConfigStore};
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Corral daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the fleet runtime")]
    Run,
    #[command(about = "Validate the configuration and exit")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/corral.toml"));
    candidates.push(PathBuf::from("configs/corral.dev.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let config = loaded.config;
    init_tracing("corrald", &config.logging)?;
    info!(config_path = %loaded.source.display(), "configuration loaded");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config).await,
        Commands::CheckConfig => {
            println!("configuration OK ({})", loaded.source.display());
            Ok(())
        }
    }
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    let store = Arc::new(MemoryConfigStore::new());
    let runtime = FleetRuntime::new(config, store);
    runtime.start()?;
    bootstrap_defaults(&runtime)?;

    info!("daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    runtime.stop()?;
    Ok(())
}

/// Make sure the configured default version and profile exist, so containers
/// created against a fresh runtime can start.
fn bootstrap_defaults(runtime: &FleetRuntime) -> Result<()> {
    let default_version = runtime.config().default_version.clone();
    let default_profile = runtime.config().default_profile.clone();

    let permit = runtime.profile_service()?;
    if !permit.profile_versions().contains(&default_version) {
        permit.add_profile_version(default_version.clone())?;
        info!(version = %default_version, "default profile version bootstrapped");
    }
    if permit.profile(&default_version, &default_profile).is_err() {
        match permit.add_profile(&default_version, default_profile.clone(), Vec::new(), Vec::new())
        {
            Ok(_) => info!(profile = %default_profile, "default profile bootstrapped"),
            Err(err) => warn!(error = %err, "failed to bootstrap default profile"),
        }
    }
    Ok(())
}
