//! Conductor - Main Entry Point
//! Starts a fleet of services in dependency order and supervises it

mod cli;
mod commands;
mod config;
mod logging;
mod signals;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use cli::{Cli, Commands};
use config::ConductorConfig;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Initialize logging (kept alive until exit so file output is flushed)
    let _log_guard = logging::init()?;

    info!(version = VERSION, core = conductor_core::VERSION, "Conductor starting");

    // 2. Load configuration and dispatch
    match cli.command {
        Commands::Up {
            config,
            exit_on_crash,
        } => {
            info!(config = %config.display(), "Loading configuration");
            let config = ConductorConfig::load(&config)?;
            commands::up(config, exit_on_crash).await?;
        }
        Commands::Plan { config, json } => {
            let config = ConductorConfig::load(&config)?;
            commands::plan(&config, json)?;
        }
    }

    info!("Conductor exiting");
    Ok(())
}
