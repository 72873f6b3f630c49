//! Command-line interface definition

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_PATH;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "Start a fleet of services in dependency order and keep it supervised", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start every service, supervise until a signal arrives, then shut down
    Up {
        /// Config file
        #[arg(short, long, env = "CONDUCTOR_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Shut the fleet down when any service crashes
        #[arg(long)]
        exit_on_crash: bool,
    },

    /// Validate the config and print the start order without launching anything
    Plan {
        /// Config file
        #[arg(short, long, env = "CONDUCTOR_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}
