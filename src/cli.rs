//! Command-line surface for the manager binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "v2mgr", version, about = "Subscription node manager")]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true, default_value = "config.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the manager daemon
    Run,
    /// Print brief status and exit
    Status,
    /// Probe one config immediately and exit
    Reprobe { id: String },
    /// Clear a config's deleted flag and exit
    Rollback { id: String },
    /// Load and validate the config, then exit
    ConfigTest,
}
