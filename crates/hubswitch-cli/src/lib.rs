//! hubswitch CLI library

pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use hubswitch_common::telemetry::LogFormat;
use hubswitch_common::{Error, ErrorKind, Result};

/// hubswitch - fleet-management hub discovery and switchover
#[derive(Parser, Debug)]
#[command(name = "hubswitch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log output format (text or json)
    #[arg(long, global = true, default_value = "text", env = "HUBSWITCH_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Path to kubeconfig file (defaults to KUBECONFIG or ~/.kube/config)
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify every reachable hub and propose a (primary, secondary) pair
    Discover(commands::discover::DiscoverArgs),
    /// Run or resume a switchover from the primary to the secondary hub
    Switchover(commands::switchover::SwitchoverArgs),
    /// Show the durable record of a switchover
    Status(commands::status::StatusArgs),
}

/// How reports are printed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Aligned text table
    #[default]
    Table,
    /// Pretty-printed JSON
    Json,
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let kubeconfig = self.kubeconfig.as_deref();
        match self.command {
            Commands::Discover(args) => commands::discover::run(args, kubeconfig).await,
            Commands::Switchover(args) => commands::switchover::run(args, kubeconfig).await,
            Commands::Status(args) => commands::status::run(args),
        }
    }
}

/// Process exit code for a failed command
pub fn exit_code(error: &Error) -> u8 {
    match error.kind() {
        ErrorKind::Fatal | ErrorKind::Transient => 1,
        ErrorKind::Validation => 2,
        ErrorKind::StateCorruption => 3,
    }
}
