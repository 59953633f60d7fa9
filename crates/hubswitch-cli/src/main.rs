//! hubswitch CLI
//!
//! Discover fleet-management hub roles and run resumable hub switchovers.

use std::process::ExitCode;

use clap::Parser;

use hubswitch_cli::{exit_code, Cli};
use hubswitch_common::telemetry::init_tracing;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            if let Some((phase, step)) = e.phase_context() {
                match step {
                    Some(step) => eprintln!("failed in phase {phase} at step {step}"),
                    None => eprintln!("failed in phase {phase}"),
                }
                eprintln!("fix the cause and re-run the same command to resume");
            }
            ExitCode::from(exit_code(&e))
        }
    }
}
