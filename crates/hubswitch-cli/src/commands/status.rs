//! `hubswitch status`: read-only view of a switchover record.

use std::fmt::Write as _;
use std::path::PathBuf;

use clap::Args;

use hubswitch_common::config::EnvOverrides;
use hubswitch_common::{Error, Result, SwitchoverConfig};
use hubswitch_state::{StateStore, SwitchoverRecord};

use crate::OutputFormat;

/// Show the durable record of a switchover
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Context of the hub being switched away from
    #[arg(long)]
    pub primary: String,

    /// Context of the hub taking over
    #[arg(long)]
    pub secondary: String,

    /// Show the dry-run record instead of the real one
    #[arg(long)]
    pub dry_run: bool,

    /// Record file (overrides HUBSWITCH_STATE_DIR)
    #[arg(long)]
    pub state_file: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,
}

/// Run the status command.
pub fn run(args: StatusArgs) -> Result<()> {
    let env = EnvOverrides::from_env();
    let config = SwitchoverConfig::resolve(args.state_file.as_deref(), &env, args.dry_run)?;
    let path = config
        .state
        .record_path(&args.primary, &args.secondary, config.dry_run);

    match StateStore::load(&path)? {
        Some(record) => println!("{}", render(&record, args.output)?),
        None => println!(
            "No switchover record for {} -> {} at {}",
            args.primary,
            args.secondary,
            path.display()
        ),
    }
    Ok(())
}

/// Render a record in the requested format
pub fn render(record: &SwitchoverRecord, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(record)
            .map_err(|e| Error::serialization_for_kind("SwitchoverRecord", e.to_string())),
        OutputFormat::Table => Ok(render_table(record)),
    }
}

fn render_table(record: &SwitchoverRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Switchover:  {} -> {}", record.primary, record.secondary);
    let _ = writeln!(out, "Dry run:     {}", record.dry_run);
    let _ = writeln!(
        out,
        "Phase:       {} (since {})",
        record.phase,
        record.phase_entered_at.to_rfc3339()
    );
    if !record.phase.is_terminal() || record.last_failure.is_some() {
        let _ = writeln!(out, "Resumes at:  {}", record.resume_phase());
    }
    let _ = writeln!(out, "Created:     {}", record.created_at.to_rfc3339());
    let _ = writeln!(out, "Updated:     {}", record.updated_at.to_rfc3339());
    if let Some(step) = &record.in_progress_step {
        let _ = writeln!(out, "In progress: {step}");
    }

    let _ = writeln!(out, "\nCompleted steps ({}):", record.completed_steps.len());
    for step in &record.completed_steps {
        let _ = writeln!(
            out,
            "  {:<40} {:<16} {}",
            step.id,
            step.phase,
            step.completed_at.to_rfc3339()
        );
    }

    if let Some(failure) = &record.last_failure {
        let _ = writeln!(out, "\nLast failure:");
        let _ = writeln!(out, "  phase:   {}", failure.phase);
        if let Some(step) = &failure.step {
            let _ = writeln!(out, "  step:    {step}");
        }
        let _ = writeln!(out, "  kind:    {}", failure.kind);
        let _ = writeln!(out, "  at:      {}", failure.failed_at.to_rfc3339());
        let _ = writeln!(out, "  message: {}", failure.message);
    }
    if record.failure_history.len() > 1 {
        let _ = writeln!(out, "\n{} failures recorded in total", record.failure_history.len());
    }
    out
}
