//! `hubswitch switchover`: run or resume a hub switchover.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use tracing::{info, warn};

use hubswitch_common::config::EnvOverrides;
use hubswitch_common::context::KubeconfigClientFactory;
use hubswitch_common::{ClientFactory, Error, Result, SwitchoverConfig};
use hubswitch_orchestrator::options::{
    DEFAULT_MANAGED_CLUSTER_TIMEOUT, DEFAULT_POLL_INTERVAL, DEFAULT_RESTORE_TIMEOUT,
};
use hubswitch_orchestrator::{builtin_handlers, Orchestrator, PhaseContext, SwitchoverOptions};
use hubswitch_state::{Phase, StateStore};

use super::interrupt;

/// Switch the fleet from the primary hub to the secondary hub
#[derive(Args, Debug)]
pub struct SwitchoverArgs {
    /// Context of the hub being switched away from
    #[arg(long)]
    pub primary: String,

    /// Context of the hub taking over
    #[arg(long)]
    pub secondary: String,

    /// Simulate every mutation; nothing is changed on either hub
    #[arg(long)]
    pub dry_run: bool,

    /// Record file for this switchover (overrides HUBSWITCH_STATE_DIR)
    #[arg(long)]
    pub state_file: Option<PathBuf>,

    /// Discard any existing record and start from the beginning
    #[arg(long)]
    pub reset_state: bool,

    /// Delete the old hub's backup schedule once backups run on the new hub
    #[arg(long)]
    pub delete_old_backup_schedule: bool,

    /// Confirm --delete-old-backup-schedule
    #[arg(long, requires = "delete_old_backup_schedule")]
    pub confirm_deletion: bool,

    /// Seconds to wait for the activation restore to finish
    #[arg(long, default_value_t = DEFAULT_RESTORE_TIMEOUT.as_secs())]
    pub restore_timeout: u64,

    /// Seconds to wait for managed clusters to report available on the new hub
    #[arg(long, default_value_t = DEFAULT_MANAGED_CLUSTER_TIMEOUT.as_secs())]
    pub managed_cluster_timeout: u64,

    /// Seconds between status polls
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_secs())]
    pub poll_interval: u64,
}

impl SwitchoverArgs {
    /// Check flag combinations before anything is opened or contacted
    pub fn validate(&self) -> Result<()> {
        if self.primary == self.secondary {
            return Err(Error::validation_for_field(
                "--secondary",
                "primary and secondary must be different contexts",
            ));
        }
        if self.delete_old_backup_schedule && !self.confirm_deletion {
            return Err(Error::validation_for_field(
                "--confirm-deletion",
                "--delete-old-backup-schedule requires --confirm-deletion",
            ));
        }
        if self.poll_interval == 0 {
            return Err(Error::validation_for_field("--poll-interval", "must be at least 1 second"));
        }
        Ok(())
    }

    /// Handler options for this invocation
    pub fn options(&self) -> SwitchoverOptions {
        SwitchoverOptions {
            dry_run: self.dry_run,
            delete_old_backup_schedule: self.delete_old_backup_schedule,
            confirm_deletion: self.confirm_deletion,
            restore_timeout: Duration::from_secs(self.restore_timeout),
            managed_cluster_timeout: Duration::from_secs(self.managed_cluster_timeout),
            poll_interval: Duration::from_secs(self.poll_interval),
        }
    }
}

/// Open (or reset) the record for this invocation
pub fn open_store(args: &SwitchoverArgs, config: &SwitchoverConfig) -> Result<StateStore> {
    let path = config
        .state
        .record_path(&args.primary, &args.secondary, config.dry_run);
    if args.reset_state {
        warn!(path = %path.display(), "discarding existing switchover record");
        StateStore::reset(path, &args.primary, &args.secondary, config.dry_run)
    } else {
        StateStore::open(path, &args.primary, &args.secondary, config.dry_run)
    }
}

/// Run the switchover command.
pub async fn run(args: SwitchoverArgs, kubeconfig: Option<&Path>) -> Result<()> {
    args.validate()?;
    let env = EnvOverrides::from_env();
    let config = SwitchoverConfig::resolve(args.state_file.as_deref(), &env, args.dry_run)?;

    let store = open_store(&args, &config)?;
    info!(
        primary = %args.primary,
        secondary = %args.secondary,
        dry_run = config.dry_run,
        record = %store.path().display(),
        phase = %store.record().phase,
        "starting switchover"
    );

    let factory = KubeconfigClientFactory::load(kubeconfig, config.client.clone(), config.dry_run)?;
    let primary = factory
        .client_for(&factory.context(&args.primary)?)
        .await?;
    let secondary = factory
        .client_for(&factory.context(&args.secondary)?)
        .await?;

    let mut ctx = PhaseContext::new(store, primary, secondary, args.options());
    let orchestrator = Orchestrator::new(builtin_handlers());
    let outcome = orchestrator.run_until_cancelled(&mut ctx, interrupt()).await;
    let finished = ctx.finish();
    let phase = outcome?;
    let record = finished?;

    let mode = if record.dry_run { " (dry run)" } else { "" };
    if phase == Phase::Completed {
        println!(
            "Switchover {} -> {} completed{}; {} step(s) recorded.",
            record.primary,
            record.secondary,
            mode,
            record.completed_steps.len()
        );
    } else {
        println!("Switchover stopped in phase {phase}{mode}.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    use crate::{Cli, Commands};

    fn args(extra: &[&str]) -> SwitchoverArgs {
        let mut argv = vec!["hubswitch", "switchover", "--primary", "hub-a", "--secondary", "hub-b"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Switchover(args) => args,
            other => panic!("expected switchover, got {other:?}"),
        }
    }

    fn config(dir: &Path, dry_run: bool) -> SwitchoverConfig {
        SwitchoverConfig {
            state: hubswitch_common::StateLocation::Directory(dir.to_path_buf()),
            dry_run,
            client: Default::default(),
            discovery: Default::default(),
        }
    }

    #[test]
    fn same_context_twice_is_rejected() {
        let mut a = args(&[]);
        a.secondary = "hub-a".to_string();
        assert_eq!(a.validate().unwrap_err().kind(), hubswitch_common::ErrorKind::Validation);
    }

    #[test]
    fn delete_without_confirmation_fails_before_anything_runs() {
        let err = args(&["--delete-old-backup-schedule"]).validate().unwrap_err();
        assert!(err.to_string().contains("--confirm-deletion"));
    }

    #[test]
    fn options_carry_timeouts() {
        let opts = args(&["--restore-timeout", "90", "--poll-interval", "3", "--dry-run"]).options();
        assert!(opts.dry_run);
        assert_eq!(opts.restore_timeout, Duration::from_secs(90));
        assert_eq!(opts.poll_interval, Duration::from_secs(3));
        assert_eq!(opts.managed_cluster_timeout, DEFAULT_MANAGED_CLUSTER_TIMEOUT);
    }

    #[test]
    fn reset_replaces_an_existing_record() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), false);

        let mut store = open_store(&args(&[]), &cfg).unwrap();
        store.mark_step_completed("pause-backup-schedule").unwrap();
        drop(store);

        let reopened = open_store(&args(&[]), &cfg).unwrap();
        assert!(reopened.is_step_completed("pause-backup-schedule"));

        let reset = open_store(&args(&["--reset-state"]), &cfg).unwrap();
        assert!(!reset.is_step_completed("pause-backup-schedule"));
        assert_eq!(reset.record().phase, Phase::Init);
    }

    #[test]
    fn dry_run_uses_a_separate_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut real = open_store(&args(&[]), &config(dir.path(), false)).unwrap();
        real.mark_step_completed("pause-backup-schedule").unwrap();

        let dry = open_store(&args(&["--dry-run"]), &config(dir.path(), true)).unwrap();
        assert_ne!(dry.path(), real.path());
        assert!(!dry.is_step_completed("pause-backup-schedule"));
    }
}
