//! Activate the passive restore on the secondary

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use hubswitch_common::resources::BACKUP_NAMESPACE;
use hubswitch_common::wait::poll_until;
use hubswitch_common::{Error, FleetKind, Result};
use hubswitch_discovery::signals::restore_state;
use hubswitch_discovery::RestoreState;

use super::{META_PASSIVE_RESTORE, STEP_ACTIVATE_RESTORE, STEP_WAIT_RESTORE};
use crate::handler::{PhaseContext, PhaseHandler, StepClients};

/// Backup name that makes a restore bring managed clusters over
const LATEST_BACKUP: &str = "latest";

/// `ACTIVATION`: restore managed clusters onto the secondary and wait for it
pub struct Activation;

#[async_trait]
impl PhaseHandler for Activation {
    async fn execute(&self, ctx: &mut PhaseContext) -> Result<()> {
        let restore: String = ctx.store.metadata(META_PASSIVE_RESTORE)?.ok_or_else(|| {
            Error::fatal("no passive restore recorded; preflight has not completed")
        })?;

        let name = restore.clone();
        ctx.run_step(STEP_ACTIVATE_RESTORE, |c| activate_restore(c, name))
            .await?;

        let dry_run = ctx.is_dry_run();
        let timeout = ctx.options.restore_timeout;
        let interval = ctx.options.poll_interval;
        ctx.run_step(STEP_WAIT_RESTORE, |c| async move {
            if dry_run {
                info!(restore = %restore, "dry-run: not waiting for restore");
                return Ok(());
            }
            wait_restore_finished(c, restore, timeout, interval).await
        })
        .await?;
        Ok(())
    }
}

async fn activate_restore(c: StepClients, restore: String) -> Result<()> {
    let body = json!({"spec": {"veleroManagedClustersBackupName": LATEST_BACKUP}});
    c.secondary
        .patch(FleetKind::Restore, &restore, Some(BACKUP_NAMESPACE), &body)
        .await?;
    Ok(())
}

async fn wait_restore_finished(
    c: StepClients,
    restore: String,
    timeout: std::time::Duration,
    interval: std::time::Duration,
) -> Result<()> {
    info!(restore = %restore, timeout_secs = timeout.as_secs(), "waiting for restore to finish");
    poll_until(
        timeout,
        interval,
        format!("restore {restore} did not finish within {}s", timeout.as_secs()),
        || {
            let client = c.secondary.clone();
            let restore = restore.clone();
            async move {
                let current = client
                    .require(FleetKind::Restore, &restore, Some(BACKUP_NAMESPACE))
                    .await?;
                Ok(restore_state(std::slice::from_ref(&current)) == RestoreState::Finished)
            }
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use hubswitch_common::resources::str_field;
    use hubswitch_common::testing::Verb;
    use hubswitch_common::{CallError, ErrorKind};

    use crate::handler::tests::context_with;
    use crate::handlers::fixtures::{self as hubs, PASSIVE_RESTORE};
    use crate::options::SwitchoverOptions;

    fn options(dry_run: bool) -> SwitchoverOptions {
        SwitchoverOptions {
            dry_run,
            restore_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
            ..SwitchoverOptions::default()
        }
    }

    #[tokio::test]
    async fn activates_and_waits_for_finish() {
        let dir = tempfile::tempdir().unwrap();
        let secondary = hubs::secondary();
        let mut ctx = context_with(&dir, hubs::primary(), secondary.clone(), options(false));
        ctx.store.set_metadata(META_PASSIVE_RESTORE, &PASSIVE_RESTORE).unwrap();

        Activation.execute(&mut ctx).await.unwrap();

        let restore = secondary
            .object(FleetKind::Restore, PASSIVE_RESTORE, Some(BACKUP_NAMESPACE))
            .unwrap();
        assert_eq!(
            str_field(&restore, &["spec", "veleroManagedClustersBackupName"]),
            Some(LATEST_BACKUP)
        );
        assert!(ctx.store.is_step_completed(STEP_ACTIVATE_RESTORE));
        assert!(ctx.store.is_step_completed(STEP_WAIT_RESTORE));
    }

    #[tokio::test]
    async fn restore_that_never_finishes_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let secondary = std::sync::Arc::new(hubswitch_common::testing::FakeCluster::new());
        secondary.insert(hubswitch_common::testing::fixtures::restore(
            PASSIVE_RESTORE,
            true,
            Some("Enabled"),
        ));
        let mut ctx = context_with(&dir, hubs::primary(), secondary, options(false));
        ctx.store.set_metadata(META_PASSIVE_RESTORE, &PASSIVE_RESTORE).unwrap();

        let err = Activation.execute(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(err.to_string().contains("did not finish"));
        assert!(ctx.store.is_step_completed(STEP_ACTIVATE_RESTORE));
        assert!(!ctx.store.is_step_completed(STEP_WAIT_RESTORE));
    }

    #[tokio::test]
    async fn forbidden_patch_leaves_step_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let secondary = hubs::secondary();
        secondary.fail(Verb::Patch, CallError::Forbidden("rbac".to_string()), Some(1));
        let mut ctx = context_with(&dir, hubs::primary(), secondary.clone(), options(false));
        ctx.store.set_metadata(META_PASSIVE_RESTORE, &PASSIVE_RESTORE).unwrap();

        assert!(Activation.execute(&mut ctx).await.is_err());
        assert!(!ctx.store.is_step_completed(STEP_ACTIVATE_RESTORE));

        Activation.execute(&mut ctx).await.unwrap();
        assert_eq!(secondary.calls_for(Verb::Patch), 2);
    }

    #[tokio::test]
    async fn dry_run_skips_the_wait() {
        let dir = tempfile::tempdir().unwrap();
        let secondary = hubs::secondary();
        let mut ctx = context_with(&dir, hubs::primary(), secondary.clone(), options(true));
        ctx.store.set_metadata(META_PASSIVE_RESTORE, &PASSIVE_RESTORE).unwrap();

        Activation.execute(&mut ctx).await.unwrap();
        assert!(secondary.mutations().is_empty());
        let restore = secondary
            .object(FleetKind::Restore, PASSIVE_RESTORE, Some(BACKUP_NAMESPACE))
            .unwrap();
        assert_eq!(
            str_field(&restore, &["spec", "veleroManagedClustersBackupName"]),
            Some("skip")
        );
    }

    #[tokio::test]
    async fn missing_preflight_metadata_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context_with(&dir, hubs::primary(), hubs::secondary(), options(false));
        let err = Activation.execute(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }
}
