//! Read-only checks before anything is touched

use async_trait::async_trait;
use tracing::{info, warn};

use hubswitch_common::resources::{str_field, BACKUP_NAMESPACE, FLEET_NAMESPACE};
use hubswitch_common::{ClusterClient, Error, FleetKind, Result};
use hubswitch_discovery::signals::{backup_state, restore_state};
use hubswitch_discovery::{classify, BackupScheduleState, HubSignals, RestoreState};

use super::{RecordedSchedule, META_BACKUP_SCHEDULE, META_EXPECTED_CLUSTERS, META_PASSIVE_RESTORE};
use crate::handler::{PhaseContext, PhaseHandler};

/// `PREFLIGHT`: verify both hubs are in the expected pre-switchover shape
pub struct Preflight;

#[async_trait]
impl PhaseHandler for Preflight {
    async fn execute(&self, ctx: &mut PhaseContext) -> Result<()> {
        require_fleet_hub(&ctx.primary).await?;
        require_fleet_hub(&ctx.secondary).await?;

        let primary = HubSignals::collect(&ctx.primary).await?;
        let secondary = HubSignals::collect(&ctx.secondary).await?;

        for (client, signals) in [(&ctx.primary, &primary), (&ctx.secondary, &secondary)] {
            let classification = classify(signals);
            if classification.invalid_configuration {
                return Err(Error::validation(format!(
                    "{}: {}",
                    client.context(),
                    classification.rationale
                )));
            }
        }

        if primary.backup != BackupScheduleState::Active {
            return Err(Error::fatal_with_context(
                ctx.primary.context(),
                format!("expected an active backup schedule, found {}", primary.backup),
            ));
        }
        if secondary.restore != RestoreState::PassiveSync {
            return Err(Error::fatal_with_context(
                ctx.secondary.context(),
                format!("expected a passive-sync restore, found {}", secondary.restore),
            ));
        }
        if secondary.backup == BackupScheduleState::Active {
            warn!(
                context = %ctx.secondary.context(),
                "secondary already runs an active backup schedule"
            );
        }

        let schedule = active_schedule(&ctx.primary).await?;
        let passive_restore = passive_restore(&ctx.secondary).await?;
        info!(
            primary = %ctx.primary.context(),
            secondary = %ctx.secondary.context(),
            managed_clusters = %primary.managed_clusters,
            schedule = %schedule.name,
            restore = %passive_restore,
            "preflight checks passed"
        );

        ctx.store
            .set_metadata(META_EXPECTED_CLUSTERS, &primary.managed_cluster_names)?;
        ctx.store.set_metadata(META_BACKUP_SCHEDULE, &schedule)?;
        ctx.store.set_metadata(META_PASSIVE_RESTORE, &passive_restore)?;
        ctx.store.flush()
    }
}

async fn require_fleet_hub(client: &ClusterClient) -> Result<()> {
    if client.exists(FleetKind::Namespace, FLEET_NAMESPACE, None).await? {
        Ok(())
    } else {
        Err(Error::fatal_with_context(
            client.context(),
            format!("namespace {FLEET_NAMESPACE} not found; not a fleet-management hub"),
        ))
    }
}

async fn active_schedule(client: &ClusterClient) -> Result<RecordedSchedule> {
    let schedules = client
        .list(FleetKind::BackupSchedule, Some(BACKUP_NAMESPACE))
        .await?;
    schedules
        .iter()
        .find(|s| backup_state(std::slice::from_ref(*s)) == BackupScheduleState::Active)
        .and_then(|s| {
            Some(RecordedSchedule {
                name: s.metadata.name.clone()?,
                spec: s.data.get("spec").cloned().unwrap_or_default(),
            })
        })
        .ok_or_else(|| Error::fatal_with_context(client.context(), "no active backup schedule"))
}

async fn passive_restore(client: &ClusterClient) -> Result<String> {
    let restores = client.list(FleetKind::Restore, Some(BACKUP_NAMESPACE)).await?;
    restores
        .iter()
        .filter(|r| restore_state(std::slice::from_ref(*r)) == RestoreState::PassiveSync)
        .filter_map(|r| r.metadata.name.clone())
        .max()
        .ok_or_else(|| {
            Error::fatal_with_context(
                client.context(),
                format!(
                    "no passive-sync restore (phase {})",
                    restores
                        .first()
                        .and_then(|r| str_field(r, &["status", "phase"]))
                        .unwrap_or("none")
                ),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use hubswitch_common::testing::{fixtures, FakeCluster};
    use hubswitch_common::ErrorKind;
    use hubswitch_discovery::signals::PHASE_BACKUP_COLLISION;

    use crate::handler::tests::context_with;
    use crate::handlers::fixtures::{self as hubs, CLUSTERS, PASSIVE_RESTORE, SCHEDULE};
    use crate::options::SwitchoverOptions;

    async fn run(
        primary: Arc<FakeCluster>,
        secondary: Arc<FakeCluster>,
    ) -> (Result<()>, PhaseContext, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context_with(&dir, primary, secondary, SwitchoverOptions::default());
        let res = Preflight.execute(&mut ctx).await;
        (res, ctx, dir)
    }

    #[tokio::test]
    async fn records_expectations_for_later_phases() {
        let primary = hubs::primary();
        let secondary = hubs::secondary();
        let (res, ctx, _dir) = run(primary.clone(), secondary.clone()).await;
        res.unwrap();

        let expected: Vec<String> = ctx.store.metadata(META_EXPECTED_CLUSTERS).unwrap().unwrap();
        assert_eq!(expected, CLUSTERS.map(String::from).to_vec());
        let schedule: RecordedSchedule = ctx.store.metadata(META_BACKUP_SCHEDULE).unwrap().unwrap();
        assert_eq!(schedule.name, SCHEDULE);
        assert_eq!(schedule.spec["veleroSchedule"], "0 */2 * * *");
        let restore: String = ctx.store.metadata(META_PASSIVE_RESTORE).unwrap().unwrap();
        assert_eq!(restore, PASSIVE_RESTORE);

        assert!(primary.mutations().is_empty());
        assert!(secondary.mutations().is_empty());
    }

    #[tokio::test]
    async fn secondary_without_fleet_namespace_is_fatal() {
        let secondary = Arc::new(FakeCluster::new());
        let (res, _, _) = run(hubs::primary(), secondary).await;
        let err = res.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(err.to_string().contains(FLEET_NAMESPACE));
    }

    #[tokio::test]
    async fn paused_primary_is_rejected() {
        let primary = Arc::new(FakeCluster::new());
        primary.insert(fixtures::fleet_namespace());
        primary.insert(fixtures::backup_schedule(SCHEDULE, "Paused", true));
        let (res, _, _) = run(primary, hubs::secondary()).await;
        let err = res.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(err.to_string().contains("paused"));
    }

    #[tokio::test]
    async fn secondary_without_passive_restore_is_rejected() {
        let secondary = Arc::new(FakeCluster::new());
        secondary.insert(fixtures::fleet_namespace());
        secondary.insert(fixtures::backup_schedule(SCHEDULE, PHASE_BACKUP_COLLISION, false));
        let (res, _, _) = run(hubs::primary(), secondary).await;
        assert_eq!(res.unwrap_err().kind(), ErrorKind::Fatal);
    }

    #[tokio::test]
    async fn dual_configuration_is_a_validation_error() {
        let primary = hubs::primary();
        primary.insert(fixtures::restore("restore-stray", true, Some("Enabled")));
        let (res, _, _) = run(primary, hubs::secondary()).await;
        let err = res.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("hub-a"));
    }
}
