//! Quiesce the primary hub

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use hubswitch_common::resources::{bool_field, BACKUP_NAMESPACE, DISABLE_AUTO_IMPORT_ANNOTATION};
use hubswitch_common::{Error, FleetKind, Result};

use super::{META_EXPECTED_CLUSTERS, STEP_DISABLE_AUTO_IMPORT, STEP_PAUSE_BACKUP_SCHEDULE};
use crate::handler::{PhaseContext, PhaseHandler, StepClients};

/// `PRIMARY_PREP`: pause backups and stop the primary re-importing clusters
pub struct PrimaryPrep;

#[async_trait]
impl PhaseHandler for PrimaryPrep {
    async fn execute(&self, ctx: &mut PhaseContext) -> Result<()> {
        // the clusters seen at preflight, so a resumed run disables the same set
        let mut clusters: Vec<String> = ctx.store.metadata(META_EXPECTED_CLUSTERS)?.ok_or_else(|| {
            Error::state_corruption(
                ctx.store.path(),
                format!("metadata {META_EXPECTED_CLUSTERS} is missing from a record past preflight"),
            )
        })?;
        clusters.sort();

        ctx.run_step(STEP_PAUSE_BACKUP_SCHEDULE, pause_backup_schedules)
            .await?;

        for cluster in clusters {
            let step = format!("{STEP_DISABLE_AUTO_IMPORT}:{cluster}");
            ctx.run_step(&step, |c| disable_auto_import(c, cluster.clone()))
                .await?;
        }
        Ok(())
    }
}

async fn pause_backup_schedules(c: StepClients) -> Result<()> {
    let schedules = c
        .primary
        .list(FleetKind::BackupSchedule, Some(BACKUP_NAMESPACE))
        .await?;
    if schedules.is_empty() {
        return Err(Error::fatal_with_context(
            c.primary.context(),
            "no backup schedule to pause",
        ));
    }

    let body = json!({"spec": {"paused": true}});
    for schedule in &schedules {
        let Some(name) = schedule.metadata.name.as_deref() else {
            continue;
        };
        if bool_field(schedule, &["spec", "paused"]) == Some(true) {
            info!(schedule = %name, "backup schedule already paused");
            continue;
        }
        c.primary
            .patch(FleetKind::BackupSchedule, name, Some(BACKUP_NAMESPACE), &body)
            .await?;
    }
    Ok(())
}

async fn disable_auto_import(c: StepClients, cluster: String) -> Result<()> {
    let body = json!({"metadata": {"annotations": {DISABLE_AUTO_IMPORT_ANNOTATION: ""}}});
    c.primary
        .patch(FleetKind::ManagedCluster, &cluster, None, &body)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use hubswitch_common::testing::{fixtures, FakeCluster, Verb};
    use hubswitch_common::CallError;

    use crate::handler::tests::context_with;
    use crate::handlers::fixtures::{self as hubs, CLUSTERS, SCHEDULE};
    use crate::options::SwitchoverOptions;

    fn prepared(
        dir: &tempfile::TempDir,
        primary: Arc<FakeCluster>,
        options: SwitchoverOptions,
    ) -> crate::handler::PhaseContext {
        let mut ctx = context_with(dir, primary, hubs::secondary(), options);
        ctx.store
            .set_metadata(META_EXPECTED_CLUSTERS, &CLUSTERS.to_vec())
            .unwrap();
        ctx
    }

    fn annotated(fake: &FakeCluster, cluster: &str) -> bool {
        fake.object(FleetKind::ManagedCluster, cluster, None)
            .and_then(|c| c.metadata.annotations)
            .is_some_and(|a| a.contains_key(DISABLE_AUTO_IMPORT_ANNOTATION))
    }

    #[tokio::test]
    async fn pauses_schedule_and_disables_auto_import() {
        let dir = tempfile::tempdir().unwrap();
        let primary = hubs::primary();
        let mut ctx = prepared(&dir, primary.clone(), SwitchoverOptions::default());

        PrimaryPrep.execute(&mut ctx).await.unwrap();

        let schedule = primary
            .object(FleetKind::BackupSchedule, SCHEDULE, Some(BACKUP_NAMESPACE))
            .unwrap();
        assert_eq!(bool_field(&schedule, &["spec", "paused"]), Some(true));
        for cluster in CLUSTERS {
            assert!(annotated(&primary, cluster));
        }
        assert!(!annotated(&primary, "local-cluster"));

        let steps: Vec<&str> = ctx.record().step_ids().collect();
        assert_eq!(
            steps,
            vec![
                "pause-backup-schedule",
                "disable-auto-import:prod-east",
                "disable-auto-import:prod-west",
            ]
        );
    }

    #[tokio::test]
    async fn completed_steps_are_not_reapplied() {
        let dir = tempfile::tempdir().unwrap();
        let primary = hubs::primary();
        let mut ctx = prepared(&dir, primary.clone(), SwitchoverOptions::default());
        ctx.store.mark_step_completed(STEP_PAUSE_BACKUP_SCHEDULE).unwrap();
        ctx.store.mark_step_completed("disable-auto-import:prod-east").unwrap();

        PrimaryPrep.execute(&mut ctx).await.unwrap();

        let patched: Vec<_> = primary
            .mutations()
            .into_iter()
            .map(|c| (c.plural, c.name))
            .collect();
        assert_eq!(
            patched,
            vec![("managedclusters".to_string(), Some("prod-west".to_string()))]
        );
    }

    #[tokio::test]
    async fn failure_midway_resumes_at_the_failed_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let primary = hubs::primary();
        let mut ctx = prepared(&dir, primary.clone(), SwitchoverOptions::default());

        ctx.run_step(STEP_PAUSE_BACKUP_SCHEDULE, pause_backup_schedules)
            .await
            .unwrap();
        // first cluster patch is forbidden
        primary.fail(Verb::Patch, CallError::Forbidden("rbac".to_string()), Some(1));
        assert!(PrimaryPrep.execute(&mut ctx).await.is_err());
        assert_eq!(
            ctx.record().in_progress_step.as_deref(),
            Some("disable-auto-import:prod-east")
        );

        PrimaryPrep.execute(&mut ctx).await.unwrap();
        assert!(annotated(&primary, "prod-east"));
        assert!(annotated(&primary, "prod-west"));
        assert_eq!(
            primary
                .calls()
                .iter()
                .filter(|c| c.verb == Verb::Patch && c.plural == "backupschedules")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn missing_schedule_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let primary = Arc::new(FakeCluster::new());
        let mut ctx = prepared(&dir, primary, SwitchoverOptions::default());
        let err = PrimaryPrep.execute(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind(), hubswitch_common::ErrorKind::Fatal);
        assert!(!ctx.store.is_step_completed(STEP_PAUSE_BACKUP_SCHEDULE));
    }

    #[tokio::test]
    async fn dry_run_issues_no_mutations() {
        let dir = tempfile::tempdir().unwrap();
        let primary = hubs::primary();
        let options = SwitchoverOptions {
            dry_run: true,
            ..SwitchoverOptions::default()
        };
        let mut ctx = prepared(&dir, primary.clone(), options);

        PrimaryPrep.execute(&mut ctx).await.unwrap();
        assert!(primary.mutations().is_empty());
        assert!(!annotated(&primary, "prod-east"));
        assert!(ctx.store.is_step_completed("disable-auto-import:prod-west"));
    }

    #[tokio::test]
    async fn recorded_clusters_drive_the_steps_not_the_live_list() {
        let dir = tempfile::tempdir().unwrap();
        let primary = hubs::primary();
        // joined after preflight recorded its expectations
        primary.insert(fixtures::managed_cluster("prod-late", true));
        let mut ctx = prepared(&dir, primary.clone(), SwitchoverOptions::default());

        PrimaryPrep.execute(&mut ctx).await.unwrap();

        assert!(!annotated(&primary, "prod-late"));
        assert!(!ctx.store.is_step_completed("disable-auto-import:prod-late"));
        for cluster in CLUSTERS {
            assert!(annotated(&primary, cluster));
        }
    }

    #[tokio::test]
    async fn missing_recorded_clusters_is_state_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let primary = hubs::primary();
        let mut ctx = context_with(&dir, primary.clone(), hubs::secondary(), SwitchoverOptions::default());

        let err = PrimaryPrep.execute(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind(), hubswitch_common::ErrorKind::StateCorruption);
        assert!(primary.mutations().is_empty());
    }
}
