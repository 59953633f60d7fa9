//! Turn backups on for the new hub and clean up the old one

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use hubswitch_common::resources::{bool_field, new_object, BACKUP_NAMESPACE};
use hubswitch_common::{Error, FleetKind, Result};

use super::{
    RecordedSchedule, META_BACKUP_SCHEDULE, STEP_DELETE_OLD_BACKUP_SCHEDULE,
    STEP_ENABLE_BACKUP_SCHEDULE,
};
use crate::handler::{PhaseContext, PhaseHandler, StepClients};

/// `FINALIZATION`: enable backups on the secondary, optionally delete the
/// primary's schedule
pub struct Finalization;

#[async_trait]
impl PhaseHandler for Finalization {
    async fn execute(&self, ctx: &mut PhaseContext) -> Result<()> {
        let schedule: RecordedSchedule = ctx.store.metadata(META_BACKUP_SCHEDULE)?.ok_or_else(|| {
            Error::fatal("no backup schedule recorded; preflight has not completed")
        })?;

        ctx.run_step(STEP_ENABLE_BACKUP_SCHEDULE, |c| enable_backup_schedule(c, schedule))
            .await?;

        if !ctx.options.delete_old_backup_schedule {
            return Ok(());
        }
        if !ctx.options.confirm_deletion && !ctx.store.is_step_completed(STEP_DELETE_OLD_BACKUP_SCHEDULE) {
            return Err(Error::validation_for_field(
                "--confirm-deletion",
                format!(
                    "deleting the backup schedule on {} requires --confirm-deletion",
                    ctx.primary.context()
                ),
            ));
        }
        ctx.run_step(STEP_DELETE_OLD_BACKUP_SCHEDULE, delete_old_backup_schedules)
            .await?;
        Ok(())
    }
}

async fn enable_backup_schedule(c: StepClients, recorded: RecordedSchedule) -> Result<()> {
    let existing = c
        .secondary
        .list(FleetKind::BackupSchedule, Some(BACKUP_NAMESPACE))
        .await?;

    if existing.is_empty() {
        let mut spec = recorded.spec;
        if let Value::Object(map) = &mut spec {
            map.insert("paused".to_string(), Value::Bool(false));
        }
        let schedule = new_object(
            FleetKind::BackupSchedule,
            &recorded.name,
            Some(BACKUP_NAMESPACE),
            json!({ "spec": spec }),
        );
        c.secondary.create(FleetKind::BackupSchedule, &schedule).await?;
        return Ok(());
    }

    let body = json!({"spec": {"paused": false}});
    for schedule in &existing {
        let Some(name) = schedule.metadata.name.as_deref() else {
            continue;
        };
        if bool_field(schedule, &["spec", "paused"]) != Some(true) {
            info!(schedule = %name, "backup schedule already enabled");
            continue;
        }
        c.secondary
            .patch(FleetKind::BackupSchedule, name, Some(BACKUP_NAMESPACE), &body)
            .await?;
    }
    Ok(())
}

async fn delete_old_backup_schedules(c: StepClients) -> Result<()> {
    let schedules = c
        .primary
        .list(FleetKind::BackupSchedule, Some(BACKUP_NAMESPACE))
        .await?;
    if schedules.is_empty() {
        warn!(context = %c.primary.context(), "no backup schedule left to delete");
    }
    for name in schedules.iter().filter_map(|s| s.metadata.name.as_deref()) {
        c.primary
            .delete(FleetKind::BackupSchedule, name, Some(BACKUP_NAMESPACE))
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use hubswitch_common::resources::str_field;
    use hubswitch_common::testing::{fixtures, FakeCluster, Verb};
    use hubswitch_common::ErrorKind;

    use crate::handler::tests::context_with;
    use crate::handlers::fixtures::{self as hubs, SCHEDULE};
    use crate::options::SwitchoverOptions;

    fn recorded() -> RecordedSchedule {
        RecordedSchedule {
            name: SCHEDULE.to_string(),
            spec: json!({"veleroSchedule": "0 */2 * * *", "veleroTtl": "120h", "paused": true}),
        }
    }

    fn options(delete: bool, confirm: bool) -> SwitchoverOptions {
        SwitchoverOptions {
            delete_old_backup_schedule: delete,
            confirm_deletion: confirm,
            ..SwitchoverOptions::default()
        }
    }

    #[tokio::test]
    async fn creates_schedule_from_recorded_spec() {
        let dir = tempfile::tempdir().unwrap();
        let secondary = hubs::secondary();
        let mut ctx = context_with(&dir, hubs::primary(), secondary.clone(), options(false, false));
        ctx.store.set_metadata(META_BACKUP_SCHEDULE, &recorded()).unwrap();

        Finalization.execute(&mut ctx).await.unwrap();

        let created = secondary
            .object(FleetKind::BackupSchedule, SCHEDULE, Some(BACKUP_NAMESPACE))
            .unwrap();
        assert_eq!(bool_field(&created, &["spec", "paused"]), Some(false));
        assert_eq!(str_field(&created, &["spec", "veleroSchedule"]), Some("0 */2 * * *"));
        assert!(!ctx.store.is_step_completed(STEP_DELETE_OLD_BACKUP_SCHEDULE));
    }

    #[tokio::test]
    async fn unpauses_an_existing_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let secondary = hubs::secondary();
        secondary.insert(fixtures::backup_schedule(SCHEDULE, "Paused", true));
        let mut ctx = context_with(&dir, hubs::primary(), secondary.clone(), options(false, false));
        ctx.store.set_metadata(META_BACKUP_SCHEDULE, &recorded()).unwrap();

        Finalization.execute(&mut ctx).await.unwrap();

        assert_eq!(secondary.calls_for(Verb::Create), 0);
        let schedule = secondary
            .object(FleetKind::BackupSchedule, SCHEDULE, Some(BACKUP_NAMESPACE))
            .unwrap();
        assert_eq!(bool_field(&schedule, &["spec", "paused"]), Some(false));
    }

    #[tokio::test]
    async fn deletion_without_confirmation_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let primary = hubs::primary();
        let mut ctx = context_with(&dir, primary.clone(), hubs::secondary(), options(true, false));
        ctx.store.set_metadata(META_BACKUP_SCHEDULE, &recorded()).unwrap();

        let err = Finalization.execute(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("--confirm-deletion"));
        assert_eq!(primary.calls_for(Verb::Delete), 0);
        assert_eq!(primary.count(FleetKind::BackupSchedule), 1);
    }

    #[tokio::test]
    async fn confirmed_deletion_removes_old_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let primary = hubs::primary();
        let mut ctx = context_with(&dir, primary.clone(), hubs::secondary(), options(true, true));
        ctx.store.set_metadata(META_BACKUP_SCHEDULE, &recorded()).unwrap();

        Finalization.execute(&mut ctx).await.unwrap();
        assert_eq!(primary.count(FleetKind::BackupSchedule), 0);
        assert!(ctx.store.is_step_completed(STEP_DELETE_OLD_BACKUP_SCHEDULE));
    }

    #[tokio::test]
    async fn missing_recorded_schedule_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let secondary = Arc::new(FakeCluster::new());
        let mut ctx = context_with(&dir, hubs::primary(), secondary.clone(), options(false, false));

        let err = Finalization.execute(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(secondary.calls().is_empty());
    }
}
