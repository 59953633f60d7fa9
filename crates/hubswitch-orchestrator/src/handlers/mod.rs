//! Built-in phase handlers for the fleet-management switchover
//!
//! Each phase lives in its own module. Side effects are wrapped in named
//! steps so a re-run after a crash or failure skips what already happened.

mod activation;
mod finalization;
mod post_activation;
mod preflight;
mod primary_prep;

pub use activation::Activation;
pub use finalization::Finalization;
pub use post_activation::PostActivation;
pub use preflight::Preflight;
pub use primary_prep::PrimaryPrep;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::handler::PhaseHandlers;

/// Metadata key: managed clusters the new hub must report available
pub const META_EXPECTED_CLUSTERS: &str = "expectedManagedClusters";
/// Metadata key: the primary's backup schedule, for re-creation on the new hub
pub const META_BACKUP_SCHEDULE: &str = "primaryBackupSchedule";
/// Metadata key: name of the secondary's passive-sync restore
pub const META_PASSIVE_RESTORE: &str = "passiveRestore";

/// Step: pause the primary's backup schedule
pub const STEP_PAUSE_BACKUP_SCHEDULE: &str = "pause-backup-schedule";
/// Step prefix: stop the primary re-importing one managed cluster
pub const STEP_DISABLE_AUTO_IMPORT: &str = "disable-auto-import";
/// Step: switch the passive restore to activate managed clusters
pub const STEP_ACTIVATE_RESTORE: &str = "activate-passive-restore";
/// Step: wait for the activation restore to finish
pub const STEP_WAIT_RESTORE: &str = "wait-restore-finished";
/// Step: wait for managed clusters to report available on the new hub
pub const STEP_WAIT_MANAGED_CLUSTERS: &str = "wait-managed-clusters-available";
/// Step: enable backups on the new hub
pub const STEP_ENABLE_BACKUP_SCHEDULE: &str = "enable-backup-schedule";
/// Step: delete the old hub's backup schedule
pub const STEP_DELETE_OLD_BACKUP_SCHEDULE: &str = "delete-old-backup-schedule";

/// A backup schedule captured during preflight
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordedSchedule {
    /// Schedule name
    pub name: String,
    /// Schedule spec as found on the primary
    pub spec: Value,
}

/// The built-in handler for every phase
pub fn builtin_handlers() -> PhaseHandlers {
    PhaseHandlers {
        preflight: Box::new(Preflight),
        primary_prep: Box::new(PrimaryPrep),
        activation: Box::new(Activation),
        post_activation: Box::new(PostActivation),
        finalization: Box::new(Finalization),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::sync::Arc;

    use serde_json::json;

    use hubswitch_common::resources::BACKUP_NAMESPACE;
    use hubswitch_common::testing::{fixtures, FakeCluster};
    use hubswitch_common::FleetKind;

    pub const SCHEDULE: &str = "schedule-acm";
    pub const PASSIVE_RESTORE: &str = "restore-acm-passive-sync";
    pub const CLUSTERS: [&str; 2] = ["prod-east", "prod-west"];

    /// Primary hub: active schedule and two available managed clusters
    pub fn primary() -> Arc<FakeCluster> {
        let fake = Arc::new(FakeCluster::new());
        fake.insert(fixtures::fleet_namespace());
        fake.insert(fixtures::local_cluster());
        fake.insert(fixtures::backup_schedule(SCHEDULE, "Enabled", false));
        for name in CLUSTERS {
            fake.insert(fixtures::managed_cluster(name, true));
        }
        fake
    }

    /// Secondary hub: passive-sync restore that finishes once activated, and
    /// managed clusters that are available after the restore
    pub fn secondary() -> Arc<FakeCluster> {
        let fake = Arc::new(FakeCluster::new());
        fake.insert(fixtures::fleet_namespace());
        fake.insert(fixtures::local_cluster());
        fake.insert(fixtures::restore(PASSIVE_RESTORE, true, Some("Enabled")));
        fake.on_patch(
            FleetKind::Restore,
            PASSIVE_RESTORE,
            Some(BACKUP_NAMESPACE),
            json!({"phase": "Finished"}),
        );
        for name in CLUSTERS {
            fake.insert(fixtures::managed_cluster(name, true));
        }
        fake
    }
}
