//! Backup, restore and managed-cluster signals read from a hub

use std::cmp::Ordering;
use std::fmt;

use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};

use hubswitch_common::resources::{
    bool_field, has_true_condition, is_local_cluster, str_field, BACKUP_NAMESPACE,
    CONDITION_AVAILABLE,
};
use hubswitch_common::{ClusterClient, FleetKind, Result};

/// BackupSchedule phase reported when a restored schedule clashes with existing backups
pub const PHASE_BACKUP_COLLISION: &str = "BackupCollision";
/// BackupSchedule phase reported while paused
pub const PHASE_PAUSED: &str = "Paused";
/// Restore phases meaning the restore has run to completion
pub const FINISHED_RESTORE_PHASES: [&str; 2] = ["Finished", "FinishedWithErrors"];
/// Restore spec flag selecting continuous (passive) sync
pub const SYNC_FLAG: &str = "syncRestoreWithNewBackups";

/// State of a hub's backup schedule
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupScheduleState {
    /// Schedule present and running
    Active,
    /// Schedule present but paused
    Paused,
    /// Restored schedule conflicts with existing backups
    Collision,
    /// No schedule
    None,
}

impl fmt::Display for BackupScheduleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Collision => "collision",
            Self::None => "none",
        })
    }
}

/// State of a hub's most recent restore
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum RestoreState {
    /// Continuous restore keeping this hub in step with backups
    PassiveSync,
    /// One-shot restore that has completed
    Finished,
    /// Restore still running, with its current phase
    InProgress(String),
    /// No restore
    None,
}

impl fmt::Display for RestoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PassiveSync => f.write_str("passive-sync"),
            Self::Finished => f.write_str("finished"),
            Self::InProgress(phase) => write!(f, "in-progress:{phase}"),
            Self::None => f.write_str("none"),
        }
    }
}

impl From<RestoreState> for String {
    fn from(state: RestoreState) -> Self {
        state.to_string()
    }
}

impl TryFrom<String> for RestoreState {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        match s.as_str() {
            "passive-sync" => Ok(Self::PassiveSync),
            "finished" => Ok(Self::Finished),
            "none" => Ok(Self::None),
            other => other
                .strip_prefix("in-progress:")
                .map(|phase| Self::InProgress(phase.to_string()))
                .ok_or_else(|| format!("unknown restore state {other:?}")),
        }
    }
}

/// (available, total) managed clusters, excluding the hub's own member
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedClusterCount {
    /// Clusters whose Available condition is True
    pub available: usize,
    /// All registered clusters
    pub total: usize,
}

impl fmt::Display for ManagedClusterCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.available, self.total)
    }
}

/// Everything the role decision table looks at for one hub
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HubSignals {
    /// Backup schedule state
    pub backup: BackupScheduleState,
    /// Latest restore state
    pub restore: RestoreState,
    /// Managed cluster counts
    pub managed_clusters: ManagedClusterCount,
    /// Names of the managed clusters, sorted
    pub managed_cluster_names: Vec<String>,
}

impl HubSignals {
    /// Read all signals from a hub
    pub async fn collect(client: &ClusterClient) -> Result<Self> {
        let schedules = client
            .list(FleetKind::BackupSchedule, Some(BACKUP_NAMESPACE))
            .await?;
        let restores = client.list(FleetKind::Restore, Some(BACKUP_NAMESPACE)).await?;
        let clusters = client.list(FleetKind::ManagedCluster, None).await?;

        let (managed_clusters, managed_cluster_names) = count_managed_clusters(&clusters);
        Ok(Self {
            backup: backup_state(&schedules),
            restore: restore_state(&restores),
            managed_clusters,
            managed_cluster_names,
        })
    }
}

fn schedule_state(schedule: &DynamicObject) -> BackupScheduleState {
    let phase = str_field(schedule, &["status", "phase"]);
    if phase == Some(PHASE_BACKUP_COLLISION) {
        BackupScheduleState::Collision
    } else if bool_field(schedule, &["spec", "paused"]) == Some(true) || phase == Some(PHASE_PAUSED) {
        BackupScheduleState::Paused
    } else {
        BackupScheduleState::Active
    }
}

/// Derive the backup state; with several schedules collision wins, then active, then paused.
pub fn backup_state(schedules: &[DynamicObject]) -> BackupScheduleState {
    let states: Vec<_> = schedules.iter().map(schedule_state).collect();
    [
        BackupScheduleState::Collision,
        BackupScheduleState::Active,
        BackupScheduleState::Paused,
    ]
    .into_iter()
    .find(|candidate| states.contains(candidate))
    .unwrap_or(BackupScheduleState::None)
}

/// Derive the restore state from the most recent restore (creation time, then name)
pub fn restore_state(restores: &[DynamicObject]) -> RestoreState {
    let Some(latest) = restores.iter().max_by(|a, b| by_creation(a, b)) else {
        return RestoreState::None;
    };

    let phase = str_field(latest, &["status", "phase"]);
    if phase.is_some_and(|p| FINISHED_RESTORE_PHASES.contains(&p)) {
        RestoreState::Finished
    } else if bool_field(latest, &["spec", SYNC_FLAG]) == Some(true) {
        RestoreState::PassiveSync
    } else {
        RestoreState::InProgress(phase.unwrap_or("Pending").to_string())
    }
}

fn by_creation(a: &DynamicObject, b: &DynamicObject) -> Ordering {
    a.metadata
        .creation_timestamp
        .cmp(&b.metadata.creation_timestamp)
        .then_with(|| a.metadata.name.cmp(&b.metadata.name))
}

/// Count managed clusters, skipping the hub's own member
pub fn count_managed_clusters(clusters: &[DynamicObject]) -> (ManagedClusterCount, Vec<String>) {
    let mut count = ManagedClusterCount::default();
    let mut names = Vec::new();
    for cluster in clusters.iter().filter(|c| !is_local_cluster(c)) {
        count.total += 1;
        if has_true_condition(cluster, CONDITION_AVAILABLE) {
            count.available += 1;
        }
        if let Some(name) = &cluster.metadata.name {
            names.push(name.clone());
        }
    }
    names.sort();
    (count, names)
}
