//! Per-invocation switchover options

use std::time::Duration;

/// Default deadline for the activation restore to finish
pub const DEFAULT_RESTORE_TIMEOUT: Duration = Duration::from_secs(60 * 60);
/// Default deadline for managed clusters to report available on the new hub
pub const DEFAULT_MANAGED_CLUSTER_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Default interval between polls while waiting
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Options shared by every phase handler
#[derive(Clone, Debug, PartialEq)]
pub struct SwitchoverOptions {
    /// Simulate mutations; also fixed on both clients
    pub dry_run: bool,
    /// Delete the old hub's backup schedule during finalization
    pub delete_old_backup_schedule: bool,
    /// Operator confirmation required by the deletion step
    pub confirm_deletion: bool,
    /// How long to wait for the activation restore
    pub restore_timeout: Duration,
    /// How long to wait for managed clusters to reconnect
    pub managed_cluster_timeout: Duration,
    /// Interval between polls
    pub poll_interval: Duration,
}

impl Default for SwitchoverOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            delete_old_backup_schedule: false,
            confirm_deletion: false,
            restore_timeout: DEFAULT_RESTORE_TIMEOUT,
            managed_cluster_timeout: DEFAULT_MANAGED_CLUSTER_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}
