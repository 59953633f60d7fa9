//! Hub role decision table
//!
//! Rules are evaluated top-down; the first match wins. Overlapping signals
//! therefore always resolve the same way.
//!
//! | # | backup     | restore            | other        | role          |
//! |---|------------|--------------------|--------------|---------------|
//! | 1 | active     | none / finished    |              | `primary`     |
//! | 2 | active     | passive-sync       |              | `unknown` (invalid dual configuration) |
//! | 3 | not active | passive-sync       |              | `secondary`   |
//! | 4 | collision  |                    |              | `standby`     |
//! | 5 | paused     | finished           |              | `old-primary` |
//! | 6 | paused     | passive-sync       |              | `secondary` (failback-ready) |
//! | 7 | paused     | none               |              | `standby`     |
//! | 8 | none       | finished           |              | `new-primary` |
//! | 9 | none       |                    | available>0  | `primary` (fallback) |
//! | 10| anything else                   |              | `unknown`     |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::signals::{BackupScheduleState, HubSignals, RestoreState};

/// Classified role of a hub
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HubRole {
    /// Running backups, serving the fleet
    Primary,
    /// Passively syncing the primary's backups
    Secondary,
    /// Hub with no active duty
    Standby,
    /// Former primary after a switchover
    OldPrimary,
    /// Hub that finished an activation restore
    NewPrimary,
    /// Signals do not match a known role
    Unknown,
}

impl fmt::Display for HubRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Standby => "standby",
            Self::OldPrimary => "old-primary",
            Self::NewPrimary => "new-primary",
            Self::Unknown => "unknown",
        })
    }
}

/// Outcome of the decision table for one hub
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Assigned role
    pub role: HubRole,
    /// Table row that matched (1-based)
    pub rule: u8,
    /// Human-readable reason
    pub rationale: String,
    /// Active backups alongside a passive-sync restore
    #[serde(default)]
    pub invalid_configuration: bool,
}

impl Classification {
    fn new(role: HubRole, rule: u8, rationale: &str) -> Self {
        Self {
            role,
            rule,
            rationale: rationale.to_string(),
            invalid_configuration: false,
        }
    }
}

/// Classify a hub from its signals
pub fn classify(signals: &HubSignals) -> Classification {
    use BackupScheduleState as B;
    use RestoreState as R;

    match (&signals.backup, &signals.restore) {
        (B::Active, R::None | R::Finished) => {
            Classification::new(HubRole::Primary, 1, "backup schedule active")
        }
        (B::Active, R::PassiveSync) => Classification {
            invalid_configuration: true,
            ..Classification::new(
                HubRole::Unknown,
                2,
                "invalid dual configuration: active backup schedule alongside passive-sync restore",
            )
        },
        (B::Paused, R::PassiveSync) => Classification::new(
            HubRole::Secondary,
            6,
            "paused backup schedule with passive-sync restore (failback-ready)",
        ),
        (_, R::PassiveSync) => {
            Classification::new(HubRole::Secondary, 3, "passive-sync restore running")
        }
        (B::Collision, _) => {
            Classification::new(HubRole::Standby, 4, "backup schedule reports a collision")
        }
        (B::Paused, R::Finished) => Classification::new(
            HubRole::OldPrimary,
            5,
            "backup schedule paused after a finished restore",
        ),
        (B::Paused, R::None) => {
            Classification::new(HubRole::Standby, 7, "backup schedule paused, no restore")
        }
        (B::None, R::Finished) => Classification::new(
            HubRole::NewPrimary,
            8,
            "activation restore finished, backups not yet enabled",
        ),
        (B::None, _) if signals.managed_clusters.available > 0 => Classification::new(
            HubRole::Primary,
            9,
            "no backup schedule but managed clusters are available",
        ),
        _ => Classification::new(HubRole::Unknown, 10, "signals match no known role"),
    }
}
