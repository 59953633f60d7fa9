//! The persisted switchover record and its phase machine

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use hubswitch_common::ErrorKind;

/// Current on-disk format version
pub const SCHEMA_VERSION: u32 = 1;

/// Phases of a switchover
///
/// `Init` is the initial phase; `Completed` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Record created, nothing run yet
    Init,
    /// Read-only checks on both hubs
    Preflight,
    /// Quiesce the primary
    PrimaryPrep,
    /// Activate the secondary's restore
    Activation,
    /// Wait for managed clusters to reconnect
    PostActivation,
    /// Re-enable backups on the new primary
    Finalization,
    /// All phases succeeded
    Completed,
    /// A phase failed; re-invocation resumes it
    Failed,
}

impl Phase {
    /// Phases that run a handler, in execution order
    pub const WORK: [Phase; 5] = [
        Phase::Preflight,
        Phase::PrimaryPrep,
        Phase::Activation,
        Phase::PostActivation,
        Phase::Finalization,
    ];

    /// Upper-case name used on disk and in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "INIT",
            Phase::Preflight => "PREFLIGHT",
            Phase::PrimaryPrep => "PRIMARY_PREP",
            Phase::Activation => "ACTIVATION",
            Phase::PostActivation => "POST_ACTIVATION",
            Phase::Finalization => "FINALIZATION",
            Phase::Completed => "COMPLETED",
            Phase::Failed => "FAILED",
        }
    }

    /// Phase entered after this one succeeds; `None` for terminal phases
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Init => Some(Phase::Preflight),
            Phase::Preflight => Some(Phase::PrimaryPrep),
            Phase::PrimaryPrep => Some(Phase::Activation),
            Phase::Activation => Some(Phase::PostActivation),
            Phase::PostActivation => Some(Phase::Finalization),
            Phase::Finalization => Some(Phase::Completed),
            Phase::Completed | Phase::Failed => None,
        }
    }

    /// Whether the phase ends a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// A step that finished successfully
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedStep {
    /// Step identifier, e.g. `pause-backup-schedule`
    pub id: String,
    /// Phase the step ran in
    pub phase: Phase,
    /// When the step was marked complete
    pub completed_at: DateTime<Utc>,
}

/// Details of a phase failure
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureInfo {
    /// Phase that failed
    pub phase: Phase,
    /// Step in progress when it failed
    pub step: Option<String>,
    /// Handling category of the error
    pub kind: ErrorKind,
    /// Rendered error
    pub message: String,
    /// When the failure was recorded
    pub failed_at: DateTime<Utc>,
}

/// Progress of one switchover between an ordered (primary, secondary) pair
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchoverRecord {
    /// On-disk format version
    pub schema_version: u32,
    /// Context name of the hub being switched away from
    pub primary: String,
    /// Context name of the hub taking over
    pub secondary: String,
    /// Whether this record belongs to a dry run
    pub dry_run: bool,
    /// Current phase
    pub phase: Phase,
    /// Record creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
    /// When the current phase was entered
    pub phase_entered_at: DateTime<Utc>,
    /// Completed steps in completion order; only ever grows
    #[serde(default)]
    pub completed_steps: Vec<CompletedStep>,
    /// Step started but not yet marked complete
    #[serde(default)]
    pub in_progress_step: Option<String>,
    /// Values recorded by handlers for later phases
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// Most recent failure
    #[serde(default)]
    pub last_failure: Option<FailureInfo>,
    /// Every failure seen for this pair, oldest first
    #[serde(default)]
    pub failure_history: Vec<FailureInfo>,
}

impl SwitchoverRecord {
    /// Fresh record in `INIT`
    pub fn new(primary: impl Into<String>, secondary: impl Into<String>, dry_run: bool) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            primary: primary.into(),
            secondary: secondary.into(),
            dry_run,
            phase: Phase::Init,
            created_at: now,
            updated_at: now,
            phase_entered_at: now,
            completed_steps: Vec::new(),
            in_progress_step: None,
            metadata: BTreeMap::new(),
            last_failure: None,
            failure_history: Vec::new(),
        }
    }

    /// Whether `step` has been marked complete
    pub fn is_step_completed(&self, step: &str) -> bool {
        self.completed_steps.iter().any(|s| s.id == step)
    }

    /// Identifiers of completed steps, in completion order
    pub fn step_ids(&self) -> impl Iterator<Item = &str> {
        self.completed_steps.iter().map(|s| s.id.as_str())
    }

    /// Phase a new invocation should run.
    ///
    /// A failed record resumes the phase that failed; an untouched record
    /// starts at the first work phase.
    pub fn resume_phase(&self) -> Phase {
        match self.phase {
            Phase::Init => Phase::Preflight,
            Phase::Failed => self
                .last_failure
                .as_ref()
                .map(|f| f.phase)
                .filter(|p| !p.is_terminal() && *p != Phase::Init)
                .unwrap_or(Phase::Preflight),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_advance_in_order() {
        let mut phase = Phase::Init;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            seen.push(next);
            phase = next;
        }
        assert_eq!(
            seen,
            vec![
                Phase::Init,
                Phase::Preflight,
                Phase::PrimaryPrep,
                Phase::Activation,
                Phase::PostActivation,
                Phase::Finalization,
                Phase::Completed,
            ]
        );
        assert!(Phase::Failed.next().is_none());
    }

    #[test]
    fn phase_serializes_screaming_case() {
        assert_eq!(serde_json::to_string(&Phase::PrimaryPrep).unwrap(), "\"PRIMARY_PREP\"");
        assert_eq!(Phase::PostActivation.to_string(), "POST_ACTIVATION");
    }

    #[test]
    fn failed_record_resumes_failed_phase() {
        let mut record = SwitchoverRecord::new("hub-a", "hub-b", false);
        assert_eq!(record.resume_phase(), Phase::Preflight);

        record.phase = Phase::Failed;
        record.last_failure = Some(FailureInfo {
            phase: Phase::Activation,
            step: Some("activate-passive-restore".to_string()),
            kind: ErrorKind::Transient,
            message: "timeout".to_string(),
            failed_at: Utc::now(),
        });
        assert_eq!(record.resume_phase(), Phase::Activation);
    }

    #[test]
    fn older_records_without_optional_fields_parse() {
        let json = r#"{
            "schemaVersion": 1,
            "primary": "hub-a",
            "secondary": "hub-b",
            "dryRun": false,
            "phase": "PRIMARY_PREP",
            "createdAt": "2026-01-01T00:00:00Z",
            "updatedAt": "2026-01-01T00:05:00Z",
            "phaseEnteredAt": "2026-01-01T00:05:00Z"
        }"#;
        let record: SwitchoverRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.phase, Phase::PrimaryPrep);
        assert!(record.completed_steps.is_empty());
    }
}
