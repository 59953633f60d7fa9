//! Durable state store
//!
//! The store is the only writer of a [`SwitchoverRecord`] file. Every write
//! goes to a temporary file in the destination directory, is synced, and is
//! then renamed over the destination, so a crash mid-write leaves the prior
//! record intact.
//!
//! Writes come in two strengths:
//! - [`StateStore::save`] is best-effort: failures are logged, not returned
//! - [`StateStore::flush`] is critical and runs after every completed step
//!   and phase transition

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use hubswitch_common::{Error, Result};

use crate::record::{CompletedStep, FailureInfo, Phase, SwitchoverRecord, SCHEMA_VERSION};

/// Owner of one switchover record and its file
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    record: SwitchoverRecord,
    dirty: bool,
}

impl StateStore {
    /// Open the record at `path`, creating a fresh one if none exists.
    ///
    /// An existing record for a different pair or dry-run mode is a
    /// validation error; an unparseable one is state corruption.
    pub fn open(path: impl Into<PathBuf>, primary: &str, secondary: &str, dry_run: bool) -> Result<Self> {
        let path = path.into();
        match Self::load(&path)? {
            Some(record) => {
                if record.primary != primary || record.secondary != secondary {
                    return Err(Error::validation_for_field(
                        "--state-file",
                        format!(
                            "record {} belongs to {} -> {}, not {} -> {}",
                            path.display(),
                            record.primary,
                            record.secondary,
                            primary,
                            secondary
                        ),
                    ));
                }
                if record.dry_run != dry_run {
                    return Err(Error::validation_for_field(
                        "--dry-run",
                        format!(
                            "record {} was written by a {} run",
                            path.display(),
                            if record.dry_run { "dry" } else { "real" }
                        ),
                    ));
                }
                info!(
                    path = %path.display(),
                    phase = %record.phase,
                    completed_steps = record.completed_steps.len(),
                    "resuming switchover record"
                );
                Ok(Self {
                    path,
                    record,
                    dirty: false,
                })
            }
            None => Self::create(path, primary, secondary, dry_run),
        }
    }

    /// Replace any existing record with a fresh one (operator reset)
    pub fn reset(path: impl Into<PathBuf>, primary: &str, secondary: &str, dry_run: bool) -> Result<Self> {
        let path = path.into();
        if path.exists() {
            warn!(path = %path.display(), "discarding existing switchover record");
        }
        Self::create(path, primary, secondary, dry_run)
    }

    fn create(path: PathBuf, primary: &str, secondary: &str, dry_run: bool) -> Result<Self> {
        info!(path = %path.display(), primary, secondary, dry_run, "creating switchover record");
        let mut store = Self {
            path,
            record: SwitchoverRecord::new(primary, secondary, dry_run),
            dirty: true,
        };
        store.flush()?;
        Ok(store)
    }

    /// Read a record without taking ownership of it; `None` if absent
    pub fn load(path: &Path) -> Result<Option<SwitchoverRecord>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(path, e)),
        };
        let record: SwitchoverRecord =
            serde_json::from_slice(&bytes).map_err(|e| Error::state_corruption(path, e.to_string()))?;
        if record.schema_version != SCHEMA_VERSION {
            return Err(Error::state_corruption(
                path,
                format!(
                    "record schema version {} is not supported (expected {})",
                    record.schema_version, SCHEMA_VERSION
                ),
            ));
        }
        Ok(Some(record))
    }

    /// Path of the record file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current record contents
    pub fn record(&self) -> &SwitchoverRecord {
        &self.record
    }

    /// Whether there are changes not yet written
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether `step` is already complete for this record
    pub fn is_step_completed(&self, step: &str) -> bool {
        self.record.is_step_completed(step)
    }

    /// Note that `step` is starting
    pub fn begin_step(&mut self, step: &str) {
        self.record.in_progress_step = Some(step.to_string());
        self.touch();
        self.save();
    }

    /// Mark `step` complete in the current phase and flush.
    ///
    /// Completing an already-complete step is a no-op; the set never shrinks.
    pub fn mark_step_completed(&mut self, step: &str) -> Result<()> {
        if !self.record.is_step_completed(step) {
            self.record.completed_steps.push(CompletedStep {
                id: step.to_string(),
                phase: self.record.phase,
                completed_at: Utc::now(),
            });
        }
        if self.record.in_progress_step.as_deref() == Some(step) {
            self.record.in_progress_step = None;
        }
        self.touch();
        debug!(step, phase = %self.record.phase, "step completed");
        self.flush()
    }

    /// Transition to `phase` and flush
    pub fn set_phase(&mut self, phase: Phase) -> Result<()> {
        let now = Utc::now();
        self.record.phase = phase;
        self.record.phase_entered_at = now;
        self.record.in_progress_step = None;
        self.touch();
        self.flush()
    }

    /// Record a failure of `phase`, move to `FAILED` and flush
    pub fn record_failure(&mut self, phase: Phase, step: Option<&str>, error: &Error) -> Result<()> {
        let failure = FailureInfo {
            phase,
            step: step.map(String::from),
            kind: error.kind(),
            message: error.to_string(),
            failed_at: Utc::now(),
        };
        self.record.failure_history.push(failure.clone());
        self.record.last_failure = Some(failure);
        self.set_phase(Phase::Failed)
    }

    /// Store a metadata value; it is written with the next save or flush
    pub fn set_metadata<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| Error::serialization(format!("metadata {key}: {e}")))?;
        self.record.metadata.insert(key.to_string(), value);
        self.touch();
        Ok(())
    }

    /// Read a metadata value
    pub fn metadata<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.record
            .metadata
            .get(key)
            .map(|v| {
                serde_json::from_value(v.clone())
                    .map_err(|e| Error::state_corruption(&self.path, format!("metadata {key}: {e}")))
            })
            .transpose()
    }

    /// Best-effort write; a failure is logged and the record stays dirty
    pub fn save(&mut self) {
        if let Err(e) = self.flush() {
            warn!(path = %self.path.display(), error = %e, "best-effort save failed");
        }
    }

    /// Critical write: atomically replace the record file
    pub fn flush(&mut self) -> Result<()> {
        let staged = stage(&self.path, &self.record)?;
        commit(staged, &self.path)?;
        self.dirty = false;
        Ok(())
    }

    fn touch(&mut self) {
        self.record.updated_at = Utc::now();
        self.dirty = true;
    }
}

/// Write `record` to a synced temporary file next to `path`
fn stage(path: &Path, record: &SwitchoverRecord) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

    let json = serde_json::to_vec_pretty(record)
        .map_err(|e| Error::serialization(format!("switchover record: {e}")))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
    tmp.write_all(&json).map_err(|e| Error::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| Error::io(tmp.path(), e))?;
    Ok(tmp)
}

/// Rename a staged file over `path`
fn commit(staged: NamedTempFile, path: &Path) -> Result<()> {
    staged.persist(path).map_err(|e| Error::io(path, e.error))?;
    Ok(())
}
