//! Scoped flush guard
//!
//! [`FlushGuard`] owns a [`StateStore`] for the length of a run and writes any
//! unflushed changes when it goes out of scope, whether the run returned
//! normally, bailed out with an error, or was cancelled.

use std::ops::{Deref, DerefMut};

use tracing::{debug, error};

use hubswitch_common::Result;

use crate::record::SwitchoverRecord;
use crate::store::StateStore;

/// Store wrapper that flushes on drop
#[derive(Debug)]
pub struct FlushGuard {
    store: StateStore,
    finished: bool,
}

impl FlushGuard {
    /// Take ownership of `store` for the duration of a run
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            finished: false,
        }
    }

    /// Final critical flush, returning the record as written
    pub fn finish(mut self) -> Result<SwitchoverRecord> {
        self.store.flush()?;
        self.finished = true;
        Ok(self.store.record().clone())
    }
}

impl Deref for FlushGuard {
    type Target = StateStore;

    fn deref(&self) -> &StateStore {
        &self.store
    }
}

impl DerefMut for FlushGuard {
    fn deref_mut(&mut self) -> &mut StateStore {
        &mut self.store
    }
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        if self.finished || !self.store.is_dirty() {
            return;
        }
        debug!(path = %self.store.path().display(), "flushing switchover record on scope exit");
        if let Err(e) = self.store.flush() {
            error!(path = %self.store.path().display(), error = %e, "final flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Phase;

    #[test]
    fn drop_flushes_dirty_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");
        {
            let mut guard = FlushGuard::new(StateStore::open(&path, "hub-a", "hub-b", false).unwrap());
            guard.set_phase(Phase::Preflight).unwrap();
            guard.set_metadata("note", &"unsaved").unwrap();
        }
        let record = StateStore::load(&path).unwrap().unwrap();
        assert_eq!(record.phase, Phase::Preflight);
        assert_eq!(record.metadata.get("note").and_then(|v| v.as_str()), Some("unsaved"));
    }

    #[test]
    fn drop_flushes_on_early_error_return() {
        fn failing_step() -> hubswitch_common::Result<()> {
            Err(hubswitch_common::Error::fatal("boom"))
        }

        fn run(path: &std::path::Path) -> hubswitch_common::Result<()> {
            let mut guard = FlushGuard::new(StateStore::open(path, "hub-a", "hub-b", false)?);
            guard.set_metadata("expectedManagedClusters", &vec!["prod-east"])?;
            assert!(guard.is_dirty());
            failing_step()?;
            guard.flush()
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");
        assert!(run(&path).is_err());
        let record = StateStore::load(&path).unwrap().unwrap();
        assert_eq!(
            record.metadata.get("expectedManagedClusters"),
            Some(&serde_json::json!(["prod-east"]))
        );
    }

    #[test]
    fn finish_returns_written_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");
        let mut guard = FlushGuard::new(StateStore::open(&path, "hub-a", "hub-b", false).unwrap());
        guard.set_phase(Phase::Completed).unwrap();
        let record = guard.finish().unwrap();
        assert_eq!(record, StateStore::load(&path).unwrap().unwrap());
    }
}
