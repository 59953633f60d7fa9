//! Phase handler interface and step guard

use std::future::Future;

use async_trait::async_trait;
use tracing::info;

#[cfg(test)]
use mockall::automock;

use hubswitch_common::{ClusterClient, Result};
use hubswitch_state::{FlushGuard, Phase, StateStore, SwitchoverRecord};

use crate::options::SwitchoverOptions;

/// Clients handed to a step action
#[derive(Clone, Debug)]
pub struct StepClients {
    /// Hub being switched away from
    pub primary: ClusterClient,
    /// Hub taking over
    pub secondary: ClusterClient,
}

/// Everything a phase handler may use: the record, both hubs and the options
pub struct PhaseContext {
    /// Record store, flushed when the context is dropped
    pub store: FlushGuard,
    /// Hub being switched away from
    pub primary: ClusterClient,
    /// Hub taking over
    pub secondary: ClusterClient,
    /// Invocation options
    pub options: SwitchoverOptions,
}

impl PhaseContext {
    /// Build a context around an opened store
    pub fn new(
        store: StateStore,
        primary: ClusterClient,
        secondary: ClusterClient,
        options: SwitchoverOptions,
    ) -> Self {
        Self {
            store: FlushGuard::new(store),
            primary,
            secondary,
            options,
        }
    }

    /// Current record
    pub fn record(&self) -> &SwitchoverRecord {
        self.store.record()
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.store.record().phase
    }

    /// Whether this run simulates mutations
    pub fn is_dry_run(&self) -> bool {
        self.options.dry_run
    }

    /// Run `action` under the step identifier `step`.
    ///
    /// A step already marked complete is skipped and `Ok(false)` returned.
    /// Otherwise the step is marked in progress, `action` runs, and on
    /// success the step is marked complete and flushed before returning
    /// `Ok(true)`. A failing action leaves the step incomplete.
    pub async fn run_step<F, Fut>(&mut self, step: &str, action: F) -> Result<bool>
    where
        F: FnOnce(StepClients) -> Fut + Send,
        Fut: Future<Output = Result<()>> + Send,
    {
        let phase = self.phase();
        if self.store.is_step_completed(step) {
            info!(phase = %phase, step, "step already complete, skipping");
            return Ok(false);
        }

        self.store.begin_step(step);
        info!(phase = %phase, step, dry_run = self.options.dry_run, "running step");
        action(StepClients {
            primary: self.primary.clone(),
            secondary: self.secondary.clone(),
        })
        .await?;
        self.store.mark_step_completed(step)?;
        Ok(true)
    }

    /// Final flush, returning the record as written
    pub fn finish(self) -> Result<SwitchoverRecord> {
        self.store.finish()
    }
}

/// One phase of the switchover.
///
/// Handlers must be safe to re-run: every side effect goes through
/// [`PhaseContext::run_step`] so completed steps are never repeated.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PhaseHandler: Send + Sync {
    /// Execute the phase against the context
    async fn execute(&self, ctx: &mut PhaseContext) -> Result<()>;
}

/// One handler per work phase, dispatched exhaustively
pub struct PhaseHandlers {
    /// `PREFLIGHT`
    pub preflight: Box<dyn PhaseHandler>,
    /// `PRIMARY_PREP`
    pub primary_prep: Box<dyn PhaseHandler>,
    /// `ACTIVATION`
    pub activation: Box<dyn PhaseHandler>,
    /// `POST_ACTIVATION`
    pub post_activation: Box<dyn PhaseHandler>,
    /// `FINALIZATION`
    pub finalization: Box<dyn PhaseHandler>,
}

impl PhaseHandlers {
    /// Handler for `phase`; `None` for phases that run no handler
    pub fn handler_for(&self, phase: Phase) -> Option<&dyn PhaseHandler> {
        match phase {
            Phase::Preflight => Some(self.preflight.as_ref()),
            Phase::PrimaryPrep => Some(self.primary_prep.as_ref()),
            Phase::Activation => Some(self.activation.as_ref()),
            Phase::PostActivation => Some(self.post_activation.as_ref()),
            Phase::Finalization => Some(self.finalization.as_ref()),
            Phase::Init | Phase::Completed | Phase::Failed => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    use hubswitch_common::testing::{fast_settings, FakeCluster};
    use hubswitch_common::Error;

    pub(crate) fn context_with(
        dir: &tempfile::TempDir,
        primary: Arc<FakeCluster>,
        secondary: Arc<FakeCluster>,
        options: SwitchoverOptions,
    ) -> PhaseContext {
        let path = dir.path().join(hubswitch_common::config::record_file_name(
            "hub-a",
            "hub-b",
            options.dry_run,
        ));
        let store = StateStore::open(path, "hub-a", "hub-b", options.dry_run).unwrap();
        let settings = fast_settings();
        PhaseContext::new(
            store,
            ClusterClient::new("hub-a", primary, &settings, options.dry_run),
            ClusterClient::new("hub-b", secondary, &settings, options.dry_run),
            options,
        )
    }

    fn context(dir: &tempfile::TempDir) -> PhaseContext {
        context_with(
            dir,
            Arc::new(FakeCluster::new()),
            Arc::new(FakeCluster::new()),
            SwitchoverOptions::default(),
        )
    }

    #[tokio::test]
    async fn run_step_marks_completion() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&dir);

        let ran = ctx
            .run_step("pause-backup-schedule", |_| async { Ok::<(), Error>(()) })
            .await
            .unwrap();
        assert!(ran);
        assert!(ctx.store.is_step_completed("pause-backup-schedule"));
        assert!(ctx.record().in_progress_step.is_none());
    }

    #[tokio::test]
    async fn run_step_skips_completed_steps() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&dir);
        ctx.store.mark_step_completed("pause-backup-schedule").unwrap();

        let ran = ctx
            .run_step("pause-backup-schedule", |_| async {
                Err::<(), Error>(Error::fatal("completed step ran again"))
            })
            .await
            .unwrap();
        assert!(!ran);
    }

    #[tokio::test]
    async fn failed_step_stays_in_progress() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&dir);

        let err = ctx
            .run_step("activate-passive-restore", |_| async {
                Err::<(), Error>(Error::fatal("forbidden"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), hubswitch_common::ErrorKind::Fatal);
        assert!(!ctx.store.is_step_completed("activate-passive-restore"));
        assert_eq!(
            ctx.record().in_progress_step.as_deref(),
            Some("activate-passive-restore")
        );
    }

    #[test]
    fn only_work_phases_have_handlers() {
        let handlers = PhaseHandlers {
            preflight: Box::new(MockPhaseHandler::new()),
            primary_prep: Box::new(MockPhaseHandler::new()),
            activation: Box::new(MockPhaseHandler::new()),
            post_activation: Box::new(MockPhaseHandler::new()),
            finalization: Box::new(MockPhaseHandler::new()),
        };
        for phase in Phase::WORK {
            assert!(handlers.handler_for(phase).is_some());
        }
        for phase in [Phase::Init, Phase::Completed, Phase::Failed] {
            assert!(handlers.handler_for(phase).is_none());
        }
    }
}
