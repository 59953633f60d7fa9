//! Sequential phase driver
//!
//! Phases run strictly in order. Success advances to the next phase and
//! flushes; the first failure moves the record to `FAILED`, flushes and stops.
//! There is no phase-level retry: a re-invocation resumes the failed phase and
//! its handler skips the steps already applied.

use std::future::Future;

use tracing::{error, info, warn};

use hubswitch_common::{Error, Result};
use hubswitch_state::Phase;

use crate::handler::{PhaseContext, PhaseHandlers};

/// Drives a switchover record through its phases
pub struct Orchestrator {
    handlers: PhaseHandlers,
}

impl Orchestrator {
    /// Create an orchestrator dispatching to `handlers`
    pub fn new(handlers: PhaseHandlers) -> Self {
        Self { handlers }
    }

    /// Run from the record's resume phase until `COMPLETED` or the first failure.
    ///
    /// Returns the terminal phase on success. On failure the record is already
    /// `FAILED` and flushed; the returned error names the phase and step.
    pub async fn run(&self, ctx: &mut PhaseContext) -> Result<Phase> {
        if ctx.phase() == Phase::Completed {
            info!("switchover already completed, nothing to do");
            return Ok(Phase::Completed);
        }

        let mut phase = ctx.record().resume_phase();
        if ctx.phase() == Phase::Failed {
            info!(phase = %phase, "resuming failed switchover");
        }

        loop {
            if ctx.phase() != phase {
                ctx.store.set_phase(phase)?;
            }
            let Some(handler) = self.handlers.handler_for(phase) else {
                return Ok(phase);
            };

            info!(phase = %phase, dry_run = ctx.is_dry_run(), "entering phase");
            if let Err(e) = handler.execute(ctx).await {
                return Err(fail(ctx, phase, e));
            }
            info!(phase = %phase, "phase complete");

            phase = match phase.next() {
                Some(next) => next,
                None => return Ok(phase),
            };
        }
    }

    /// Run until completion or until `cancel` resolves.
    ///
    /// Cancellation records an interruption against the current phase and
    /// in-progress step, then flushes. An in-flight remote call is abandoned,
    /// not rolled back.
    pub async fn run_until_cancelled<C>(&self, ctx: &mut PhaseContext, cancel: C) -> Result<Phase>
    where
        C: Future<Output = ()>,
    {
        // run is polled first so a resumed record leaves FAILED before an
        // interrupt can be recorded against it
        let outcome = tokio::select! {
            biased;
            res = self.run(ctx) => Some(res),
            _ = cancel => None,
        };
        match outcome {
            Some(res) => res,
            None => {
                let phase = match ctx.phase() {
                    p if p.is_terminal() || p == Phase::Init => ctx.record().resume_phase(),
                    p => p,
                };
                warn!(phase = %phase, "switchover interrupted");
                Err(fail(ctx, phase, Error::fatal("interrupted by operator")))
            }
        }
    }
}

/// Record `error` against `phase`, move to `FAILED`, and return the error
/// annotated with the phase and step.
fn fail(ctx: &mut PhaseContext, phase: Phase, error: Error) -> Error {
    let step = ctx.record().in_progress_step.clone();
    error!(
        phase = %phase,
        step = step.as_deref().unwrap_or(""),
        kind = %error.kind(),
        error = %error,
        "phase failed"
    );
    if let Err(e) = ctx.store.record_failure(phase, step.as_deref(), &error) {
        error!(error = %e, "failed to persist failure");
    }
    error.in_phase(phase.as_str(), step)
}
