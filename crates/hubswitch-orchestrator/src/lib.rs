//! Phase orchestration for a hub switchover
//!
//! The [`Orchestrator`] walks a durable record through
//! `PREFLIGHT → PRIMARY_PREP → ACTIVATION → POST_ACTIVATION → FINALIZATION`,
//! dispatching to one [`PhaseHandler`] per phase. Handlers wrap every side
//! effect in a named step so an interrupted or failed run can be re-invoked
//! and pick up at the first incomplete step.

#![deny(missing_docs)]

pub mod handler;
pub mod handlers;
pub mod options;
pub mod orchestrator;

pub use handler::{PhaseContext, PhaseHandler, PhaseHandlers, StepClients};
pub use handlers::builtin_handlers;
pub use options::SwitchoverOptions;
pub use orchestrator::Orchestrator;
