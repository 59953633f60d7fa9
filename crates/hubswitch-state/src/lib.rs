//! Durable switchover records
//!
//! One JSON record per ordered (primary, secondary) pair tracks the current
//! phase, the steps already applied, handler metadata and failures. The
//! [`StateStore`] is the only writer and replaces the file atomically.

#![deny(missing_docs)]

mod guard;
mod record;
mod store;

pub use guard::FlushGuard;
pub use record::{CompletedStep, FailureInfo, Phase, SwitchoverRecord, SCHEMA_VERSION};
pub use store::StateStore;
