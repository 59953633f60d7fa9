//! CLI commands

pub mod discover;
pub mod status;
pub mod switchover;

use std::future::Future;

use tracing::warn;

/// Resolves when the operator interrupts the process (Ctrl-C).
///
/// If the handler cannot be installed the future never resolves.
pub fn interrupt() -> impl Future<Output = ()> {
    async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for interrupt");
            std::future::pending::<()>().await;
        }
    }
}
