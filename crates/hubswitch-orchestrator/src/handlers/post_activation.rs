//! Wait for managed clusters to come up on the new hub

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use hubswitch_common::wait::poll_until;
use hubswitch_common::{Error, FleetKind, Result};
use hubswitch_discovery::signals::count_managed_clusters;

use super::{META_EXPECTED_CLUSTERS, STEP_WAIT_MANAGED_CLUSTERS};
use crate::handler::{PhaseContext, PhaseHandler, StepClients};

/// `POST_ACTIVATION`: the secondary must report every expected cluster available
pub struct PostActivation;

#[async_trait]
impl PhaseHandler for PostActivation {
    async fn execute(&self, ctx: &mut PhaseContext) -> Result<()> {
        let expected: Vec<String> = ctx.store.metadata(META_EXPECTED_CLUSTERS)?.ok_or_else(|| {
            Error::fatal("no expected managed clusters recorded; preflight has not completed")
        })?;

        let dry_run = ctx.is_dry_run();
        let timeout = ctx.options.managed_cluster_timeout;
        let interval = ctx.options.poll_interval;
        ctx.run_step(STEP_WAIT_MANAGED_CLUSTERS, |c| async move {
            if dry_run {
                info!(expected = expected.len(), "dry-run: not waiting for managed clusters");
                return Ok(());
            }
            wait_available(c, expected.len(), timeout, interval).await
        })
        .await?;
        Ok(())
    }
}

async fn wait_available(
    c: StepClients,
    expected: usize,
    timeout: Duration,
    interval: Duration,
) -> Result<()> {
    info!(
        context = %c.secondary.context(),
        expected,
        timeout_secs = timeout.as_secs(),
        "waiting for managed clusters to report available"
    );
    poll_until(
        timeout,
        interval,
        format!(
            "{} managed clusters not available on {} within {}s",
            expected,
            c.secondary.context(),
            timeout.as_secs()
        ),
        || {
            let client = c.secondary.clone();
            async move {
                let clusters = client.list(FleetKind::ManagedCluster, None).await?;
                let (count, _) = count_managed_clusters(&clusters);
                debug!(available = %count, expected, "managed cluster availability");
                Ok(count.available >= expected)
            }
        },
    )
    .await
}
