//! Hub role discovery engine
//!
//! Probes every candidate context with a bounded worker pool, skips the ones
//! that are unreachable or not fleet-management hubs, classifies the rest and
//! proposes a (primary, secondary) pair. When two or more hubs report
//! available managed clusters at the same time the klusterlet verifier is run
//! to show which hub those clusters really talk to.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use hubswitch_common::resources::FLEET_NAMESPACE;
use hubswitch_common::{ClientFactory, ClusterContext, DiscoverySettings, FleetKind};

use crate::report::{propose_pair, DiscoveryReport, HubReport, SkipReason, SkippedContext};
use crate::roles::classify;
use crate::signals::HubSignals;
use crate::verifier::{HubEndpoint, KlusterletVerifier};

enum Inspection {
    Hub(HubReport),
    Skipped(SkippedContext),
}

fn skipped(context: &ClusterContext, reason: SkipReason, detail: impl Into<String>) -> Inspection {
    Inspection::Skipped(SkippedContext {
        context: context.name.clone(),
        reason,
        detail: detail.into(),
    })
}

/// Classifies candidate contexts by hub role
pub struct DiscoveryEngine {
    factory: Arc<dyn ClientFactory>,
    settings: DiscoverySettings,
}

impl DiscoveryEngine {
    /// Create an engine building clients through `factory`
    pub fn new(factory: Arc<dyn ClientFactory>, settings: DiscoverySettings) -> Self {
        Self { factory, settings }
    }

    /// Classify `contexts` and propose a pair.
    ///
    /// `lookup` is searched for managed-cluster contexts when connection
    /// verification is needed; pass every kubeconfig context, not only the
    /// hubs being classified.
    pub async fn discover(
        &self,
        contexts: &[ClusterContext],
        lookup: &[ClusterContext],
    ) -> DiscoveryReport {
        info!(contexts = contexts.len(), "discovering hub roles");

        let inspections: Vec<Inspection> = stream::iter(contexts)
            .map(|context| self.inspect(context))
            .buffer_unordered(self.settings.max_concurrency.max(1))
            .collect()
            .await;

        let mut report = DiscoveryReport::default();
        for inspection in inspections {
            match inspection {
                Inspection::Hub(hub) => report.hubs.push(hub),
                Inspection::Skipped(s) => report.skipped.push(s),
            }
        }
        report.hubs.sort_by(|a, b| a.context.cmp(&b.context));
        report.skipped.sort_by(|a, b| a.context.cmp(&b.context));

        if needs_verification(&report.hubs) {
            let overlapping: Vec<&HubReport> = report
                .hubs
                .iter()
                .filter(|h| h.managed_clusters.available > 0)
                .collect();
            let endpoints: Vec<HubEndpoint> = overlapping
                .iter()
                .map(|h| HubEndpoint::from_context(&ClusterContext::new(&h.context, &h.server)))
                .collect();
            let clusters: BTreeSet<String> = overlapping
                .iter()
                .flat_map(|h| h.managed_cluster_names.iter().cloned())
                .collect();
            warn!(
                hubs = ?endpoints.iter().map(|e| e.context.as_str()).collect::<Vec<_>>(),
                "multiple hubs report available managed clusters, verifying klusterlet connections"
            );
            let verifier = KlusterletVerifier::new(self.factory.clone(), self.settings.clone());
            report.verification = Some(verifier.verify(&endpoints, &clusters, lookup).await);
        }

        report.proposal = propose_pair(&report.hubs);
        match &report.proposal {
            Some(p) => info!(
                primary = %p.primary,
                secondary = %p.secondary,
                confidence = ?p.confidence,
                "proposed switchover pair"
            ),
            None => info!("no confident switchover pair"),
        }
        report
    }

    async fn inspect(&self, context: &ClusterContext) -> Inspection {
        let client = match self.factory.client_for(context).await {
            Ok(client) => client,
            Err(e) => return skipped(context, SkipReason::ClientError, e.to_string()),
        };

        match tokio::time::timeout(self.settings.probe_timeout, client.probe()).await {
            Ok(Ok(version)) => debug!(context = %context.name, version = %version, "context reachable"),
            Ok(Err(e)) => return skipped(context, SkipReason::Unreachable, e.to_string()),
            Err(_) => {
                return skipped(
                    context,
                    SkipReason::Unreachable,
                    format!("probe timed out after {}s", self.settings.probe_timeout.as_secs()),
                )
            }
        }

        match client.exists(FleetKind::Namespace, FLEET_NAMESPACE, None).await {
            Ok(true) => {}
            Ok(false) => {
                return skipped(
                    context,
                    SkipReason::NotAFleetHub,
                    format!("namespace {FLEET_NAMESPACE} not found"),
                )
            }
            Err(e) => return skipped(context, SkipReason::InspectionFailed, e.to_string()),
        }

        let signals = match HubSignals::collect(&client).await {
            Ok(signals) => signals,
            Err(e) => return skipped(context, SkipReason::InspectionFailed, e.to_string()),
        };
        let classification = classify(&signals);

        if classification.invalid_configuration {
            warn!(
                context = %context.name,
                rationale = %classification.rationale,
                "hub has an invalid backup/restore configuration"
            );
        }
        info!(
            context = %context.name,
            role = %classification.role,
            backup = %signals.backup,
            restore = %signals.restore,
            managed_clusters = %signals.managed_clusters,
            "classified hub"
        );

        Inspection::Hub(HubReport {
            context: context.name.clone(),
            server: context.server.clone(),
            role: classification.role,
            rule: classification.rule,
            rationale: classification.rationale,
            invalid_configuration: classification.invalid_configuration,
            backup: signals.backup,
            restore: signals.restore,
            managed_clusters: signals.managed_clusters,
            managed_cluster_names: signals.managed_cluster_names,
        })
    }
}

/// Whether two or more hubs report available managed clusters
pub fn needs_verification(hubs: &[HubReport]) -> bool {
    hubs.iter().filter(|h| h.managed_clusters.available > 0).count() >= 2
}
