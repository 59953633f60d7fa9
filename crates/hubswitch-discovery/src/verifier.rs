//! Klusterlet connection verifier
//!
//! Right after a switchover both hubs can report the same managed clusters as
//! available until the old hub's leases expire. The verifier asks the managed
//! clusters themselves: the klusterlet's hub credential embeds the API server
//! it actually talks to.
//!
//! The result is advisory and sits next to the hubs' raw counts; it never
//! replaces them. Clusters that cannot be reached or carry no hub credential
//! are reported as unknown rather than attributed to a hub.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use kube::config::Kubeconfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use hubswitch_common::context::normalize_host;
use hubswitch_common::resources::{
    secret_data, AGENT_NAMESPACE, BOOTSTRAP_KUBECONFIG_SECRET, HUB_KUBECONFIG_SECRET,
    KUBECONFIG_SECRET_KEY,
};
use hubswitch_common::{ClientFactory, ClusterContext, DiscoverySettings, FleetKind};

/// A candidate hub and its normalised API host
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HubEndpoint {
    /// Hub context name
    pub context: String,
    /// Normalised API host
    pub host: String,
}

impl HubEndpoint {
    /// Build an endpoint from a context
    pub fn from_context(context: &ClusterContext) -> Self {
        Self {
            context: context.name.clone(),
            host: context.host(),
        }
    }
}

/// Which klusterlet secret supplied the hub host
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialSource {
    /// `hub-kubeconfig-secret`
    HubKubeconfig,
    /// `bootstrap-hub-kubeconfig`
    Bootstrap,
}

/// Managed cluster and the hub its agent is connected to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KlusterletBinding {
    /// Managed cluster name
    pub cluster: String,
    /// Hub API host found in the credential
    pub hub_host: String,
    /// Candidate hub owning that host, if any
    pub hub: Option<String>,
    /// Secret the host was read from
    pub source: CredentialSource,
}

/// Managed cluster whose connection could not be determined
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownConnection {
    /// Managed cluster name
    pub cluster: String,
    /// Why it could not be determined
    pub reason: String,
}

/// Verified connection counts for the candidate hubs
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionVerification {
    /// Hub context → number of managed clusters actually connected to it
    pub connected: BTreeMap<String, usize>,
    /// Clusters with a readable hub credential
    pub bindings: Vec<KlusterletBinding>,
    /// Clusters reported as unknown
    pub unknown: Vec<UnknownConnection>,
}

impl ConnectionVerification {
    /// Verified count for a hub (0 if it had none)
    pub fn connected_to(&self, hub: &str) -> usize {
        self.connected.get(hub).copied().unwrap_or(0)
    }
}

/// Resolves which hub each managed cluster's klusterlet is connected to
pub struct KlusterletVerifier {
    factory: Arc<dyn ClientFactory>,
    settings: DiscoverySettings,
}

impl KlusterletVerifier {
    /// Create a verifier using `factory` to reach managed clusters
    pub fn new(factory: Arc<dyn ClientFactory>, settings: DiscoverySettings) -> Self {
        Self { factory, settings }
    }

    /// Verify the connections of `clusters`.
    ///
    /// `contexts` is searched for a context named after each managed cluster.
    pub async fn verify(
        &self,
        hubs: &[HubEndpoint],
        clusters: &BTreeSet<String>,
        contexts: &[ClusterContext],
    ) -> ConnectionVerification {
        info!(
            hubs = hubs.len(),
            clusters = clusters.len(),
            "verifying klusterlet connections"
        );

        let lookups: Vec<_> = stream::iter(clusters.iter())
            .map(|cluster| async move {
                let context = contexts.iter().find(|c| &c.name == cluster);
                (cluster.clone(), self.resolve(cluster, context).await)
            })
            .buffer_unordered(self.settings.max_concurrency.max(1))
            .collect()
            .await;

        let mut result = ConnectionVerification {
            connected: hubs.iter().map(|h| (h.context.clone(), 0)).collect(),
            ..Default::default()
        };
        for (cluster, lookup) in lookups {
            match lookup {
                Ok((hub_host, source)) => {
                    let hub = hubs.iter().find(|h| h.host == hub_host).map(|h| h.context.clone());
                    if let Some(hub) = &hub {
                        *result.connected.entry(hub.clone()).or_default() += 1;
                    }
                    debug!(cluster = %cluster, hub_host = %hub_host, hub = ?hub, "klusterlet binding");
                    result.bindings.push(KlusterletBinding {
                        cluster,
                        hub_host,
                        hub,
                        source,
                    });
                }
                Err(reason) => {
                    debug!(cluster = %cluster, reason = %reason, "klusterlet connection unknown");
                    result.unknown.push(UnknownConnection { cluster, reason });
                }
            }
        }
        result.bindings.sort_by(|a, b| a.cluster.cmp(&b.cluster));
        result.unknown.sort_by(|a, b| a.cluster.cmp(&b.cluster));
        result
    }

    async fn resolve(
        &self,
        cluster: &str,
        context: Option<&ClusterContext>,
    ) -> Result<(String, CredentialSource), String> {
        let context = context.ok_or_else(|| "no kubeconfig context for managed cluster".to_string())?;
        let client = self
            .factory
            .client_for(context)
            .await
            .map_err(|e| format!("client error: {e}"))?;

        match tokio::time::timeout(self.settings.probe_timeout, client.probe()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(format!("unreachable: {e}")),
            Err(_) => return Err("unreachable: probe timed out".to_string()),
        }

        for (name, source) in [
            (HUB_KUBECONFIG_SECRET, CredentialSource::HubKubeconfig),
            (BOOTSTRAP_KUBECONFIG_SECRET, CredentialSource::Bootstrap),
        ] {
            let secret = client
                .get(FleetKind::Secret, name, Some(AGENT_NAMESPACE))
                .await
                .map_err(|e| format!("credential lookup failed: {e}"))?;
            let host = secret
                .as_ref()
                .and_then(|s| secret_data(s, KUBECONFIG_SECRET_KEY))
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .and_then(|yaml| hub_host_from_kubeconfig(&yaml));
            if let Some(host) = host {
                debug!(cluster, secret = name, "read hub host from klusterlet credential");
                return Ok((host, source));
            }
        }
        Err("no hub credential found".to_string())
    }
}

/// Extract the normalised hub API host from a klusterlet kubeconfig.
///
/// The current context's cluster is preferred; otherwise the first cluster
/// with a server URL.
pub fn hub_host_from_kubeconfig(yaml: &str) -> Option<String> {
    let kubeconfig = Kubeconfig::from_yaml(yaml).ok()?;
    let current_cluster = kubeconfig.current_context.as_ref().and_then(|current| {
        kubeconfig
            .contexts
            .iter()
            .find(|c| &c.name == current)
            .and_then(|c| c.context.as_ref())
            .map(|c| c.cluster.clone())
    });

    let server = current_cluster
        .and_then(|name| {
            kubeconfig
                .clusters
                .iter()
                .find(|c| c.name == name)
                .and_then(|c| c.cluster.as_ref())
                .and_then(|c| c.server.clone())
        })
        .or_else(|| {
            kubeconfig
                .clusters
                .iter()
                .find_map(|c| c.cluster.as_ref().and_then(|c| c.server.clone()))
        })?;

    let host = normalize_host(&server);
    (!host.is_empty()).then_some(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubswitch_common::testing::{fixtures, FakeCluster, StaticClientFactory};

    const HUB_A: &str = "https://api.hub-a.example.com:6443";
    const HUB_B: &str = "https://api.hub-b.example.com:6443";

    fn hubs() -> Vec<HubEndpoint> {
        vec![
            HubEndpoint::from_context(&ClusterContext::new("hub-a", HUB_A)),
            HubEndpoint::from_context(&ClusterContext::new("hub-b", HUB_B)),
        ]
    }

    fn managed(server: &str) -> Arc<FakeCluster> {
        let fake = Arc::new(FakeCluster::new());
        fake.insert(fixtures::klusterlet_secret(HUB_KUBECONFIG_SECRET, server));
        fake
    }

    fn contexts(names: &[&str]) -> Vec<ClusterContext> {
        names
            .iter()
            .map(|n| ClusterContext::new(*n, format!("https://api.{n}.example.com:6443")))
            .collect()
    }

    fn names(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn tie_break_attributes_clusters_to_the_hub_they_talk_to() {
        let factory = StaticClientFactory::new()
            .with_cluster("prod-1", managed(HUB_A))
            .with_cluster("prod-2", managed(HUB_A))
            .with_cluster("prod-3", managed(HUB_A));
        let verifier = KlusterletVerifier::new(Arc::new(factory), DiscoverySettings::default());

        let result = verifier
            .verify(
                &hubs(),
                &names(&["prod-1", "prod-2", "prod-3"]),
                &contexts(&["prod-1", "prod-2", "prod-3"]),
            )
            .await;

        assert_eq!(result.connected_to("hub-a"), 3);
        assert_eq!(result.connected_to("hub-b"), 0);
        assert!(result.unknown.is_empty());
        assert!(result
            .bindings
            .iter()
            .all(|b| b.source == CredentialSource::HubKubeconfig));
    }

    #[tokio::test]
    async fn bootstrap_secret_is_the_fallback() {
        let fake = Arc::new(FakeCluster::new());
        fake.insert(fixtures::klusterlet_secret(BOOTSTRAP_KUBECONFIG_SECRET, HUB_B));
        let factory = StaticClientFactory::new().with_cluster("prod-1", fake);
        let verifier = KlusterletVerifier::new(Arc::new(factory), DiscoverySettings::default());

        let result = verifier
            .verify(&hubs(), &names(&["prod-1"]), &contexts(&["prod-1"]))
            .await;
        assert_eq!(result.connected_to("hub-b"), 1);
        assert_eq!(result.bindings[0].source, CredentialSource::Bootstrap);
    }

    #[tokio::test]
    async fn unreachable_or_credential_less_clusters_are_unknown() {
        let down = Arc::new(FakeCluster::new());
        down.set_unreachable(true);
        let bare = Arc::new(FakeCluster::new());
        let factory = StaticClientFactory::new()
            .with_cluster("prod-down", down)
            .with_cluster("prod-bare", bare);
        let verifier = KlusterletVerifier::new(Arc::new(factory), DiscoverySettings::default());

        let result = verifier
            .verify(
                &hubs(),
                &names(&["prod-bare", "prod-down", "prod-nocontext"]),
                &contexts(&["prod-bare", "prod-down"]),
            )
            .await;

        assert_eq!(result.connected_to("hub-a"), 0);
        assert_eq!(result.connected_to("hub-b"), 0);
        let reasons: Vec<_> = result
            .unknown
            .iter()
            .map(|u| (u.cluster.as_str(), u.reason.as_str()))
            .collect();
        assert_eq!(reasons[0], ("prod-bare", "no hub credential found"));
        assert!(reasons[1].1.starts_with("unreachable"));
        assert_eq!(reasons[2], ("prod-nocontext", "no kubeconfig context for managed cluster"));
    }

    #[tokio::test]
    async fn unrecognised_hub_host_is_bound_but_not_counted() {
        let factory = StaticClientFactory::new()
            .with_cluster("prod-1", managed("https://api.hub-c.example.com:6443"));
        let verifier = KlusterletVerifier::new(Arc::new(factory), DiscoverySettings::default());

        let result = verifier
            .verify(&hubs(), &names(&["prod-1"]), &contexts(&["prod-1"]))
            .await;
        assert_eq!(result.bindings[0].hub, None);
        assert_eq!(result.bindings[0].hub_host, "api.hub-c.example.com");
        assert_eq!(result.connected.values().sum::<usize>(), 0);
    }

    #[test]
    fn host_from_kubeconfig_prefers_current_context() {
        let yaml = r#"
apiVersion: v1
kind: Config
clusters:
- name: other
  cluster:
    server: https://api.other.example.com:6443
- name: hub
  cluster:
    server: https://API.Hub-A.example.com:6443
contexts:
- name: default
  context:
    cluster: hub
    user: agent
current-context: default
users:
- name: agent
  user:
    token: t
"#;
        assert_eq!(hub_host_from_kubeconfig(yaml).as_deref(), Some("api.hub-a.example.com"));
        assert_eq!(hub_host_from_kubeconfig("not: [valid"), None);
    }
}
