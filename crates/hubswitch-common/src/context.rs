//! Cluster contexts and client construction
//!
//! A [`ClusterContext`] is one named endpoint from a kubeconfig. Contexts are
//! re-derived on every run; nothing about them is persisted.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::{ClusterClient, KubeTransport};
use crate::config::ClientSettings;
use crate::{Error, Result};

/// One reachable-or-not API server endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterContext {
    /// Context name in the kubeconfig
    pub name: String,
    /// API server URL
    pub server: String,
}

impl ClusterContext {
    /// Create a context
    pub fn new(name: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server: server.into(),
        }
    }

    /// Normalised API host (lowercase, no scheme, port or path)
    pub fn host(&self) -> String {
        normalize_host(&self.server)
    }
}

/// Reduce an API server URL to a comparable host.
///
/// `https://API.Hub-A.example.com:6443/` and `api.hub-a.example.com` compare equal.
pub fn normalize_host(server: &str) -> String {
    let without_scheme = server
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(server);
    let authority = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let authority = authority.rsplit_once('@').map(|(_, h)| h).unwrap_or(authority);

    let host = if let Some(rest) = authority.strip_prefix('[') {
        // IPv6 literal
        rest.split(']').next().unwrap_or_default()
    } else {
        authority.split(':').next().unwrap_or_default()
    };
    host.trim_end_matches('.').to_ascii_lowercase()
}

/// Extract every named context from a kubeconfig, sorted by name.
///
/// Contexts pointing at a cluster without a server URL are dropped.
pub fn contexts_from_kubeconfig(kubeconfig: &Kubeconfig) -> Vec<ClusterContext> {
    let mut contexts: Vec<ClusterContext> = kubeconfig
        .contexts
        .iter()
        .filter_map(|named| {
            let cluster_name = &named.context.as_ref()?.cluster;
            let server = kubeconfig
                .clusters
                .iter()
                .find(|c| &c.name == cluster_name)?
                .cluster
                .as_ref()?
                .server
                .clone()?;
            Some(ClusterContext::new(named.name.clone(), server))
        })
        .collect();
    contexts.sort_by(|a, b| a.name.cmp(&b.name));
    contexts
}

/// Builds a [`ClusterClient`] for a context
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Create a client for `context`; dry-run is fixed by the factory
    async fn client_for(&self, context: &ClusterContext) -> Result<ClusterClient>;
}

/// Client factory backed by a kubeconfig
pub struct KubeconfigClientFactory {
    kubeconfig: Kubeconfig,
    settings: ClientSettings,
    dry_run: bool,
}

impl KubeconfigClientFactory {
    /// Create a factory from an already-loaded kubeconfig
    pub fn new(kubeconfig: Kubeconfig, settings: ClientSettings, dry_run: bool) -> Self {
        Self {
            kubeconfig,
            settings,
            dry_run,
        }
    }

    /// Load the kubeconfig from `path`, or from kube defaults (`KUBECONFIG` / `~/.kube/config`)
    pub fn load(path: Option<&Path>, settings: ClientSettings, dry_run: bool) -> Result<Self> {
        let kubeconfig = match path {
            Some(p) => Kubeconfig::read_from(p).map_err(|e| {
                Error::validation_for_field(
                    "--kubeconfig",
                    format!("failed to read kubeconfig {}: {}", p.display(), e),
                )
            })?,
            None => Kubeconfig::read().map_err(|e| {
                Error::validation_for_field("--kubeconfig", format!("failed to read kubeconfig: {e}"))
            })?,
        };
        Ok(Self::new(kubeconfig, settings, dry_run))
    }

    /// All contexts in the loaded kubeconfig
    pub fn contexts(&self) -> Vec<ClusterContext> {
        contexts_from_kubeconfig(&self.kubeconfig)
    }

    /// Look up a context by name
    pub fn context(&self, name: &str) -> Result<ClusterContext> {
        self.contexts()
            .into_iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::validation(format!("context {name} not found in kubeconfig")))
    }
}

#[async_trait]
impl ClientFactory for KubeconfigClientFactory {
    async fn client_for(&self, context: &ClusterContext) -> Result<ClusterClient> {
        let options = KubeConfigOptions {
            context: Some(context.name.clone()),
            ..Default::default()
        };
        let mut config = Config::from_custom_kubeconfig(self.kubeconfig.clone(), &options)
            .await
            .map_err(|e| {
                Error::fatal_with_context(&context.name, format!("failed to load kubeconfig: {e}"))
            })?;
        config.connect_timeout = Some(self.settings.connect_timeout);
        config.read_timeout = Some(self.settings.call_timeout);

        let client = Client::try_from(config).map_err(|e| {
            Error::fatal_with_context(&context.name, format!("failed to create client: {e}"))
        })?;
        debug!(context = %context.name, server = %context.server, "created cluster client");

        Ok(ClusterClient::new(
            context.name.clone(),
            Arc::new(KubeTransport::new(client)),
            &self.settings,
            self.dry_run,
        ))
    }
}
