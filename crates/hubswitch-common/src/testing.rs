//! In-memory fake cluster for tests
//!
//! [`FakeCluster`] implements [`Transport`] over a map of objects. It records
//! every call, supports injected failures per verb, applies merge patches the
//! way the API server does, and can be made unreachable or slow.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde_json::Value;

use crate::client::{apply_merge_patch, CallError, ClusterClient, Transport};
use crate::config::ClientSettings;
use crate::context::{ClientFactory, ClusterContext};
use crate::resources::FleetKind;
use crate::{Error, Result};

/// API verb issued against the fake
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    /// GET
    Get,
    /// LIST
    List,
    /// PATCH
    Patch,
    /// PUT
    Replace,
    /// POST
    Create,
    /// DELETE
    Delete,
    /// GET /version
    Version,
}

impl Verb {
    /// Whether the verb changes cluster state
    pub fn is_mutating(&self) -> bool {
        matches!(self, Verb::Patch | Verb::Replace | Verb::Create | Verb::Delete)
    }
}

/// One recorded call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedCall {
    /// Verb issued
    pub verb: Verb,
    /// Plural resource name (empty for version probes)
    pub plural: String,
    /// Object name, if the call targeted one object
    pub name: Option<String>,
}

struct Injected {
    verb: Verb,
    error: CallError,
    remaining: Option<u32>,
}

type ObjectKey = (String, Option<String>, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, DynamicObject>,
    calls: Vec<RecordedCall>,
    failures: Vec<Injected>,
    unreachable: bool,
    latency: Option<Duration>,
    next_uid: u64,
    reactions: Vec<(ObjectKey, Value)>,
}

/// In-memory [`Transport`] implementation
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    /// Create an empty fake cluster
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store an object, keyed by its apiVersion-derived plural, namespace and name
    pub fn insert(&self, obj: DynamicObject) {
        let plural = plural_of(&obj);
        let key = (
            plural,
            obj.metadata.namespace.clone(),
            obj.metadata.name.clone().unwrap_or_default(),
        );
        self.lock().objects.insert(key, obj);
    }

    /// Read an object back without recording a call
    pub fn object(&self, kind: FleetKind, name: &str, namespace: Option<&str>) -> Option<DynamicObject> {
        let key = (kind.plural().to_string(), namespace.map(String::from), name.to_string());
        self.lock().objects.get(&key).cloned()
    }

    /// Number of stored objects of a kind
    pub fn count(&self, kind: FleetKind) -> usize {
        self.lock()
            .objects
            .keys()
            .filter(|(plural, _, _)| plural == kind.plural())
            .count()
    }

    /// Fail calls of `verb` with `error`; `times == None` fails forever
    pub fn fail(&self, verb: Verb, error: CallError, times: Option<u32>) {
        self.lock().failures.push(Injected {
            verb,
            error,
            remaining: times,
        });
    }

    /// After a successful patch of the object, merge `status` into it
    ///
    /// Stands in for the controller that would react to the change.
    pub fn on_patch(&self, kind: FleetKind, name: &str, namespace: Option<&str>, status: Value) {
        let key = (kind.plural().to_string(), namespace.map(String::from), name.to_string());
        self.lock().reactions.push((key, status));
    }

    /// Make every call fail as if the API server were down
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    /// All recorded calls in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Number of recorded calls with the given verb
    pub fn calls_for(&self, verb: Verb) -> usize {
        self.lock().calls.iter().filter(|c| c.verb == verb).count()
    }

    /// Recorded mutating calls
    pub fn mutations(&self) -> Vec<RecordedCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.verb.is_mutating())
            .cloned()
            .collect()
    }

    async fn enter(&self, verb: Verb, plural: &str, name: Option<&str>) -> std::result::Result<(), CallError> {
        let latency = {
            let mut state = self.lock();
            state.calls.push(RecordedCall {
                verb,
                plural: plural.to_string(),
                name: name.map(String::from),
            });
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        if state.unreachable {
            return Err(CallError::Retryable("connection refused".to_string()));
        }
        let Some(idx) = state.failures.iter().position(|f| f.verb == verb) else {
            return Ok(());
        };
        let error = state.failures[idx].error.clone();
        match state.failures[idx].remaining {
            Some(n) if n <= 1 => {
                state.failures.remove(idx);
            }
            Some(n) => state.failures[idx].remaining = Some(n - 1),
            None => {}
        }
        Err(error)
    }
}

fn plural_of(obj: &DynamicObject) -> String {
    let kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default();
    [
        FleetKind::BackupSchedule,
        FleetKind::Restore,
        FleetKind::ManagedCluster,
        FleetKind::Namespace,
        FleetKind::Secret,
    ]
    .iter()
    .find(|k| k.kind() == kind)
    .map(|k| k.plural().to_string())
    .unwrap_or_else(|| format!("{}s", kind.to_ascii_lowercase()))
}

#[async_trait]
impl Transport for FakeCluster {
    async fn get(
        &self,
        ar: &ApiResource,
        name: &str,
        namespace: Option<&str>,
    ) -> std::result::Result<DynamicObject, CallError> {
        self.enter(Verb::Get, &ar.plural, Some(name)).await?;
        let key = (ar.plural.clone(), namespace.map(String::from), name.to_string());
        self.lock().objects.get(&key).cloned().ok_or(CallError::NotFound)
    }

    async fn list(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
    ) -> std::result::Result<Vec<DynamicObject>, CallError> {
        self.enter(Verb::List, &ar.plural, None).await?;
        Ok(self
            .lock()
            .objects
            .iter()
            .filter(|((plural, ns, _), _)| {
                plural == &ar.plural && (namespace.is_none() || ns.as_deref() == namespace)
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn patch(
        &self,
        ar: &ApiResource,
        name: &str,
        namespace: Option<&str>,
        body: &Value,
    ) -> std::result::Result<DynamicObject, CallError> {
        self.enter(Verb::Patch, &ar.plural, Some(name)).await?;
        let key = (ar.plural.clone(), namespace.map(String::from), name.to_string());
        let mut state = self.lock();
        let reactions: Vec<Value> = state
            .reactions
            .iter()
            .filter(|(k, _)| k == &key)
            .map(|(_, status)| serde_json::json!({ "status": status }))
            .collect();
        let obj = state.objects.get_mut(&key).ok_or(CallError::NotFound)?;
        apply_merge_patch(obj, body);
        let response = obj.clone();
        for reaction in &reactions {
            apply_merge_patch(obj, reaction);
        }
        Ok(response)
    }

    async fn replace(
        &self,
        ar: &ApiResource,
        object: &DynamicObject,
    ) -> std::result::Result<DynamicObject, CallError> {
        let name = object.metadata.name.clone().unwrap_or_default();
        self.enter(Verb::Replace, &ar.plural, Some(&name)).await?;
        let key = (ar.plural.clone(), object.metadata.namespace.clone(), name);
        let mut state = self.lock();
        let slot = state.objects.get_mut(&key).ok_or(CallError::NotFound)?;
        *slot = object.clone();
        Ok(object.clone())
    }

    async fn create(
        &self,
        ar: &ApiResource,
        object: &DynamicObject,
    ) -> std::result::Result<DynamicObject, CallError> {
        let name = object.metadata.name.clone().unwrap_or_default();
        self.enter(Verb::Create, &ar.plural, Some(&name)).await?;
        let key = (ar.plural.clone(), object.metadata.namespace.clone(), name.clone());
        let mut state = self.lock();
        if state.objects.contains_key(&key) {
            return Err(CallError::Conflict(format!("{} {} already exists", ar.plural, name)));
        }
        state.next_uid += 1;
        let mut created = object.clone();
        created.metadata.uid = Some(format!("uid-{}", state.next_uid));
        state.objects.insert(key, created.clone());
        Ok(created)
    }

    async fn delete(
        &self,
        ar: &ApiResource,
        name: &str,
        namespace: Option<&str>,
    ) -> std::result::Result<(), CallError> {
        self.enter(Verb::Delete, &ar.plural, Some(name)).await?;
        let key = (ar.plural.clone(), namespace.map(String::from), name.to_string());
        self.lock()
            .objects
            .remove(&key)
            .map(|_| ())
            .ok_or(CallError::NotFound)
    }

    async fn server_version(&self) -> std::result::Result<String, CallError> {
        self.enter(Verb::Version, "", None).await?;
        Ok("v1.30.4".to_string())
    }
}

/// Client factory handing out clients over pre-registered fakes
#[derive(Default)]
pub struct StaticClientFactory {
    clusters: HashMap<String, Arc<FakeCluster>>,
    settings: ClientSettings,
    dry_run: bool,
}

impl StaticClientFactory {
    /// Create an empty factory with fast test settings
    pub fn new() -> Self {
        Self {
            settings: fast_settings(),
            ..Default::default()
        }
    }

    /// Register a fake under a context name
    pub fn with_cluster(mut self, context: &str, cluster: Arc<FakeCluster>) -> Self {
        self.clusters.insert(context.to_string(), cluster);
        self
    }

    /// Build every client in dry-run mode
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

#[async_trait]
impl ClientFactory for StaticClientFactory {
    async fn client_for(&self, context: &ClusterContext) -> Result<ClusterClient> {
        let cluster = self.clusters.get(&context.name).ok_or_else(|| {
            Error::fatal_with_context(&context.name, "no credentials for context")
        })?;
        Ok(ClusterClient::new(
            context.name.clone(),
            cluster.clone(),
            &self.settings,
            self.dry_run,
        ))
    }
}

/// Client settings with millisecond backoff for tests
pub fn fast_settings() -> ClientSettings {
    ClientSettings {
        call_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_secs(1),
        retry: crate::retry::RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_multiplier: 2.0,
        },
    }
}

/// Builders for fleet-management objects
pub mod fixtures {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use kube::api::DynamicObject;
    use serde_json::json;

    use crate::resources::{
        new_object, FleetKind, AGENT_NAMESPACE, BACKUP_NAMESPACE, CONDITION_AVAILABLE,
        FLEET_NAMESPACE, KUBECONFIG_SECRET_KEY,
    };

    /// A namespace
    pub fn namespace(name: &str) -> DynamicObject {
        new_object(FleetKind::Namespace, name, None, json!({}))
    }

    /// The namespace marking a fleet-management hub
    pub fn fleet_namespace() -> DynamicObject {
        namespace(FLEET_NAMESPACE)
    }

    /// A BackupSchedule in the backup namespace
    pub fn backup_schedule(name: &str, phase: &str, paused: bool) -> DynamicObject {
        new_object(
            FleetKind::BackupSchedule,
            name,
            Some(BACKUP_NAMESPACE),
            json!({
                "spec": {
                    "veleroSchedule": "0 */2 * * *",
                    "veleroTtl": "120h",
                    "paused": paused
                },
                "status": {"phase": phase}
            }),
        )
    }

    /// A Restore in the backup namespace
    pub fn restore(name: &str, sync: bool, phase: Option<&str>) -> DynamicObject {
        let mut body = json!({
            "spec": {
                "syncRestoreWithNewBackups": sync,
                "veleroManagedClustersBackupName": if sync { "skip" } else { "latest" },
                "veleroCredentialsBackupName": "latest",
                "veleroResourcesBackupName": "latest"
            }
        });
        if let Some(phase) = phase {
            body["status"] = json!({"phase": phase});
        }
        new_object(FleetKind::Restore, name, Some(BACKUP_NAMESPACE), body)
    }

    /// A restore with an explicit creation timestamp
    pub fn restore_at(name: &str, sync: bool, phase: Option<&str>, created: &str) -> DynamicObject {
        let mut obj = restore(name, sync, phase);
        obj.metadata.creation_timestamp = serde_json::from_value(json!(created)).ok();
        obj
    }

    /// A ManagedCluster with the Available condition set accordingly
    pub fn managed_cluster(name: &str, available: bool) -> DynamicObject {
        new_object(
            FleetKind::ManagedCluster,
            name,
            None,
            json!({
                "spec": {"hubAcceptsClient": true},
                "status": {"conditions": [{
                    "type": CONDITION_AVAILABLE,
                    "status": if available { "True" } else { "Unknown" }
                }]}
            }),
        )
    }

    /// The hub's own member
    pub fn local_cluster() -> DynamicObject {
        new_object(
            FleetKind::ManagedCluster,
            "local-cluster",
            None,
            json!({
                "metadata": {"labels": {"local-cluster": "true"}},
                "status": {"conditions": [{"type": CONDITION_AVAILABLE, "status": "True"}]}
            }),
        )
    }

    /// A klusterlet secret whose kubeconfig points at `server`
    pub fn klusterlet_secret(name: &str, server: &str) -> DynamicObject {
        let kubeconfig = format!(
            "apiVersion: v1\nkind: Config\nclusters:\n- name: hub\n  cluster:\n    server: {server}\ncontexts:\n- name: hub\n  context:\n    cluster: hub\n    user: klusterlet\ncurrent-context: hub\nusers:\n- name: klusterlet\n  user:\n    token: t\n"
        );
        new_object(
            FleetKind::Secret,
            name,
            Some(AGENT_NAMESPACE),
            json!({
                "type": "Opaque",
                "data": {KUBECONFIG_SECRET_KEY: STANDARD.encode(kubeconfig.as_bytes())}
            }),
        )
    }
}
