//! Retry-aware cluster API client
//!
//! [`ClusterClient`] wraps a single-attempt [`Transport`] and adds:
//! - a fixed per-call timeout
//! - bounded exponential backoff for retryable faults only
//! - 404 translation (`None` / empty list) instead of an error
//! - dry-run, fixed at construction, that never issues a mutating request
//! - an `info!` line naming the target before every mutation
//!
//! Helpers such as [`ClusterClient::exists`] are composed from the retrying
//! primitives and deliberately add no retry layer of their own.

mod transport;

pub use transport::{CallError, KubeTransport, Transport};

use std::sync::Arc;
use std::time::Duration;

use kube::api::DynamicObject;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ClientSettings;
use crate::resources::FleetKind;
use crate::retry::{retry_with_backoff, RetryFailure, RetryPolicy};
use crate::{Error, Result};

/// Retrying, dry-run aware client for one cluster context
#[derive(Clone)]
pub struct ClusterClient {
    context: String,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    call_timeout: Duration,
    dry_run: bool,
}

impl std::fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient")
            .field("context", &self.context)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl ClusterClient {
    /// Create a client for `context` over the given transport
    pub fn new(
        context: impl Into<String>,
        transport: Arc<dyn Transport>,
        settings: &ClientSettings,
        dry_run: bool,
    ) -> Self {
        Self {
            context: context.into(),
            transport,
            retry: settings.retry.clone(),
            call_timeout: settings.call_timeout,
            dry_run,
        }
    }

    /// Name of the cluster context this client talks to
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Whether mutating calls are simulated
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Per-call timeout applied to every request
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Single-attempt reachability probe, no retry.
    pub async fn probe(&self) -> Result<String> {
        let secs = self.call_timeout.as_secs();
        match tokio::time::timeout(self.call_timeout, self.transport.server_version()).await {
            Ok(Ok(version)) => Ok(version),
            Ok(Err(e)) => Err(Error::fatal_with_context(
                &self.context,
                format!("probe failed: {e}"),
            )),
            Err(_) => Err(Error::fatal_with_context(
                &self.context,
                format!("probe timed out after {secs}s"),
            )),
        }
    }

    /// Get an object, `None` if it does not exist
    pub async fn get(
        &self,
        kind: FleetKind,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<DynamicObject>> {
        let ar = kind.api_resource();
        let op = describe("get", kind, name, namespace);
        match self
            .call(&op, || self.transport.get(&ar, name, namespace))
            .await
        {
            Ok(obj) => Ok(Some(obj)),
            Err(CallFailure::Call(CallError::NotFound)) => Ok(None),
            Err(failure) => Err(self.into_error(&op, failure)),
        }
    }

    /// List objects in a namespace, or across all namespaces when `None`.
    ///
    /// A missing resource type (CRD not installed) lists as empty.
    pub async fn list(&self, kind: FleetKind, namespace: Option<&str>) -> Result<Vec<DynamicObject>> {
        let ar = kind.api_resource();
        let op = describe("list", kind, "*", namespace);
        match self.call(&op, || self.transport.list(&ar, namespace)).await {
            Ok(items) => Ok(items),
            Err(CallFailure::Call(CallError::NotFound)) => Ok(Vec::new()),
            Err(failure) => Err(self.into_error(&op, failure)),
        }
    }

    /// Apply a JSON merge patch to an existing object
    pub async fn patch(
        &self,
        kind: FleetKind,
        name: &str,
        namespace: Option<&str>,
        body: &Value,
    ) -> Result<DynamicObject> {
        let ar = kind.api_resource();
        let op = describe("patch", kind, name, namespace);
        info!(
            context = %self.context,
            kind = %kind,
            namespace = namespace.unwrap_or(""),
            name = %name,
            dry_run = self.dry_run,
            "patching resource"
        );

        if self.dry_run {
            let mut current = self.require(kind, name, namespace).await?;
            apply_merge_patch(&mut current, body);
            info!(context = %self.context, target = %op, "dry-run: patch simulated");
            return Ok(current);
        }

        self.call(&op, || self.transport.patch(&ar, name, namespace, body))
            .await
            .map_err(|failure| self.into_error(&op, failure))
    }

    /// Replace an existing object (update)
    pub async fn replace(&self, kind: FleetKind, object: &DynamicObject) -> Result<DynamicObject> {
        let ar = kind.api_resource();
        let name = object_name(object)?;
        let namespace = object.metadata.namespace.as_deref();
        let op = describe("replace", kind, name, namespace);
        info!(
            context = %self.context,
            kind = %kind,
            namespace = namespace.unwrap_or(""),
            name = %name,
            dry_run = self.dry_run,
            "replacing resource"
        );

        if self.dry_run {
            self.require(kind, name, namespace).await?;
            info!(context = %self.context, target = %op, "dry-run: replace simulated");
            return Ok(object.clone());
        }

        self.call(&op, || self.transport.replace(&ar, object))
            .await
            .map_err(|failure| self.into_error(&op, failure))
    }

    /// Create an object.
    ///
    /// If the object already exists (typically because an earlier attempt
    /// succeeded before its response was lost) the existing object is returned.
    pub async fn create(&self, kind: FleetKind, object: &DynamicObject) -> Result<DynamicObject> {
        let ar = kind.api_resource();
        let name = object_name(object)?;
        let namespace = object.metadata.namespace.as_deref();
        let op = describe("create", kind, name, namespace);
        info!(
            context = %self.context,
            kind = %kind,
            namespace = namespace.unwrap_or(""),
            name = %name,
            dry_run = self.dry_run,
            "creating resource"
        );

        if self.dry_run {
            if let Some(existing) = self.get(kind, name, namespace).await? {
                info!(context = %self.context, target = %op, "dry-run: object already exists");
                return Ok(existing);
            }
            info!(context = %self.context, target = %op, "dry-run: create simulated");
            return Ok(object.clone());
        }

        match self.call(&op, || self.transport.create(&ar, object)).await {
            Ok(created) => Ok(created),
            Err(CallFailure::Call(CallError::Conflict(_))) => {
                debug!(context = %self.context, target = %op, "object already exists, converging");
                self.require(kind, name, namespace).await
            }
            Err(failure) => Err(self.into_error(&op, failure)),
        }
    }

    /// Delete an object; deleting an absent object succeeds.
    pub async fn delete(&self, kind: FleetKind, name: &str, namespace: Option<&str>) -> Result<()> {
        let ar = kind.api_resource();
        let op = describe("delete", kind, name, namespace);
        info!(
            context = %self.context,
            kind = %kind,
            namespace = namespace.unwrap_or(""),
            name = %name,
            dry_run = self.dry_run,
            "deleting resource"
        );

        if self.dry_run {
            if self.exists(kind, name, namespace).await? {
                info!(context = %self.context, target = %op, "dry-run: delete simulated");
            }
            return Ok(());
        }

        match self
            .call(&op, || self.transport.delete(&ar, name, namespace))
            .await
        {
            Ok(()) | Err(CallFailure::Call(CallError::NotFound)) => Ok(()),
            Err(failure) => Err(self.into_error(&op, failure)),
        }
    }

    /// Check whether an object exists.
    pub async fn exists(&self, kind: FleetKind, name: &str, namespace: Option<&str>) -> Result<bool> {
        // Built on `get`, which already retries
        Ok(self.get(kind, name, namespace).await?.is_some())
    }

    /// Get an object that must exist; absence is fatal.
    pub async fn require(
        &self,
        kind: FleetKind,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<DynamicObject> {
        self.get(kind, name, namespace).await?.ok_or_else(|| {
            Error::fatal_with_context(
                &self.context,
                format!("required resource {} not found", describe("get", kind, name, namespace)),
            )
        })
    }

    /// Run one transport call under the retry policy and per-call timeout
    async fn call<T, F, Fut>(&self, op: &str, mut f: F) -> std::result::Result<T, CallFailure>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, CallError>>,
    {
        let timeout = self.call_timeout;
        retry_with_backoff(&self.retry, op, CallError::is_retryable, || {
            let fut = f();
            async move {
                match tokio::time::timeout(timeout, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(CallError::Timeout(timeout.as_secs())),
                }
            }
        })
        .await
        .map_err(CallFailure::from)
    }

    fn into_error(&self, op: &str, failure: CallFailure) -> Error {
        match failure {
            CallFailure::Exhausted { attempts, error } => {
                Error::transient(format!("{}: {}", self.context, op), attempts, error.to_string())
            }
            CallFailure::Call(CallError::NotFound) => {
                Error::fatal_with_context(&self.context, format!("{op}: not found"))
            }
            CallFailure::Call(error) => {
                Error::fatal_with_context(&self.context, format!("{op}: {error}"))
            }
        }
    }
}

/// Outcome of a failed `call`: either a non-retryable error or an exhausted budget
enum CallFailure {
    Call(CallError),
    Exhausted { attempts: u32, error: CallError },
}

impl From<RetryFailure<CallError>> for CallFailure {
    fn from(failure: RetryFailure<CallError>) -> Self {
        if failure.exhausted {
            CallFailure::Exhausted {
                attempts: failure.attempts,
                error: failure.error,
            }
        } else {
            CallFailure::Call(failure.error)
        }
    }
}

fn describe(verb: &str, kind: FleetKind, name: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => format!("{verb} {kind}/{ns}/{name}"),
        None => format!("{verb} {kind}/{name}"),
    }
}

fn object_name(object: &DynamicObject) -> Result<&str> {
    object
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::validation("object has no metadata.name"))
}

/// Apply an RFC 7386 JSON merge patch in place
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Apply a merge patch to a DynamicObject.
///
/// The `metadata` part only touches labels and annotations; everything else
/// is merged into the object body.
pub fn apply_merge_patch(object: &mut DynamicObject, body: &Value) {
    let Value::Object(map) = body else {
        return;
    };
    for (key, value) in map {
        if key == "metadata" {
            merge_metadata(object, value);
        } else if value.is_null() {
            if let Value::Object(data) = &mut object.data {
                data.remove(key);
            }
        } else {
            if !object.data.is_object() {
                object.data = Value::Object(serde_json::Map::new());
            }
            if let Value::Object(data) = &mut object.data {
                merge_patch(data.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn merge_metadata(object: &mut DynamicObject, meta_patch: &Value) {
    for (field, slot) in [
        ("labels", &mut object.metadata.labels),
        ("annotations", &mut object.metadata.annotations),
    ] {
        let Some(entries) = meta_patch.get(field).and_then(Value::as_object) else {
            continue;
        };
        let map = slot.get_or_insert_with(Default::default);
        for (k, v) in entries {
            match v.as_str() {
                Some(s) => {
                    map.insert(k.clone(), s.to_string());
                }
                None => {
                    map.remove(k);
                }
            }
        }
    }
}
