//! Single-attempt API transport
//!
//! [`Transport`] is the seam between the retrying [`ClusterClient`](super::ClusterClient)
//! and the Kubernetes API. Implementations make exactly one request per call
//! and report failures as a classified [`CallError`]; retrying, timeouts and
//! dry-run live above this layer.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
use serde_json::Value;

/// Classified outcome of a failed API call
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// 404
    #[error("not found")]
    NotFound,
    /// 401/403
    #[error("access denied: {0}")]
    Forbidden(String),
    /// 409
    #[error("conflict: {0}")]
    Conflict(String),
    /// Any other client-side rejection (400, 422, ...)
    #[error("rejected with {code}: {message}")]
    Rejected {
        /// HTTP status code
        code: u16,
        /// Server message
        message: String,
    },
    /// Timeouts, connection resets, 5xx, rate limiting
    #[error("{0}")]
    Retryable(String),
    /// The per-call deadline elapsed
    #[error("call timed out after {0}s")]
    Timeout(u64),
}

impl CallError {
    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, CallError::Retryable(_) | CallError::Timeout(_))
    }

    /// Classify an HTTP status code returned by the API server
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            404 => CallError::NotFound,
            401 | 403 => CallError::Forbidden(message),
            409 => CallError::Conflict(message),
            408 | 429 => CallError::Retryable(format!("{code}: {message}")),
            500..=599 => CallError::Retryable(format!("{code}: {message}")),
            _ => CallError::Rejected { code, message },
        }
    }
}

impl From<kube::Error> for CallError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) => CallError::from_status(ae.code, ae.message),
            kube::Error::Auth(e) => CallError::Forbidden(e.to_string()),
            kube::Error::SerdeError(e) => CallError::Rejected {
                code: 0,
                message: format!("malformed response: {e}"),
            },
            // Connection errors, TLS handshakes, body reads: all worth another try
            other => CallError::Retryable(other.to_string()),
        }
    }
}

/// Raw API operations, one request per call
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET a single object
    async fn get(
        &self,
        ar: &ApiResource,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<DynamicObject, CallError>;

    /// LIST objects in a namespace, or across all namespaces / cluster scope
    async fn list(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, CallError>;

    /// Apply a JSON merge patch
    async fn patch(
        &self,
        ar: &ApiResource,
        name: &str,
        namespace: Option<&str>,
        body: &Value,
    ) -> Result<DynamicObject, CallError>;

    /// Replace an object (PUT)
    async fn replace(
        &self,
        ar: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, CallError>;

    /// Create an object (POST)
    async fn create(
        &self,
        ar: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, CallError>;

    /// Delete an object
    async fn delete(
        &self,
        ar: &ApiResource,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<(), CallError>;

    /// Fetch the API server version (reachability probe)
    async fn server_version(&self) -> Result<String, CallError>;
}

/// Transport backed by a kube-rs client
pub struct KubeTransport {
    client: Client,
}

impl KubeTransport {
    /// Create a new KubeTransport
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, ar: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
            None => Api::all_with(self.client.clone(), ar),
        }
    }
}

#[async_trait]
impl Transport for KubeTransport {
    async fn get(
        &self,
        ar: &ApiResource,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<DynamicObject, CallError> {
        Ok(self.api(ar, namespace).get(name).await?)
    }

    async fn list(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, CallError> {
        let list = self.api(ar, namespace).list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn patch(
        &self,
        ar: &ApiResource,
        name: &str,
        namespace: Option<&str>,
        body: &Value,
    ) -> Result<DynamicObject, CallError> {
        Ok(self
            .api(ar, namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(body))
            .await?)
    }

    async fn replace(
        &self,
        ar: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, CallError> {
        let name = object.metadata.name.as_deref().ok_or_else(|| CallError::Rejected {
            code: 0,
            message: "object has no name".to_string(),
        })?;
        Ok(self
            .api(ar, object.metadata.namespace.as_deref())
            .replace(name, &PostParams::default(), object)
            .await?)
    }

    async fn create(
        &self,
        ar: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, CallError> {
        Ok(self
            .api(ar, object.metadata.namespace.as_deref())
            .create(&PostParams::default(), object)
            .await?)
    }

    async fn delete(
        &self,
        ar: &ApiResource,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<(), CallError> {
        self.api(ar, namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn server_version(&self) -> Result<String, CallError> {
        let info = self.client.apiserver_version().await?;
        Ok(info.git_version)
    }
}
