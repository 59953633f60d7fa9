//! Fleet-management resource catalogue
//!
//! The switchover only ever touches a fixed set of resource kinds, so each is
//! an enum variant carrying its API group, version and plural instead of
//! relying on runtime discovery.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde_json::Value;

/// Namespace whose presence marks a context as a fleet-management hub
pub const FLEET_NAMESPACE: &str = "open-cluster-management";
/// Namespace holding BackupSchedule and Restore resources
pub const BACKUP_NAMESPACE: &str = "open-cluster-management-backup";
/// Namespace of the klusterlet agent on a managed cluster
pub const AGENT_NAMESPACE: &str = "open-cluster-management-agent";

/// Name of the hub's own managed-cluster member
pub const LOCAL_CLUSTER_NAME: &str = "local-cluster";
/// Label marking the hub's own managed-cluster member
pub const LOCAL_CLUSTER_LABEL: &str = "local-cluster";

/// Klusterlet secret holding the kubeconfig the agent uses to reach its hub
pub const HUB_KUBECONFIG_SECRET: &str = "hub-kubeconfig-secret";
/// Bootstrap secret used before the agent has its own hub credential
pub const BOOTSTRAP_KUBECONFIG_SECRET: &str = "bootstrap-hub-kubeconfig";
/// Data key of the kubeconfig inside klusterlet secrets
pub const KUBECONFIG_SECRET_KEY: &str = "kubeconfig";

/// Condition type reported by an available managed cluster
pub const CONDITION_AVAILABLE: &str = "ManagedClusterConditionAvailable";
/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";

/// Annotation stopping the hub from re-importing a managed cluster
pub const DISABLE_AUTO_IMPORT_ANNOTATION: &str = "import.open-cluster-management.io/disable-auto-import";

/// Resource kinds the switchover reads or writes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FleetKind {
    /// Hub backup schedule
    BackupSchedule,
    /// Hub restore (one-shot or passive sync)
    Restore,
    /// Cluster registered with a hub
    ManagedCluster,
    /// Core namespace
    Namespace,
    /// Core secret
    Secret,
}

impl FleetKind {
    /// Full API version (e.g., "cluster.open-cluster-management.io/v1beta1", "v1")
    pub fn api_version(&self) -> &'static str {
        match self {
            Self::BackupSchedule | Self::Restore => "cluster.open-cluster-management.io/v1beta1",
            Self::ManagedCluster => "cluster.open-cluster-management.io/v1",
            Self::Namespace | Self::Secret => "v1",
        }
    }

    /// Resource kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BackupSchedule => "BackupSchedule",
            Self::Restore => "Restore",
            Self::ManagedCluster => "ManagedCluster",
            Self::Namespace => "Namespace",
            Self::Secret => "Secret",
        }
    }

    /// Plural resource name used in API paths
    pub fn plural(&self) -> &'static str {
        match self {
            Self::BackupSchedule => "backupschedules",
            Self::Restore => "restores",
            Self::ManagedCluster => "managedclusters",
            Self::Namespace => "namespaces",
            Self::Secret => "secrets",
        }
    }

    /// Whether objects of this kind live in a namespace
    pub fn is_namespaced(&self) -> bool {
        matches!(self, Self::BackupSchedule | Self::Restore | Self::Secret)
    }

    /// Build an ApiResource from the kind's constants.
    pub fn api_resource(&self) -> ApiResource {
        build_api_resource(self.api_version(), self.kind(), self.plural())
    }
}

impl std::fmt::Display for FleetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.plural())
    }
}

/// Build an ApiResource from a known apiVersion, kind and plural.
pub fn build_api_resource(api_version: &str, kind: &str, plural: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: plural.to_string(),
    }
}

/// Split an apiVersion into (group, version); core resources have an empty group.
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Build a DynamicObject of the given kind with an arbitrary body merged in.
///
/// `body` may carry `spec`, `metadata.labels`, etc.; name and namespace are
/// always taken from the arguments.
pub fn new_object(kind: FleetKind, name: &str, namespace: Option<&str>, body: Value) -> DynamicObject {
    let mut obj = DynamicObject::new(name, &kind.api_resource());
    if let Some(ns) = namespace {
        obj = obj.within(ns);
    }
    if let Value::Object(mut map) = body {
        if let Some(meta) = map.remove("metadata") {
            if let Some(labels) = meta.get("labels").and_then(Value::as_object) {
                obj.metadata.labels = Some(
                    labels
                        .iter()
                        .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                        .collect(),
                );
            }
            if let Some(annotations) = meta.get("annotations").and_then(Value::as_object) {
                obj.metadata.annotations = Some(
                    annotations
                        .iter()
                        .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                        .collect(),
                );
            }
        }
        obj.data = Value::Object(map);
    }
    obj
}

/// Read a nested field from an object's body (everything except metadata)
pub fn field<'a>(obj: &'a DynamicObject, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(&obj.data, |value, key| value.get(key))
}

/// Read a nested string field from an object's body
pub fn str_field<'a>(obj: &'a DynamicObject, path: &[&str]) -> Option<&'a str> {
    field(obj, path).and_then(Value::as_str)
}

/// Read a nested boolean field from an object's body
pub fn bool_field(obj: &DynamicObject, path: &[&str]) -> Option<bool> {
    field(obj, path).and_then(Value::as_bool)
}

/// Check if an object has a `status.conditions` entry of the given type with status "True"
pub fn has_true_condition(obj: &DynamicObject, condition_type: &str) -> bool {
    field(obj, &["status", "conditions"])
        .and_then(Value::as_array)
        .map(|conds| {
            conds.iter().any(|c| {
                c.get("type").and_then(Value::as_str) == Some(condition_type)
                    && c.get("status").and_then(Value::as_str) == Some(STATUS_TRUE)
            })
        })
        .unwrap_or(false)
}

/// Decode one base64 `data` entry of a Secret
pub fn secret_data(obj: &DynamicObject, key: &str) -> Option<Vec<u8>> {
    let encoded = str_field(obj, &["data", key])?;
    STANDARD.decode(encoded.trim()).ok()
}

/// Whether a ManagedCluster is the hub's own member
pub fn is_local_cluster(obj: &DynamicObject) -> bool {
    if obj.metadata.name.as_deref() == Some(LOCAL_CLUSTER_NAME) {
        return true;
    }
    obj.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(LOCAL_CLUSTER_LABEL))
        .map(|v| v == "true")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn api_resources_for_fleet_kinds() {
        let ar = FleetKind::BackupSchedule.api_resource();
        assert_eq!(ar.group, "cluster.open-cluster-management.io");
        assert_eq!(ar.version, "v1beta1");
        assert_eq!(ar.plural, "backupschedules");

        let ar = FleetKind::Namespace.api_resource();
        assert_eq!(ar.group, "");
        assert_eq!(ar.version, "v1");
        assert_eq!(ar.api_version, "v1");
        assert!(!FleetKind::ManagedCluster.is_namespaced());
        assert!(FleetKind::Restore.is_namespaced());
    }

    #[test]
    fn new_object_carries_body_and_labels() {
        let obj = new_object(
            FleetKind::ManagedCluster,
            "local-cluster",
            None,
            json!({
                "metadata": {"labels": {"local-cluster": "true"}},
                "spec": {"hubAcceptsClient": true}
            }),
        );
        assert_eq!(obj.metadata.name.as_deref(), Some("local-cluster"));
        assert!(obj.metadata.namespace.is_none());
        assert_eq!(bool_field(&obj, &["spec", "hubAcceptsClient"]), Some(true));
        assert!(obj.data.get("metadata").is_none());
        assert!(is_local_cluster(&obj));
    }

    #[test]
    fn local_cluster_by_label_only() {
        let obj = new_object(
            FleetKind::ManagedCluster,
            "hub-self",
            None,
            json!({"metadata": {"labels": {"local-cluster": "true"}}}),
        );
        assert!(is_local_cluster(&obj));

        let obj = new_object(FleetKind::ManagedCluster, "prod-east", None, json!({}));
        assert!(!is_local_cluster(&obj));
    }

    #[test]
    fn condition_lookup() {
        let obj = new_object(
            FleetKind::ManagedCluster,
            "prod-east",
            None,
            json!({"status": {"conditions": [
                {"type": "HubAcceptedManagedCluster", "status": "True"},
                {"type": "ManagedClusterConditionAvailable", "status": "Unknown"}
            ]}}),
        );
        assert!(has_true_condition(&obj, "HubAcceptedManagedCluster"));
        assert!(!has_true_condition(&obj, CONDITION_AVAILABLE));
    }

    #[test]
    fn secret_data_is_decoded() {
        let obj = new_object(
            FleetKind::Secret,
            HUB_KUBECONFIG_SECRET,
            Some(AGENT_NAMESPACE),
            json!({"data": {"kubeconfig": "aGVsbG8="}}),
        );
        assert_eq!(secret_data(&obj, KUBECONFIG_SECRET_KEY), Some(b"hello".to_vec()));
        assert_eq!(secret_data(&obj, "missing"), None);
    }
}
