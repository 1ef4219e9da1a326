//! Cluster access models
//!
//! Resource bodies are kept as `serde_json::Value` documents: the inspector has
//! to handle kinds that are unknown at build time, so there is no per-kind
//! struct. Only the addressing types below are strongly typed.

use crate::error::ClusterError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A parsed `group/version` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupVersion {
    pub group: String,
    pub version: String,
}

impl GroupVersion {
    /// Parse an apiVersion of the form `group/version`.
    ///
    /// Both halves must be non-empty after trimming. Core-group versions such
    /// as `v1` are rejected here; callers that accept them handle them first.
    pub fn parse(api_version: &str) -> Result<Self, ClusterError> {
        let Some((group, version)) = api_version.split_once('/') else {
            return Err(ClusterError::InvalidRequest(format!(
                "invalid apiVersion format: {}, expected group/version",
                api_version
            )));
        };
        if version.contains('/') {
            return Err(ClusterError::InvalidRequest(format!(
                "invalid apiVersion format: {}, expected group/version",
                api_version
            )));
        }

        let group = group.trim();
        let version = version.trim();
        if group.is_empty() {
            return Err(ClusterError::InvalidRequest(format!(
                "invalid apiVersion format: {}, group is required",
                api_version
            )));
        }
        if version.is_empty() {
            return Err(ClusterError::InvalidRequest(format!(
                "invalid apiVersion format: {}, version is required",
                api_version
            )));
        }

        Ok(Self {
            group: group.to_string(),
            version: version.to_string(),
        })
    }

    /// Like [`GroupVersion::parse`], but a bare version (`v1`) addresses the core group.
    pub fn parse_allow_core(api_version: &str) -> Result<Self, ClusterError> {
        let trimmed = api_version.trim();
        if !trimmed.is_empty() && !trimmed.contains('/') {
            return Ok(Self {
                group: String::new(),
                version: trimmed.to_string(),
            });
        }
        Self::parse(api_version)
    }

    /// Whether this is the core (unnamed) group
    pub fn is_core(&self) -> bool {
        self.group.is_empty()
    }

    /// The apiVersion string (`version` alone for the core group)
    pub fn api_version(&self) -> String {
        if self.is_core() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.api_version())
    }
}

/// Everything needed to address a resource type generically
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceType {
    /// API group; empty for the core group
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
}

impl ResourceType {
    /// Build a resource type from a parsed group/version.
    pub fn new(gv: &GroupVersion, kind: impl Into<String>, plural: impl Into<String>) -> Self {
        Self {
            group: gv.group.clone(),
            version: gv.version.clone(),
            kind: kind.into(),
            plural: plural.into(),
        }
    }

    /// Build a core-group (`v1`) resource type.
    pub fn core(kind: impl Into<String>, plural: impl Into<String>) -> Self {
        Self {
            group: String::new(),
            version: "v1".to_string(),
            kind: kind.into(),
            plural: plural.into(),
        }
    }

    /// `CustomResourceDefinition` objects
    pub fn custom_resource_definitions() -> Self {
        Self {
            group: "apiextensions.k8s.io".to_string(),
            version: "v1".to_string(),
            kind: "CustomResourceDefinition".to_string(),
            plural: "customresourcedefinitions".to_string(),
        }
    }

    /// The apiVersion string (`version` alone for the core group)
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.api_version(), self.kind, self.plural)
    }
}

/// Options for a list call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub limit: Option<u32>,
    pub continue_token: Option<String>,
    pub field_selector: Option<String>,
}

impl ListQuery {
    /// A query restricted by a field selector
    pub fn with_field_selector(selector: impl Into<String>) -> Self {
        Self {
            field_selector: Some(selector.into()),
            ..Default::default()
        }
    }
}

/// One page of a list call
///
/// Serializes with explicit nulls for the continuation markers so callers can
/// distinguish "last page" from "field missing".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectPage {
    pub items: Vec<Value>,
    pub continue_token: Option<String>,
    pub remaining_item_count: Option<i64>,
}

impl ObjectPage {
    /// An empty, final page
    pub fn empty() -> Self {
        Self::default()
    }
}

/// A change observed by a watch stream
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectEvent {
    /// The object was created, modified, or re-listed
    Applied(Value),
    /// The object was deleted; carries its last known state
    Deleted(Value),
}

impl ObjectEvent {
    /// The object document carried by the event
    pub fn object(&self) -> &Value {
        match self {
            ObjectEvent::Applied(obj) | ObjectEvent::Deleted(obj) => obj,
        }
    }
}

/// Built-in kinds served through typed accessors instead of the dynamic API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinKind {
    Pod,
    Service,
    ConfigMap,
    Secret,
    Namespace,
    Node,
    PersistentVolume,
    Deployment,
    StatefulSet,
    DaemonSet,
    ReplicaSet,
}

impl BuiltinKind {
    /// Find the typed accessor for `(apiVersion, kind)`.
    ///
    /// Namespaced kinds only match when a namespace is given and cluster-scoped
    /// kinds only when none is, so a mismatched request falls through to the
    /// generic path.
    pub fn lookup(api_version: &str, kind: &str, namespaced: bool) -> Option<Self> {
        let found = match (api_version, kind) {
            ("v1", "Pod") => BuiltinKind::Pod,
            ("v1", "Service") => BuiltinKind::Service,
            ("v1", "ConfigMap") => BuiltinKind::ConfigMap,
            ("v1", "Secret") => BuiltinKind::Secret,
            ("v1", "Namespace") => BuiltinKind::Namespace,
            ("v1", "Node") => BuiltinKind::Node,
            ("v1", "PersistentVolume") => BuiltinKind::PersistentVolume,
            ("apps/v1", "Deployment") => BuiltinKind::Deployment,
            ("apps/v1", "StatefulSet") => BuiltinKind::StatefulSet,
            ("apps/v1", "DaemonSet") => BuiltinKind::DaemonSet,
            ("apps/v1", "ReplicaSet") => BuiltinKind::ReplicaSet,
            _ => return None,
        };
        (found.is_namespaced() == namespaced).then_some(found)
    }

    /// Whether objects of this kind live in a namespace
    pub fn is_namespaced(self) -> bool {
        !matches!(
            self,
            BuiltinKind::Namespace | BuiltinKind::Node | BuiltinKind::PersistentVolume
        )
    }

    /// The generic address of this kind
    pub fn resource_type(self) -> ResourceType {
        let (group, kind, plural) = match self {
            BuiltinKind::Pod => ("", "Pod", "pods"),
            BuiltinKind::Service => ("", "Service", "services"),
            BuiltinKind::ConfigMap => ("", "ConfigMap", "configmaps"),
            BuiltinKind::Secret => ("", "Secret", "secrets"),
            BuiltinKind::Namespace => ("", "Namespace", "namespaces"),
            BuiltinKind::Node => ("", "Node", "nodes"),
            BuiltinKind::PersistentVolume => ("", "PersistentVolume", "persistentvolumes"),
            BuiltinKind::Deployment => ("apps", "Deployment", "deployments"),
            BuiltinKind::StatefulSet => ("apps", "StatefulSet", "statefulsets"),
            BuiltinKind::DaemonSet => ("apps", "DaemonSet", "daemonsets"),
            BuiltinKind::ReplicaSet => ("apps", "ReplicaSet", "replicasets"),
        };
        ResourceType {
            group: group.to_string(),
            version: "v1".to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
        }
    }
}

/// What a connector should build a client for
#[derive(Debug, Clone)]
pub enum ConnectTarget {
    /// Use the mounted service-account credentials
    InCluster,
    /// Use a named context from a kubeconfig document
    Kubeconfig {
        context: String,
        kubeconfig: Box<kube::config::Kubeconfig>,
    },
}

impl ConnectTarget {
    /// The context identity this target connects as
    pub fn context_name(&self) -> &str {
        match self {
            ConnectTarget::InCluster => IN_CLUSTER_CONTEXT,
            ConnectTarget::Kubeconfig { context, .. } => context,
        }
    }
}

/// Fixed identity used when running inside a cluster
pub const IN_CLUSTER_CONTEXT: &str = "in-cluster";

/// Read `metadata.name` from a resource document
pub fn object_name(obj: &Value) -> Option<&str> {
    obj.pointer("/metadata/name").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_version_parse() {
        let gv = GroupVersion::parse("apps/v1").unwrap();
        assert_eq!(gv.group, "apps");
        assert_eq!(gv.version, "v1");
        assert_eq!(gv.api_version(), "apps/v1");

        let gv = GroupVersion::parse(" example.io / v1alpha1 ").unwrap();
        assert_eq!(gv.group, "example.io");
        assert_eq!(gv.version, "v1alpha1");
    }

    #[test]
    fn test_group_version_rejects_malformed() {
        for bad in ["", "v1", "/v1", "group/", "a/b/c"] {
            let err = GroupVersion::parse(bad).unwrap_err();
            assert!(matches!(err, ClusterError::InvalidRequest(_)), "{bad} should be rejected");
        }
        let err = GroupVersion::parse("/v1").unwrap_err();
        assert!(err.to_string().contains("group is required"));
        let err = GroupVersion::parse("group/").unwrap_err();
        assert!(err.to_string().contains("version is required"));
    }

    #[test]
    fn test_group_version_core() {
        let gv = GroupVersion::parse_allow_core("v1").unwrap();
        assert!(gv.is_core());
        assert_eq!(gv.api_version(), "v1");
        assert_eq!(GroupVersion::parse_allow_core("apps/v1").unwrap().group, "apps");
        assert!(GroupVersion::parse_allow_core("").is_err());
    }

    #[test]
    fn test_builtin_lookup_respects_scope() {
        assert_eq!(BuiltinKind::lookup("v1", "Pod", true), Some(BuiltinKind::Pod));
        assert_eq!(BuiltinKind::lookup("v1", "Pod", false), None);
        assert_eq!(BuiltinKind::lookup("v1", "Node", false), Some(BuiltinKind::Node));
        assert_eq!(BuiltinKind::lookup("v1", "Node", true), None);
        assert_eq!(
            BuiltinKind::lookup("apps/v1", "Deployment", true),
            Some(BuiltinKind::Deployment)
        );
        assert_eq!(BuiltinKind::lookup("apps/v1", "Deployment", false), None);
        assert_eq!(BuiltinKind::lookup("batch/v1", "Job", true), None);
    }

    #[test]
    fn test_resource_type_api_version() {
        assert_eq!(BuiltinKind::Pod.resource_type().api_version(), "v1");
        assert_eq!(BuiltinKind::StatefulSet.resource_type().api_version(), "apps/v1");
        assert_eq!(
            ResourceType::custom_resource_definitions().api_version(),
            "apiextensions.k8s.io/v1"
        );
    }

    #[test]
    fn test_object_page_serializes_null_markers() {
        let json = serde_json::to_value(ObjectPage::empty()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"items": [], "continueToken": null, "remainingItemCount": null})
        );
    }
}
