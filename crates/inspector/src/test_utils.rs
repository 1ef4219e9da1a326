//! Test utilities for unit testing the inspector core
//!
//! Fixture builders for kubeconfig documents and the cluster objects the
//! resolver and aggregator read (CRDs, XRDs, providers, revisions, events).

#![cfg(test)]

use crate::config::InspectorConfig;
use crate::registry::ContextRegistry;
use cluster_client::{GroupVersion, MockConnector, ResourceType};
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;

/// Render a kubeconfig with one context per `(context, cluster, user)` triple
pub fn kubeconfig_yaml(contexts: &[(&str, &str, &str)], current: Option<&str>) -> String {
    let mut clusters: Vec<&str> = Vec::new();
    let mut users: Vec<&str> = Vec::new();
    for (_, cluster, user) in contexts {
        if !clusters.contains(cluster) {
            clusters.push(cluster);
        }
        if !users.contains(user) {
            users.push(user);
        }
    }

    let mut out = String::from("apiVersion: v1\nkind: Config\nclusters:\n");
    for cluster in &clusters {
        out.push_str(&format!(
            "- name: {cluster}\n  cluster:\n    server: https://{cluster}.example:6443\n"
        ));
    }
    out.push_str("contexts:\n");
    for (name, cluster, user) in contexts {
        out.push_str(&format!(
            "- name: {name}\n  context:\n    cluster: {cluster}\n    user: {user}\n"
        ));
    }
    out.push_str("users:\n");
    for user in &users {
        out.push_str(&format!("- name: {user}\n  user:\n    token: {user}-token\n"));
    }
    if let Some(current) = current {
        out.push_str(&format!("current-context: {current}\n"));
    }
    out
}

/// Scratch kubeconfig and service-account directory
pub struct TestEnv {
    _dir: TempDir,
    pub config: InspectorConfig,
}

impl TestEnv {
    /// Write a kubeconfig with the given contexts; no service account is mounted
    pub fn with_contexts(contexts: &[(&str, &str, &str)], current: Option<&str>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let kubeconfig_path = dir.path().join("kubeconfig");
        std::fs::write(&kubeconfig_path, kubeconfig_yaml(contexts, current)).unwrap();
        let config = InspectorConfig {
            kubeconfig_path,
            service_account_dir: dir.path().join("serviceaccount"),
            ..Default::default()
        };
        Self { _dir: dir, config }
    }

    /// Mount fake service-account credentials, switching to in-cluster mode
    pub fn mount_service_account(&self) {
        let sa = &self.config.service_account_dir;
        std::fs::create_dir_all(sa).unwrap();
        std::fs::write(sa.join("token"), "token").unwrap();
        std::fs::write(sa.join("ca.crt"), "ca").unwrap();
    }

    /// A registry over this environment and `connector`
    pub fn registry(&self, connector: &MockConnector) -> Arc<ContextRegistry> {
        Arc::new(ContextRegistry::new(
            Arc::new(self.config.clone()),
            Arc::new(connector.clone()),
        ))
    }
}

/// Standard three-context environment: dev, staging, prod
pub fn three_contexts() -> TestEnv {
    TestEnv::with_contexts(
        &[
            ("dev", "dev-cluster", "dev-user"),
            ("staging", "staging-cluster", "staging-user"),
            ("prod", "prod-cluster", "prod-user"),
        ],
        Some("dev"),
    )
}

/// Resource type for an apiVersion/kind/plural triple
pub fn resource_type(api_version: &str, kind: &str, plural: &str) -> ResourceType {
    let gv = GroupVersion::parse_allow_core(api_version).unwrap();
    ResourceType::new(&gv, kind, plural)
}

/// Provider and revision resource types
pub fn provider_types() -> (ResourceType, ResourceType) {
    (
        resource_type("pkg.crossplane.io/v1", "Provider", "providers"),
        resource_type("pkg.crossplane.io/v1", "ProviderRevision", "providerrevisions"),
    )
}

/// Composite resource definition type at `version`
pub fn xrd_type(version: &str) -> ResourceType {
    resource_type(
        &format!("apiextensions.crossplane.io/{version}"),
        "CompositeResourceDefinition",
        "compositeresourcedefinitions",
    )
}

fn owner_ref(kind: &str, name: &str) -> Value {
    json!({"apiVersion": "pkg.crossplane.io/v1", "kind": kind, "name": name, "uid": format!("{name}-uid")})
}

/// A CRD document, optionally owned by a provider or provider revision
pub fn crd(group: &str, kind: &str, plural: &str, owner: Option<(&str, &str)>) -> Value {
    let owners: Vec<Value> = owner
        .map(|(owner_kind, owner_name)| vec![owner_ref(owner_kind, owner_name)])
        .unwrap_or_default();
    json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "CustomResourceDefinition",
        "metadata": {"name": format!("{plural}.{group}"), "ownerReferences": owners},
        "spec": {
            "group": group,
            "names": {"kind": kind, "plural": plural},
            "scope": "Cluster",
            "versions": [{"name": "v1beta1", "served": true, "storage": true}]
        }
    })
}

/// A composite resource definition document
pub fn xrd(group: &str, kind: &str, plural: &str) -> Value {
    json!({
        "apiVersion": "apiextensions.crossplane.io/v1",
        "kind": "CompositeResourceDefinition",
        "metadata": {"name": format!("{plural}.{group}")},
        "spec": {"group": group, "names": {"kind": kind, "plural": plural}}
    })
}

/// A provider document
pub fn provider(name: &str) -> Value {
    json!({
        "apiVersion": "pkg.crossplane.io/v1",
        "kind": "Provider",
        "metadata": {"name": name}
    })
}

/// A provider revision owned by `provider_name`
pub fn provider_revision(name: &str, provider_name: &str) -> Value {
    json!({
        "apiVersion": "pkg.crossplane.io/v1",
        "kind": "ProviderRevision",
        "metadata": {"name": name, "ownerReferences": [owner_ref("Provider", provider_name)]}
    })
}

/// A cluster-scoped object with only metadata
pub fn object(api_version: &str, kind: &str, name: &str) -> Value {
    json!({"apiVersion": api_version, "kind": kind, "metadata": {"name": name}})
}

/// A namespaced object with only metadata
pub fn namespaced_object(api_version: &str, kind: &str, namespace: &str, name: &str) -> Value {
    json!({"apiVersion": api_version, "kind": kind, "metadata": {"name": name, "namespace": namespace}})
}

/// A core event about `kind/name` in `namespace`
pub fn event(namespace: &str, name: &str, kind: &str, object_name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Event",
        "metadata": {"name": name, "namespace": namespace},
        "involvedObject": {"kind": kind, "name": object_name, "namespace": namespace},
        "reason": "Synced"
    })
}
