//! Cluster access traits for mocking
//!
//! These traits abstract the kube-backed client and the code that builds it,
//! so the inspector core can be unit tested without a running cluster.
//! The concrete `KubeClusterClient`/`KubeConnector` implement them, and tests
//! use `MockClusterClient`/`MockConnector` (feature `test-util`).

use crate::error::ClusterError;
use crate::models::*;
use futures::stream::BoxStream;
use serde_json::Value;
use std::sync::Arc;

/// Operations against one connected cluster
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterClientTrait: Send + Sync {
    /// The context this client was built for
    fn context(&self) -> &str;

    /// List objects of a resource type, cluster-wide when `namespace` is `None`.
    async fn list(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        query: &ListQuery,
    ) -> Result<ObjectPage, ClusterError>;

    /// Fetch one named object through the dynamic API.
    async fn get(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, ClusterError>;

    /// Fetch one named object of a well-known kind through its typed API.
    async fn get_builtin(
        &self,
        kind: BuiltinKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, ClusterError>;

    /// Cheap round trip proving the API server is reachable with these credentials.
    async fn probe(&self) -> Result<(), ClusterError>;

    /// Open an event-driven watch on a single named object.
    ///
    /// The stream yields the object's changes until it is dropped.
    fn watch(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
    ) -> BoxStream<'static, Result<ObjectEvent, ClusterError>>;
}

/// Builds cluster clients from connection targets
#[async_trait::async_trait]
pub trait ClusterConnectorTrait: Send + Sync {
    /// Build a client for `target`. No request is sent to the cluster.
    async fn connect(&self, target: &ConnectTarget)
        -> Result<Arc<dyn ClusterClientTrait>, ClusterError>;
}
