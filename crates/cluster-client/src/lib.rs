//! Kubernetes cluster access
//!
//! A thin seam between the inspector core and `kube`: one client per connected
//! context that can list and fetch arbitrary resource types, fetch well-known
//! built-in kinds through their typed APIs and watch a single named object.
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{ClusterClientTrait, ClusterConnectorTrait, ConnectTarget, KubeConnector, ListQuery, ResourceType};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeConnector::new().connect(&ConnectTarget::InCluster).await?;
//! client.probe().await?;
//!
//! let pods = ResourceType::core("Pod", "pods");
//! let page = client.list(&pods, Some("default"), &ListQuery::default()).await?;
//! println!("{} pods", page.items.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Dynamic access**: any group/version/plural through `DynamicObject`
//! - **Typed fast path**: Pods, Services, Deployments and friends via `k8s-openapi`
//! - **Single-object watches**: `kube-runtime` watcher with a name field selector
//! - **Mocking**: in-memory `MockClusterClient`/`MockConnector` behind `test-util`

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod cluster_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::{KubeClusterClient, KubeConnector};
pub use cluster_trait::{ClusterClientTrait, ClusterConnectorTrait};
pub use error::ClusterError;
pub use models::*;
#[cfg(feature = "test-util")]
pub use mock::{MockClusterClient, MockConnector};
