//! Multi-cluster Kubernetes inspection core
//!
//! Everything a dashboard backend needs to browse clusters it does not know
//! in advance: a registry of kubeconfig contexts with one active connection,
//! plural-name discovery for arbitrary kinds, generic list/get, aggregation of
//! the resources managed by composition-framework providers, and live
//! per-object watches multiplexed over one client connection.
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::KubeConnector;
//! use inspector::{InspectorConfig, InspectorService, ListResourcesRequest};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = InspectorService::new(InspectorConfig::from_env()?, Arc::new(KubeConnector::new()));
//! service.initialize().await;
//!
//! let page = service
//!     .list_resources(&ListResourcesRequest {
//!         api_version: "apps/v1".to_string(),
//!         kind: "Deployment".to_string(),
//!         context: Some("prod".to_string()),
//!         ..Default::default()
//!     })
//!     .await?;
//! println!("{} deployments", page.items.len());
//! # Ok(())
//! # }
//! ```

pub mod accessor;
pub mod config;
pub mod error;
pub mod framework;
pub mod kubeconfig;
pub mod managed;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod watch;

#[cfg(test)]
mod test_utils;


pub use accessor::{GetResourceRequest, ListResourcesRequest, ResourceAccessor};
pub use config::InspectorConfig;
pub use error::{InspectorError, Result};
pub use kubeconfig::{KubeconfigDocument, KubeconfigStore};
pub use managed::{ManagedResourceAggregator, ManagedResources};
pub use registry::{ActiveHandle, ContextRegistry};
pub use resolver::PluralResolver;
pub use service::InspectorService;
pub use watch::{ControlMessage, ResourceDescriptor, WatchHub, WatchMessage, WatchSession};
