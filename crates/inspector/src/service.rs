//! Inspector service facade
//!
//! Wires the registry, resolver, accessor, aggregator and watch hub together
//! and exposes the operations a request-handling layer calls. Authorization
//! is the caller's responsibility: every method here assumes it was checked.

use crate::accessor::{GetResourceRequest, ListResourcesRequest, ResourceAccessor};
use crate::config::InspectorConfig;
use crate::error::{InspectorError, Result};
use crate::managed::{ManagedResourceAggregator, ManagedResources};
use crate::registry::ContextRegistry;
use crate::resolver::PluralResolver;
use crate::watch::WatchHub;
use cluster_client::{ClusterConnectorTrait, GroupVersion, ObjectPage};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Entry point of the inspection core
#[derive(Debug)]
pub struct InspectorService {
    config: Arc<InspectorConfig>,
    registry: Arc<ContextRegistry>,
    resolver: Arc<PluralResolver>,
    accessor: Arc<ResourceAccessor>,
    managed: ManagedResourceAggregator,
    watch_hub: Arc<WatchHub>,
}

impl InspectorService {
    /// Wire every component over one registry
    pub fn new(config: InspectorConfig, connector: Arc<dyn ClusterConnectorTrait>) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(ContextRegistry::new(Arc::clone(&config), connector));
        let resolver = Arc::new(PluralResolver::new());
        let accessor = Arc::new(ResourceAccessor::new(
            Arc::clone(&registry),
            Arc::clone(&resolver),
        ));
        let managed = ManagedResourceAggregator::new(
            Arc::clone(&registry),
            Arc::clone(&accessor),
            config.managed_cache_ttl,
            config.max_concurrent_queries,
        );
        let watch_hub = Arc::new(WatchHub::new(
            Arc::clone(&registry),
            Arc::clone(&resolver),
            config.watch_resync,
        ));

        Self {
            config,
            registry,
            resolver,
            accessor,
            managed,
            watch_hub,
        }
    }

    /// Activate the in-cluster context when running inside a cluster
    pub async fn initialize(&self) {
        self.registry.initialize().await;
    }

    /// Configuration this service was built with
    pub fn config(&self) -> &InspectorConfig {
        &self.config
    }

    /// Shared live watch hub
    pub fn watch_hub(&self) -> Arc<WatchHub> {
        Arc::clone(&self.watch_hub)
    }

    /// One page of objects of a type
    pub async fn list_resources(&self, request: &ListResourcesRequest) -> Result<ObjectPage> {
        self.accessor.list(request).await
    }

    /// A single object
    pub async fn get_resource(&self, request: &GetResourceRequest) -> Result<Value> {
        self.accessor.get(request).await
    }

    /// Events whose involved object is `kind`/`name`
    pub async fn get_events(
        &self,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
        context: Option<&str>,
    ) -> Result<Vec<Value>> {
        self.accessor.events(kind, name, namespace, context).await
    }

    /// Provider-owned objects on `context`, cached per context
    pub async fn get_managed_resources(
        &self,
        context: Option<&str>,
        force_refresh: bool,
    ) -> Result<ManagedResources> {
        self.managed.get_managed(context, force_refresh).await
    }

    /// Known context names
    pub async fn list_contexts(&self) -> Result<Vec<String>> {
        self.registry.list_contexts().await
    }

    pub async fn current_context(&self) -> Option<String> {
        self.registry.current_context().await
    }

    /// Activate `name`
    pub async fn set_context(&self, name: &str) -> Result<()> {
        self.registry.set_active(name).await
    }

    /// Merge contexts from a kubeconfig document; returns the names added
    pub async fn add_contexts(&self, raw: &str) -> Result<Vec<String>> {
        self.registry.add_contexts(raw).await
    }

    /// Delete a context from the store and drop its managed-resource cache
    pub async fn remove_context(&self, name: &str) -> Result<()> {
        self.registry.remove_context(name).await?;
        self.managed.clear_cache(Some(name)).await;
        Ok(())
    }

    /// Probe `context` (or the active one) with a bounded round trip.
    ///
    /// The previously active context is restored afterwards.
    pub async fn check_connectivity(&self, context: Option<&str>) -> Result<bool> {
        let original = self.registry.current_context().await;
        let handle = self.registry.resolve(context).await?;

        let probe = tokio::time::timeout(self.config.probe_timeout, handle.client.probe()).await;

        if let Some(original) = original.filter(|o| *o != handle.context)
            && let Err(e) = self.registry.set_active(&original).await
        {
            warn!("Failed to restore context {}: {}", original, e);
        }

        match probe {
            Ok(Ok(())) => {
                info!("Context {} is reachable", handle.context);
                Ok(true)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(InspectorError::Timeout(self.config.probe_timeout)),
        }
    }

    /// Let a failed context be retried
    pub async fn clear_failed_context(&self, name: &str) {
        self.registry.clear_failed(name).await;
    }

    /// Drop one context's managed-resource cache, or all of them
    pub async fn clear_managed_cache(&self, context: Option<&str>) {
        self.managed.clear_cache(context).await;
    }

    /// Plural resource name for `api_version`/`kind` on `context`
    pub async fn resolve_plural(
        &self,
        api_version: &str,
        kind: &str,
        context: Option<&str>,
    ) -> Result<String> {
        let gv = GroupVersion::parse_allow_core(api_version)
            .map_err(|e| InspectorError::Validation(e.to_string()))?;
        let handle = self.registry.resolve(context).await?;
        Ok(self.resolver.resolve(handle.client.as_ref(), &gv, kind).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use cluster_client::{MockConnector, ResourceType};
    use std::time::Duration;

    fn service(env: &TestEnv, connector: &MockConnector) -> InspectorService {
        InspectorService::new(env.config.clone(), Arc::new(connector.clone()))
    }

    #[tokio::test]
    async fn test_check_connectivity_restores_original_context() {
        let env = three_contexts();
        let connector = MockConnector::new();
        let svc = service(&env, &connector);
        svc.set_context("dev").await.unwrap();

        assert!(svc.check_connectivity(Some("prod")).await.unwrap());
        assert_eq!(connector.client("prod").probe_count(), 1);
        assert_eq!(svc.current_context().await.as_deref(), Some("dev"));
    }

    #[tokio::test]
    async fn test_check_connectivity_active_context() {
        let env = three_contexts();
        let connector = MockConnector::new();
        let svc = service(&env, &connector);

        let err = svc.check_connectivity(None).await.unwrap_err();
        assert!(matches!(err, InspectorError::Validation(_)));

        svc.set_context("staging").await.unwrap();
        assert!(svc.check_connectivity(None).await.unwrap());
        assert_eq!(connector.client("staging").probe_count(), 1);
    }

    #[tokio::test]
    async fn test_check_connectivity_probe_failure() {
        let env = three_contexts();
        let connector = MockConnector::new();
        connector.client("prod").fail_probe("Unauthorized");
        let svc = service(&env, &connector);
        svc.set_context("dev").await.unwrap();

        let err = svc.check_connectivity(Some("prod")).await.unwrap_err();
        assert!(matches!(err, InspectorError::Cluster(_)));
        assert_eq!(svc.current_context().await.as_deref(), Some("dev"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_connectivity_times_out() {
        let env = three_contexts();
        let connector = MockConnector::new();
        connector.client("prod").delay_probe(Duration::from_secs(60));
        let svc = service(&env, &connector);

        let err = svc.check_connectivity(Some("prod")).await.unwrap_err();
        assert!(matches!(err, InspectorError::Timeout(d) if d == Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn test_remove_context_drops_its_managed_cache() {
        let env = three_contexts();
        let connector = MockConnector::new();
        let staging = connector.client("staging");
        staging.register_type(&ResourceType::custom_resource_definitions());
        let svc = service(&env, &connector);

        assert!(!svc.get_managed_resources(Some("staging"), false).await.unwrap().from_cache);
        assert!(svc.get_managed_resources(Some("staging"), false).await.unwrap().from_cache);

        svc.set_context("dev").await.unwrap();
        svc.remove_context("staging").await.unwrap();
        assert_eq!(svc.list_contexts().await.unwrap(), vec!["dev", "prod"]);

        svc.clear_managed_cache(None).await;
        let err = svc.get_managed_resources(Some("staging"), false).await.unwrap_err();
        assert!(matches!(err, InspectorError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_clear_failed_context_allows_retry() {
        let env = three_contexts();
        let connector = MockConnector::new();
        connector.fail_context("prod");
        let svc = service(&env, &connector);

        assert!(svc.set_context("prod").await.is_err());
        connector.heal_context("prod");
        assert!(svc.set_context("prod").await.is_err());
        assert_eq!(connector.connect_count("prod"), 1);

        svc.clear_failed_context("prod").await;
        svc.set_context("prod").await.unwrap();
        assert_eq!(svc.current_context().await.as_deref(), Some("prod"));
    }

    #[tokio::test]
    async fn test_resolve_plural() {
        let env = three_contexts();
        let connector = MockConnector::new();
        let client = connector.client("dev");
        client.insert(
            &ResourceType::custom_resource_definitions(),
            crd("example.io", "Policy", "policies", None),
        );
        let svc = service(&env, &connector);

        assert_eq!(
            svc.resolve_plural("apps/v1", "Deployment", Some("dev")).await.unwrap(),
            "deployments"
        );
        assert_eq!(
            svc.resolve_plural("example.io/v1", "Policy", Some("dev")).await.unwrap(),
            "policies"
        );
        assert_eq!(svc.resolve_plural("v1", "Pod", Some("dev")).await.unwrap(), "pods");
    }

    #[tokio::test]
    async fn test_in_cluster_initialize() {
        let env = three_contexts();
        env.mount_service_account();
        let connector = MockConnector::new();
        let svc = service(&env, &connector);

        svc.initialize().await;
        assert_eq!(svc.current_context().await.as_deref(), Some("in-cluster"));
        assert_eq!(svc.list_contexts().await.unwrap(), vec!["in-cluster"]);
        assert!(svc.check_connectivity(None).await.unwrap());
    }
}
