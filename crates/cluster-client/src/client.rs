//! kube-backed cluster client
//!
//! Implements [`ClusterClientTrait`] on top of a single `kube::Client`, which
//! serves typed accessors, the dynamic (`DynamicObject`) API and
//! `kube_runtime` watches alike.

use crate::error::ClusterError;
use crate::models::*;
use crate::cluster_trait::{ClusterClientTrait, ClusterConnectorTrait};
use futures::stream::BoxStream;
use futures::{StreamExt, future};
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, Node, PersistentVolume, Pod, Secret, Service,
};
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use kube_runtime::{WatchStreamExt, watcher};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

/// Cluster client for one kubeconfig context (or the in-cluster identity)
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    context: String,
    server_url: String,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient")
            .field("context", &self.context)
            .field("server_url", &self.server_url)
            .finish_non_exhaustive()
    }
}

impl KubeClusterClient {
    /// Wrap an already configured `kube::Client`
    pub fn new(client: Client, context: impl Into<String>, server_url: impl Into<String>) -> Self {
        Self {
            client,
            context: context.into(),
            server_url: server_url.into(),
        }
    }

    /// API server URL this client talks to
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn dynamic_api(&self, resource: &ResourceType, namespace: Option<&str>) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(&resource.group, &resource.version, &resource.kind);
        let api_resource = ApiResource::from_gvk_with_plural(&gvk, &resource.plural);
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &api_resource),
            None => Api::all_with(self.client.clone(), &api_resource),
        }
    }

    async fn get_namespaced<K>(&self, namespace: Option<&str>, name: &str) -> Result<Value, ClusterError>
    where
        K: kube::Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
        K::DynamicType: Default,
    {
        let namespace = namespace.ok_or_else(|| {
            ClusterError::InvalidRequest(format!("{} requires a namespace", K::kind(&K::DynamicType::default())))
        })?;
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let obj = api.get(name).await?;
        Ok(serde_json::to_value(obj)?)
    }

    async fn get_cluster_scoped<K>(&self, name: &str) -> Result<Value, ClusterError>
    where
        K: kube::Resource + Clone + DeserializeOwned + Serialize + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let obj = api.get(name).await?;
        Ok(serde_json::to_value(obj)?)
    }
}

fn list_params(query: &ListQuery) -> ListParams {
    let mut params = ListParams::default();
    if let Some(limit) = query.limit {
        params = params.limit(limit);
    }
    if let Some(token) = query.continue_token.as_deref().filter(|t| !t.is_empty()) {
        params = params.continue_token(token);
    }
    if let Some(selector) = query.field_selector.as_deref() {
        params = params.fields(selector);
    }
    params
}

fn map_watch_event(
    event: Result<watcher::Event<DynamicObject>, watcher::Error>,
) -> Option<Result<ObjectEvent, ClusterError>> {
    match event {
        Ok(watcher::Event::Apply(obj) | watcher::Event::InitApply(obj)) => Some(
            serde_json::to_value(obj)
                .map(ObjectEvent::Applied)
                .map_err(ClusterError::from),
        ),
        Ok(watcher::Event::Delete(obj)) => Some(
            serde_json::to_value(obj)
                .map(ObjectEvent::Deleted)
                .map_err(ClusterError::from),
        ),
        Ok(watcher::Event::Init | watcher::Event::InitDone) => None,
        Err(e) => Some(Err(ClusterError::Watch(e.to_string()))),
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for KubeClusterClient {
    fn context(&self) -> &str {
        &self.context
    }

    async fn list(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        query: &ListQuery,
    ) -> Result<ObjectPage, ClusterError> {
        debug!(
            "Listing {} in namespace {} (context {})",
            resource,
            namespace.unwrap_or("<all>"),
            self.context
        );
        let api = self.dynamic_api(resource, namespace);
        let list = api.list(&list_params(query)).await?;

        let items = list
            .items
            .into_iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ObjectPage {
            items,
            continue_token: list.metadata.continue_.filter(|t| !t.is_empty()),
            remaining_item_count: list.metadata.remaining_item_count,
        })
    }

    async fn get(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, ClusterError> {
        debug!("Fetching {} {} (context {})", resource, name, self.context);
        let api = self.dynamic_api(resource, namespace);
        let obj = api.get(name).await?;
        Ok(serde_json::to_value(obj)?)
    }

    async fn get_builtin(
        &self,
        kind: BuiltinKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, ClusterError> {
        debug!("Fetching {:?} {} via typed API (context {})", kind, name, self.context);
        match kind {
            BuiltinKind::Pod => self.get_namespaced::<Pod>(namespace, name).await,
            BuiltinKind::Service => self.get_namespaced::<Service>(namespace, name).await,
            BuiltinKind::ConfigMap => self.get_namespaced::<ConfigMap>(namespace, name).await,
            BuiltinKind::Secret => self.get_namespaced::<Secret>(namespace, name).await,
            BuiltinKind::Deployment => self.get_namespaced::<Deployment>(namespace, name).await,
            BuiltinKind::StatefulSet => self.get_namespaced::<StatefulSet>(namespace, name).await,
            BuiltinKind::DaemonSet => self.get_namespaced::<DaemonSet>(namespace, name).await,
            BuiltinKind::ReplicaSet => self.get_namespaced::<ReplicaSet>(namespace, name).await,
            BuiltinKind::Namespace => self.get_cluster_scoped::<Namespace>(name).await,
            BuiltinKind::Node => self.get_cluster_scoped::<Node>(name).await,
            BuiltinKind::PersistentVolume => {
                self.get_cluster_scoped::<PersistentVolume>(name).await
            }
        }
    }

    async fn probe(&self) -> Result<(), ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.list(&ListParams::default().limit(1)).await?;
        Ok(())
    }

    fn watch(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
    ) -> BoxStream<'static, Result<ObjectEvent, ClusterError>> {
        let api = self.dynamic_api(resource, namespace);
        let config = watcher::Config::default().fields(&format!("metadata.name={}", name));

        watcher(api, config)
            .default_backoff()
            .filter_map(|event| future::ready(map_watch_event(event)))
            .boxed()
    }
}

/// Builds [`KubeClusterClient`]s from kubeconfig contexts or in-cluster credentials
#[derive(Debug, Clone, Copy, Default)]
pub struct KubeConnector;

impl KubeConnector {
    /// Create a new connector
    pub fn new() -> Self {
        Self
    }

    async fn client_config(target: &ConnectTarget) -> Result<Config, ClusterError> {
        match target {
            ConnectTarget::InCluster => Config::incluster().map_err(|e| {
                ClusterError::Config(format!("failed to create in-cluster config: {}", e))
            }),
            ConnectTarget::Kubeconfig { context, kubeconfig } => {
                let options = KubeConfigOptions {
                    context: Some(context.clone()),
                    ..Default::default()
                };
                let kubeconfig: Kubeconfig = kubeconfig.as_ref().clone();
                Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .map_err(|e| ClusterError::Config(format!("failed to create rest config: {}", e)))
            }
        }
    }
}

#[async_trait::async_trait]
impl ClusterConnectorTrait for KubeConnector {
    async fn connect(
        &self,
        target: &ConnectTarget,
    ) -> Result<Arc<dyn ClusterClientTrait>, ClusterError> {
        let config = Self::client_config(target).await?;
        let server_url = config.cluster_url.to_string();
        let client = Client::try_from(config).map_err(ClusterError::Kube)?;

        debug!(
            "Built Kubernetes client for context {} ({})",
            target.context_name(),
            server_url
        );
        Ok(Arc::new(KubeClusterClient::new(
            client,
            target.context_name(),
            server_url,
        )))
    }
}
