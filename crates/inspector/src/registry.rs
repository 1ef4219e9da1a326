//! Context registry
//!
//! Tracks the kubeconfig contexts the inspector knows about, the one active
//! cluster connection and the contexts that failed to connect. There is
//! exactly one active connection per registry; every other component borrows
//! it through [`ActiveHandle`].
//!
//! One `RwLock` guards the connection state. Reads of the active connection
//! take the read side; context switches and kubeconfig read-modify-writes take
//! the write side, so adding or removing a context cannot race a switch.

use crate::config::InspectorConfig;
use crate::error::{InspectorError, Result};
use crate::kubeconfig::KubeconfigStore;
use cluster_client::{
    ClusterClientTrait, ClusterConnectorTrait, ConnectTarget, IN_CLUSTER_CONTEXT,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A borrowed view of the active connection
#[derive(Clone)]
pub struct ActiveHandle {
    /// Context the client was built for
    pub context: String,
    /// The live client
    pub client: Arc<dyn ClusterClientTrait>,
}

impl std::fmt::Debug for ActiveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveHandle")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct ConnectionState {
    current: Option<String>,
    client: Option<Arc<dyn ClusterClientTrait>>,
    failed: HashSet<String>,
}

impl ConnectionState {
    fn handle(&self) -> Option<ActiveHandle> {
        match (&self.current, &self.client) {
            (Some(context), Some(client)) => Some(ActiveHandle {
                context: context.clone(),
                client: Arc::clone(client),
            }),
            _ => None,
        }
    }
}

/// Known contexts, the active connection and the failure blacklist
pub struct ContextRegistry {
    config: Arc<InspectorConfig>,
    store: KubeconfigStore,
    connector: Arc<dyn ClusterConnectorTrait>,
    state: RwLock<ConnectionState>,
}

impl std::fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextRegistry")
            .field("kubeconfig", &self.store.path())
            .finish_non_exhaustive()
    }
}

impl ContextRegistry {
    /// Create a registry; nothing is connected until a context is activated
    pub fn new(config: Arc<InspectorConfig>, connector: Arc<dyn ClusterConnectorTrait>) -> Self {
        let store = KubeconfigStore::new(config.kubeconfig_path.clone());
        Self {
            config,
            store,
            connector,
            state: RwLock::new(ConnectionState::default()),
        }
    }

    /// Whether mounted service-account credentials force in-cluster mode
    pub fn is_in_cluster(&self) -> bool {
        self.config.in_cluster()
    }

    /// Activate the in-cluster identity when running inside a cluster.
    ///
    /// Failures are logged and left for the first request to surface.
    pub async fn initialize(&self) {
        if !self.is_in_cluster() {
            debug!("No service account mounted, waiting for a context to be selected");
            return;
        }
        match self.ensure_active(IN_CLUSTER_CONTEXT).await {
            Ok(_) => info!("Running in cluster, activated {}", IN_CLUSTER_CONTEXT),
            Err(e) => warn!("Failed to activate in-cluster context: {}", e),
        }
    }

    /// Names of all known contexts
    pub async fn list_contexts(&self) -> Result<Vec<String>> {
        if self.is_in_cluster() {
            return Ok(vec![IN_CLUSTER_CONTEXT.to_string()]);
        }
        let _guard = self.state.read().await;
        Ok(self.store.load()?.context_names())
    }

    /// The active context, if any
    pub async fn current_context(&self) -> Option<String> {
        self.state.read().await.current.clone()
    }

    /// The active connection, if any
    pub async fn current_handle(&self) -> Option<ActiveHandle> {
        self.state.read().await.handle()
    }

    /// Whether `name` is blacklisted
    pub async fn is_failed(&self, name: &str) -> bool {
        self.state.read().await.failed.contains(name)
    }

    /// Make `name` the active context
    pub async fn set_active(&self, name: &str) -> Result<()> {
        self.ensure_active(name).await.map(|_| ())
    }

    /// Make `name` the active context and return the resulting connection.
    ///
    /// In-cluster mode ignores `name`. Re-activating the active context is a
    /// no-op; a blacklisted context fails without touching the network.
    pub async fn ensure_active(&self, name: &str) -> Result<ActiveHandle> {
        let target = self.target_name(name);
        {
            let state = self.state.read().await;
            if state.current.as_deref() == Some(target.as_str())
                && let Some(handle) = state.handle()
            {
                return Ok(handle);
            }
        }

        let mut state = self.state.write().await;
        self.activate_locked(&mut state, name).await
    }

    /// Resolve the connection a request should run against.
    ///
    /// A non-empty `context` is activated first. Without one the active
    /// connection is used; if nothing is active yet, activation runs with an
    /// empty name, which only succeeds in-cluster.
    pub async fn resolve(&self, context: Option<&str>) -> Result<ActiveHandle> {
        match context.filter(|c| !c.is_empty()) {
            Some(name) => self.ensure_active(name).await,
            None => match self.current_handle().await {
                Some(handle) => Ok(handle),
                None => self.ensure_active("").await,
            },
        }
    }

    fn target_name(&self, name: &str) -> String {
        if self.is_in_cluster() {
            IN_CLUSTER_CONTEXT.to_string()
        } else {
            name.to_string()
        }
    }

    async fn activate_locked(
        &self,
        state: &mut ConnectionState,
        name: &str,
    ) -> Result<ActiveHandle> {
        let target = self.target_name(name);

        if state.current.as_deref() == Some(target.as_str())
            && let Some(handle) = state.handle()
        {
            return Ok(handle);
        }
        if state.failed.contains(&target) {
            return Err(InspectorError::Connection(format!(
                "context '{}' has previously failed and will not be retried",
                target
            )));
        }

        let connect_target = if self.is_in_cluster() {
            ConnectTarget::InCluster
        } else {
            if name.is_empty() {
                return Err(InspectorError::Validation(
                    "context parameter is required when not running in cluster".to_string(),
                ));
            }
            let doc = self.store.load()?;
            if !doc.has_context(name) {
                return Err(InspectorError::NotFound(format!(
                    "context '{}' not found in kubeconfig",
                    name
                )));
            }
            ConnectTarget::Kubeconfig {
                context: name.to_string(),
                kubeconfig: Box::new(doc.to_kube()?),
            }
        };

        match self.connector.connect(&connect_target).await {
            Ok(client) => {
                state.current = Some(target.clone());
                state.client = Some(Arc::clone(&client));
                if state.failed.remove(&target) {
                    info!("Cleared failed flag for context {}", target);
                }
                info!("Kubernetes client initialized with context: {}", target);
                Ok(ActiveHandle {
                    context: target,
                    client,
                })
            }
            Err(e) => {
                warn!("Failed to connect to context {}, blacklisting: {}", target, e);
                state.failed.insert(target.clone());
                Err(InspectorError::Connection(format!(
                    "failed to connect to context '{}': {}",
                    target, e
                )))
            }
        }
    }

    /// Merge contexts from a kubeconfig document into the store.
    ///
    /// Returns the context names that were not present before.
    pub async fn add_contexts(&self, raw: &str) -> Result<Vec<String>> {
        if self.is_in_cluster() {
            return Err(InspectorError::Validation(
                "cannot add contexts in in-cluster mode".to_string(),
            ));
        }
        let incoming = crate::kubeconfig::KubeconfigDocument::parse(raw)?;

        let _guard = self.state.write().await;
        let mut doc = self.store.load_or_new()?;
        let added = doc.merge(incoming);
        self.store.save(&doc)?;
        let doc = self.store.load()?;

        debug!("Kubeconfig now has {} contexts", doc.contexts.len());
        info!("Added {} context(s): {:?}", added.len(), added);
        Ok(added)
    }

    /// Delete a context from the store.
    ///
    /// Removing the active context promotes another one (the document's new
    /// `current-context`, else the first remaining); if that cannot be
    /// activated nothing is left active.
    pub async fn remove_context(&self, name: &str) -> Result<()> {
        if self.is_in_cluster() {
            return Err(InspectorError::Validation(
                "cannot remove contexts in in-cluster mode".to_string(),
            ));
        }

        let mut state = self.state.write().await;
        let mut doc = self.store.load()?;
        if !doc.remove_context(name) {
            return Err(InspectorError::NotFound(format!(
                "context '{}' not found",
                name
            )));
        }
        self.store.save(&doc)?;
        state.failed.remove(name);
        info!("Removed context {}", name);

        if state.current.as_deref() != Some(name) {
            return Ok(());
        }
        state.current = None;
        state.client = None;

        let promoted = doc
            .current_context
            .clone()
            .filter(|c| doc.has_context(c))
            .or_else(|| doc.context_names().into_iter().next());
        if let Some(next) = promoted {
            match self.activate_locked(&mut state, &next).await {
                Ok(_) => info!("Promoted context {} after removing {}", next, name),
                Err(e) => warn!("Could not activate {} after removing {}: {}", next, name, e),
            }
        }
        Ok(())
    }

    /// Forget that a context failed so it can be retried
    pub async fn clear_failed(&self, name: &str) {
        let target = self.target_name(name);
        if self.state.write().await.failed.remove(&target) {
            info!("Cleared failed flag for context {}", target);
        }
    }
}
