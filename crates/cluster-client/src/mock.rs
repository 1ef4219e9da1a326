//! Mock cluster access for unit testing
//!
//! `MockClusterClient` keeps resource documents in memory and lets tests
//! inject failures, count calls and drive watch streams by hand.
//! `MockConnector` hands out one mock client per context name.

use crate::cluster_trait::{ClusterClientTrait, ClusterConnectorTrait};
use crate::error::ClusterError;
use crate::models::*;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

type TypeKey = (String, String, String);
type ObjectKey = (Option<String>, String);
type WatchFeed = mpsc::UnboundedSender<Result<ObjectEvent, ClusterError>>;

fn type_key(resource: &ResourceType) -> TypeKey {
    (
        resource.group.clone(),
        resource.version.clone(),
        resource.plural.clone(),
    )
}

fn watch_key(plural: &str, namespace: Option<&str>, name: &str) -> String {
    format!("{}/{}/{}", plural, namespace.unwrap_or(""), name)
}

/// Mock cluster client for testing
///
/// Resource types must be known to the mock before they can be listed;
/// inserting an object registers its type, [`MockClusterClient::register_type`]
/// registers an empty one. Unknown types answer like an API server without
/// that CRD installed.
#[derive(Clone)]
pub struct MockClusterClient {
    context: String,
    pub(crate) types: Arc<Mutex<HashSet<TypeKey>>>,
    pub(crate) objects: Arc<Mutex<HashMap<TypeKey, BTreeMap<ObjectKey, Value>>>>,
    // Failure injection
    pub(crate) list_failures: Arc<Mutex<HashMap<String, String>>>,
    pub(crate) probe_failure: Arc<Mutex<Option<String>>>,
    pub(crate) probe_delay: Arc<Mutex<Option<Duration>>>,
    pub(crate) stalled_gets: Arc<Mutex<bool>>,
    pub(crate) rejected_selector_fields: Arc<Mutex<Vec<String>>>,
    // Call recording
    pub(crate) list_calls: Arc<Mutex<Vec<String>>>,
    pub(crate) get_calls: Arc<Mutex<Vec<String>>>,
    pub(crate) builtin_calls: Arc<Mutex<Vec<BuiltinKind>>>,
    pub(crate) probe_calls: Arc<Mutex<usize>>,
    // Live watch feeds keyed by plural/namespace/name
    pub(crate) watches: Arc<Mutex<HashMap<String, Vec<WatchFeed>>>>,
}

impl std::fmt::Debug for MockClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockClusterClient")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl MockClusterClient {
    /// Create a new, empty mock client for `context`
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            types: Arc::new(Mutex::new(HashSet::new())),
            objects: Arc::new(Mutex::new(HashMap::new())),
            list_failures: Arc::new(Mutex::new(HashMap::new())),
            probe_failure: Arc::new(Mutex::new(None)),
            probe_delay: Arc::new(Mutex::new(None)),
            stalled_gets: Arc::new(Mutex::new(false)),
            rejected_selector_fields: Arc::new(Mutex::new(Vec::new())),
            list_calls: Arc::new(Mutex::new(Vec::new())),
            get_calls: Arc::new(Mutex::new(Vec::new())),
            builtin_calls: Arc::new(Mutex::new(Vec::new())),
            probe_calls: Arc::new(Mutex::new(0)),
            watches: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Make a resource type known without adding objects
    pub fn register_type(&self, resource: &ResourceType) {
        self.types.lock().unwrap().insert(type_key(resource));
    }

    /// Store (or replace) an object; namespace and name come from its metadata
    pub fn insert(&self, resource: &ResourceType, obj: Value) {
        let name = object_name(&obj).unwrap_or_default().to_string();
        let namespace = obj
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .map(str::to_string);
        self.register_type(resource);
        self.objects
            .lock()
            .unwrap()
            .entry(type_key(resource))
            .or_default()
            .insert((namespace, name), obj);
    }

    /// Remove an object, returning it if present
    pub fn remove(&self, resource: &ResourceType, namespace: Option<&str>, name: &str) -> Option<Value> {
        self.objects
            .lock()
            .unwrap()
            .get_mut(&type_key(resource))
            .and_then(|objects| objects.remove(&(namespace.map(str::to_string), name.to_string())))
    }

    /// Make every list of `plural` fail with a 500
    pub fn fail_list(&self, plural: impl Into<String>, message: impl Into<String>) {
        self.list_failures
            .lock()
            .unwrap()
            .insert(plural.into(), message.into());
    }

    /// Make probes fail with `message`
    pub fn fail_probe(&self, message: impl Into<String>) {
        *self.probe_failure.lock().unwrap() = Some(message.into());
    }

    /// Delay every probe by `delay`
    pub fn delay_probe(&self, delay: Duration) {
        *self.probe_delay.lock().unwrap() = Some(delay);
    }

    /// Make every generic get hang until the caller gives up on it
    pub fn stall_gets(&self) {
        *self.stalled_gets.lock().unwrap() = true;
    }

    /// Answer list calls whose field selector references `field` with a 400
    pub fn reject_selector_field(&self, field: impl Into<String>) {
        self.rejected_selector_fields
            .lock()
            .unwrap()
            .push(field.into());
    }

    /// Plurals passed to `list`, in call order
    pub fn list_calls(&self) -> Vec<String> {
        self.list_calls.lock().unwrap().clone()
    }

    /// Number of `list` calls for `plural`
    pub fn list_count(&self, plural: &str) -> usize {
        self.list_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.as_str() == plural)
            .count()
    }

    /// Plurals passed to `get`, in call order
    pub fn get_calls(&self) -> Vec<String> {
        self.get_calls.lock().unwrap().clone()
    }

    /// Kinds fetched through the typed path
    pub fn builtin_calls(&self) -> Vec<BuiltinKind> {
        self.builtin_calls.lock().unwrap().clone()
    }

    /// Number of probes received
    pub fn probe_count(&self) -> usize {
        *self.probe_calls.lock().unwrap()
    }

    /// Deliver `event` to every open watch on the named object.
    ///
    /// Returns how many watch streams received it.
    pub fn push_watch_event(
        &self,
        plural: &str,
        namespace: Option<&str>,
        name: &str,
        event: Result<ObjectEvent, ClusterError>,
    ) -> usize {
        let mut watches = self.watches.lock().unwrap();
        let Some(feeds) = watches.get_mut(&watch_key(plural, namespace, name)) else {
            return 0;
        };
        feeds.retain(|feed| !feed.is_closed());

        let mut pending = Some(event);
        let mut delivered = 0;
        for (i, feed) in feeds.iter().enumerate() {
            let Some(event) = pending.take() else { break };
            // ClusterError is not Clone, so only the first feed gets errors
            let next = match &event {
                Ok(ev) if i + 1 < feeds.len() => Some(Ok(ev.clone())),
                _ => None,
            };
            if feed.send(event).is_ok() {
                delivered += 1;
            }
            pending = next;
        }
        delivered
    }

    /// End every open watch stream on the named object
    pub fn close_watches(&self, plural: &str, namespace: Option<&str>, name: &str) {
        self.watches
            .lock()
            .unwrap()
            .remove(&watch_key(plural, namespace, name));
    }

    /// Number of watch streams on the named object that are still consumed
    pub fn open_watch_count(&self, plural: &str, namespace: Option<&str>, name: &str) -> usize {
        self.watches
            .lock()
            .unwrap()
            .get(&watch_key(plural, namespace, name))
            .map(|feeds| feeds.iter().filter(|feed| !feed.is_closed()).count())
            .unwrap_or(0)
    }

    /// Number of watch streams still consumed, across all objects
    pub fn total_open_watches(&self) -> usize {
        self.watches
            .lock()
            .unwrap()
            .values()
            .flatten()
            .filter(|feed| !feed.is_closed())
            .count()
    }

    fn not_found(resource: &ResourceType, name: &str) -> ClusterError {
        ClusterError::NotFound(format!("{} \"{}\" not found", resource.plural, name))
    }
}

/// Equality-only field selector match (`a.b=x,c=y`)
fn matches_field_selector(obj: &Value, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| {
            let Some((path, expected)) = term.split_once('=') else {
                return false;
            };
            let pointer = format!("/{}", path.trim().replace('.', "/"));
            obj.pointer(&pointer).and_then(Value::as_str) == Some(expected.trim())
        })
}

#[async_trait::async_trait]
impl ClusterClientTrait for MockClusterClient {
    fn context(&self) -> &str {
        &self.context
    }

    async fn list(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        query: &ListQuery,
    ) -> Result<ObjectPage, ClusterError> {
        self.list_calls
            .lock()
            .unwrap()
            .push(resource.plural.clone());

        if let Some(message) = self.list_failures.lock().unwrap().get(&resource.plural) {
            return Err(ClusterError::Api {
                code: 500,
                message: message.clone(),
            });
        }
        if let Some(selector) = query.field_selector.as_deref() {
            let rejected = self.rejected_selector_fields.lock().unwrap();
            if let Some(field) = rejected.iter().find(|f| selector.contains(f.as_str())) {
                return Err(ClusterError::Api {
                    code: 400,
                    message: format!("field label not supported: {}", field),
                });
            }
        }

        let key = type_key(resource);
        if !self.types.lock().unwrap().contains(&key) {
            return Err(ClusterError::NotFound(
                "the server could not find the requested resource".to_string(),
            ));
        }

        let objects = self.objects.lock().unwrap();
        let matching: Vec<Value> = objects
            .get(&key)
            .into_iter()
            .flatten()
            .filter(|((ns, _), _)| namespace.is_none() || ns.as_deref() == namespace)
            .map(|(_, obj)| obj)
            .filter(|obj| {
                query
                    .field_selector
                    .as_deref()
                    .is_none_or(|selector| matches_field_selector(obj, selector))
            })
            .cloned()
            .collect();

        let start = query
            .continue_token
            .as_deref()
            .and_then(|t| t.parse::<usize>().ok())
            .unwrap_or(0)
            .min(matching.len());
        let end = query
            .limit
            .map(|limit| (start + limit as usize).min(matching.len()))
            .unwrap_or(matching.len());
        let has_more = end < matching.len();

        Ok(ObjectPage {
            items: matching[start..end].to_vec(),
            continue_token: has_more.then(|| end.to_string()),
            remaining_item_count: has_more.then(|| (matching.len() - end) as i64),
        })
    }

    async fn get(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, ClusterError> {
        self.get_calls.lock().unwrap().push(resource.plural.clone());

        let stalled = *self.stalled_gets.lock().unwrap();
        if stalled {
            std::future::pending::<()>().await;
        }
        self.objects
            .lock()
            .unwrap()
            .get(&type_key(resource))
            .and_then(|objects| objects.get(&(namespace.map(str::to_string), name.to_string())))
            .cloned()
            .ok_or_else(|| Self::not_found(resource, name))
    }

    async fn get_builtin(
        &self,
        kind: BuiltinKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, ClusterError> {
        self.builtin_calls.lock().unwrap().push(kind);

        if kind.is_namespaced() && namespace.is_none() {
            return Err(ClusterError::InvalidRequest(format!(
                "{:?} requires a namespace",
                kind
            )));
        }
        let resource = kind.resource_type();
        self.objects
            .lock()
            .unwrap()
            .get(&type_key(&resource))
            .and_then(|objects| objects.get(&(namespace.map(str::to_string), name.to_string())))
            .cloned()
            .ok_or_else(|| Self::not_found(&resource, name))
    }

    async fn probe(&self) -> Result<(), ClusterError> {
        *self.probe_calls.lock().unwrap() += 1;

        let delay = *self.probe_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.probe_failure.lock().unwrap().clone() {
            Some(message) => Err(ClusterError::Config(message)),
            None => Ok(()),
        }
    }

    fn watch(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
    ) -> BoxStream<'static, Result<ObjectEvent, ClusterError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watches
            .lock()
            .unwrap()
            .entry(watch_key(&resource.plural, namespace, name))
            .or_default()
            .push(tx);

        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed()
    }
}

/// Mock connector handing out one [`MockClusterClient`] per context
#[derive(Clone, Default)]
pub struct MockConnector {
    pub(crate) clients: Arc<Mutex<HashMap<String, Arc<MockClusterClient>>>>,
    pub(crate) failing: Arc<Mutex<HashSet<String>>>,
    pub(crate) connects: Arc<Mutex<Vec<String>>>,
}

impl std::fmt::Debug for MockConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnector").finish_non_exhaustive()
    }
}

impl MockConnector {
    /// Create a new connector with no clients
    pub fn new() -> Self {
        Self::default()
    }

    /// The client for `context`, created on first use so tests can seed it
    pub fn client(&self, context: &str) -> Arc<MockClusterClient> {
        Arc::clone(
            self.clients
                .lock()
                .unwrap()
                .entry(context.to_string())
                .or_insert_with(|| Arc::new(MockClusterClient::new(context))),
        )
    }

    /// Make connecting to `context` fail
    pub fn fail_context(&self, context: impl Into<String>) {
        self.failing.lock().unwrap().insert(context.into());
    }

    /// Let connecting to `context` succeed again
    pub fn heal_context(&self, context: &str) {
        self.failing.lock().unwrap().remove(context);
    }

    /// Contexts passed to `connect`, in call order
    pub fn connect_calls(&self) -> Vec<String> {
        self.connects.lock().unwrap().clone()
    }

    /// Number of `connect` calls for `context`
    pub fn connect_count(&self, context: &str) -> usize {
        self.connects
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == context)
            .count()
    }
}

#[async_trait::async_trait]
impl ClusterConnectorTrait for MockConnector {
    async fn connect(
        &self,
        target: &ConnectTarget,
    ) -> Result<Arc<dyn ClusterClientTrait>, ClusterError> {
        let context = target.context_name().to_string();
        self.connects.lock().unwrap().push(context.clone());

        if self.failing.lock().unwrap().contains(&context) {
            return Err(ClusterError::Config(format!(
                "failed to create rest config: context {} is unreachable",
                context
            )));
        }
        let client: Arc<dyn ClusterClientTrait> = self.client(&context);
        Ok(client)
    }
}
