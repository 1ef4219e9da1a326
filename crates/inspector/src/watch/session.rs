//! One live watch connection
//!
//! A session owns the set of watched objects for one client connection. Each
//! watched object runs in its own task holding a child of the session's
//! cancellation token; closing the session cancels them all at once. All
//! outbound messages go through a single bounded channel drained by the
//! connection's writer.

use super::protocol::{ControlMessage, ResourceChangeEvent, ResourceDescriptor, WatchMessage};
use crate::error::{InspectorError, Result};
use crate::registry::ContextRegistry;
use crate::resolver::PluralResolver;
use cluster_client::{
    ClusterClientTrait, ClusterError, GroupVersion, ObjectEvent, ResourceType, object_name,
};
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug)]
struct ActiveWatch {
    descriptor: ResourceDescriptor,
    generation: u64,
    token: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct SessionState {
    context: Option<String>,
    watches: HashMap<String, ActiveWatch>,
    next_generation: u64,
    closed: bool,
}

/// A live watch connection
#[derive(Debug)]
pub struct WatchSession {
    id: Uuid,
    registry: Arc<ContextRegistry>,
    resolver: Arc<PluralResolver>,
    outbound: mpsc::Sender<WatchMessage>,
    cancel: CancellationToken,
    resync: Duration,
    state: Mutex<SessionState>,
}

impl WatchSession {
    pub(crate) fn new(
        registry: Arc<ContextRegistry>,
        resolver: Arc<PluralResolver>,
        outbound: mpsc::Sender<WatchMessage>,
        cancel: CancellationToken,
        resync: Duration,
        context: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            registry,
            resolver,
            outbound,
            cancel,
            resync,
            state: Mutex::new(SessionState {
                context: context.filter(|c| !c.is_empty()),
                ..Default::default()
            }),
        }
    }

    /// Session id, also used in log lines
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the session or its hub was closed
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the session is closed or the hub shuts down
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Context new watches will target.
    ///
    /// `None` until the first subscribe pins the context active at that time.
    pub async fn context(&self) -> Option<String> {
        self.state.lock().await.context.clone()
    }

    /// Keys of the objects currently watched
    pub async fn watched_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.lock().await.watches.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Process one inbound text frame.
    ///
    /// Malformed frames are answered in-band and never end the session.
    pub async fn handle_text(self: &Arc<Self>, text: &str) {
        match serde_json::from_str::<ControlMessage>(text) {
            Ok(message) => self.handle(message).await,
            Err(e) => {
                debug!("Session {}: rejected control message: {}", self.id, e);
                self.send(WatchMessage::error("Invalid message format")).await;
            }
        }
    }

    /// Process one parsed control message
    pub async fn handle(self: &Arc<Self>, message: ControlMessage) {
        let outcome = match message {
            ControlMessage::Subscribe {
                resources: Some(resources),
                ..
            } => {
                self.replace_subscriptions(resources).await;
                Ok(())
            }
            ControlMessage::Subscribe {
                resource: Some(resource),
                ..
            } => self.subscribe(resource).await,
            ControlMessage::Subscribe { .. } => Err(InspectorError::Protocol(
                "subscribe requires a resource or resources".to_string(),
            )),
            ControlMessage::Unsubscribe {
                resource: Some(resource),
            } => {
                self.unsubscribe(&resource).await;
                Ok(())
            }
            ControlMessage::Unsubscribe { resource: None } => Err(InspectorError::Protocol(
                "unsubscribe requires a resource".to_string(),
            )),
            ControlMessage::SetContext { context } => {
                self.set_context(&context).await;
                Ok(())
            }
        };

        if let Err(e) = outcome {
            self.send(WatchMessage::error(e.to_string())).await;
        }
    }

    /// Watch one object; a no-op when it is already watched
    pub async fn subscribe(self: &Arc<Self>, descriptor: ResourceDescriptor) -> Result<()> {
        validate(&descriptor)?;
        let mut state = self.state.lock().await;
        if state.closed || state.watches.contains_key(&descriptor.key()) {
            return Ok(());
        }
        self.pin_context(&mut state).await;
        self.start_locked(&mut state, descriptor);
        Ok(())
    }

    /// Replace the watched set.
    ///
    /// Watches whose key left the set are cancelled; only keys not already
    /// watched get a new watch. Invalid descriptors are reported and skipped.
    pub async fn replace_subscriptions(self: &Arc<Self>, descriptors: Vec<ResourceDescriptor>) {
        let mut wanted: HashMap<String, ResourceDescriptor> = HashMap::new();
        let mut invalid = Vec::new();
        for descriptor in descriptors {
            match validate(&descriptor) {
                Ok(()) => {
                    wanted.insert(descriptor.key(), descriptor);
                }
                Err(e) => invalid.push(e.to_string()),
            }
        }

        {
            let mut state = self.state.lock().await;
            if state.closed {
                return;
            }
            if !wanted.is_empty() {
                self.pin_context(&mut state).await;
            }
            let removed: Vec<String> = state
                .watches
                .keys()
                .filter(|key| !wanted.contains_key(*key))
                .cloned()
                .collect();
            for key in removed {
                if let Some(watch) = state.watches.remove(&key) {
                    debug!("Session {}: dropping watch {}", self.id, key);
                    watch.token.cancel();
                }
            }
            for (key, descriptor) in wanted {
                if !state.watches.contains_key(&key) {
                    self.start_locked(&mut state, descriptor);
                }
            }
        }

        for message in invalid {
            self.send(WatchMessage::error(message)).await;
        }
    }

    /// Stop watching one object
    pub async fn unsubscribe(&self, descriptor: &ResourceDescriptor) {
        let key = descriptor.key();
        if let Some(watch) = self.state.lock().await.watches.remove(&key) {
            debug!("Session {}: unsubscribed {}", self.id, key);
            watch.token.cancel();
        }
    }

    /// Target `context` for watches started from now on
    pub async fn set_context(&self, context: &str) {
        let context = Some(context.to_string()).filter(|c| !c.is_empty());
        info!("Session {}: context set to {:?}", self.id, context);
        self.state.lock().await.context = context;
    }

    /// Cancel every watch and wait for the tasks to finish
    pub async fn close(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = {
            let mut state = self.state.lock().await;
            state.closed = true;
            state.watches.drain().map(|(_, watch)| watch.task).collect()
        };
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Session {}: watch task failed: {}", self.id, e);
            }
        }
        info!("Session {} closed", self.id);
    }

    /// Pin a session without a context to the active one, so all of its
    /// watches stay on one cluster when the active context changes later
    async fn pin_context(&self, state: &mut SessionState) {
        if state.context.is_none()
            && let Some(active) = self.registry.current_context().await
        {
            debug!("Session {}: pinned to context {}", self.id, active);
            state.context = Some(active);
        }
    }

    fn start_locked(self: &Arc<Self>, state: &mut SessionState, descriptor: ResourceDescriptor) {
        let key = descriptor.key();
        let generation = state.next_generation;
        state.next_generation += 1;
        let token = self.cancel.child_token();
        let context = state.context.clone();

        let task = tokio::spawn(Arc::clone(self).run_watch(
            key.clone(),
            descriptor.clone(),
            context,
            token.clone(),
            generation,
        ));
        state.watches.insert(
            key,
            ActiveWatch {
                descriptor,
                generation,
                token,
                task,
            },
        );
    }

    async fn run_watch(
        self: Arc<Self>,
        key: String,
        descriptor: ResourceDescriptor,
        context: Option<String>,
        token: CancellationToken,
        generation: u64,
    ) {
        debug!("Session {}: starting watch {}", self.id, key);
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Session {}: watch {} stopped", self.id, key);
                return;
            }
            result = self.watch_one(&descriptor, context.as_deref()) => result,
        };

        let message = match result {
            Ok(()) => format!("watch for {} {} ended", descriptor.kind, descriptor.name),
            Err(e) => format!("watch for {} {} failed: {}", descriptor.kind, descriptor.name, e),
        };
        warn!("Session {}: {}", self.id, message);
        self.deregister(&key, generation).await;
        self.send(WatchMessage::error(message)).await;
    }

    /// Stream changes of one object until the stream ends.
    ///
    /// Runs until dropped otherwise; `run_watch` drops it on cancellation.
    async fn watch_one(&self, descriptor: &ResourceDescriptor, context: Option<&str>) -> Result<()> {
        let handle = self.registry.resolve(context).await?;
        if context.is_none() {
            let mut state = self.state.lock().await;
            if state.context.is_none() {
                debug!("Session {}: pinned to context {}", self.id, handle.context);
                state.context = Some(handle.context.clone());
            }
        }
        let client = handle.client.as_ref();
        let gv = GroupVersion::parse_allow_core(&descriptor.api_version).map_err(|e| match e {
            ClusterError::InvalidRequest(message) => InspectorError::Validation(message),
            other => other.into(),
        })?;
        let plural = match descriptor.plural.as_deref().filter(|p| !p.is_empty()) {
            Some(plural) => plural.to_string(),
            None => self.resolver.resolve(client, &gv, &descriptor.kind).await,
        };
        let resource = ResourceType::new(&gv, descriptor.kind.as_str(), plural);
        let namespace = descriptor.namespace();

        let mut events = client.watch(&resource, namespace, &descriptor.name);
        info!(
            "Session {}: watching {} {} on {}",
            self.id, resource, descriptor.name, handle.context
        );

        if let Some(event) = self.fetch(client, &resource, descriptor, true).await {
            self.emit(event).await;
        }

        let mut resync = tokio::time::interval_at(
            tokio::time::Instant::now() + self.resync,
            self.resync,
        );
        loop {
            tokio::select! {
                event = events.next() => match event {
                    Some(Ok(event)) => {
                        if let Some(change) = change_for(descriptor, event) {
                            self.emit(change).await;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Session {}: watch error on {} {}: {}", self.id, resource, descriptor.name, e);
                        self.send(WatchMessage::error(format!(
                            "watch error for {} {}: {}",
                            descriptor.kind, descriptor.name, e
                        )))
                        .await;
                    }
                    None => return Ok(()),
                },
                _ = resync.tick() => {
                    if let Some(event) = self.fetch(client, &resource, descriptor, false).await {
                        self.emit(event).await;
                    }
                }
            }
        }
    }

    /// Current state of the object as a change event.
    ///
    /// A missing object yields the deleted stub. Other failures are reported
    /// in-band on the initial fetch and only logged on resync.
    async fn fetch(
        &self,
        client: &dyn ClusterClientTrait,
        resource: &ResourceType,
        descriptor: &ResourceDescriptor,
        initial: bool,
    ) -> Option<ResourceChangeEvent> {
        match client.get(resource, descriptor.namespace(), &descriptor.name).await {
            Ok(obj) if initial => Some(ResourceChangeEvent::Added(obj)),
            Ok(obj) => Some(ResourceChangeEvent::Updated(obj)),
            Err(e) if e.is_not_found() => Some(ResourceChangeEvent::Deleted(descriptor.deleted_stub())),
            Err(e) if initial => {
                self.send(WatchMessage::error(format!(
                    "failed to get {} {}: {}",
                    descriptor.kind, descriptor.name, e
                )))
                .await;
                None
            }
            Err(e) => {
                debug!("Session {}: resync of {} {} failed: {}", self.id, resource, descriptor.name, e);
                None
            }
        }
    }

    async fn emit(&self, event: ResourceChangeEvent) {
        self.send(event.into()).await;
    }

    async fn send(&self, message: WatchMessage) {
        tokio::select! {
            sent = self.outbound.send(message) => {
                if sent.is_err() {
                    debug!("Session {}: writer gone, cancelling", self.id);
                    self.cancel.cancel();
                }
            }
            _ = self.cancel.cancelled() => {}
        }
    }

    async fn deregister(&self, key: &str, generation: u64) {
        let mut state = self.state.lock().await;
        let current = state
            .watches
            .get(key)
            .is_some_and(|watch| watch.generation == generation);
        if current && let Some(watch) = state.watches.remove(key) {
            debug!(
                "Session {}: deregistered {} {}",
                self.id, watch.descriptor.kind, watch.descriptor.name
            );
        }
    }
}

fn validate(descriptor: &ResourceDescriptor) -> Result<()> {
    for (value, field) in [
        (&descriptor.api_version, "apiVersion"),
        (&descriptor.kind, "kind"),
        (&descriptor.name, "name"),
    ] {
        if value.trim().is_empty() {
            return Err(InspectorError::Validation(format!(
                "resource {} is required",
                field
            )));
        }
    }
    Ok(())
}

/// Map a raw watch event to a change of the watched object, if it is that object
fn change_for(descriptor: &ResourceDescriptor, event: ObjectEvent) -> Option<ResourceChangeEvent> {
    let obj = event.object();
    if object_name(obj) != Some(descriptor.name.as_str()) {
        return None;
    }
    if let Some(namespace) = descriptor.namespace() {
        let actual = obj.pointer("/metadata/namespace").and_then(Value::as_str);
        if actual != Some(namespace) {
            return None;
        }
    }
    Some(match event {
        ObjectEvent::Applied(obj) => ResourceChangeEvent::Updated(obj),
        ObjectEvent::Deleted(_) => ResourceChangeEvent::Deleted(descriptor.deleted_stub()),
    })
}
