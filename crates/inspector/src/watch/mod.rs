//! Live resource watches
//!
//! The [`WatchHub`] hands out one [`WatchSession`] per client connection and
//! keeps track of them so a server shutdown can close every session.

mod protocol;
mod session;


pub use protocol::{ControlMessage, ResourceChangeEvent, ResourceDescriptor, WatchMessage};
pub use session::WatchSession;

use crate::registry::ContextRegistry;
use crate::resolver::PluralResolver;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

/// Outbound messages buffered per session before watch tasks wait on the writer
pub const OUTBOUND_CAPACITY: usize = 256;

/// Registry of live watch sessions
#[derive(Debug)]
pub struct WatchHub {
    registry: Arc<ContextRegistry>,
    resolver: Arc<PluralResolver>,
    resync: Duration,
    cancel: CancellationToken,
    sessions: RwLock<HashMap<Uuid, Arc<WatchSession>>>,
}

impl WatchHub {
    /// Create a hub; `resync` is clamped to at least one second
    pub fn new(registry: Arc<ContextRegistry>, resolver: Arc<PluralResolver>, resync: Duration) -> Self {
        Self {
            registry,
            resolver,
            resync: resync.max(Duration::from_secs(1)),
            cancel: CancellationToken::new(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Open a session targeting `context` (the active context when `None`).
    ///
    /// The receiver yields every message for the client, in order; the
    /// caller drains it into the connection.
    pub async fn open_session(
        &self,
        context: Option<String>,
    ) -> (Arc<WatchSession>, mpsc::Receiver<WatchMessage>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let session = Arc::new(WatchSession::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.resolver),
            tx,
            self.cancel.child_token(),
            self.resync,
            context,
        ));
        self.sessions
            .write()
            .await
            .insert(session.id(), Arc::clone(&session));
        info!("Opened watch session {}", session.id());
        (session, rx)
    }

    /// Close and forget one session
    pub async fn close_session(&self, id: Uuid) {
        let session = self.sessions.write().await.remove(&id);
        if let Some(session) = session {
            session.close().await;
        }
    }

    /// Number of open sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Close every session
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let sessions: Vec<Arc<WatchSession>> =
            self.sessions.write().await.drain().map(|(_, s)| s).collect();
        info!("Shutting down {} watch sessions", sessions.len());
        for session in sessions {
            session.close().await;
        }
    }
}
