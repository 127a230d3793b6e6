//! The broker's table of live sessions, keyed by client id.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::broker::session::Session;

/// Concurrent session lookup by client id and by listener.
///
/// Reads proceed in parallel; mutations are exclusive. The registry never
/// stops a session itself; a caller replacing an entry must have stopped
/// the previous session first.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<HashMap<String, Arc<Session>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keyed on the session's client id, replacing any prior entry.
    pub async fn add(&self, session: Arc<Session>) {
        let id = session.client_id();
        debug!(client_id = %id, listener = %session.listener(), "registering session");
        self.inner.write().await.insert(id, session);
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.read().await.get(id).cloned()
    }

    /// Idempotent.
    pub async fn delete(&self, id: &str) {
        self.inner.write().await.remove(id);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Snapshot of the sessions on a listener that have not yet shut down.
    /// Sessions may transition to done immediately after; order is
    /// unspecified.
    pub async fn by_listener(&self, listener: &str) -> Vec<Arc<Session>> {
        self.inner
            .read()
            .await
            .values()
            .filter(|s| s.listener() == listener && !s.is_done())
            .cloned()
            .collect()
    }
}
