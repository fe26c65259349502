//! Bookkeeping of the sessions that are currently live.

use super::upstream::Upstream;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::{info, warn};

/// What the registry keeps for a live session.
#[derive(Clone)]
pub struct SessionHandle {
    pub generation: u64,
    pub upstream: Arc<dyn Upstream>,
}

#[derive(Default)]
struct Inner {
    next_generation: u64,
    sessions: HashMap<String, SessionHandle>,
}

/// Maps client ids to their live session.
///
/// Owned by the application state and handed to each session; every access
/// goes through one mutex. Each registration gets a fresh generation number
/// so a session that is torn down late cannot evict a newer session that
/// reused its client id.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a session, replacing any previous entry for the same id.
    /// Returns the generation assigned to this registration.
    pub fn register(&self, client_id: &str, upstream: Arc<dyn Upstream>) -> u64 {
        let mut inner = self.lock();
        inner.next_generation += 1;
        let generation = inner.next_generation;
        let previous = inner.sessions.insert(
            client_id.to_string(),
            SessionHandle {
                generation,
                upstream,
            },
        );
        if let Some(previous) = previous {
            warn!(
                client_id,
                replaced_generation = previous.generation,
                "Client id was already registered; replacing the previous session."
            );
        }
        generation
    }

    /// Removes the entry for `client_id` if there is one.
    pub fn unregister(&self, client_id: &str) -> Option<SessionHandle> {
        self.lock().sessions.remove(client_id)
    }

    /// Removes the entry for `client_id` only if it still belongs to
    /// `generation`.
    pub fn release(&self, client_id: &str, generation: u64) -> bool {
        let mut inner = self.lock();
        match inner.sessions.get(client_id) {
            Some(handle) if handle.generation == generation => {
                inner.sessions.remove(client_id);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.lock().sessions.contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empties the registry and closes every upstream it held.
    pub async fn close_all(&self) {
        let drained: Vec<(String, SessionHandle)> = self.lock().sessions.drain().collect();
        for (client_id, handle) in drained {
            info!(client_id, "Closing upstream for shutdown.");
            handle.upstream.close().await;
        }
    }
}
