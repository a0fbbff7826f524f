//! Push consumer membership
//!
//! Tracks which push consumers are attached to a stream. The set does not own
//! the consumers' transports; it hands each one a [`ConsumerGuard`] that
//! unregisters on drop and resolves [`ConsumerGuard::closed`] when the stream
//! is torn down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use serde::Serialize;
use tokio::sync::watch;

use crate::ingest::telemetry::unix_millis;

/// Description of an attached consumer
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerInfo {
    /// Consumer id, unique within the stream
    pub id: u64,
    /// Peer label (usually the remote address)
    pub peer: String,
    /// Attach time, milliseconds since the Unix epoch
    pub connected_at_ms: u64,
}

/// Set of push consumers attached to one stream
#[derive(Debug)]
pub struct ConsumerSet {
    members: Mutex<HashMap<u64, ConsumerInfo>>,
    next_id: AtomicU64,
    shutdown: watch::Sender<bool>,
}

impl ConsumerSet {
    /// Create an empty set
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            members: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            shutdown,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, ConsumerInfo>> {
        self.members.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach a consumer
    ///
    /// If the set was already closed the guard is returned in the closed state
    /// and the consumer is not listed.
    pub fn register(self: &Arc<Self>, peer: impl Into<String>) -> ConsumerGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shutdown = self.shutdown.subscribe();

        if !*shutdown.borrow() {
            let info = ConsumerInfo {
                id,
                peer: peer.into(),
                connected_at_ms: unix_millis(SystemTime::now()),
            };
            self.lock().insert(id, info);
        }

        ConsumerGuard {
            set: Arc::clone(self),
            id,
            shutdown,
        }
    }

    fn unregister(&self, id: u64) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Number of attached consumers
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no consumer is attached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attached consumers, ordered by id
    pub fn members(&self) -> Vec<ConsumerInfo> {
        let mut members: Vec<_> = self.lock().values().cloned().collect();
        members.sort_by_key(|m| m.id);
        members
    }

    /// Detach every consumer and signal them to close
    ///
    /// Returns the number of consumers that were attached.
    pub fn close_all(&self) -> usize {
        self.shutdown.send_replace(true);
        let mut members = self.lock();
        let count = members.len();
        members.clear();
        count
    }

    /// Whether `close_all` has been called
    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }
}

impl Default for ConsumerSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Membership token of one consumer
///
/// Dropping the guard unregisters the consumer, so every exit path of a
/// delivery loop releases its membership.
#[derive(Debug)]
pub struct ConsumerGuard {
    set: Arc<ConsumerSet>,
    id: u64,
    shutdown: watch::Receiver<bool>,
}

impl ConsumerGuard {
    /// Consumer id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the stream has been torn down
    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves once the stream is torn down
    pub async fn closed(&mut self) {
        loop {
            if *self.shutdown.borrow_and_update() {
                return;
            }
            if self.shutdown.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Drop for ConsumerGuard {
    fn drop(&mut self) {
        if self.set.unregister(self.id) {
            tracing::debug!(consumer = self.id, "Consumer unregistered");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_register_and_drop() {
        let set = Arc::new(ConsumerSet::new());

        let a = set.register("10.0.0.1:5000");
        let b = set.register("10.0.0.2:5000");
        assert_eq!(set.len(), 2);
        assert_ne!(a.id(), b.id());

        drop(a);
        assert_eq!(set.len(), 1);
        assert_eq!(set.members()[0].peer, "10.0.0.2:5000");

        drop(b);
        assert!(set.is_empty());
    }

    #[test]
    fn test_close_all_detaches() {
        let set = Arc::new(ConsumerSet::new());
        let guard = set.register("peer");

        assert_eq!(set.close_all(), 1);
        assert!(set.is_empty());
        assert!(guard.is_closed());

        // Dropping after teardown is harmless
        drop(guard);
        assert!(set.is_empty());
    }

    #[test]
    fn test_register_after_close() {
        let set = Arc::new(ConsumerSet::new());
        set.close_all();

        let guard = set.register("late");
        assert!(guard.is_closed());
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_closed_resolves() {
        let set = Arc::new(ConsumerSet::new());
        let mut guard = set.register("peer");

        let closer = {
            let set = Arc::clone(&set);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                set.close_all();
            })
        };

        tokio::time::timeout(Duration::from_secs(2), guard.closed())
            .await
            .expect("guard should observe teardown");
        closer.await.unwrap();
    }
}
