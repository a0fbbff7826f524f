//! Drop-oldest distribution queue
//!
//! Bounded queue of encoded frames feeding push consumers. The producer is the
//! ingestion worker thread and must never block: when the queue is full the
//! oldest entry is evicted to make room, so consumers always see the most
//! recent frames and tolerate gaps. Consumers wait with a timeout and treat a
//! timeout as a cue to send a heartbeat.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Notify;

/// Result of a timed pop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Popped {
    /// An encoded frame
    Frame(Bytes),
    /// Nothing arrived within the timeout
    Timeout,
    /// The queue was closed because its stream was removed
    Closed,
}

#[derive(Debug)]
struct Inner {
    items: VecDeque<Bytes>,
    closed: bool,
}

/// Bounded drop-oldest queue of encoded frames
#[derive(Debug)]
pub struct DistributionQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    notify: Notify,
}

impl DistributionQueue {
    /// Create a queue holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an entry, evicting the oldest if full. Never blocks.
    ///
    /// Returns `true` if an entry was evicted. Pushes after `close` are
    /// discarded.
    pub fn push(&self, data: Bytes) -> bool {
        let evicted = {
            let mut inner = self.lock();
            if inner.closed {
                return false;
            }
            let evicted = if inner.items.len() >= self.capacity {
                inner.items.pop_front().is_some()
            } else {
                false
            };
            inner.items.push_back(data);
            evicted
        };

        self.notify.notify_one();
        evicted
    }

    /// Take the oldest entry without waiting
    pub fn try_pop(&self) -> Option<Bytes> {
        self.lock().items.pop_front()
    }

    /// Take the oldest entry, waiting up to `timeout` for one to arrive
    pub async fn pop(&self, timeout: Duration) -> Popped {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking, so a push in between is not missed
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if inner.closed {
                    return Popped::Closed;
                }
                if let Some(data) = inner.items.pop_front() {
                    return Popped::Frame(data);
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Popped::Timeout;
            }
        }
    }

    /// Close the queue, dropping queued entries and waking every waiter
    pub fn close(&self) {
        {
            let mut inner = self.lock();
            inner.closed = true;
            inner.items.clear();
        }
        self.notify.notify_waiters();
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of queued entries
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
