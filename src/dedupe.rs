//! Request deduplication: collapses concurrent identical requests into one
//! underlying call.
//!
//! The first caller for a key becomes the leader and its factory future is
//! spawned as a task; everyone else attaches to the same broadcast channel.
//! Success and failure fan out identically, and failures are never cached:
//! the in-flight slot is released before the result is published, so the
//! next caller after settlement starts a fresh attempt.
//!
//! A caller that drops its wait detaches from the flight. When the last
//! subscriber detaches the underlying task is aborted, which cancels the
//! in-flight transport future.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::trace;

use crate::error::ClientError;
use crate::transport::Row;

type SharedResult = Result<Arc<Vec<Row>>, ClientError>;

struct InFlight {
    tx: broadcast::Sender<SharedResult>,
    subscribers: AtomicUsize,
    abort: AbortHandle,
}

pub struct RequestDeduplicator {
    in_flight: Arc<DashMap<String, Arc<InFlight>>>,
}

impl Default for RequestDeduplicator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestDeduplicator {
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Number of distinct keys currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Callers attached to `key`, if a flight exists.
    pub fn subscriber_count(&self, key: &str) -> Option<usize> {
        self.in_flight
            .get(key)
            .map(|f| f.subscribers.load(Ordering::SeqCst))
    }

    /// Execute `factory` at most once per key per instant. Concurrent calls
    /// with the same key share the leader's outcome.
    pub async fn run<F>(&self, key: &str, factory: F) -> SharedResult
    where
        F: Future<Output = Result<Vec<Row>, ClientError>> + Send + 'static,
    {
        let (flight, mut rx) = match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                // The entry guard holds the shard lock, so the leader task
                // cannot release the slot (which happens before it
                // publishes) until this subscription is registered.
                let flight = Arc::clone(entry.get());
                flight.subscribers.fetch_add(1, Ordering::SeqCst);
                let rx = flight.tx.subscribe();
                trace!("attached to in-flight request {key}");
                (flight, rx)
            }
            Entry::Vacant(slot) => {
                let (tx, rx) = broadcast::channel(1);
                let map = Arc::clone(&self.in_flight);
                let owned_key = key.to_string();
                let publish = tx.clone();
                let handle = tokio::spawn(async move {
                    let result = factory.await.map(Arc::new);
                    // Release the slot first; a caller arriving after this
                    // point starts a fresh attempt instead of observing a
                    // settled (possibly failed) flight.
                    map.remove(&owned_key);
                    let _ = publish.send(result);
                });
                let flight = Arc::new(InFlight {
                    tx,
                    subscribers: AtomicUsize::new(1),
                    abort: handle.abort_handle(),
                });
                slot.insert(Arc::clone(&flight));
                (flight, rx)
            }
        };

        let guard = SubscriberGuard {
            map: Arc::clone(&self.in_flight),
            key: key.to_string(),
            flight,
        };
        let received = rx.recv().await;
        drop(guard);

        match received {
            Ok(shared) => shared,
            // The channel only closes when the flight was aborted with no
            // subscribers left; observing it here means we raced that
            // teardown.
            Err(_) => Err(ClientError::transport(
                "deduplicated request was cancelled before completion",
            )),
        }
    }
}

/// Detaches a waiter on drop; aborts the flight when the last one leaves.
struct SubscriberGuard {
    map: Arc<DashMap<String, Arc<InFlight>>>,
    key: String,
    flight: Arc<InFlight>,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        if self.flight.subscribers.fetch_sub(1, Ordering::SeqCst) == 1 {
            // Only abort the exact flight we were attached to; the key may
            // already be reoccupied by a newer attempt.
            let stale = self
                .map
                .remove_if(&self.key, |_, current| Arc::ptr_eq(current, &self.flight));
            if stale.is_some() {
                trace!("aborting in-flight request {} (no subscribers left)", self.key);
                self.flight.abort.abort();
            }
        }
    }
}
