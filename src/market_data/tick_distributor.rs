use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::models::Price;

/// Opaque handle for one fan-out subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Statistics for the tick distributor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickDistributorStats {
    /// Number of live subscriptions
    pub subscriber_count: usize,
    /// Total ticks handed to subscriber queues (lifetime)
    pub total_distributed: u64,
    /// Ticks dropped because a subscriber queue was full (lifetime)
    pub total_dropped: u64,
}

/// In-process multi-subscriber fan-out from the tick generator
///
/// A registry of independent bounded queues keyed by an opaque
/// subscription id. Each subscriber gets its own channel, so a slow
/// consumer only ever loses its own ticks: `publish` try_sends and
/// drops per-subscriber on a full queue, never blocking the producer.
///
/// Subscriber lifetime is decoupled from the producer; callers add and
/// remove subscriptions explicitly.
pub struct TickDistributor {
    subscribers: Arc<DashMap<u64, mpsc::Sender<Price>>>,
    next_id: AtomicU64,
    total_distributed: AtomicU64,
    total_dropped: AtomicU64,
}

impl TickDistributor {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            total_distributed: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
        }
    }

    /// Register a subscriber with its own bounded queue
    pub fn subscribe(&self, capacity: usize) -> (SubscriptionId, mpsc::Receiver<Price>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(capacity);
        self.subscribers.insert(id, tx);

        tracing::debug!(subscription = id, capacity, "fan-out subscriber added");

        (SubscriptionId(id), rx)
    }

    /// Remove a subscription; its receiver sees the channel close
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.subscribers.remove(&id.0).is_some();

        if removed {
            tracing::debug!(subscription = id.0, "fan-out subscriber removed");
        } else {
            tracing::warn!(subscription = id.0, "unsubscribe for unknown subscription");
        }

        removed
    }

    /// Fan one tick out to every live subscriber, non-blocking
    pub fn publish(&self, price: &Price) {
        for entry in self.subscribers.iter() {
            match entry.value().try_send(price.clone()) {
                Ok(()) => {
                    self.total_distributed.fetch_add(1, Ordering::Relaxed);
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.total_dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(
                        subscription = *entry.key(),
                        symbol = %price.symbol,
                        "subscriber queue full, tick dropped"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Receiver gone without unsubscribe; reaped below.
                }
            }
        }

        // Reap subscriptions whose receivers were dropped.
        self.subscribers.retain(|_, tx| !tx.is_closed());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn stats(&self) -> TickDistributorStats {
        TickDistributorStats {
            subscriber_count: self.subscribers.len(),
            total_distributed: self.total_distributed.load(Ordering::Relaxed),
            total_dropped: self.total_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for TickDistributor {
    fn default() -> Self {
        Self::new()
    }
}
