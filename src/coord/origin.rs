//! Origin manager: in-order release of inbound stage requests.
//!
//! Each (partition, origin service) pair keeps a min-heap of waiters keyed
//! by logical timestamp. A waiter is released exactly when its timestamp is
//! the receiver clock's successor; releasing advances the clock and wakes
//! the next contiguous waiter. Stale timestamps (at or below the clock) are
//! rejected without blocking so the dedup cache can answer them.
//!
//! Liveness: when the waiter for timestamp `k` releases, the clock becomes
//! `k` and the head check wakes `k+1` if queued; if `k+1` has not arrived
//! yet, its own acquire re-runs the head check after enqueueing.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};

use super::clock::TxClockManager;
use super::partition::{gen_partitions, TxPartitionManager};

/// A request's claim on its (partition, origin service, timestamp) slot.
#[derive(Debug, Clone)]
pub struct WaitMsg {
    pub partition: u64,
    pub service: String,
    pub timestamp: u64,
}

impl WaitMsg {
    pub fn new(partition: u64, service: impl Into<String>, timestamp: u64) -> Self {
        Self {
            partition,
            service: service.into(),
            timestamp,
        }
    }
}

struct Waiter {
    timestamp: u64,
    reply: oneshot::Sender<()>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> Ordering {
        // inverted: BinaryHeap is a max-heap, we want the smallest timestamp on top
        other.timestamp.cmp(&self.timestamp)
    }
}

/// Per-(partition, service) priority queues over the receiver clocks.
pub struct TxOriginManager {
    partitions: u64,
    queues: Mutex<HashMap<(u64, String), BinaryHeap<Waiter>>>,
    clocks: Arc<TxClockManager>,
    locks: Arc<TxPartitionManager>,
}

impl TxOriginManager {
    pub fn new(
        partitions: u64,
        receiver_clocks: Arc<TxClockManager>,
        receiver_partitions: Arc<TxPartitionManager>,
    ) -> Self {
        Self {
            partitions: gen_partitions(partitions),
            queues: Mutex::new(HashMap::new()),
            clocks: receiver_clocks,
            locks: receiver_partitions,
        }
    }

    /// Claim the slot for `msg`, blocking until every earlier timestamp for
    /// the same (partition, service) has been released.
    ///
    /// Returns `false` without blocking when the timestamp is stale, i.e. at
    /// or below the receiver clock; the caller must then skip `release`.
    pub async fn acquire(&self, msg: WaitMsg) -> bool {
        let partition = msg.partition % self.partitions;
        let (reply, ready) = oneshot::channel();

        {
            let _guard = self.locks.lock(partition).await;
            if msg.timestamp <= self.clocks.get(partition, &msg.service) {
                return false;
            }
            let mut queues = self.queues.lock().await;
            queues
                .entry((partition, msg.service.clone()))
                .or_default()
                .push(Waiter {
                    timestamp: msg.timestamp,
                    reply,
                });
        }

        self.wake_next(partition, &msg.service).await;
        // The sender is never dropped without a send: a waiter leaves the
        // heap only through wake_next.
        let _ = ready.await;
        true
    }

    /// Mark the in-flight slot done: advance the receiver clock and wake the
    /// next contiguous waiter.
    pub async fn release(&self, partition: u64, service: &str) {
        let partition = partition % self.partitions;
        {
            let _guard = self.locks.lock(partition).await;
            self.clocks.inc(partition, service);
        }
        self.wake_next(partition, service).await;
    }

    async fn wake_next(&self, partition: u64, service: &str) {
        let _guard = self.locks.lock(partition).await;
        let mut queues = self.queues.lock().await;
        let Some(heap) = queues.get_mut(&(partition, service.to_string())) else {
            return;
        };
        let next = self.clocks.get(partition, service) + 1;
        if heap.peek().map(|w| w.timestamp) == Some(next) {
            if let Some(waiter) = heap.pop() {
                let _ = waiter.reply.send(());
            }
        }
    }
}
