//! Per-(partition, service) monotonic logical clocks.
//!
//! The coordinator keeps a sender clock per receiver service (last timestamp
//! issued toward it) and every participant keeps a receiver clock per origin
//! service (last timestamp applied from it). Timestamps start at 1; a clock
//! of 0 means nothing has been issued or applied yet.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::partition::gen_partitions;

/// Logical clock table.
///
/// Mutations that must be atomic with respect to other coordination state
/// (queue peeks, timestamp allocation) are serialized by the caller through
/// the partition lock array; the inner lock only keeps the map itself sane.
pub struct TxClockManager {
    partitions: u64,
    clocks: RwLock<HashMap<(u64, String), u64>>,
}

impl TxClockManager {
    pub fn new(partitions: u64) -> Self {
        Self {
            partitions: gen_partitions(partitions),
            clocks: RwLock::new(HashMap::new()),
        }
    }

    pub fn partitions(&self) -> u64 {
        self.partitions
    }

    pub fn get(&self, partition: u64, service: &str) -> u64 {
        let clocks = self.clocks.read().unwrap_or_else(PoisonError::into_inner);
        clocks
            .get(&(partition % self.partitions, service.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn set(&self, partition: u64, service: &str, timestamp: u64) {
        let mut clocks = self.clocks.write().unwrap_or_else(PoisonError::into_inner);
        clocks.insert((partition % self.partitions, service.to_string()), timestamp);
    }

    pub fn inc(&self, partition: u64, service: &str) {
        let mut clocks = self.clocks.write().unwrap_or_else(PoisonError::into_inner);
        *clocks
            .entry((partition % self.partitions, service.to_string()))
            .or_insert(0) += 1;
    }
}

/// Allocate one successor timestamp per receiver, left to right.
///
/// A receiver that appears more than once gets strictly increasing
/// successors (`ts+1, ts+2, ...`), so every `(partition, receiver, ts)`
/// triple stays globally unique. Returns the per-call timestamps in
/// declaration order plus the final clock value per distinct receiver,
/// which the caller persists and then folds back into `clocks`.
pub fn allocate_timestamps(
    clocks: &TxClockManager,
    partition: u64,
    receivers: &[String],
) -> (Vec<u64>, HashMap<String, u64>) {
    let mut latest: HashMap<String, u64> = HashMap::new();
    let mut timestamps = Vec::with_capacity(receivers.len());
    for receiver in receivers {
        let next = match latest.get(receiver) {
            Some(ts) => ts + 1,
            None => clocks.get(partition, receiver) + 1,
        };
        timestamps.push(next);
        latest.insert(receiver.clone(), next);
    }
    (timestamps, latest)
}
