//! Concurrency-control substrate for multi-service transactions.
//!
//! The pieces fit together as follows: the coordinator middleware uses the
//! partition and clock managers to stamp outgoing stages with logical
//! timestamps, the participant middleware uses the origin manager to apply
//! inbound stages in timestamp order, and the executor/manager pair drives
//! the saga forward between the two. Recovery reloads both clock sets and
//! re-injects every non-terminal executor.

pub mod clock;
pub mod context;
pub mod executor;
pub mod filter;
pub mod instrument;
pub mod manager;
pub mod origin;
pub mod partition;
pub mod recovery;

use std::sync::Arc;

use clock::TxClockManager;
use filter::TxFilterManager;
use instrument::TxInstrumenter;
use manager::{RetryFn, TxExecutorManager};
use origin::TxOriginManager;
use partition::TxPartitionManager;

/// Aggregate of the in-memory coordination state owned by one process.
///
/// A process keeps two independent clock/lock pairs: the sender side is
/// touched by the coordinator middleware, the receiver side by the origin
/// manager. Nothing here is persistent; the durable tables are behind
/// [`crate::storage::TxJournal`].
pub struct TxManager {
    pub sender_clocks: Arc<TxClockManager>,
    pub receiver_clocks: Arc<TxClockManager>,
    pub sender_partitions: Arc<TxPartitionManager>,
    pub receiver_partitions: Arc<TxPartitionManager>,
    pub filters: Arc<TxFilterManager>,
    pub origin: Arc<TxOriginManager>,
    pub executors: Arc<TxExecutorManager>,
    pub instrumenter: Arc<TxInstrumenter>,
}

impl TxManager {
    /// Build the full manager set for `partitions` partition classes.
    ///
    /// `retry` is the executor manager's retry schedule.
    pub fn new(partitions: u64, retry: RetryFn) -> Arc<Self> {
        let sender_clocks = Arc::new(TxClockManager::new(partitions));
        let receiver_clocks = Arc::new(TxClockManager::new(partitions));
        let sender_partitions = Arc::new(TxPartitionManager::new(partitions));
        let receiver_partitions = Arc::new(TxPartitionManager::new(partitions));
        let filters = Arc::new(TxFilterManager::new(partitions));
        let origin = Arc::new(TxOriginManager::new(
            partitions,
            receiver_clocks.clone(),
            receiver_partitions.clone(),
        ));
        let executors = TxExecutorManager::new(retry);
        Arc::new(Self {
            sender_clocks,
            receiver_clocks,
            sender_partitions,
            receiver_partitions,
            filters,
            origin,
            executors,
            instrumenter: Arc::new(TxInstrumenter::new()),
        })
    }
}
