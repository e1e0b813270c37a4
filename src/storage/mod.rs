//! Durable state behind the coordination substrate.
//!
//! [`TxJournal`] is the seam between the in-memory managers and the four
//! transaction tables (executor checkpoints, result cache, sender and
//! receiver clocks). Implementations: [`PostgresTxJournal`] for production,
//! [`MemoryTxJournal`] for tests and embedded wiring. Domain tables get the
//! same treatment in [`domain`].

pub mod domain;
pub mod memory;
pub mod postgres;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::coord::context::{ExecStatus, ExecutorContext};
use crate::coord::executor::CheckpointFn;

pub use domain::{
    Event, EventLog, EventLogStore, EventStore, EventType, User, UserStore,
};
pub use memory::{MemoryEventLogStore, MemoryEventStore, MemoryTxJournal, MemoryUserStore};
pub use postgres::{
    PostgresEventLogStore, PostgresEventStore, PostgresTxJournal, PostgresUserStore,
};

/// Result type for journal operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors from the durable layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("executor checkpoint not found: {0}")]
    CheckpointNotFound(u64),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid executor status: {0}")]
    InvalidStatus(i16),
}

/// Executor checkpointer that overwrites the journal's checkpoint row.
pub fn journal_checkpointer(journal: Arc<dyn TxJournal>) -> CheckpointFn {
    Arc::new(move |exec_ctx| {
        let journal = journal.clone();
        Box::pin(async move {
            journal
                .update_checkpoint(&exec_ctx)
                .await
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
        })
    })
}

/// One persisted clock row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockEntry {
    pub partition: u64,
    pub service: String,
    pub timestamp: u64,
}

/// Persistence seam for executor checkpoints, logical clocks, and the
/// at-most-once result cache.
///
/// A coordinator only writes checkpoints and sender clocks; a participant
/// only writes receiver clocks and results. Processes that play both roles
/// (every service here) use one journal for both sides.
#[async_trait]
pub trait TxJournal: Send + Sync {
    /// Insert a fresh checkpoint row and assign `exec_ctx.exec_id`.
    async fn insert_checkpoint(&self, exec_ctx: &mut ExecutorContext) -> Result<()>;

    /// Overwrite the checkpoint row for `exec_ctx.exec_id`.
    async fn update_checkpoint(&self, exec_ctx: &ExecutorContext) -> Result<()>;

    /// Load one checkpoint with its persisted status column.
    async fn load_checkpoint(&self, exec_id: u64) -> Result<(ExecStatus, ExecutorContext)>;

    /// Load every checkpoint whose status is non-terminal and not Rollback,
    /// i.e. everything recovery must re-drive.
    async fn load_active_checkpoints(&self) -> Result<Vec<ExecutorContext>>;

    /// Drop all checkpoint rows. Test utility.
    async fn clear_checkpoints(&self) -> Result<()>;

    /// Atomically insert a Pending checkpoint and upsert the sender clocks
    /// advanced by its timestamp allocation. Assigns `exec_ctx.exec_id`.
    async fn open_executor(
        &self,
        exec_ctx: &mut ExecutorContext,
        partition: u64,
        clocks: &HashMap<String, u64>,
    ) -> Result<()>;

    /// All persisted sender clock rows.
    async fn sender_clocks(&self) -> Result<Vec<ClockEntry>>;

    /// All persisted receiver clock rows.
    async fn receiver_clocks(&self) -> Result<Vec<ClockEntry>>;

    /// Upsert one receiver clock row.
    async fn save_receiver_clock(&self, partition: u64, service: &str, timestamp: u64)
        -> Result<()>;

    /// Cached result for a (partition, origin service, timestamp) slot.
    async fn stage_result(
        &self,
        partition: u64,
        service: &str,
        timestamp: u64,
    ) -> Result<Option<Value>>;

    /// Record a slot's result. Inserting the same slot twice is a no-op, so
    /// at most one payload ever lands per (partition, service, timestamp).
    async fn record_stage_result(
        &self,
        partition: u64,
        service: &str,
        timestamp: u64,
        content: &Value,
    ) -> Result<()>;
}
