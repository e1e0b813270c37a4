//! In-memory implementations of the journal and domain stores.
//!
//! Used by the test suite and by embedded single-process wiring. Semantics
//! mirror the Postgres implementations, including the at-most-once result
//! insert and the non-terminal checkpoint scan.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::coord::context::{ExecStatus, ExecutorContext};

use super::domain::{
    DomainError, Event, EventLog, EventLogStore, EventStore, User, UserStore,
};
use super::{ClockEntry, Result, StorageError, TxJournal};

#[derive(Default)]
struct JournalInner {
    next_exec_id: u64,
    checkpoints: HashMap<u64, (ExecStatus, ExecutorContext)>,
    sender_clocks: HashMap<(u64, String), u64>,
    receiver_clocks: HashMap<(u64, String), u64>,
    results: HashMap<(u64, String, u64), Value>,
}

/// Journal backed by plain maps under one async mutex.
#[derive(Default)]
pub struct MemoryTxJournal {
    inner: Mutex<JournalInner>,
}

impl MemoryTxJournal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Statuses of every checkpoint row, keyed by exec id. Test helper.
    pub async fn checkpoint_statuses(&self) -> HashMap<u64, ExecStatus> {
        let inner = self.inner.lock().await;
        inner
            .checkpoints
            .iter()
            .map(|(id, (status, _))| (*id, *status))
            .collect()
    }

    /// Number of cached stage results. Test helper.
    pub async fn result_count(&self) -> usize {
        self.inner.lock().await.results.len()
    }

    /// Seed a sender clock row. Test helper.
    pub async fn seed_sender_clock(&self, partition: u64, service: &str, timestamp: u64) {
        let mut inner = self.inner.lock().await;
        inner
            .sender_clocks
            .insert((partition, service.to_string()), timestamp);
    }

    /// Seed a receiver clock row. Test helper.
    pub async fn seed_receiver_clock(&self, partition: u64, service: &str, timestamp: u64) {
        let mut inner = self.inner.lock().await;
        inner
            .receiver_clocks
            .insert((partition, service.to_string()), timestamp);
    }
}

#[async_trait]
impl TxJournal for MemoryTxJournal {
    async fn insert_checkpoint(&self, exec_ctx: &mut ExecutorContext) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.next_exec_id += 1;
        exec_ctx.exec_id = inner.next_exec_id;
        inner
            .checkpoints
            .insert(exec_ctx.exec_id, (exec_ctx.status, exec_ctx.clone()));
        Ok(())
    }

    async fn update_checkpoint(&self, exec_ctx: &ExecutorContext) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .checkpoints
            .insert(exec_ctx.exec_id, (exec_ctx.status, exec_ctx.clone()));
        Ok(())
    }

    async fn load_checkpoint(&self, exec_id: u64) -> Result<(ExecStatus, ExecutorContext)> {
        let inner = self.inner.lock().await;
        inner
            .checkpoints
            .get(&exec_id)
            .cloned()
            .ok_or(StorageError::CheckpointNotFound(exec_id))
    }

    async fn load_active_checkpoints(&self) -> Result<Vec<ExecutorContext>> {
        let inner = self.inner.lock().await;
        let mut active: Vec<ExecutorContext> = inner
            .checkpoints
            .values()
            .filter(|(status, _)| {
                !matches!(
                    status,
                    ExecStatus::Aborted | ExecStatus::Rollback | ExecStatus::Completed
                )
            })
            .map(|(_, ctx)| ctx.clone())
            .collect();
        active.sort_by_key(|ctx| ctx.exec_id);
        Ok(active)
    }

    async fn clear_checkpoints(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.checkpoints.clear();
        Ok(())
    }

    async fn open_executor(
        &self,
        exec_ctx: &mut ExecutorContext,
        partition: u64,
        clocks: &HashMap<String, u64>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.next_exec_id += 1;
        exec_ctx.exec_id = inner.next_exec_id;
        inner
            .checkpoints
            .insert(exec_ctx.exec_id, (exec_ctx.status, exec_ctx.clone()));
        for (service, timestamp) in clocks {
            inner
                .sender_clocks
                .insert((partition, service.clone()), *timestamp);
        }
        Ok(())
    }

    async fn sender_clocks(&self) -> Result<Vec<ClockEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sender_clocks
            .iter()
            .map(|((partition, service), timestamp)| ClockEntry {
                partition: *partition,
                service: service.clone(),
                timestamp: *timestamp,
            })
            .collect())
    }

    async fn receiver_clocks(&self) -> Result<Vec<ClockEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .receiver_clocks
            .iter()
            .map(|((partition, service), timestamp)| ClockEntry {
                partition: *partition,
                service: service.clone(),
                timestamp: *timestamp,
            })
            .collect())
    }

    async fn save_receiver_clock(
        &self,
        partition: u64,
        service: &str,
        timestamp: u64,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .receiver_clocks
            .insert((partition, service.to_string()), timestamp);
        Ok(())
    }

    async fn stage_result(
        &self,
        partition: u64,
        service: &str,
        timestamp: u64,
    ) -> Result<Option<Value>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .results
            .get(&(partition, service.to_string(), timestamp))
            .cloned())
    }

    async fn record_stage_result(
        &self,
        partition: u64,
        service: &str,
        timestamp: u64,
        content: &Value,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .results
            .entry((partition, service.to_string(), timestamp))
            .or_insert_with(|| content.clone());
        Ok(())
    }
}

#[derive(Default)]
struct EventTable {
    next_id: i64,
    rows: HashMap<i64, Event>,
}

/// In-memory event table.
#[derive(Default)]
pub struct MemoryEventStore {
    inner: Mutex<EventTable>,
}

impl MemoryEventStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn event_count(&self) -> usize {
        self.inner.lock().await.rows.len()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn create_event(&self, event: &Event) -> super::domain::Result<i64> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let mut row = event.clone();
        row.event_id = inner.next_id;
        inner.rows.insert(row.event_id, row);
        Ok(inner.next_id)
    }

    async fn get_event(&self, event_id: i64) -> super::domain::Result<Event> {
        let inner = self.inner.lock().await;
        inner
            .rows
            .get(&event_id)
            .cloned()
            .ok_or(DomainError::EventNotFound(event_id))
    }

    async fn update_event(&self, event: &Event) -> super::domain::Result<()> {
        let mut inner = self.inner.lock().await;
        let row = inner
            .rows
            .get_mut(&event.event_id)
            .ok_or(DomainError::EventNotFound(event.event_id))?;
        row.event_name = event.event_name.clone();
        row.event_info = event.event_info.clone();
        row.start_at = event.start_at;
        row.end_at = event.end_at;
        row.location = event.location.clone();
        Ok(())
    }

    async fn delete_event(&self, event_id: i64) -> super::domain::Result<Event> {
        let mut inner = self.inner.lock().await;
        inner
            .rows
            .remove(&event_id)
            .ok_or(DomainError::EventNotFound(event_id))
    }

    async fn add_participant(&self, event_id: i64, user_id: i64) -> super::domain::Result<()> {
        let mut inner = self.inner.lock().await;
        let row = inner
            .rows
            .get_mut(&event_id)
            .ok_or(DomainError::EventNotFound(event_id))?;
        if !row.participants.contains(&user_id) {
            row.participants.push(user_id);
        }
        Ok(())
    }

    async fn remove_participant(&self, event_id: i64, user_id: i64) -> super::domain::Result<()> {
        let mut inner = self.inner.lock().await;
        let row = inner
            .rows
            .get_mut(&event_id)
            .ok_or(DomainError::EventNotFound(event_id))?;
        row.participants.retain(|id| *id != user_id);
        Ok(())
    }
}

#[derive(Default)]
struct UserTable {
    next_id: i64,
    rows: HashMap<i64, User>,
}

/// In-memory user table.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: Mutex<UserTable>,
}

impl MemoryUserStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert a user with a fixed id. Test helper.
    pub async fn seed_user(&self, user: User) {
        let mut inner = self.inner.lock().await;
        inner.next_id = inner.next_id.max(user.user_id);
        inner.rows.insert(user.user_id, user);
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create_user(&self, user: &User) -> super::domain::Result<i64> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let mut row = user.clone();
        row.user_id = inner.next_id;
        inner.rows.insert(row.user_id, row);
        Ok(inner.next_id)
    }

    async fn get_user(&self, user_id: i64) -> super::domain::Result<User> {
        let inner = self.inner.lock().await;
        inner
            .rows
            .get(&user_id)
            .cloned()
            .ok_or(DomainError::UserNotFound(user_id))
    }

    async fn add_host_event(&self, user_id: i64, event_id: i64) -> super::domain::Result<()> {
        let mut inner = self.inner.lock().await;
        let row = inner
            .rows
            .get_mut(&user_id)
            .ok_or(DomainError::UserNotFound(user_id))?;
        if !row.host_events.contains(&event_id) {
            row.host_events.push(event_id);
        }
        Ok(())
    }

    async fn remove_host_event(&self, user_id: i64, event_id: i64) -> super::domain::Result<()> {
        let mut inner = self.inner.lock().await;
        let row = inner
            .rows
            .get_mut(&user_id)
            .ok_or(DomainError::UserNotFound(user_id))?;
        row.host_events.retain(|id| *id != event_id);
        Ok(())
    }
}

#[derive(Default)]
struct EventLogTable {
    next_id: i64,
    rows: Vec<EventLog>,
}

/// In-memory event-log table.
#[derive(Default)]
pub struct MemoryEventLogStore {
    inner: Mutex<EventLogTable>,
}

impl MemoryEventLogStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn log_count(&self) -> usize {
        self.inner.lock().await.rows.len()
    }
}

#[async_trait]
impl EventLogStore for MemoryEventLogStore {
    async fn create_log(&self, log: &EventLog) -> super::domain::Result<i64> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let mut row = log.clone();
        row.log_id = inner.next_id;
        row.created_at = Some(Utc::now());
        inner.rows.push(row);
        Ok(inner.next_id)
    }

    async fn list_logs(&self, event_id: i64) -> super::domain::Result<Vec<EventLog>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rows
            .iter()
            .filter(|log| log.event_id == event_id)
            .cloned()
            .collect())
    }
}
