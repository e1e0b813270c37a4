//! Domain tables owned by the participant services.
//!
//! Each service owns exactly one of these stores, selected by the table-role
//! flags in its configuration. The saga stages only ever reach them through
//! the participant HTTP surface, never directly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result type for domain store operations.
pub type Result<T> = std::result::Result<T, DomainError>;

#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("event not found: {0}")]
    EventNotFound(i64),

    #[error("user not found: {0}")]
    UserNotFound(i64),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl DomainError {
    /// Not-found failures never heal on retry; the saga force-completes
    /// instead of retrying them forever.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self,
            DomainError::EventNotFound(_) | DomainError::UserNotFound(_)
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Event {
    pub event_id: i64,
    pub event_name: String,
    pub event_info: String,
    pub host_id: i64,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub location: String,
    pub participants: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub user_id: i64,
    pub user_name: String,
    pub host_events: Vec<i64>,
}

/// Kind of mutation an event-log row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    EventCreate,
    EventUpdate,
    EventDelete,
    EventJoin,
    EventLeave,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLog {
    pub log_id: i64,
    pub user_id: i64,
    pub event_id: i64,
    pub event_type: EventType,
    pub event: Event,
    pub created_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert an event, returning its assigned id.
    async fn create_event(&self, event: &Event) -> Result<i64>;

    async fn get_event(&self, event_id: i64) -> Result<Event>;

    async fn update_event(&self, event: &Event) -> Result<()>;

    /// Delete an event, returning the row as it was.
    async fn delete_event(&self, event_id: i64) -> Result<Event>;

    async fn add_participant(&self, event_id: i64, user_id: i64) -> Result<()>;

    async fn remove_participant(&self, event_id: i64, user_id: i64) -> Result<()>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, user: &User) -> Result<i64>;

    async fn get_user(&self, user_id: i64) -> Result<User>;

    async fn add_host_event(&self, user_id: i64, event_id: i64) -> Result<()>;

    async fn remove_host_event(&self, user_id: i64, event_id: i64) -> Result<()>;
}

#[async_trait]
pub trait EventLogStore: Send + Sync {
    /// Append a log row, returning its assigned id.
    async fn create_log(&self, log: &EventLog) -> Result<i64>;

    /// Logs for one event, oldest first.
    async fn list_logs(&self, event_id: i64) -> Result<Vec<EventLog>>;
}
