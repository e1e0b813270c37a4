//! PostgreSQL implementations of the journal and domain stores.
//!
//! Plain SQL with positional binds; schemas are applied once at startup by
//! the idempotent `migrate` helpers. Each process only migrates the tables
//! its roles require.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};

use crate::coord::context::{ExecStatus, ExecutorContext};

use super::domain::{
    DomainError, Event, EventLog, EventLogStore, EventStore, EventType, User, UserStore,
};
use super::{ClockEntry, Result, StorageError, TxJournal};

fn status_to_i16(status: ExecStatus) -> i16 {
    u8::from(status) as i16
}

fn status_from_i16(value: i16) -> Result<ExecStatus> {
    u8::try_from(value)
        .ok()
        .and_then(|v| ExecStatus::try_from(v).ok())
        .ok_or(StorageError::InvalidStatus(value))
}

impl EventType {
    fn as_str(self) -> &'static str {
        match self {
            EventType::EventCreate => "event-create",
            EventType::EventUpdate => "event-update",
            EventType::EventDelete => "event-delete",
            EventType::EventJoin => "event-join",
            EventType::EventLeave => "event-leave",
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "event-update" => EventType::EventUpdate,
            "event-delete" => EventType::EventDelete,
            "event-join" => EventType::EventJoin,
            "event-leave" => EventType::EventLeave,
            _ => EventType::EventCreate,
        }
    }
}

/// Journal over the four transaction tables.
pub struct PostgresTxJournal {
    pool: PgPool,
}

impl PostgresTxJournal {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the transaction tables if they do not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tx_executors (
                exec_id BIGSERIAL PRIMARY KEY,
                status SMALLINT NOT NULL,
                checkpoint JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tx_results (
                prt BIGINT NOT NULL,
                svc TEXT NOT NULL,
                ts BIGINT NOT NULL,
                content JSONB NOT NULL,
                PRIMARY KEY (prt, svc, ts)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tx_sender_clocks (
                prt BIGINT NOT NULL,
                svc TEXT NOT NULL,
                ts BIGINT NOT NULL,
                PRIMARY KEY (prt, svc)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tx_receiver_clocks (
                prt BIGINT NOT NULL,
                svc TEXT NOT NULL,
                ts BIGINT NOT NULL,
                PRIMARY KEY (prt, svc)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clock_rows(&self, table: &str) -> Result<Vec<ClockEntry>> {
        let query = format!("SELECT prt, svc, ts FROM {table}");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| {
                Ok(ClockEntry {
                    partition: row.try_get::<i64, _>("prt")? as u64,
                    service: row.try_get("svc")?,
                    timestamp: row.try_get::<i64, _>("ts")? as u64,
                })
            })
            .collect()
    }
}

#[async_trait]
impl TxJournal for PostgresTxJournal {
    async fn insert_checkpoint(&self, exec_ctx: &mut ExecutorContext) -> Result<()> {
        let checkpoint = serde_json::to_value(&*exec_ctx)?;
        let row = sqlx::query(
            "INSERT INTO tx_executors (status, checkpoint) VALUES ($1, $2) RETURNING exec_id",
        )
        .bind(status_to_i16(exec_ctx.status))
        .bind(&checkpoint)
        .fetch_one(&self.pool)
        .await?;
        exec_ctx.exec_id = row.try_get::<i64, _>("exec_id")? as u64;
        Ok(())
    }

    async fn update_checkpoint(&self, exec_ctx: &ExecutorContext) -> Result<()> {
        let checkpoint = serde_json::to_value(exec_ctx)?;
        sqlx::query("UPDATE tx_executors SET status = $2, checkpoint = $3 WHERE exec_id = $1")
            .bind(exec_ctx.exec_id as i64)
            .bind(status_to_i16(exec_ctx.status))
            .bind(&checkpoint)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_checkpoint(&self, exec_id: u64) -> Result<(ExecStatus, ExecutorContext)> {
        let row = sqlx::query("SELECT status, checkpoint FROM tx_executors WHERE exec_id = $1")
            .bind(exec_id as i64)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StorageError::CheckpointNotFound(exec_id))?;
        let status = status_from_i16(row.try_get("status")?)?;
        let checkpoint: Value = row.try_get("checkpoint")?;
        let mut exec_ctx: ExecutorContext = serde_json::from_value(checkpoint)?;
        exec_ctx.exec_id = exec_id;
        Ok((status, exec_ctx))
    }

    async fn load_active_checkpoints(&self) -> Result<Vec<ExecutorContext>> {
        let rows = sqlx::query(
            "SELECT exec_id, checkpoint FROM tx_executors WHERE status NOT IN ($1, $2, $3) ORDER BY exec_id",
        )
        .bind(status_to_i16(ExecStatus::Aborted))
        .bind(status_to_i16(ExecStatus::Rollback))
        .bind(status_to_i16(ExecStatus::Completed))
        .fetch_all(&self.pool)
        .await?;

        let mut active = Vec::with_capacity(rows.len());
        for row in rows {
            let checkpoint: Value = row.try_get("checkpoint")?;
            let mut exec_ctx: ExecutorContext = serde_json::from_value(checkpoint)?;
            exec_ctx.exec_id = row.try_get::<i64, _>("exec_id")? as u64;
            active.push(exec_ctx);
        }
        Ok(active)
    }

    async fn clear_checkpoints(&self) -> Result<()> {
        sqlx::query("TRUNCATE TABLE tx_executors").execute(&self.pool).await?;
        Ok(())
    }

    async fn open_executor(
        &self,
        exec_ctx: &mut ExecutorContext,
        partition: u64,
        clocks: &HashMap<String, u64>,
    ) -> Result<()> {
        let checkpoint = serde_json::to_value(&*exec_ctx)?;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "INSERT INTO tx_executors (status, checkpoint) VALUES ($1, $2) RETURNING exec_id",
        )
        .bind(status_to_i16(exec_ctx.status))
        .bind(&checkpoint)
        .fetch_one(&mut *tx)
        .await?;

        for (service, timestamp) in clocks {
            sqlx::query(
                r#"
                INSERT INTO tx_sender_clocks (prt, svc, ts)
                VALUES ($1, $2, $3)
                ON CONFLICT (prt, svc) DO UPDATE SET ts = EXCLUDED.ts
                "#,
            )
            .bind(partition as i64)
            .bind(service)
            .bind(*timestamp as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        exec_ctx.exec_id = row.try_get::<i64, _>("exec_id")? as u64;
        Ok(())
    }

    async fn sender_clocks(&self) -> Result<Vec<ClockEntry>> {
        self.clock_rows("tx_sender_clocks").await
    }

    async fn receiver_clocks(&self) -> Result<Vec<ClockEntry>> {
        self.clock_rows("tx_receiver_clocks").await
    }

    async fn save_receiver_clock(
        &self,
        partition: u64,
        service: &str,
        timestamp: u64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tx_receiver_clocks (prt, svc, ts)
            VALUES ($1, $2, $3)
            ON CONFLICT (prt, svc) DO UPDATE SET ts = EXCLUDED.ts
            "#,
        )
        .bind(partition as i64)
        .bind(service)
        .bind(timestamp as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn stage_result(
        &self,
        partition: u64,
        service: &str,
        timestamp: u64,
    ) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT content FROM tx_results WHERE prt = $1 AND svc = $2 AND ts = $3")
            .bind(partition as i64)
            .bind(service)
            .bind(timestamp as i64)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("content")?)),
            None => Ok(None),
        }
    }

    async fn record_stage_result(
        &self,
        partition: u64,
        service: &str,
        timestamp: u64,
        content: &Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tx_results (prt, svc, ts, content)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (prt, svc, ts) DO NOTHING
            "#,
        )
        .bind(partition as i64)
        .bind(service)
        .bind(timestamp as i64)
        .bind(content)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn event_from_row(row: &sqlx::postgres::PgRow) -> std::result::Result<Event, sqlx::Error> {
    Ok(Event {
        event_id: row.try_get("event_id")?,
        event_name: row.try_get("event_name")?,
        event_info: row.try_get("event_info")?,
        host_id: row.try_get("host_id")?,
        start_at: row.try_get::<Option<DateTime<Utc>>, _>("start_at")?,
        end_at: row.try_get::<Option<DateTime<Utc>>, _>("end_at")?,
        location: row.try_get("location")?,
        participants: row.try_get("participants")?,
    })
}

/// Event table.
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                event_id BIGSERIAL PRIMARY KEY,
                event_name TEXT NOT NULL,
                event_info TEXT NOT NULL,
                host_id BIGINT NOT NULL,
                start_at TIMESTAMPTZ,
                end_at TIMESTAMPTZ,
                location TEXT NOT NULL,
                participants BIGINT[] NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_exists(&self, event_id: i64) -> super::domain::Result<()> {
        let row = sqlx::query("SELECT 1 FROM events WHERE event_id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DomainError::from)?;
        match row {
            Some(_) => Ok(()),
            None => Err(DomainError::EventNotFound(event_id)),
        }
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn create_event(&self, event: &Event) -> super::domain::Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO events
                (event_name, event_info, host_id, start_at, end_at, location, participants)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING event_id
            "#,
        )
        .bind(&event.event_name)
        .bind(&event.event_info)
        .bind(event.host_id)
        .bind(event.start_at)
        .bind(event.end_at)
        .bind(&event.location)
        .bind(&event.participants)
        .fetch_one(&self.pool)
        .await
        .map_err(DomainError::from)?;
        Ok(row.try_get("event_id").map_err(DomainError::from)?)
    }

    async fn get_event(&self, event_id: i64) -> super::domain::Result<Event> {
        let row = sqlx::query("SELECT * FROM events WHERE event_id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DomainError::from)?
            .ok_or(DomainError::EventNotFound(event_id))?;
        event_from_row(&row).map_err(DomainError::from)
    }

    async fn update_event(&self, event: &Event) -> super::domain::Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE events SET
                event_name = $2,
                event_info = $3,
                start_at = $4,
                end_at = $5,
                location = $6
            WHERE event_id = $1
            "#,
        )
        .bind(event.event_id)
        .bind(&event.event_name)
        .bind(&event.event_info)
        .bind(event.start_at)
        .bind(event.end_at)
        .bind(&event.location)
        .execute(&self.pool)
        .await
        .map_err(DomainError::from)?;
        if result.rows_affected() == 0 {
            return Err(DomainError::EventNotFound(event.event_id));
        }
        Ok(())
    }

    async fn delete_event(&self, event_id: i64) -> super::domain::Result<Event> {
        let row = sqlx::query("DELETE FROM events WHERE event_id = $1 RETURNING *")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DomainError::from)?
            .ok_or(DomainError::EventNotFound(event_id))?;
        event_from_row(&row).map_err(DomainError::from)
    }

    async fn add_participant(&self, event_id: i64, user_id: i64) -> super::domain::Result<()> {
        self.ensure_exists(event_id).await?;
        sqlx::query(
            r#"
            UPDATE events SET participants = array_append(participants, $2)
            WHERE event_id = $1 AND $2 <> ALL(participants)
            "#,
        )
        .bind(event_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(DomainError::from)?;
        Ok(())
    }

    async fn remove_participant(&self, event_id: i64, user_id: i64) -> super::domain::Result<()> {
        let result = sqlx::query(
            "UPDATE events SET participants = array_remove(participants, $2) WHERE event_id = $1",
        )
        .bind(event_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(DomainError::from)?;
        if result.rows_affected() == 0 {
            return Err(DomainError::EventNotFound(event_id));
        }
        Ok(())
    }
}

/// User table.
pub struct PostgresUserStore {
    pool: PgPool,
}

impl PostgresUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id BIGSERIAL PRIMARY KEY,
                user_name TEXT NOT NULL,
                host_events BIGINT[] NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for PostgresUserStore {
    async fn create_user(&self, user: &User) -> super::domain::Result<i64> {
        let row = sqlx::query(
            "INSERT INTO users (user_name, host_events) VALUES ($1, $2) RETURNING user_id",
        )
        .bind(&user.user_name)
        .bind(&user.host_events)
        .fetch_one(&self.pool)
        .await
        .map_err(DomainError::from)?;
        Ok(row.try_get("user_id").map_err(DomainError::from)?)
    }

    async fn get_user(&self, user_id: i64) -> super::domain::Result<User> {
        let row = sqlx::query("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DomainError::from)?
            .ok_or(DomainError::UserNotFound(user_id))?;
        Ok(User {
            user_id: row.try_get("user_id").map_err(DomainError::from)?,
            user_name: row.try_get("user_name").map_err(DomainError::from)?,
            host_events: row.try_get("host_events").map_err(DomainError::from)?,
        })
    }

    async fn add_host_event(&self, user_id: i64, event_id: i64) -> super::domain::Result<()> {
        let exists = sqlx::query("SELECT 1 FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DomainError::from)?;
        if exists.is_none() {
            return Err(DomainError::UserNotFound(user_id));
        }
        sqlx::query(
            r#"
            UPDATE users SET host_events = array_append(host_events, $2)
            WHERE user_id = $1 AND $2 <> ALL(host_events)
            "#,
        )
        .bind(user_id)
        .bind(event_id)
        .execute(&self.pool)
        .await
        .map_err(DomainError::from)?;
        Ok(())
    }

    async fn remove_host_event(&self, user_id: i64, event_id: i64) -> super::domain::Result<()> {
        let result = sqlx::query(
            "UPDATE users SET host_events = array_remove(host_events, $2) WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(event_id)
        .execute(&self.pool)
        .await
        .map_err(DomainError::from)?;
        if result.rows_affected() == 0 {
            return Err(DomainError::UserNotFound(user_id));
        }
        Ok(())
    }
}

/// Event-log table.
pub struct PostgresEventLogStore {
    pool: PgPool,
}

impl PostgresEventLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_logs (
                log_id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL,
                event_id BIGINT NOT NULL,
                event_type TEXT NOT NULL,
                event JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl EventLogStore for PostgresEventLogStore {
    async fn create_log(&self, log: &EventLog) -> super::domain::Result<i64> {
        let event = serde_json::to_value(&log.event).unwrap_or(Value::Null);
        let row = sqlx::query(
            r#"
            INSERT INTO event_logs (user_id, event_id, event_type, event)
            VALUES ($1, $2, $3, $4)
            RETURNING log_id
            "#,
        )
        .bind(log.user_id)
        .bind(log.event_id)
        .bind(log.event_type.as_str())
        .bind(&event)
        .fetch_one(&self.pool)
        .await
        .map_err(DomainError::from)?;
        Ok(row.try_get("log_id").map_err(DomainError::from)?)
    }

    async fn list_logs(&self, event_id: i64) -> super::domain::Result<Vec<EventLog>> {
        let rows = sqlx::query(
            "SELECT * FROM event_logs WHERE event_id = $1 ORDER BY log_id",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DomainError::from)?;

        let mut logs = Vec::with_capacity(rows.len());
        for row in rows {
            let event: Value = row.try_get("event").map_err(DomainError::from)?;
            let event_type: String = row.try_get("event_type").map_err(DomainError::from)?;
            logs.push(EventLog {
                log_id: row.try_get("log_id").map_err(DomainError::from)?,
                user_id: row.try_get("user_id").map_err(DomainError::from)?,
                event_id: row.try_get("event_id").map_err(DomainError::from)?,
                event_type: EventType::parse(&event_type),
                event: serde_json::from_value(event).unwrap_or_default(),
                created_at: row
                    .try_get::<Option<DateTime<Utc>>, _>("created_at")
                    .map_err(DomainError::from)?,
            });
        }
        Ok(logs)
    }
}
