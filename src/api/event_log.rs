//! Event-log service participant handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use serde::{Deserialize, Serialize};

use crate::server::SharedState;
use crate::storage::domain::{Event, EventLog, EventType};
use crate::storage::EventLogStore;

use super::{
    error_response, hook_ctx, lifecycle_error_response, respond, Api, StageCtx, Trace,
    ValidatedJson, ValidatedQuery,
};

fn log_store(state: &SharedState) -> Result<Arc<dyn EventLogStore>, Response> {
    state.event_logs.clone().ok_or_else(|| {
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "event log table not owned by this service",
        )
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestCreateEventLog {
    pub user_id: i64,
    pub event_id: i64,
    pub event_type: EventType,
    pub event: Event,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseCreateEventLog {
    pub log_id: i64,
}

pub async fn handle_create_log(
    State(state): State<SharedState>,
    stage_ctx: StageCtx,
    trace: Trace,
    ValidatedJson(req): ValidatedJson<RequestCreateEventLog>,
) -> Response {
    let store = match log_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    let outcome = state
        .lifecycle
        .start(Api::CreateEventLog, hook_ctx(stage_ctx, trace), async {
            let log = EventLog {
                log_id: 0,
                user_id: req.user_id,
                event_id: req.event_id,
                event_type: req.event_type,
                event: req.event.clone(),
                created_at: None,
            };
            let log_id = store.create_log(&log).await?;
            Ok::<_, crate::storage::domain::DomainError>(ResponseCreateEventLog { log_id })
        })
        .await;
    match outcome {
        Ok(outcome) => respond(StatusCode::CREATED, outcome),
        Err(err) => lifecycle_error_response(err),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestGetEventLogs {
    pub event_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseGetEventLogs {
    pub logs: Vec<EventLog>,
}

pub async fn handle_list_logs(
    State(state): State<SharedState>,
    stage_ctx: StageCtx,
    trace: Trace,
    ValidatedQuery(req): ValidatedQuery<RequestGetEventLogs>,
) -> Response {
    let store = match log_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    let outcome = state
        .lifecycle
        .start(Api::ListEventLogs, hook_ctx(stage_ctx, trace), async {
            let logs = store.list_logs(req.event_id).await?;
            Ok::<_, crate::storage::domain::DomainError>(ResponseGetEventLogs { logs })
        })
        .await;
    match outcome {
        Ok(outcome) => respond(StatusCode::OK, outcome),
        Err(err) => lifecycle_error_response(err),
    }
}
