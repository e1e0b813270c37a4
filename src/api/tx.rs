//! Coordinator endpoints: each builds a saga whose stages are typed HTTP
//! calls to the participant services, runs the commit stage inline, and
//! hands the executor to the manager for the remaining stages.
//!
//! Also hosts the test/admin surface: fault-filter updates, origin-queue
//! advancement, and the executor-table truncate.

use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::client::send_stage;
use crate::config::{SERVICE_EVENT, SERVICE_EVENT_LOG, SERVICE_USER};
use crate::coord::context::{ExecStatus, ExecutorContext, StageContext};
use crate::coord::executor::{ExecError, StageError, TxExecutor, TxStage, UNRECOVERABLE_SENTINEL};
use crate::coord::origin::WaitMsg;
use crate::coord::partition::PartitionKeys;
use crate::server::SharedState;
use crate::storage::domain::{Event, EventType};
use crate::storage::journal_checkpointer;

use super::event::{
    RequestAddEventParticipant, RequestCreateEvent, RequestDeleteEvent,
    RequestRemoveEventParticipant, RequestUpdateEvent, ResponseCreateEvent, ResponseDeleteEvent,
};
use super::event_log::{RequestCreateEventLog, ResponseCreateEventLog};
use super::user::{RequestAddUserHostEvent, RequestRemoveUserHostEvent};
use super::{error_response, ValidatedJson};

/// Receiver lists per saga; element 0 is the commit stage.
pub const CREATE_EVENT_RECEIVERS: &[&str] = &[SERVICE_EVENT, SERVICE_EVENT_LOG, SERVICE_USER];
pub const UPDATE_EVENT_RECEIVERS: &[&str] = &[SERVICE_EVENT, SERVICE_EVENT_LOG];
pub const DELETE_EVENT_RECEIVERS: &[&str] = &[SERVICE_EVENT, SERVICE_EVENT_LOG, SERVICE_USER];
pub const JOIN_EVENT_RECEIVERS: &[&str] = &[SERVICE_EVENT, SERVICE_EVENT_LOG];
pub const LEAVE_EVENT_RECEIVERS: &[&str] = &[SERVICE_EVENT, SERVICE_EVENT_LOG];

fn parse_input<T: DeserializeOwned>(input: Value) -> Result<T, StageError> {
    serde_json::from_value(input)
        .map_err(|err| StageError::Recoverable(format!("stage input decode failed: {err}")))
}

fn peer_url(state: &SharedState, service: &str) -> Result<String, Response> {
    state.config.peers.url(service).map(str::to_string).ok_or_else(|| {
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("no peer address configured for service {service}"),
        )
    })
}

/// Run the commit stage inline, hand the rest to the manager, and surface
/// the commit result.
async fn run_saga(
    state: &SharedState,
    exec_ctx: ExecutorContext,
    commit: TxStage,
    stages: Vec<TxStage>,
) -> Result<Value, Response> {
    let mut executor =
        TxExecutor::new(exec_ctx, journal_checkpointer(state.journal.clone())).commit_stage(commit);
    for stage in stages {
        executor = executor.stage(stage);
    }

    let run_result = executor.run().await;
    if let Err(err) = executor.checkpoint().await {
        warn!(exec_id = executor.context().exec_id, error = %err, "post-commit checkpoint failed");
    }

    match run_result {
        Ok(result) => {
            state.tx_mgr.executors.send(executor);
            Ok(result)
        }
        Err(ExecError::Unrecoverable) => {
            // a recovered force-complete record: the manager finishes it,
            // the original client never gets a success for this attempt
            state.tx_mgr.executors.send(executor);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("{UNRECOVERABLE_SENTINEL}: tx is force completing"),
            ))
        }
        Err(err) => Err(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to execute tx: {err}"),
        )),
    }
}

/// Commit stage must dry-run when the request is a recovery replay of a
/// pre-commit crash, so the participant cache decides whether to re-execute.
fn commit_dry_run(exec_ctx: &ExecutorContext) -> bool {
    exec_ctx.recovered && exec_ctx.status == ExecStatus::Pending
}

// ---------------------------------------------------------------------------
// create-event
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestTxCreateEvent {
    pub user_id: i64,
    pub event_name: String,
    pub event_info: String,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub location: String,
    pub participants: Vec<i64>,
}

impl PartitionKeys for RequestTxCreateEvent {
    fn keys(&self) -> Vec<Value> {
        vec![Value::from(self.user_id)]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseTxCreateEvent {
    pub event_id: i64,
}

/// Threaded saga state: the request plus the id the commit stage assigned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct TxCreateEventState {
    user_id: i64,
    event_name: String,
    event_info: String,
    start_at: Option<DateTime<Utc>>,
    end_at: Option<DateTime<Utc>>,
    location: String,
    participants: Vec<i64>,
    event_id: i64,
}

impl TxCreateEventState {
    fn event(&self) -> Event {
        Event {
            event_id: self.event_id,
            event_name: self.event_name.clone(),
            event_info: self.event_info.clone(),
            host_id: self.user_id,
            start_at: self.start_at,
            end_at: self.end_at,
            location: self.location.clone(),
            participants: self.participants.clone(),
        }
    }
}

fn create_event_stage(
    client: reqwest::Client,
    base_url: String,
    stage_ctx: StageContext,
    logger_id: String,
) -> TxStage {
    TxStage::new()
        .run(move |input| {
            let client = client.clone();
            let url = format!("{base_url}/api/v1/events");
            let stage_ctx = stage_ctx.clone();
            let logger_id = logger_id.clone();
            async move {
                let mut saga: TxCreateEventState = parse_input(input)?;
                let resp: Option<ResponseCreateEvent> = send_stage(
                    &client,
                    Method::POST,
                    &url,
                    &stage_ctx,
                    &logger_id,
                    &RequestCreateEvent {
                        event: saga.event(),
                    },
                )
                .await?;
                if let Some(resp) = &resp {
                    saga.event_id = resp.event_id;
                }
                Ok((
                    serde_json::to_value(&resp).unwrap_or(Value::Null),
                    serde_json::to_value(&saga).unwrap_or(Value::Null),
                ))
            }
        })
        .complete(|input| async move { Ok(input) })
}

fn create_event_log_stage(
    client: reqwest::Client,
    base_url: String,
    stage_ctx: StageContext,
    logger_id: String,
    event_type: EventType,
) -> TxStage {
    TxStage::new()
        .run(move |input| {
            let client = client.clone();
            let url = format!("{base_url}/api/v1/event-logs");
            let stage_ctx = stage_ctx.clone();
            let logger_id = logger_id.clone();
            async move {
                let saga: TxCreateEventState = parse_input(input.clone())?;
                let resp: Option<ResponseCreateEventLog> = send_stage(
                    &client,
                    Method::POST,
                    &url,
                    &stage_ctx,
                    &logger_id,
                    &RequestCreateEventLog {
                        user_id: saga.user_id,
                        event_id: saga.event_id,
                        event_type,
                        event: saga.event(),
                    },
                )
                .await?;
                Ok((serde_json::to_value(&resp).unwrap_or(Value::Null), input))
            }
        })
        .complete(|input| async move { Ok(input) })
}

fn add_host_event_stage(
    client: reqwest::Client,
    base_url: String,
    stage_ctx: StageContext,
    logger_id: String,
) -> TxStage {
    TxStage::new()
        .run(move |input| {
            let client = client.clone();
            let url = format!("{base_url}/api/v1/users/host-events/add");
            let stage_ctx = stage_ctx.clone();
            let logger_id = logger_id.clone();
            async move {
                let saga: TxCreateEventState = parse_input(input.clone())?;
                let resp: Option<Value> = send_stage(
                    &client,
                    Method::PUT,
                    &url,
                    &stage_ctx,
                    &logger_id,
                    &RequestAddUserHostEvent {
                        user_id: saga.user_id,
                        event_id: saga.event_id,
                    },
                )
                .await?;
                Ok((resp.unwrap_or(Value::Null), input))
            }
        })
        .complete(|input| async move { Ok(input) })
}

pub async fn handle_tx_create_event(
    State(state): State<SharedState>,
    Extension(exec_ctx): Extension<ExecutorContext>,
) -> Response {
    let event_url = match peer_url(&state, SERVICE_EVENT) {
        Ok(url) => url,
        Err(resp) => return resp,
    };
    let log_url = match peer_url(&state, SERVICE_EVENT_LOG) {
        Ok(url) => url,
        Err(resp) => return resp,
    };
    let user_url = match peer_url(&state, SERVICE_USER) {
        Ok(url) => url,
        Err(resp) => return resp,
    };

    let logger_id = exec_ctx.ctrl_ctx.logger_id.clone();
    let commit = create_event_stage(
        state.client.clone(),
        event_url,
        exec_ctx.stage_context(0, commit_dry_run(&exec_ctx)),
        logger_id.clone(),
    );
    let log_stage = create_event_log_stage(
        state.client.clone(),
        log_url,
        exec_ctx.stage_context(1, false),
        logger_id.clone(),
        EventType::EventCreate,
    );
    let host_stage = add_host_event_stage(
        state.client.clone(),
        user_url,
        exec_ctx.stage_context(2, false),
        logger_id,
    );

    match run_saga(&state, exec_ctx, commit, vec![log_stage, host_stage]).await {
        Ok(result) => {
            let event_id = serde_json::from_value::<Option<ResponseCreateEvent>>(result)
                .ok()
                .flatten()
                .map(|resp| resp.event_id)
                .unwrap_or(0);
            (StatusCode::CREATED, Json(ResponseTxCreateEvent { event_id })).into_response()
        }
        Err(resp) => resp,
    }
}

// ---------------------------------------------------------------------------
// update-event
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestTxUpdateEvent {
    pub user_id: i64,
    pub event_id: i64,
    pub event_name: String,
    pub event_info: String,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub location: String,
}

impl PartitionKeys for RequestTxUpdateEvent {
    fn keys(&self) -> Vec<Value> {
        vec![Value::from(self.user_id)]
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseTxUpdateEvent {}

impl RequestTxUpdateEvent {
    fn event(&self) -> Event {
        Event {
            event_id: self.event_id,
            event_name: self.event_name.clone(),
            event_info: self.event_info.clone(),
            host_id: self.user_id,
            start_at: self.start_at,
            end_at: self.end_at,
            location: self.location.clone(),
            participants: Vec::new(),
        }
    }
}

fn update_event_stage(
    client: reqwest::Client,
    base_url: String,
    stage_ctx: StageContext,
    logger_id: String,
) -> TxStage {
    TxStage::new()
        .run(move |input| {
            let client = client.clone();
            let url = format!("{base_url}/api/v1/events");
            let stage_ctx = stage_ctx.clone();
            let logger_id = logger_id.clone();
            async move {
                let saga: RequestTxUpdateEvent = parse_input(input.clone())?;
                let resp: Option<Value> = send_stage(
                    &client,
                    Method::PUT,
                    &url,
                    &stage_ctx,
                    &logger_id,
                    &RequestUpdateEvent {
                        event: saga.event(),
                    },
                )
                .await?;
                Ok((resp.unwrap_or(Value::Null), input))
            }
        })
        .complete(|input| async move { Ok(input) })
}

fn update_event_log_stage(
    client: reqwest::Client,
    base_url: String,
    stage_ctx: StageContext,
    logger_id: String,
    event_type: EventType,
) -> TxStage {
    TxStage::new()
        .run(move |input| {
            let client = client.clone();
            let url = format!("{base_url}/api/v1/event-logs");
            let stage_ctx = stage_ctx.clone();
            let logger_id = logger_id.clone();
            async move {
                let saga: RequestTxUpdateEvent = parse_input(input.clone())?;
                let resp: Option<ResponseCreateEventLog> = send_stage(
                    &client,
                    Method::POST,
                    &url,
                    &stage_ctx,
                    &logger_id,
                    &RequestCreateEventLog {
                        user_id: saga.user_id,
                        event_id: saga.event_id,
                        event_type,
                        event: saga.event(),
                    },
                )
                .await?;
                Ok((serde_json::to_value(&resp).unwrap_or(Value::Null), input))
            }
        })
        .complete(|input| async move { Ok(input) })
}

pub async fn handle_tx_update_event(
    State(state): State<SharedState>,
    Extension(exec_ctx): Extension<ExecutorContext>,
) -> Response {
    let event_url = match peer_url(&state, SERVICE_EVENT) {
        Ok(url) => url,
        Err(resp) => return resp,
    };
    let log_url = match peer_url(&state, SERVICE_EVENT_LOG) {
        Ok(url) => url,
        Err(resp) => return resp,
    };

    let logger_id = exec_ctx.ctrl_ctx.logger_id.clone();
    let commit = update_event_stage(
        state.client.clone(),
        event_url,
        exec_ctx.stage_context(0, commit_dry_run(&exec_ctx)),
        logger_id.clone(),
    );
    let log_stage = update_event_log_stage(
        state.client.clone(),
        log_url,
        exec_ctx.stage_context(1, false),
        logger_id,
        EventType::EventUpdate,
    );

    match run_saga(&state, exec_ctx, commit, vec![log_stage]).await {
        Ok(_) => (StatusCode::OK, Json(ResponseTxUpdateEvent {})).into_response(),
        Err(resp) => resp,
    }
}

// ---------------------------------------------------------------------------
// delete-event
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestTxDeleteEvent {
    pub user_id: i64,
    pub event_id: i64,
}

impl PartitionKeys for RequestTxDeleteEvent {
    fn keys(&self) -> Vec<Value> {
        vec![Value::from(self.user_id)]
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseTxDeleteEvent {}

/// Threaded saga state: the request plus the deleted row for the log stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct TxDeleteEventState {
    user_id: i64,
    event_id: i64,
    event: Event,
}

fn delete_event_stage(
    client: reqwest::Client,
    base_url: String,
    stage_ctx: StageContext,
    logger_id: String,
) -> TxStage {
    TxStage::new()
        .run(move |input| {
            let client = client.clone();
            let url = format!("{base_url}/api/v1/events");
            let stage_ctx = stage_ctx.clone();
            let logger_id = logger_id.clone();
            async move {
                let mut saga: TxDeleteEventState = parse_input(input)?;
                let resp: Option<ResponseDeleteEvent> = send_stage(
                    &client,
                    Method::DELETE,
                    &url,
                    &stage_ctx,
                    &logger_id,
                    &RequestDeleteEvent {
                        event_id: saga.event_id,
                    },
                )
                .await?;
                if let Some(resp) = &resp {
                    saga.event = resp.event.clone();
                }
                Ok((
                    serde_json::to_value(&resp).unwrap_or(Value::Null),
                    serde_json::to_value(&saga).unwrap_or(Value::Null),
                ))
            }
        })
        .complete(|input| async move { Ok(input) })
}

fn delete_event_log_stage(
    client: reqwest::Client,
    base_url: String,
    stage_ctx: StageContext,
    logger_id: String,
) -> TxStage {
    TxStage::new()
        .run(move |input| {
            let client = client.clone();
            let url = format!("{base_url}/api/v1/event-logs");
            let stage_ctx = stage_ctx.clone();
            let logger_id = logger_id.clone();
            async move {
                let saga: TxDeleteEventState = parse_input(input.clone())?;
                let resp: Option<ResponseCreateEventLog> = send_stage(
                    &client,
                    Method::POST,
                    &url,
                    &stage_ctx,
                    &logger_id,
                    &RequestCreateEventLog {
                        user_id: saga.user_id,
                        event_id: saga.event_id,
                        event_type: EventType::EventDelete,
                        event: saga.event.clone(),
                    },
                )
                .await?;
                Ok((serde_json::to_value(&resp).unwrap_or(Value::Null), input))
            }
        })
        .complete(|input| async move { Ok(input) })
}

fn remove_host_event_stage(
    client: reqwest::Client,
    base_url: String,
    stage_ctx: StageContext,
    logger_id: String,
) -> TxStage {
    TxStage::new()
        .run(move |input| {
            let client = client.clone();
            let url = format!("{base_url}/api/v1/users/host-events/remove");
            let stage_ctx = stage_ctx.clone();
            let logger_id = logger_id.clone();
            async move {
                let saga: TxDeleteEventState = parse_input(input.clone())?;
                let resp: Option<Value> = send_stage(
                    &client,
                    Method::PUT,
                    &url,
                    &stage_ctx,
                    &logger_id,
                    &RequestRemoveUserHostEvent {
                        user_id: saga.user_id,
                        event_id: saga.event_id,
                    },
                )
                .await?;
                Ok((resp.unwrap_or(Value::Null), input))
            }
        })
        .complete(|input| async move { Ok(input) })
}

pub async fn handle_tx_delete_event(
    State(state): State<SharedState>,
    Extension(exec_ctx): Extension<ExecutorContext>,
) -> Response {
    let event_url = match peer_url(&state, SERVICE_EVENT) {
        Ok(url) => url,
        Err(resp) => return resp,
    };
    let log_url = match peer_url(&state, SERVICE_EVENT_LOG) {
        Ok(url) => url,
        Err(resp) => return resp,
    };
    let user_url = match peer_url(&state, SERVICE_USER) {
        Ok(url) => url,
        Err(resp) => return resp,
    };

    let logger_id = exec_ctx.ctrl_ctx.logger_id.clone();
    let commit = delete_event_stage(
        state.client.clone(),
        event_url,
        exec_ctx.stage_context(0, commit_dry_run(&exec_ctx)),
        logger_id.clone(),
    );
    let log_stage = delete_event_log_stage(
        state.client.clone(),
        log_url,
        exec_ctx.stage_context(1, false),
        logger_id.clone(),
    );
    let host_stage = remove_host_event_stage(
        state.client.clone(),
        user_url,
        exec_ctx.stage_context(2, false),
        logger_id,
    );

    match run_saga(&state, exec_ctx, commit, vec![log_stage, host_stage]).await {
        Ok(_) => (StatusCode::OK, Json(ResponseTxDeleteEvent {})).into_response(),
        Err(resp) => resp,
    }
}

// ---------------------------------------------------------------------------
// join-event / leave-event
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestTxJoinEvent {
    pub event_id: i64,
    pub host_id: i64,
    pub participant_id: i64,
}

impl PartitionKeys for RequestTxJoinEvent {
    fn keys(&self) -> Vec<Value> {
        vec![Value::from(self.host_id)]
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseTxJoinEvent {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestTxLeaveEvent {
    pub event_id: i64,
    pub host_id: i64,
    pub participant_id: i64,
}

impl PartitionKeys for RequestTxLeaveEvent {
    fn keys(&self) -> Vec<Value> {
        vec![Value::from(self.host_id)]
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseTxLeaveEvent {}

fn membership_stage(
    client: reqwest::Client,
    base_url: String,
    stage_ctx: StageContext,
    logger_id: String,
    join: bool,
) -> TxStage {
    TxStage::new()
        .run(move |input| {
            let client = client.clone();
            let path = if join {
                "/api/v1/events/participants/add"
            } else {
                "/api/v1/events/participants/remove"
            };
            let url = format!("{base_url}{path}");
            let stage_ctx = stage_ctx.clone();
            let logger_id = logger_id.clone();
            async move {
                let saga: RequestTxJoinEvent = parse_input(input.clone())?;
                let resp: Option<Value> = if join {
                    send_stage(
                        &client,
                        Method::PUT,
                        &url,
                        &stage_ctx,
                        &logger_id,
                        &RequestAddEventParticipant {
                            event_id: saga.event_id,
                            participant_id: saga.participant_id,
                        },
                    )
                    .await?
                } else {
                    send_stage(
                        &client,
                        Method::PUT,
                        &url,
                        &stage_ctx,
                        &logger_id,
                        &RequestRemoveEventParticipant {
                            event_id: saga.event_id,
                            participant_id: saga.participant_id,
                        },
                    )
                    .await?
                };
                Ok((resp.unwrap_or(Value::Null), input))
            }
        })
        .complete(|input| async move { Ok(input) })
}

fn membership_log_stage(
    client: reqwest::Client,
    base_url: String,
    stage_ctx: StageContext,
    logger_id: String,
    event_type: EventType,
) -> TxStage {
    TxStage::new()
        .run(move |input| {
            let client = client.clone();
            let url = format!("{base_url}/api/v1/event-logs");
            let stage_ctx = stage_ctx.clone();
            let logger_id = logger_id.clone();
            async move {
                let saga: RequestTxJoinEvent = parse_input(input.clone())?;
                let resp: Option<ResponseCreateEventLog> = send_stage(
                    &client,
                    Method::POST,
                    &url,
                    &stage_ctx,
                    &logger_id,
                    &RequestCreateEventLog {
                        user_id: saga.participant_id,
                        event_id: saga.event_id,
                        event_type,
                        event: Event {
                            event_id: saga.event_id,
                            host_id: saga.host_id,
                            ..Default::default()
                        },
                    },
                )
                .await?;
                Ok((serde_json::to_value(&resp).unwrap_or(Value::Null), input))
            }
        })
        .complete(|input| async move { Ok(input) })
}

async fn handle_membership_tx(
    state: SharedState,
    exec_ctx: ExecutorContext,
    join: bool,
) -> Result<(), Response> {
    let event_url = peer_url(&state, SERVICE_EVENT)?;
    let log_url = peer_url(&state, SERVICE_EVENT_LOG)?;

    let logger_id = exec_ctx.ctrl_ctx.logger_id.clone();
    let commit = membership_stage(
        state.client.clone(),
        event_url,
        exec_ctx.stage_context(0, commit_dry_run(&exec_ctx)),
        logger_id.clone(),
        join,
    );
    let log_stage = membership_log_stage(
        state.client.clone(),
        log_url,
        exec_ctx.stage_context(1, false),
        logger_id,
        if join {
            EventType::EventJoin
        } else {
            EventType::EventLeave
        },
    );

    run_saga(&state, exec_ctx, commit, vec![log_stage])
        .await
        .map(|_| ())
}

pub async fn handle_tx_join_event(
    State(state): State<SharedState>,
    Extension(exec_ctx): Extension<ExecutorContext>,
) -> Response {
    match handle_membership_tx(state, exec_ctx, true).await {
        Ok(()) => (StatusCode::OK, Json(ResponseTxJoinEvent {})).into_response(),
        Err(resp) => resp,
    }
}

pub async fn handle_tx_leave_event(
    State(state): State<SharedState>,
    Extension(exec_ctx): Extension<ExecutorContext>,
) -> Response {
    match handle_membership_tx(state, exec_ctx, false).await {
        Ok(()) => (StatusCode::OK, Json(ResponseTxLeaveEvent {})).into_response(),
        Err(resp) => resp,
    }
}

// ---------------------------------------------------------------------------
// test/admin surface
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxFilterType {
    #[serde(rename = "filter-request")]
    Request,
    #[serde(rename = "filter-response")]
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxFilterOp {
    #[serde(rename = "filter-add")]
    Add,
    #[serde(rename = "filter-remove")]
    Remove,
    #[serde(rename = "filter-clear")]
    Clear,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestUpdateTxFilter {
    pub filter_type: TxFilterType,
    pub filter_op: TxFilterOp,
    pub partition: u64,
    pub service: String,
    #[serde(default)]
    pub attrs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseUpdateTxFilter {}

pub async fn handle_update_filter(
    State(state): State<SharedState>,
    ValidatedJson(req): ValidatedJson<RequestUpdateTxFilter>,
) -> Response {
    let filters = &state.tx_mgr.filters;
    match (req.filter_type, req.filter_op) {
        (TxFilterType::Request, TxFilterOp::Add) => {
            filters.add_request_filter(req.partition, &req.service, &req.attrs)
        }
        (TxFilterType::Request, TxFilterOp::Remove) => {
            filters.remove_request_filter(req.partition, &req.service, &req.attrs)
        }
        (TxFilterType::Request, TxFilterOp::Clear) => {
            filters.clear_request_filter(req.partition, &req.service)
        }
        (TxFilterType::Response, TxFilterOp::Add) => {
            filters.add_response_filter(req.partition, &req.service, &req.attrs)
        }
        (TxFilterType::Response, TxFilterOp::Remove) => {
            filters.remove_response_filter(req.partition, &req.service, &req.attrs)
        }
        (TxFilterType::Response, TxFilterOp::Clear) => {
            filters.clear_response_filter(req.partition, &req.service)
        }
    }
    (StatusCode::OK, Json(ResponseUpdateTxFilter {})).into_response()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestAdvanceTxTimestamp {
    pub partition: u64,
    pub service: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseAdvanceTxTimestamp {}

/// Claim and immediately release one origin-queue slot; used by tests to
/// advance a receiver clock past a gap.
pub async fn handle_advance_timestamp(
    State(state): State<SharedState>,
    ValidatedJson(req): ValidatedJson<RequestAdvanceTxTimestamp>,
) -> Response {
    let origin = &state.tx_mgr.origin;
    let acquired = origin
        .acquire(WaitMsg::new(req.partition, req.service.clone(), req.timestamp))
        .await;
    if acquired {
        origin.release(req.partition, &req.service).await;
    }
    (StatusCode::OK, Json(ResponseAdvanceTxTimestamp {})).into_response()
}

/// Drop every executor checkpoint. Test utility.
pub async fn handle_clear_executors(State(state): State<SharedState>) -> Response {
    match state.journal.clear_checkpoints().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to clear executors: {err}"),
        ),
    }
}
