//! Event service participant handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use serde::{Deserialize, Serialize};

use crate::server::SharedState;
use crate::storage::domain::Event;
use crate::storage::EventStore;

use super::{
    error_response, hook_ctx, lifecycle_error_response, respond, Api, StageCtx, Trace,
    ValidatedJson, ValidatedQuery,
};

fn event_store(state: &SharedState) -> Result<Arc<dyn EventStore>, Response> {
    state.events.clone().ok_or_else(|| {
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "event table not owned by this service",
        )
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestCreateEvent {
    pub event: Event,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseCreateEvent {
    pub event_id: i64,
}

pub async fn handle_create_event(
    State(state): State<SharedState>,
    stage_ctx: StageCtx,
    trace: Trace,
    ValidatedJson(req): ValidatedJson<RequestCreateEvent>,
) -> Response {
    let store = match event_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    let outcome = state
        .lifecycle
        .start(Api::CreateEvent, hook_ctx(stage_ctx, trace), async {
            let event_id = store.create_event(&req.event).await?;
            Ok::<_, crate::storage::domain::DomainError>(ResponseCreateEvent { event_id })
        })
        .await;
    match outcome {
        Ok(outcome) => respond(StatusCode::CREATED, outcome),
        Err(err) => lifecycle_error_response(err),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestGetEvent {
    pub event_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseGetEvent {
    pub event: Event,
}

pub async fn handle_get_event(
    State(state): State<SharedState>,
    stage_ctx: StageCtx,
    trace: Trace,
    ValidatedQuery(req): ValidatedQuery<RequestGetEvent>,
) -> Response {
    let store = match event_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    let outcome = state
        .lifecycle
        .start(Api::GetEvent, hook_ctx(stage_ctx, trace), async {
            let event = store.get_event(req.event_id).await?;
            Ok::<_, crate::storage::domain::DomainError>(ResponseGetEvent { event })
        })
        .await;
    match outcome {
        Ok(outcome) => respond(StatusCode::OK, outcome),
        Err(err) => lifecycle_error_response(err),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestUpdateEvent {
    pub event: Event,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseUpdateEvent {}

pub async fn handle_update_event(
    State(state): State<SharedState>,
    stage_ctx: StageCtx,
    trace: Trace,
    ValidatedJson(req): ValidatedJson<RequestUpdateEvent>,
) -> Response {
    let store = match event_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    let outcome = state
        .lifecycle
        .start(Api::UpdateEvent, hook_ctx(stage_ctx, trace), async {
            store.update_event(&req.event).await?;
            Ok::<_, crate::storage::domain::DomainError>(ResponseUpdateEvent {})
        })
        .await;
    match outcome {
        Ok(outcome) => respond(StatusCode::OK, outcome),
        Err(err) => lifecycle_error_response(err),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDeleteEvent {
    pub event_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseDeleteEvent {
    pub event: Event,
}

pub async fn handle_delete_event(
    State(state): State<SharedState>,
    stage_ctx: StageCtx,
    trace: Trace,
    ValidatedJson(req): ValidatedJson<RequestDeleteEvent>,
) -> Response {
    let store = match event_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    let outcome = state
        .lifecycle
        .start(Api::DeleteEvent, hook_ctx(stage_ctx, trace), async {
            let event = store.delete_event(req.event_id).await?;
            Ok::<_, crate::storage::domain::DomainError>(ResponseDeleteEvent { event })
        })
        .await;
    match outcome {
        Ok(outcome) => respond(StatusCode::OK, outcome),
        Err(err) => lifecycle_error_response(err),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestAddEventParticipant {
    pub event_id: i64,
    pub participant_id: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseAddEventParticipant {}

pub async fn handle_add_participant(
    State(state): State<SharedState>,
    stage_ctx: StageCtx,
    trace: Trace,
    ValidatedJson(req): ValidatedJson<RequestAddEventParticipant>,
) -> Response {
    let store = match event_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    let outcome = state
        .lifecycle
        .start(Api::AddEventParticipant, hook_ctx(stage_ctx, trace), async {
            store.add_participant(req.event_id, req.participant_id).await?;
            Ok::<_, crate::storage::domain::DomainError>(ResponseAddEventParticipant {})
        })
        .await;
    match outcome {
        Ok(outcome) => respond(StatusCode::OK, outcome),
        Err(err) => lifecycle_error_response(err),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRemoveEventParticipant {
    pub event_id: i64,
    pub participant_id: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseRemoveEventParticipant {}

pub async fn handle_remove_participant(
    State(state): State<SharedState>,
    stage_ctx: StageCtx,
    trace: Trace,
    ValidatedJson(req): ValidatedJson<RequestRemoveEventParticipant>,
) -> Response {
    let store = match event_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    let outcome = state
        .lifecycle
        .start(
            Api::RemoveEventParticipant,
            hook_ctx(stage_ctx, trace),
            async {
                store
                    .remove_participant(req.event_id, req.participant_id)
                    .await?;
                Ok::<_, crate::storage::domain::DomainError>(ResponseRemoveEventParticipant {})
            },
        )
        .await;
    match outcome {
        Ok(outcome) => respond(StatusCode::OK, outcome),
        Err(err) => lifecycle_error_response(err),
    }
}
