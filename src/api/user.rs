//! User service participant handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use serde::{Deserialize, Serialize};

use crate::server::SharedState;
use crate::storage::domain::User;
use crate::storage::UserStore;

use super::{
    error_response, hook_ctx, lifecycle_error_response, respond, Api, StageCtx, Trace,
    ValidatedJson, ValidatedQuery,
};

fn user_store(state: &SharedState) -> Result<Arc<dyn UserStore>, Response> {
    state.users.clone().ok_or_else(|| {
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "user table not owned by this service",
        )
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestCreateUser {
    pub user: User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseCreateUser {
    pub user_id: i64,
}

pub async fn handle_create_user(
    State(state): State<SharedState>,
    stage_ctx: StageCtx,
    trace: Trace,
    ValidatedJson(req): ValidatedJson<RequestCreateUser>,
) -> Response {
    let store = match user_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    let outcome = state
        .lifecycle
        .start(Api::CreateUser, hook_ctx(stage_ctx, trace), async {
            let user_id = store.create_user(&req.user).await?;
            Ok::<_, crate::storage::domain::DomainError>(ResponseCreateUser { user_id })
        })
        .await;
    match outcome {
        Ok(outcome) => respond(StatusCode::CREATED, outcome),
        Err(err) => lifecycle_error_response(err),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestGetUser {
    pub user_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseGetUser {
    pub user: User,
}

pub async fn handle_get_user(
    State(state): State<SharedState>,
    stage_ctx: StageCtx,
    trace: Trace,
    ValidatedQuery(req): ValidatedQuery<RequestGetUser>,
) -> Response {
    let store = match user_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    let outcome = state
        .lifecycle
        .start(Api::GetUser, hook_ctx(stage_ctx, trace), async {
            let user = store.get_user(req.user_id).await?;
            Ok::<_, crate::storage::domain::DomainError>(ResponseGetUser { user })
        })
        .await;
    match outcome {
        Ok(outcome) => respond(StatusCode::OK, outcome),
        Err(err) => lifecycle_error_response(err),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestAddUserHostEvent {
    pub user_id: i64,
    pub event_id: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseAddUserHostEvent {}

pub async fn handle_add_host_event(
    State(state): State<SharedState>,
    stage_ctx: StageCtx,
    trace: Trace,
    ValidatedJson(req): ValidatedJson<RequestAddUserHostEvent>,
) -> Response {
    let store = match user_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    let outcome = state
        .lifecycle
        .start(Api::AddUserHostEvent, hook_ctx(stage_ctx, trace), async {
            store.add_host_event(req.user_id, req.event_id).await?;
            Ok::<_, crate::storage::domain::DomainError>(ResponseAddUserHostEvent {})
        })
        .await;
    match outcome {
        Ok(outcome) => respond(StatusCode::OK, outcome),
        Err(err) => lifecycle_error_response(err),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRemoveUserHostEvent {
    pub user_id: i64,
    pub event_id: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseRemoveUserHostEvent {}

pub async fn handle_remove_host_event(
    State(state): State<SharedState>,
    stage_ctx: StageCtx,
    trace: Trace,
    ValidatedJson(req): ValidatedJson<RequestRemoveUserHostEvent>,
) -> Response {
    let store = match user_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    let outcome = state
        .lifecycle
        .start(Api::RemoveUserHostEvent, hook_ctx(stage_ctx, trace), async {
            store.remove_host_event(req.user_id, req.event_id).await?;
            Ok::<_, crate::storage::domain::DomainError>(ResponseRemoveUserHostEvent {})
        })
        .await;
    match outcome {
        Ok(outcome) => respond(StatusCode::OK, outcome),
        Err(err) => lifecycle_error_response(err),
    }
}
