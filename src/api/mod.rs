//! HTTP surface shared pieces: API identifiers, the error envelope, and
//! validated extractors.

pub mod event;
pub mod event_log;
pub mod tx;
pub mod user;

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Query, Request};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coord::context::StageContext;
use crate::coord::executor::UNRECOVERABLE_SENTINEL;
use crate::coord::instrument::TraceContext;
use crate::lifecycle::{LifeCycleError, TxHookContext, TxOutcome};
use crate::storage::domain::DomainError;

/// Operation identifiers the hook map is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Api {
    CreateUser,
    GetUser,
    AddUserHostEvent,
    RemoveUserHostEvent,
    CreateEvent,
    GetEvent,
    UpdateEvent,
    DeleteEvent,
    AddEventParticipant,
    RemoveEventParticipant,
    CreateEventLog,
    ListEventLogs,
}

/// All participant operations, for static hook registration.
pub const PARTICIPANT_APIS: &[Api] = &[
    Api::CreateUser,
    Api::GetUser,
    Api::AddUserHostEvent,
    Api::RemoveUserHostEvent,
    Api::CreateEvent,
    Api::GetEvent,
    Api::UpdateEvent,
    Api::DeleteEvent,
    Api::AddEventParticipant,
    Api::RemoveEventParticipant,
    Api::CreateEventLog,
    Api::ListEventLogs,
];

/// Uniform error body carried by every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_msg: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error_msg: msg.into(),
        }
    }

    /// Does this envelope carry the permanent-failure sentinel?
    pub fn is_unrecoverable(&self) -> bool {
        self.error_msg.contains(UNRECOVERABLE_SENTINEL)
    }
}

/// Build a JSON error response with the uniform envelope.
pub fn error_response(status: StatusCode, msg: impl std::fmt::Display) -> Response {
    (status, Json(ErrorResponse::new(msg.to_string()))).into_response()
}

/// Map a lifecycle failure onto the wire.
///
/// Handler failures inspect the domain error: not-found style failures are
/// flagged unrecoverable so the executor manager force-completes instead of
/// retrying forever. Everything else stays retryable infrastructure.
pub fn lifecycle_error_response(err: LifeCycleError) -> Response {
    if let LifeCycleError::Handler(source) = &err {
        if let Some(domain) = source.downcast_ref::<DomainError>() {
            if domain.is_unrecoverable() {
                return error_response(
                    StatusCode::NOT_FOUND,
                    format!("{UNRECOVERABLE_SENTINEL}: {domain}"),
                );
            }
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, domain);
        }
    }
    error_response(StatusCode::INTERNAL_SERVER_ERROR, err)
}

/// Optional stage context, set by the participant middleware on stage calls.
pub struct StageCtx(pub Option<StageContext>);

impl<S: Send + Sync> FromRequestParts<S> for StageCtx {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(StageCtx(parts.extensions.get::<StageContext>().cloned()))
    }
}

/// Per-request trace slot shared with the middleware and its recorders.
pub struct Trace(pub Arc<TraceContext>);

impl<S: Send + Sync> FromRequestParts<S> for Trace {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Trace(
            parts
                .extensions
                .get::<Arc<TraceContext>>()
                .cloned()
                .unwrap_or_default(),
        ))
    }
}

/// Build the hook context from the request's optional stage context and the
/// trace slot the participant middleware shares with us.
pub fn hook_ctx(stage_ctx: StageCtx, trace: Trace) -> Arc<TxHookContext> {
    TxHookContext::new(stage_ctx.0, trace.0)
}

/// Render a lifecycle outcome: fresh and cached results share the same
/// status; a dry-run miss answers a 200 no-op so the saga can proceed.
pub fn respond<R: Serialize>(status: StatusCode, outcome: TxOutcome<R>) -> Response {
    match outcome {
        TxOutcome::Executed(resp) => (status, Json(resp)).into_response(),
        TxOutcome::Cached(value) => (status, Json(value)).into_response(),
        TxOutcome::DryRun => (StatusCode::OK, Json(Value::Null)).into_response(),
    }
}

/// JSON body extractor whose rejection uses the uniform envelope.
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ValidatedJson(value)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> Response {
    error_response(
        StatusCode::BAD_REQUEST,
        format!("failed to decode json: {rejection}"),
    )
}

/// Query extractor whose rejection uses the uniform envelope.
pub struct ValidatedQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ValidatedQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(ValidatedQuery(value)),
            Err(rejection) => Err(query_rejection(rejection)),
        }
    }
}

fn query_rejection(rejection: QueryRejection) -> Response {
    error_response(
        StatusCode::BAD_REQUEST,
        format!("failed to decode query: {rejection}"),
    )
}
