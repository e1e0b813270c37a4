//! Coordinator middleware: entry path of every root transaction request.
//!
//! Fresh requests get a partition from their key-set, one pre-allocated
//! receiver timestamp per declared stage, and a Pending checkpoint persisted
//! atomically with the sender-clock advance. Recovery-injected requests
//! (executor context header present) skip all of that: the persisted context
//! is decoded, marked recovered, and handed straight to the handler under
//! the partition lock it originally drew.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

use crate::api::error_response;
use crate::coord::clock::allocate_timestamps;
use crate::coord::context::{
    ControlContext, ExecStatus, ExecutorContext, DEFAULT_LOGGER_ID, HEADER_CONTROL_CONTEXT,
    HEADER_EXECUTOR_CONTEXT, HEADER_LOGGER_ID,
};
use crate::coord::instrument::{TraceContext, TraceInfo};
use crate::coord::partition::PartitionKeys;
use crate::server::SharedState;

/// Body size cap when buffering root request bodies for key extraction.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Per-route coordinator parameters, attached as a route-layer extension:
/// the coordinating service's name and the declared receiver list
/// (element 0 is the commit stage).
#[derive(Debug, Clone)]
pub struct CoordinatorSpec {
    pub service: &'static str,
    pub receivers: &'static [&'static str],
}

impl CoordinatorSpec {
    pub fn new(service: &'static str, receivers: &'static [&'static str]) -> Self {
        Self { service, receivers }
    }
}

fn header_value(req: &Request, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// Coordinator middleware, generic over the root request body.
///
/// Apply per-route with `axum::middleware::from_fn_with_state` plus an
/// `Extension(CoordinatorSpec)` layer outside it.
pub async fn tx_coordinator<T>(
    State(state): State<SharedState>,
    req: Request,
    next: Next,
) -> Response
where
    T: PartitionKeys + DeserializeOwned + Serialize + Send + 'static,
{
    let Some(spec) = req.extensions().get::<CoordinatorSpec>().cloned() else {
        error!("coordinator route missing CoordinatorSpec extension");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "coordinator route is not wired",
        );
    };

    let logger_id = header_value(&req, HEADER_LOGGER_ID).unwrap_or_else(|| DEFAULT_LOGGER_ID.to_string());
    let trace = Arc::new(TraceContext::new());

    // Recovery short-circuit: the executor context rides in on the request.
    if let Some(encoded) = header_value(&req, HEADER_EXECUTOR_CONTEXT) {
        let mut exec_ctx = match ExecutorContext::decode(&encoded) {
            Ok(ctx) => ctx,
            Err(err) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("failed to decode tx executor context: {err}"),
                )
            }
        };
        exec_ctx.recovered = true;
        debug!(
            exec_id = exec_ctx.exec_id,
            status = ?exec_ctx.status,
            partition = exec_ctx.ctrl_ctx.partition,
            "recovery request"
        );

        let (mut parts, body) = req.into_parts();
        let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(err) => {
                return error_response(StatusCode::BAD_REQUEST, format!("failed to read body: {err}"))
            }
        };
        // validate the replayed body against the route's request shape
        if let Err(err) = serde_json::from_slice::<T>(&bytes) {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("failed to decode json: {err}"),
            );
        }

        let partition = exec_ctx.ctrl_ctx.partition;
        parts.extensions.insert(trace.clone());
        parts.extensions.insert(exec_ctx);
        let req = Request::from_parts(parts, Body::from(bytes));

        // Serialize against fresh allocations on the same partition for the
        // whole replay, as the original request did for its allocation.
        let _guard = state.tx_mgr.sender_partitions.lock(partition).await;
        return next.run(req).await;
    }

    // New request: build the control context.
    let mut ctrl_ctx = match header_value(&req, HEADER_CONTROL_CONTEXT) {
        Some(encoded) => match ControlContext::decode(&encoded) {
            Ok(ctx) => ctx,
            Err(err) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("failed to decode tx control context: {err}"),
                )
            }
        },
        None => ControlContext::default(),
    };
    ctrl_ctx.service = spec.service.to_string();
    ctrl_ctx.logger_id = logger_id;

    let (mut parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return error_response(StatusCode::BAD_REQUEST, format!("failed to read body: {err}"))
        }
    };
    let value: T = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(err) => {
            return error_response(StatusCode::BAD_REQUEST, format!("failed to decode json: {err}"))
        }
    };

    let keys = value.keys();
    let partition = state.tx_mgr.sender_partitions.partition(&keys);
    ctrl_ctx.partition = partition;

    let mut exec_ctx = ExecutorContext {
        ctrl_ctx,
        receivers: spec.receivers.iter().map(|r| r.to_string()).collect(),
        input: serde_json::to_value(&value).unwrap_or(Value::Null),
        status: ExecStatus::Pending,
        method: parts.method.to_string(),
        endpoint: format!("{}{}", state.self_url, parts.uri.path()),
        ..Default::default()
    };

    // Allocate receiver timestamps and persist the Pending checkpoint
    // atomically with the sender-clock advance, all under the partition
    // lock. In-memory clocks move only after the write lands, so they never
    // lead the persisted row.
    {
        let _guard = state.tx_mgr.sender_partitions.lock(partition).await;
        let (timestamps, advanced) =
            allocate_timestamps(&state.tx_mgr.sender_clocks, partition, &exec_ctx.receivers);
        exec_ctx.timestamps = timestamps;
        debug!(partition, clocks = ?advanced, "allocated stage timestamps");

        if let Err(err) = state
            .journal
            .open_executor(&mut exec_ctx, partition, &advanced)
            .await
        {
            error!(error = %err, "failed to persist tx executor");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to create tx executor: {err}"),
            );
        }
        for (service, timestamp) in advanced {
            state.tx_mgr.sender_clocks.set(partition, &service, timestamp);
        }
    }

    state.tx_mgr.instrumenter.visit_before(&TraceInfo {
        stage_ctx: None,
        exec_ctx: Some(&exec_ctx),
        trace: &trace,
    });

    parts.extensions.insert(trace.clone());
    parts.extensions.insert(exec_ctx.clone());
    let req = Request::from_parts(parts, Body::from(bytes));

    let response = next.run(req).await;

    state.tx_mgr.instrumenter.visit_after(&TraceInfo {
        stage_ctx: None,
        exec_ctx: Some(&exec_ctx),
        trace: &trace,
    });

    response
}
