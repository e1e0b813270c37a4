//! Participant middleware: entry path of every stage request.
//!
//! Gated entirely on the stage context header; plain requests pass straight
//! through. Stage requests consult the fault filter, then claim their
//! origin-queue slot so handlers run in strictly increasing timestamp order
//! per (partition, origin service). Stale timestamps skip the queue but
//! still reach the handler, where the dedup cache answers them.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, warn};

use crate::api::error_response;
use crate::coord::context::{
    StageContext, DEFAULT_LOGGER_ID, HEADER_LOGGER_ID, HEADER_STAGE_CONTEXT,
};
use crate::coord::instrument::{TraceContext, TraceInfo};
use crate::coord::origin::WaitMsg;
use crate::server::SharedState;

pub async fn tx_participant(
    State(state): State<SharedState>,
    mut req: Request,
    next: Next,
) -> Response {
    let trace = Arc::new(TraceContext::new());
    req.extensions_mut().insert(trace.clone());

    let logger_id = req
        .headers()
        .get(HEADER_LOGGER_ID)
        .and_then(|value| value.to_str().ok())
        .unwrap_or(DEFAULT_LOGGER_ID)
        .to_owned();

    let encoded = req
        .headers()
        .get(HEADER_STAGE_CONTEXT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    // Not a stage call; ordinary request path.
    let Some(encoded) = encoded else {
        return next.run(req).await;
    };

    let stage_ctx = match StageContext::decode(&encoded) {
        Ok(ctx) => ctx,
        Err(err) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("failed to decode tx stage context: {err}"),
            )
        }
    };
    debug!(
        logger_id = %logger_id,
        partition = stage_ctx.partition,
        origin = %stage_ctx.service,
        timestamp = stage_ctx.timestamp,
        dry_run = stage_ctx.dry_run,
        "stage request"
    );

    let filters = &state.tx_mgr.filters;
    let drop_request = filters.drop_request(stage_ctx.partition, &stage_ctx.service, &stage_ctx.attrs);
    let drop_response =
        filters.drop_response(stage_ctx.partition, &stage_ctx.service, &stage_ctx.attrs);

    if drop_request {
        warn!(
            partition = stage_ctx.partition,
            origin = %stage_ctx.service,
            "tx request dropped by filter"
        );
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "tx request is dropped");
    }

    req.extensions_mut().insert(stage_ctx.clone());

    // Claim this request's slot. A stale timestamp (already applied) gets
    // no slot and no release; the handler still runs so the dedup cache can
    // short-circuit it.
    let origin = &state.tx_mgr.origin;
    let acquired = origin
        .acquire(WaitMsg::new(
            stage_ctx.partition,
            stage_ctx.service.clone(),
            stage_ctx.timestamp,
        ))
        .await;
    if !acquired {
        debug!(
            partition = stage_ctx.partition,
            timestamp = stage_ctx.timestamp,
            "stale stage timestamp; deferring to dedup cache"
        );
    }

    state.tx_mgr.instrumenter.visit_before(&TraceInfo {
        stage_ctx: Some(&stage_ctx),
        exec_ctx: None,
        trace: &trace,
    });

    let response = next.run(req).await;

    state.tx_mgr.instrumenter.visit_after(&TraceInfo {
        stage_ctx: Some(&stage_ctx),
        exec_ctx: None,
        trace: &trace,
    });

    if acquired {
        origin.release(stage_ctx.partition, &stage_ctx.service).await;
        let applied = state
            .tx_mgr
            .receiver_clocks
            .get(stage_ctx.partition, &stage_ctx.service);
        if let Err(err) = state
            .journal
            .save_receiver_clock(stage_ctx.partition, &stage_ctx.service, applied)
            .await
        {
            warn!(error = %err, "failed to persist receiver clock");
        }
    }

    if drop_response {
        warn!(
            partition = stage_ctx.partition,
            origin = %stage_ctx.service,
            "tx response dropped by filter"
        );
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "tx response is dropped");
    }

    response
}
