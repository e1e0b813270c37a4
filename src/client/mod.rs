//! Typed peer client used by saga stages and tests.
//!
//! Every call attaches the stage context and logger-id headers. Non-2xx
//! responses come back as stage errors: recoverable by default, permanent
//! when the error envelope carries the unrecoverable sentinel. A 2xx
//! response with a `null` body is a dry-run no-op and surfaces as `None`.

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::api::ErrorResponse;
use crate::coord::context::{StageContext, HEADER_LOGGER_ID, HEADER_STAGE_CONTEXT};
use crate::coord::executor::StageError;

/// Default timeout for outbound stage and recovery calls.
pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Build the shared HTTP client used for stage and recovery traffic.
pub fn default_client() -> Client {
    Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .unwrap_or_default()
}

/// Issue one stage call.
///
/// Returns `Ok(Some(resp))` on a decodable 2xx, `Ok(None)` on a 2xx no-op
/// (dry-run miss at the participant), and a [`StageError`] otherwise.
pub async fn send_stage<Req, Resp>(
    client: &Client,
    method: Method,
    url: &str,
    stage_ctx: &StageContext,
    logger_id: &str,
    body: &Req,
) -> Result<Option<Resp>, StageError>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let response = client
        .request(method, url)
        .header(HEADER_STAGE_CONTEXT, stage_ctx.encode())
        .header(HEADER_LOGGER_ID, logger_id)
        .json(body)
        .send()
        .await
        .map_err(|err| StageError::Recoverable(format!("stage request failed: {err}")))?;

    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|err| StageError::Recoverable(format!("stage response read failed: {err}")))?;

    if !status.is_success() {
        return Err(stage_error(status, &bytes));
    }

    if bytes.is_empty() {
        return Ok(None);
    }
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Null) => Ok(None),
        Ok(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|err| StageError::Recoverable(format!("stage response decode failed: {err}"))),
        Err(err) => Err(StageError::Recoverable(format!(
            "stage response decode failed: {err}"
        ))),
    }
}

fn stage_error(status: StatusCode, body: &[u8]) -> StageError {
    match serde_json::from_slice::<ErrorResponse>(body) {
        Ok(envelope) if envelope.is_unrecoverable() => StageError::Unrecoverable,
        Ok(envelope) => StageError::Recoverable(format!(
            "stage rejected with {status}: {}",
            envelope.error_msg
        )),
        Err(_) => StageError::Recoverable(format!("stage rejected with {status}")),
    }
}
