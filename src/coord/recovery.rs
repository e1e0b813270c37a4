//! Crash recovery: reload clocks and re-drive every unfinished saga.
//!
//! Runs once the HTTP listener is accepting connections. Non-terminal
//! checkpoints are turned back into HTTP requests against their original
//! endpoint, carrying the executor context in a header; the coordinator
//! middleware recognizes the header and short-circuits into the recovery
//! path, so a re-driven saga flows through the exact same ingress as a
//! fresh one.

use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::{info, warn};

use crate::storage::{StorageError, TxJournal};

use super::clock::TxClockManager;
use super::context::{ExecutorContext, HEADER_EXECUTOR_CONTEXT, HEADER_LOGGER_ID};

/// Attempts per re-injected request before giving up.
const MAX_RECOVERY_ATTEMPTS: usize = 10;
/// Back-off bounds between attempts.
const RECOVERY_MIN_DELAY: Duration = Duration::from_millis(1);
const RECOVERY_MAX_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("failed to load recovery state: {0}")]
    Journal(#[from] StorageError),

    #[error("failed to marshal recovery request: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid recovery method: {0}")]
    Method(String),

    #[error("recovery request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("recovery request rejected with status {0}")]
    Status(u16),
}

/// Reloads clocks and re-injects non-terminal executors on boot.
pub struct TxRecoveryManager {
    journal: Arc<dyn TxJournal>,
    sender_clocks: Arc<TxClockManager>,
    receiver_clocks: Arc<TxClockManager>,
    client: reqwest::Client,
}

impl TxRecoveryManager {
    pub fn new(
        journal: Arc<dyn TxJournal>,
        sender_clocks: Arc<TxClockManager>,
        receiver_clocks: Arc<TxClockManager>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            journal,
            sender_clocks,
            receiver_clocks,
            client,
        }
    }

    /// Restore both clock sets, then spawn one re-injection worker per
    /// unfinished executor. Returns once the workers are launched.
    pub async fn recover(&self) -> Result<(), RecoveryError> {
        for entry in self.journal.sender_clocks().await? {
            self.sender_clocks
                .set(entry.partition, &entry.service, entry.timestamp);
        }
        for entry in self.journal.receiver_clocks().await? {
            self.receiver_clocks
                .set(entry.partition, &entry.service, entry.timestamp);
        }

        let checkpoints = self.journal.load_active_checkpoints().await?;
        info!(count = checkpoints.len(), "re-driving unfinished executors");

        for exec_ctx in checkpoints {
            let client = self.client.clone();
            tokio::spawn(async move {
                let exec_id = exec_ctx.exec_id;
                if let Err(err) = reinject(client, exec_ctx).await {
                    warn!(exec_id, error = %err, "recovery request gave up");
                }
            });
        }
        Ok(())
    }
}

/// Issue one recovery request with bounded, jittered back-off.
async fn reinject(client: reqwest::Client, exec_ctx: ExecutorContext) -> Result<(), RecoveryError> {
    let body = serde_json::to_vec(&exec_ctx.input)?;
    let method = reqwest::Method::from_bytes(exec_ctx.method.as_bytes())
        .map_err(|_| RecoveryError::Method(exec_ctx.method.clone()))?;
    let encoded = exec_ctx.encode();
    let logger_id = exec_ctx.ctrl_ctx.logger_id.clone();
    let endpoint = exec_ctx.endpoint.clone();

    let send = || {
        let client = client.clone();
        let method = method.clone();
        let endpoint = endpoint.clone();
        let encoded = encoded.clone();
        let logger_id = logger_id.clone();
        let body = body.clone();
        async move {
            let response = client
                .request(method, &endpoint)
                .header(HEADER_EXECUTOR_CONTEXT, encoded)
                .header(HEADER_LOGGER_ID, logger_id)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(RecoveryError::Status(response.status().as_u16()));
            }
            Ok(())
        }
    };

    send.retry(
        ExponentialBuilder::default()
            .with_min_delay(RECOVERY_MIN_DELAY)
            .with_max_delay(RECOVERY_MAX_DELAY)
            .with_max_times(MAX_RECOVERY_ATTEMPTS)
            .with_jitter(),
    )
    .await
}
