//! Executor manager: drives sagas past their commit stage.
//!
//! Owns an unbounded mailbox. Each received executor is driven on its own
//! task: continuation stages execute and checkpoint one by one; a
//! recoverable error re-enqueues the executor after the schedule's delay; an
//! unrecoverable error flips it into force-complete, which is then driven to
//! Completed in place. Ordering across sagas is not this component's job;
//! the receiver-side origin manager serializes per (partition, service).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::context::ExecStatus;
use super::executor::{CheckpointFn, TxExecutor};

/// Retry schedule: maps the executor's retry count onto a sleep interval.
pub type RetryFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Same delay for every retry.
pub fn constant_retry(delay: Duration) -> RetryFn {
    Arc::new(move |_| delay)
}

/// `base * 2^(n-1)`, capped at `max`.
pub fn exponential_backoff_retry(base: Duration, max: Duration) -> RetryFn {
    Arc::new(move |retry_count| {
        let exp = retry_count.saturating_sub(1).min(31);
        base.saturating_mul(1u32 << exp).min(max)
    })
}

/// Checkpointer that persists nothing; used where durability is not wanted.
pub fn noop_checkpointer() -> CheckpointFn {
    Arc::new(|_| Box::pin(async { Ok(()) }))
}

/// Mailbox-driven saga driver.
pub struct TxExecutorManager {
    sender: mpsc::UnboundedSender<TxExecutor>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<TxExecutor>>>,
    retry: RetryFn,
}

impl TxExecutorManager {
    pub fn new(retry: RetryFn) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        Arc::new(Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            retry,
        })
    }

    /// Hand an executor to the manager. The executor must already be past
    /// `run()`, i.e. Committed or ForceComplete.
    pub fn send(&self, exec: TxExecutor) {
        if self.sender.send(exec).is_err() {
            warn!("executor manager mailbox closed; dropping executor");
        }
    }

    /// Start the dispatch loop. Call once; later calls are no-ops.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let mgr = self.clone();
        tokio::spawn(async move {
            let receiver = mgr.receiver.lock().await.take();
            let Some(mut receiver) = receiver else {
                warn!("executor manager already running");
                return;
            };
            while let Some(exec) = receiver.recv().await {
                let mgr = mgr.clone();
                tokio::spawn(async move {
                    mgr.drive(exec).await;
                });
            }
        })
    }

    /// Drive one executor as far as it can go in this cycle.
    async fn drive(self: Arc<Self>, mut exec: TxExecutor) {
        loop {
            if exec.status() == ExecStatus::ForceComplete {
                while exec.next() {
                    if let Err(err) = exec.force_complete().await {
                        debug!(exec_id = exec.context().exec_id, error = %err, "force-complete stage failed");
                        self.retry_later(exec).await;
                        return;
                    }
                    if let Err(err) = exec.checkpoint().await {
                        warn!(exec_id = exec.context().exec_id, error = %err, "checkpoint failed; retrying");
                        self.retry_later(exec).await;
                        return;
                    }
                    exec.reset_retry();
                }
            } else {
                while exec.next() {
                    match exec.execute().await {
                        Ok(()) => {
                            if let Err(err) = exec.checkpoint().await {
                                warn!(exec_id = exec.context().exec_id, error = %err, "checkpoint failed; retrying");
                                self.retry_later(exec).await;
                                return;
                            }
                            exec.reset_retry();
                        }
                        Err(err) if err.is_unrecoverable() => {
                            warn!(
                                exec_id = exec.context().exec_id,
                                curr = exec.context().curr,
                                "unrecoverable stage failure; forcing completion"
                            );
                            exec.set_status(ExecStatus::ForceComplete);
                            if let Err(err) = exec.checkpoint().await {
                                warn!(exec_id = exec.context().exec_id, error = %err, "checkpoint failed; retrying");
                                self.retry_later(exec).await;
                                return;
                            }
                            break;
                        }
                        Err(err) => {
                            debug!(exec_id = exec.context().exec_id, error = %err, "stage failed; retrying");
                            self.retry_later(exec).await;
                            return;
                        }
                    }
                }
                if exec.status() == ExecStatus::ForceComplete {
                    // resume under the force-complete branch
                    continue;
                }
            }

            exec.set_status(ExecStatus::Completed);
            if let Err(err) = exec.checkpoint().await {
                warn!(exec_id = exec.context().exec_id, error = %err, "checkpoint failed; retrying");
                self.retry_later(exec).await;
                return;
            }
            debug!(exec_id = exec.context().exec_id, "saga completed");
            return;
        }
    }

    async fn retry_later(&self, mut exec: TxExecutor) {
        exec.bump_retry();
        let delay = (self.retry)(exec.retry_count());
        tokio::time::sleep(delay).await;
        self.send(exec);
    }
}
