//! Shared bootstrap helpers for the service binaries.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LOG_ENV_VAR;

/// Initialize tracing from the `TXWEAVE_LOG` environment variable.
///
/// Defaults to `info` when unset. Safe to call more than once; later calls
/// are no-ops.
pub fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
