//! Logging setup shared by the binaries

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::Result;

/// Initialize tracing/logging.
///
/// `RUST_LOG` takes precedence over `log_level`; `verbose` forces debug.
pub fn init_tracing(log_level: &str, verbose: bool) -> Result<()> {
    let log_level = if verbose { "debug" } else { log_level };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}
