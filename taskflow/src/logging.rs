//! Tracing subscriber setup.
//!
//! The library only emits `tracing` events. Binaries (or tests) decide where
//! they go by calling one of the init functions below once at startup.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::{EngineError, EngineResult};

const DEFAULT_FILTER: &str = "info";
const LOG_FILE_PREFIX: &str = "taskflow.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a stderr subscriber filtered by `RUST_LOG` (default `info`).
pub fn init_logging() -> EngineResult<()> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .try_init()
        .map_err(|e| EngineError::Internal(format!("failed to install subscriber: {}", e)))
}

/// Install a subscriber that writes to stderr and to a daily-rotated file
/// under `log_dir`.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// lifetime of the process.
pub fn init_logging_to(log_dir: &Path) -> EngineResult<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;

    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()
        .map_err(|e| EngineError::Internal(format!("failed to install subscriber: {}", e)))?;

    tracing::debug!(log_dir = %log_dir.display(), "file logging enabled");
    Ok(guard)
}
