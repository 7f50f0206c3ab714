//! Error types shared by every taskflow component.

use std::any::Any;
use std::time::Duration;

use thiserror::Error;

/// Result alias used across the crate.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors produced by the worker pool, pipeline, signal and guard.
///
/// `Cancelled`, `DeadlineExceeded` and `Timeout` are expected outcomes of
/// cancellable operations. `Underflow` and `QueueClosed` indicate a broken
/// caller contract and should not be retried.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed concurrency, capacity or duration arguments.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A task or transform reported its own failure.
    #[error("task execution failed: {0}")]
    TaskExecutionFailure(String),

    /// Completion barrier received more `done()` calls than `add()`.
    #[error("completion barrier underflow: done() called with no outstanding work")]
    Underflow,

    /// The cancellation signal was cancelled explicitly.
    #[error("operation cancelled")]
    Cancelled,

    /// The cancellation signal's deadline elapsed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A timeout guard stopped waiting on its operation.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Enqueue or send attempted after the receiving side was closed.
    #[error("queue closed")]
    QueueClosed,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// True for the terminal outcomes of a cancellation signal.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, EngineError::Cancelled | EngineError::DeadlineExceeded)
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
