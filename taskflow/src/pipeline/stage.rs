//! Stage definition for the staged pipeline.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::transform::{MapFn, Transform, TryMapFn};
use crate::error::EngineResult;

/// One named step of a pipeline.
///
/// Each stage runs in its own tokio task with exactly one upstream and one
/// downstream link.
pub struct Stage<T: Send + 'static> {
    pub(crate) name: String,
    pub(crate) transform: Arc<dyn Transform<T>>,
    pub(crate) timeout: Option<Duration>,
}

impl<T: Send + 'static> Clone for Stage<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            transform: Arc::clone(&self.transform),
            timeout: self.timeout,
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Stage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<T: Send + 'static> Stage<T> {
    /// Create a stage from an async transform.
    pub fn new(name: impl Into<String>, transform: impl Transform<T> + 'static) -> Self {
        Self {
            name: name.into(),
            transform: Arc::new(transform),
            timeout: None,
        }
    }

    /// Create a stage from an infallible closure.
    pub fn map<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        Self::new(name, MapFn(f))
    }

    /// Create a stage from a fallible closure.
    pub fn try_map<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(T) -> EngineResult<T> + Send + Sync + 'static,
    {
        Self::new(name, TryMapFn(f))
    }

    /// Bound every transform call of this stage by `timeout`.
    ///
    /// A value whose transform overruns is dropped and counted as timed out;
    /// the stage moves on to the next value. Overrides
    /// `PipelineOptions::stage_timeout_ms`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}
