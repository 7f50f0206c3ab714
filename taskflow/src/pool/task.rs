//! Task trait executed by the worker pool.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EngineResult;

/// A unit of work the pool can execute.
///
/// Tasks are shared as [`SharedTask`], so the producer may keep its own
/// handle and read results the task stored internally once the run is over.
/// A returned error is recorded for that task only; it never fails the run.
#[async_trait]
pub trait Task: Send + Sync {
    /// Run the task to completion.
    async fn execute(&self) -> EngineResult<()>;

    /// Human-readable task name for logging and metrics.
    fn name(&self) -> &str;
}

pub type SharedTask = Arc<dyn Task>;

/// Task backed by a closure returning a future.
pub struct FnTask<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> Task for FnTask<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EngineResult<()>> + Send + 'static,
{
    async fn execute(&self) -> EngineResult<()> {
        (self.f)().await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Wrap a closure as a [`SharedTask`].
///
/// ```ignore
/// let task = task_fn("ping", || async { Ok(()) });
/// ```
pub fn task_fn<F, Fut>(name: impl Into<String>, f: F) -> SharedTask
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EngineResult<()>> + Send + 'static,
{
    Arc::new(FnTask {
        name: name.into(),
        f,
    })
}
