//! Engine facade.

use std::sync::Arc;
use std::time::Duration;

use crate::error::EngineResult;
use crate::metrics::{EngineMetrics, EngineMetricsStorage};
use crate::options::EngineOptions;
use crate::pipeline::{PipelineBuilder, PipelineHandle, PipelineInput, PipelineOutput, Stage};
use crate::pool::{PoolReport, SharedTask, WorkerPool};
use crate::signal::CancellationSignal;
use crate::timeout::TimeoutGuard;

/// Entry point bundling validated options and one shared metrics sink.
///
/// **Cloning**: cheap via `Arc`; all clones report into the same counters.
#[derive(Debug, Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

#[derive(Debug)]
struct EngineInner {
    options: EngineOptions,
    metrics: Arc<EngineMetricsStorage>,
    pool: WorkerPool,
}

impl Engine {
    /// Validate `options` and create an engine.
    ///
    /// Fails with `InvalidConfiguration` before anything runs.
    pub fn new(options: EngineOptions) -> EngineResult<Self> {
        options.sanitize()?;

        let metrics = Arc::new(EngineMetricsStorage::new());
        let pool = WorkerPool::with_metrics(options.pool.clone(), Arc::clone(&metrics))?;

        tracing::debug!(
            concurrency = options.pool.concurrency,
            link_capacity = options.pipeline.link_capacity,
            timeout_ms = options.guard.timeout_ms,
            "initialized engine"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                options,
                metrics,
                pool,
            }),
        })
    }

    pub fn with_defaults() -> EngineResult<Self> {
        Self::new(EngineOptions::default())
    }

    pub fn options(&self) -> &EngineOptions {
        &self.inner.options
    }

    /// Run a batch of tasks on the engine's worker pool.
    pub async fn run_tasks(&self, tasks: Vec<SharedTask>) -> EngineResult<PoolReport> {
        self.inner.pool.run(tasks).await
    }

    /// Build a pipeline using the engine's link capacity.
    pub fn build_pipeline<T: Send + 'static>(
        &self,
        stages: Vec<Stage<T>>,
        signal: CancellationSignal,
    ) -> EngineResult<(PipelineInput<T>, PipelineOutput<T>, PipelineHandle)> {
        PipelineBuilder::new(signal)
            .stages(stages)
            .options(self.inner.options.pipeline.clone())
            .metrics(Arc::clone(&self.inner.metrics))
            .build()
    }

    /// Guard with the configured default duration.
    pub fn guard(&self) -> TimeoutGuard {
        self.guard_for(self.inner.options.guard.timeout())
    }

    pub fn guard_for(&self, duration: Duration) -> TimeoutGuard {
        TimeoutGuard::with_metrics(duration, Arc::clone(&self.inner.metrics))
    }

    /// Snapshot of every counter reported so far.
    pub fn metrics(&self) -> EngineMetrics {
        self.inner.metrics.snapshot()
    }
}
