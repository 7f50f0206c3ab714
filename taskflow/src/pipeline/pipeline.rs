//! Cancellable staged pipeline.
//!
//! Builds a chain of stages connected by links, each stage running in its own
//! tokio task. Every blocking point (receive, transform, send) races the
//! pipeline's cancellation signal.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use super::link::{LinkReceiver, LinkSender, link};
use super::metrics::{PipelineMetrics, StageMetrics};
use super::stage::Stage;
use crate::error::{EngineError, EngineResult};
use crate::metrics::EngineMetricsStorage;
use crate::options::PipelineOptions;
use crate::signal::CancellationSignal;
use crate::timeout::{Outcome, TimeoutGuard};

/// Producer-facing end of a pipeline.
///
/// Dropping it (or calling [`close`](Self::close)) lets every stage drain
/// and exit without cancellation.
pub struct PipelineInput<T> {
    tx: LinkSender<T>,
    signal: CancellationSignal,
}

impl<T> PipelineInput<T> {
    /// Feed a value into stage 0.
    ///
    /// Waits for stage 0 to accept it (backpressure). Returns `Cancelled` or
    /// `DeadlineExceeded` if the signal fires first, and `QueueClosed` if the
    /// pipeline has already shut down.
    pub async fn send(&self, value: T) -> EngineResult<()> {
        self.signal.check()?;
        tokio::select! {
            biased;
            reason = self.signal.cancelled() => Err(reason.into()),
            sent = self.tx.send(value) => sent,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Close the input. Equivalent to dropping it.
    pub fn close(self) {}
}

/// Consumer-facing end of a pipeline.
pub struct PipelineOutput<T> {
    rx: LinkReceiver<T>,
}

impl<T> PipelineOutput<T> {
    /// Next value out of the final stage, or `None` once the final stage has
    /// exited (input closed and drained, or cancellation).
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Receive until the output closes.
    pub async fn collect(mut self) -> Vec<T> {
        let mut values = Vec::new();
        while let Some(value) = self.recv().await {
            values.push(value);
        }
        values
    }

    pub fn into_stream(self) -> ReceiverStream<T> {
        self.rx.into_stream()
    }
}

/// Control handle for a running pipeline.
pub struct PipelineHandle {
    signal: CancellationSignal,
    stages: Vec<JoinHandle<StageMetrics>>,
    started: Instant,
}

impl PipelineHandle {
    /// The pipeline's own signal (a child of the one passed to the builder).
    pub fn signal(&self) -> &CancellationSignal {
        &self.signal
    }

    /// Cancel this pipeline only. Returns `false` if it was already cancelled.
    pub fn shutdown(&self) -> bool {
        self.signal.cancel()
    }

    /// Wait for every stage to exit and collect their metrics.
    pub async fn join(self) -> EngineResult<PipelineMetrics> {
        let mut stages = Vec::with_capacity(self.stages.len());
        for handle in self.stages {
            let metrics = handle
                .await
                .map_err(|e| EngineError::Internal(format!("stage join failed: {}", e)))?;
            stages.push(metrics);
        }

        Ok(PipelineMetrics {
            total_duration_ms: self.started.elapsed().as_millis(),
            stages,
            cancel_reason: self.signal.reason(),
        })
    }
}

/// Assembles stages into a running pipeline.
///
/// ```ignore
/// let signal = CancellationSignal::new();
/// let (input, output, handle) = PipelineBuilder::new(signal)
///     .stage(Stage::map("transform", |v: i64| v + 10))
///     .stage(Stage::map("enrich", |v: i64| v + 20))
///     .build()?;
/// ```
pub struct PipelineBuilder<T: Send + 'static> {
    stages: Vec<Stage<T>>,
    signal: CancellationSignal,
    options: PipelineOptions,
    metrics: Arc<EngineMetricsStorage>,
}

impl<T: Send + 'static> PipelineBuilder<T> {
    pub fn new(signal: CancellationSignal) -> Self {
        Self {
            stages: Vec::new(),
            signal,
            options: PipelineOptions::default(),
            metrics: Arc::new(EngineMetricsStorage::new()),
        }
    }

    pub fn stage(mut self, stage: Stage<T>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(mut self, stages: impl IntoIterator<Item = Stage<T>>) -> Self {
        self.stages.extend(stages);
        self
    }

    pub fn options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn metrics(mut self, metrics: Arc<EngineMetricsStorage>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Spawn every stage and return the two endpoints plus a control handle.
    ///
    /// Must be called from within a tokio runtime. Fails with
    /// `InvalidConfiguration` before spawning anything if there are no stages
    /// or the options are invalid.
    pub fn build(self) -> EngineResult<(PipelineInput<T>, PipelineOutput<T>, PipelineHandle)> {
        self.options.sanitize()?;
        if self.stages.is_empty() {
            return Err(EngineError::InvalidConfiguration(
                "pipeline needs at least one stage".into(),
            ));
        }

        let capacity = self.options.link_capacity;
        let signal = self.signal.child();
        let (input_tx, mut inbound) = link(capacity);
        let mut handles = Vec::with_capacity(self.stages.len());

        let default_timeout = self.options.stage_timeout();
        for (index, stage) in self.stages.into_iter().enumerate() {
            let (outbound, next) = link(capacity);
            let runner = StageRunner {
                index,
                timeout: stage.timeout.or(default_timeout),
                stage,
                inbound,
                outbound,
                signal: signal.clone(),
                metrics: Arc::clone(&self.metrics),
            };
            handles.push(tokio::spawn(runner.run()));
            inbound = next;
        }

        tracing::debug!(
            stages = handles.len(),
            link_capacity = capacity,
            stage_timeout_ms = self.options.stage_timeout_ms,
            "pipeline started"
        );

        Ok((
            PipelineInput {
                tx: input_tx,
                signal: signal.clone(),
            },
            PipelineOutput { rx: inbound },
            PipelineHandle {
                signal,
                stages: handles,
                started: Instant::now(),
            },
        ))
    }
}

/// Shorthand for [`PipelineBuilder`].
pub struct Pipeline;

impl Pipeline {
    pub fn build<T: Send + 'static>(
        stages: Vec<Stage<T>>,
        signal: CancellationSignal,
        options: PipelineOptions,
    ) -> EngineResult<(PipelineInput<T>, PipelineOutput<T>, PipelineHandle)> {
        PipelineBuilder::new(signal)
            .stages(stages)
            .options(options)
            .build()
    }
}

struct StageRunner<T: Send + 'static> {
    index: usize,
    stage: Stage<T>,
    timeout: Option<Duration>,
    inbound: LinkReceiver<T>,
    outbound: LinkSender<T>,
    signal: CancellationSignal,
    metrics: Arc<EngineMetricsStorage>,
}

impl<T: Send + 'static> StageRunner<T> {
    async fn run(self) -> StageMetrics {
        let StageRunner {
            index,
            stage,
            timeout,
            mut inbound,
            outbound,
            signal,
            metrics,
        } = self;

        let mut stats = StageMetrics {
            index,
            name: stage.name.clone(),
            ..Default::default()
        };
        let mut busy = Duration::ZERO;
        let guard = timeout.map(|t| TimeoutGuard::with_metrics(t, Arc::clone(&metrics)));

        // One wait future for the whole loop; every branch that sees it
        // resolve leaves the loop, so it is never polled after completion.
        let cancelled = signal.cancelled();
        tokio::pin!(cancelled);

        loop {
            let value = tokio::select! {
                biased;
                reason = &mut cancelled => {
                    tracing::debug!(stage = %stats.name, ?reason, "stage cancelled while idle");
                    stats.cancelled = true;
                    break;
                }
                value = inbound.recv() => match value {
                    Some(value) => value,
                    None => {
                        tracing::trace!(stage = %stats.name, "inbound closed, stage draining out");
                        break;
                    }
                },
            };

            let transform_start = Instant::now();
            let outcome = match &guard {
                Some(guard) => guard.run(stage.transform.apply(value), &signal).await,
                None => tokio::select! {
                    biased;
                    reason = &mut cancelled => Outcome::Cancelled(reason),
                    result = stage.transform.apply(value) => Outcome::Completed(result),
                },
            };
            busy += transform_start.elapsed();

            let value = match outcome {
                Outcome::Completed(Ok(value)) => value,
                Outcome::Completed(Err(e)) => {
                    tracing::warn!(stage = %stats.name, error = %e, "transform failed, dropping value");
                    stats.failed += 1;
                    EngineMetricsStorage::incr(&metrics.values_failed);
                    continue;
                }
                Outcome::TimedOut(after) => {
                    tracing::warn!(
                        stage = %stats.name,
                        timeout_ms = after.as_millis() as u64,
                        "transform timed out, dropping value"
                    );
                    stats.timed_out += 1;
                    stats.dropped += 1;
                    EngineMetricsStorage::incr(&metrics.values_dropped);
                    continue;
                }
                Outcome::Cancelled(reason) => {
                    tracing::debug!(stage = %stats.name, ?reason, "value dropped mid-transform");
                    stats.cancelled = true;
                    stats.dropped += 1;
                    EngineMetricsStorage::incr(&metrics.values_dropped);
                    break;
                }
            };

            // Abandon, never force, a send blocked on a slow downstream.
            tokio::select! {
                biased;
                reason = &mut cancelled => {
                    tracing::debug!(stage = %stats.name, ?reason, "value dropped mid-send");
                    stats.cancelled = true;
                    stats.dropped += 1;
                    EngineMetricsStorage::incr(&metrics.values_dropped);
                    break;
                }
                sent = outbound.send(value) => {
                    if sent.is_err() {
                        tracing::debug!(stage = %stats.name, "downstream closed, stopping stage");
                        stats.dropped += 1;
                        EngineMetricsStorage::incr(&metrics.values_dropped);
                        break;
                    }
                }
            }

            stats.processed += 1;
            EngineMetricsStorage::incr(&metrics.values_processed);
        }

        stats.busy_ms = busy.as_secs_f64() * 1000.0;
        tracing::trace!(
            stage = %stats.name,
            processed = stats.processed,
            dropped = stats.dropped,
            busy_ms = stats.busy_ms,
            "stage exited"
        );
        stats
    }
}
