//! Timeout guard.
//!
//! Races one operation against a duration and a [`CancellationSignal`] and
//! returns exactly one tagged [`Outcome`]. Timeouts and cancellations are
//! ordinary outcomes, not errors; use [`Outcome::into_result`] when an error
//! is more convenient.
//!
//! The guard has no preemption primitive. [`TimeoutGuard::run`] drops the
//! operation's future when it gives up, which stops it at its next await
//! point. [`TimeoutGuard::run_detached`] and [`TimeoutGuard::run_blocking`]
//! only stop *waiting*: the operation keeps running on its own task until it
//! finishes. Such operations should watch the signal themselves to avoid
//! leaking work.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinError;

use crate::error::{EngineError, EngineResult, panic_message};
use crate::metrics::EngineMetricsStorage;
use crate::signal::{CancelReason, CancellationSignal};

/// Result of a guarded operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Completed(T),
    /// The guard's duration elapsed first.
    TimedOut(Duration),
    /// The signal fired first (or had already fired).
    Cancelled(CancelReason),
}

impl<T> Outcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Outcome::TimedOut(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled(_))
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    /// `Completed(v)` becomes `Ok(v)`; the other outcomes become
    /// `Timeout`, `Cancelled` or `DeadlineExceeded`.
    pub fn into_result(self) -> EngineResult<T> {
        match self {
            Outcome::Completed(value) => Ok(value),
            Outcome::TimedOut(after) => Err(EngineError::Timeout(after)),
            Outcome::Cancelled(reason) => Err(reason.into()),
        }
    }
}

/// Wraps operations with a deadline.
#[derive(Debug, Clone)]
pub struct TimeoutGuard {
    duration: Duration,
    metrics: Arc<EngineMetricsStorage>,
}

impl TimeoutGuard {
    pub fn new(duration: Duration) -> Self {
        Self::with_metrics(duration, Arc::new(EngineMetricsStorage::new()))
    }

    pub fn with_metrics(duration: Duration, metrics: Arc<EngineMetricsStorage>) -> Self {
        Self { duration, metrics }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Race `op` against the duration and `signal`.
    ///
    /// An already-cancelled signal wins before `op` is polled. If `op` loses
    /// the race it is dropped.
    pub async fn run<F>(&self, op: F, signal: &CancellationSignal) -> Outcome<F::Output>
    where
        F: Future,
    {
        if let Some(reason) = signal.reason() {
            return self.record(Outcome::Cancelled(reason));
        }

        let outcome = tokio::select! {
            biased;
            reason = signal.cancelled() => Outcome::Cancelled(reason),
            value = op => Outcome::Completed(value),
            _ = tokio::time::sleep(self.duration) => Outcome::TimedOut(self.duration),
        };
        self.record(outcome)
    }

    /// Spawn `op` on its own task and race its completion.
    ///
    /// On timeout or cancellation the task is left running, isolated; its
    /// result is discarded. Fails only if the spawned task panicked.
    pub async fn run_detached<F>(
        &self,
        op: F,
        signal: &CancellationSignal,
    ) -> EngineResult<Outcome<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let handle = tokio::spawn(op);
        Self::flatten(self.run(handle, signal).await)
    }

    /// Run a blocking closure on the blocking pool and race its completion.
    ///
    /// Same detached semantics as [`run_detached`](Self::run_detached).
    pub async fn run_blocking<F, T>(
        &self,
        f: F,
        signal: &CancellationSignal,
    ) -> EngineResult<Outcome<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let handle = tokio::task::spawn_blocking(f);
        Self::flatten(self.run(handle, signal).await)
    }

    fn flatten<T>(outcome: Outcome<Result<T, JoinError>>) -> EngineResult<Outcome<T>> {
        Ok(match outcome {
            Outcome::Completed(Ok(value)) => Outcome::Completed(value),
            Outcome::Completed(Err(e)) => return Err(Self::join_failure(e)),
            Outcome::TimedOut(after) => Outcome::TimedOut(after),
            Outcome::Cancelled(reason) => Outcome::Cancelled(reason),
        })
    }

    fn join_failure(e: JoinError) -> EngineError {
        if e.is_panic() {
            let message = panic_message(e.into_panic().as_ref());
            EngineError::TaskExecutionFailure(format!("guarded operation panicked: {}", message))
        } else {
            // Only runtime shutdown cancels a spawned task the guard owns.
            EngineError::TaskExecutionFailure(
                "guarded operation was cancelled by runtime shutdown".to_string(),
            )
        }
    }

    fn record<T>(&self, outcome: Outcome<T>) -> Outcome<T> {
        match &outcome {
            Outcome::Completed(_) => {}
            Outcome::TimedOut(after) => {
                EngineMetricsStorage::incr(&self.metrics.guard_timeouts);
                tracing::debug!(timeout_ms = after.as_millis() as u64, "guarded operation timed out");
            }
            Outcome::Cancelled(reason) => {
                EngineMetricsStorage::incr(&self.metrics.guard_cancellations);
                tracing::debug!(?reason, "guarded operation cancelled");
            }
        }
        outcome
    }
}

/// Race `op` against `duration` and `signal` with a one-off guard.
pub async fn guard<F>(op: F, duration: Duration, signal: &CancellationSignal) -> Outcome<F::Output>
where
    F: Future,
{
    TimeoutGuard::new(duration).run(op, signal).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    #[tokio::test]
    async fn test_completed() {
        let outcome = guard(async { 42 }, Duration::from_secs(1), &CancellationSignal::new()).await;
        assert_eq!(outcome, Outcome::Completed(42));
        assert_eq!(outcome.into_result().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_never_completing_op_times_out_promptly() {
        let start = Instant::now();
        let outcome = guard(
            std::future::pending::<()>(),
            Duration::from_millis(10),
            &CancellationSignal::new(),
        )
        .await;

        assert!(outcome.is_timed_out());
        assert!(start.elapsed() <= Duration::from_millis(50));
        assert!(matches!(outcome.into_result(), Err(EngineError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_already_cancelled_signal_wins() {
        let signal = CancellationSignal::new();
        signal.cancel();

        let outcome = guard(async { 1 }, Duration::from_secs(60), &signal).await;
        assert_eq!(outcome, Outcome::Cancelled(CancelReason::Explicit));
        assert!(matches!(outcome.into_result(), Err(EngineError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_deadline_reported_as_deadline_exceeded() {
        let signal = CancellationSignal::with_timeout(Duration::from_millis(5));
        let outcome = guard(std::future::pending::<()>(), Duration::from_secs(10), &signal).await;
        assert_eq!(outcome, Outcome::Cancelled(CancelReason::DeadlineExceeded));
        assert!(matches!(outcome.into_result(), Err(EngineError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting() {
        let signal = CancellationSignal::new();
        let canceller = {
            let signal = signal.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                signal.cancel();
            })
        };

        let outcome = guard(std::future::pending::<()>(), Duration::from_secs(10), &signal).await;
        assert!(outcome.is_cancelled());
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_detached_operation_keeps_running() {
        let finished = Arc::new(AtomicBool::new(false));
        let metrics = Arc::new(EngineMetricsStorage::new());
        let guard = TimeoutGuard::with_metrics(Duration::from_millis(10), Arc::clone(&metrics));

        let op = {
            let finished = Arc::clone(&finished);
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                finished.store(true, Ordering::SeqCst);
            }
        };

        let outcome = guard
            .run_detached(op, &CancellationSignal::new())
            .await
            .unwrap();
        assert!(outcome.is_timed_out());
        assert!(!finished.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(metrics.snapshot().guard_timeouts(), 1);
    }

    #[tokio::test]
    async fn test_detached_panic_is_an_error() {
        let guard = TimeoutGuard::new(Duration::from_secs(1));
        let op = async {
            let values: Vec<u8> = Vec::new();
            values[0]
        };
        let result = guard.run_detached(op, &CancellationSignal::new()).await;
        match result {
            Err(EngineError::TaskExecutionFailure(message)) => {
                assert!(message.contains("panicked"), "{message}");
                assert!(message.contains("index out of bounds"), "{message}");
            }
            other => panic!("expected a panic failure, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_operation() {
        let guard = TimeoutGuard::new(Duration::from_secs(1));
        let outcome = guard
            .run_blocking(|| 2 + 2, &CancellationSignal::new())
            .await
            .unwrap();
        assert_eq!(outcome.completed(), Some(4));

        let outcome = TimeoutGuard::new(Duration::from_millis(10))
            .run_blocking(
                || std::thread::sleep(Duration::from_millis(200)),
                &CancellationSignal::new(),
            )
            .await
            .unwrap();
        assert!(outcome.is_timed_out());
    }
}
