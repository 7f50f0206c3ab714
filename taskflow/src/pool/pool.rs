//! Fixed-size worker pool with graceful drain.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use ulid::Ulid;

use super::queue::TaskQueue;
use super::report::{PoolReport, TaskMetrics, TaskStatus};
use super::task::SharedTask;
use crate::barrier::CompletionBarrier;
use crate::error::{EngineError, EngineResult, panic_message};
use crate::metrics::EngineMetricsStorage;
use crate::options::PoolOptions;

/// Runs batches of tasks on a fixed number of worker loops.
///
/// Every `run` builds a fresh queue sized to the batch, starts
/// `concurrency` workers, enqueues the batch, closes the queue and waits for
/// the completion barrier. Workers exit once the queue is drained and closed.
/// There is no cancellation path: a run always lets the queue drain.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    options: PoolOptions,
    metrics: Arc<EngineMetricsStorage>,
}

impl WorkerPool {
    /// Create a pool with its own metrics storage.
    ///
    /// Fails with [`EngineError::InvalidConfiguration`] if `concurrency` is 0.
    pub fn new(options: PoolOptions) -> EngineResult<Self> {
        Self::with_metrics(options, Arc::new(EngineMetricsStorage::new()))
    }

    pub fn with_metrics(
        options: PoolOptions,
        metrics: Arc<EngineMetricsStorage>,
    ) -> EngineResult<Self> {
        options.sanitize()?;
        Ok(Self { options, metrics })
    }

    pub fn concurrency(&self) -> usize {
        self.options.concurrency
    }

    pub fn metrics(&self) -> &Arc<EngineMetricsStorage> {
        &self.metrics
    }

    /// Execute every task and wait for all of them.
    ///
    /// Per-task errors and panics are recorded in the report; they never
    /// make `run` fail. An `Err` here means the pool itself broke (a worker
    /// could not be joined or the queue rejected a task).
    pub async fn run(&self, tasks: Vec<SharedTask>) -> EngineResult<PoolReport> {
        let run_id = Ulid::new();
        let started_at = Utc::now();
        let total_start = Instant::now();
        let total = tasks.len();
        let concurrency = self.options.concurrency;

        tracing::debug!(%run_id, tasks = total, concurrency, "starting worker pool run");

        let queue = Arc::new(TaskQueue::new(total, Arc::clone(&self.metrics)));
        let barrier = CompletionBarrier::new();
        barrier.add(total);
        let records = Arc::new(Mutex::new(Vec::with_capacity(total)));
        let mut guard = DrainGuard::new(Arc::clone(&queue), run_id);

        let workers: Vec<JoinHandle<()>> = (0..concurrency)
            .map(|id| {
                let worker = Worker {
                    id,
                    queue: Arc::clone(&queue),
                    barrier: barrier.clone(),
                    records: Arc::clone(&records),
                    metrics: Arc::clone(&self.metrics),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        EngineMetricsStorage::add(&self.metrics.tasks_submitted, total as u64);
        for task in tasks {
            queue.push(task).await?;
        }
        queue.close();

        barrier.wait().await;

        for handle in workers {
            handle
                .await
                .map_err(|e| EngineError::Internal(format!("worker join failed: {}", e)))?;
        }
        guard.disarm();

        let tasks = std::mem::take(&mut *records.lock());
        let report = PoolReport {
            run_id,
            started_at,
            concurrency,
            total_duration_ms: total_start.elapsed().as_millis(),
            tasks,
        };

        tracing::info!(
            %run_id,
            completed = report.completed(),
            failed = report.failed(),
            duration_ms = report.total_duration_ms,
            "worker pool run finished"
        );

        Ok(report)
    }
}

/// Execute `tasks` on a throwaway pool of `concurrency` workers.
pub async fn run_tasks(tasks: Vec<SharedTask>, concurrency: usize) -> EngineResult<PoolReport> {
    WorkerPool::new(PoolOptions::with_concurrency(concurrency))?
        .run(tasks)
        .await
}

struct Worker {
    id: usize,
    queue: Arc<TaskQueue>,
    barrier: CompletionBarrier,
    records: Arc<Mutex<Vec<TaskMetrics>>>,
    metrics: Arc<EngineMetricsStorage>,
}

impl Worker {
    async fn run(self) {
        tracing::trace!(worker = self.id, "worker started");

        while let Some(task) = self.queue.pop().await {
            let name = task.name().to_string();
            let task_start = Instant::now();

            let status = match AssertUnwindSafe(task.execute()).catch_unwind().await {
                Ok(Ok(())) => TaskStatus::Succeeded,
                Ok(Err(e)) => {
                    tracing::warn!(worker = self.id, task = %name, error = %e, "task failed");
                    EngineMetricsStorage::incr(&self.metrics.tasks_failed);
                    TaskStatus::Failed(e.to_string())
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::warn!(worker = self.id, task = %name, panic = %message, "task panicked");
                    EngineMetricsStorage::incr(&self.metrics.tasks_panicked);
                    TaskStatus::Panicked(message)
                }
            };

            self.records.lock().push(TaskMetrics {
                name,
                worker: self.id,
                duration_ms: task_start.elapsed().as_secs_f64() * 1000.0,
                status,
            });
            EngineMetricsStorage::incr(&self.metrics.tasks_completed);

            // One report per dequeued task; an underflow means the pool's own
            // bookkeeping is broken.
            if let Err(e) = self.barrier.done() {
                tracing::error!(worker = self.id, error = %e, "completion report rejected");
            }
        }

        tracing::trace!(worker = self.id, "worker exiting, queue drained");
    }
}

/// RAII guard for a run that is dropped before it finishes.
///
/// Abandons the queue if dropped while armed: queued tasks are dropped and
/// counted, in-flight tasks run to completion on their workers.
struct DrainGuard {
    queue: Arc<TaskQueue>,
    run_id: Ulid,
    armed: bool,
}

impl DrainGuard {
    fn new(queue: Arc<TaskQueue>, run_id: Ulid) -> Self {
        Self {
            queue,
            run_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let dropped = self.queue.abandon();
        tracing::warn!(
            run_id = %self.run_id,
            dropped,
            "worker pool run abandoned before completion"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::task::{Task, task_fn};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingTask {
        name: String,
        runs: AtomicUsize,
    }

    #[async_trait]
    impl Task for CountingTask {
        async fn execute(&self) -> EngineResult<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(())
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    struct PanickingTask;

    #[async_trait]
    impl Task for PanickingTask {
        async fn execute(&self) -> EngineResult<()> {
            panic!("image decoder exploded")
        }

        fn name(&self) -> &str {
            "panics"
        }
    }

    fn counting_tasks(n: usize) -> Vec<Arc<CountingTask>> {
        (0..n)
            .map(|i| {
                Arc::new(CountingTask {
                    name: format!("task-{i}"),
                    runs: AtomicUsize::new(0),
                })
            })
            .collect()
    }

    fn shared(tasks: &[Arc<CountingTask>]) -> Vec<SharedTask> {
        tasks
            .iter()
            .map(|t| Arc::clone(t) as SharedTask)
            .collect()
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = WorkerPool::new(PoolOptions::with_concurrency(0)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfiguration(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_each_task_runs_exactly_once() {
        for (n, c) in [(0, 1), (1, 1), (10, 3), (50, 8), (5, 5)] {
            let tasks = counting_tasks(n);
            let pool = WorkerPool::new(PoolOptions::with_concurrency(c)).unwrap();
            let report = pool.run(shared(&tasks)).await.unwrap();

            assert_eq!(report.completed(), n, "n={n} c={c}");
            assert_eq!(report.succeeded(), n);
            for task in &tasks {
                assert_eq!(task.runs.load(Ordering::SeqCst), 1);
            }
            let names: HashSet<_> = report.tasks.iter().map(|t| t.name.clone()).collect();
            assert_eq!(names.len(), n);
        }
    }

    #[tokio::test]
    async fn test_excess_workers_exit() {
        let tasks = counting_tasks(2);
        let report = tokio::time::timeout(Duration::from_secs(2), run_tasks(shared(&tasks), 16))
            .await
            .expect("run should terminate")
            .unwrap();
        assert_eq!(report.completed(), 2);
        assert_eq!(report.concurrency, 16);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failures_and_panics_are_recorded() {
        let tasks = vec![
            task_fn("ok", || async { Ok(()) }),
            task_fn("fails", || async {
                Err(EngineError::TaskExecutionFailure("smtp unavailable".into()))
            }),
            Arc::new(PanickingTask),
            task_fn("after", || async { Ok(()) }),
        ];

        let pool = WorkerPool::new(PoolOptions::with_concurrency(1)).unwrap();
        let report = pool.run(tasks).await.unwrap();

        assert_eq!(report.completed(), 4);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 2);

        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 2);
        assert!(
            failures
                .iter()
                .all(|(_, e)| matches!(e, EngineError::TaskExecutionFailure(_)))
        );

        let panicked = report.tasks.iter().find(|t| t.name == "panics").unwrap();
        assert_eq!(
            panicked.status,
            TaskStatus::Panicked("image decoder exploded".into())
        );

        let snapshot = pool.metrics().snapshot();
        assert_eq!(snapshot.tasks_completed(), 4);
        assert_eq!(snapshot.tasks_failed(), 1);
        assert_eq!(snapshot.tasks_panicked(), 1);
    }

    #[tokio::test]
    async fn test_single_worker_preserves_fifo() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let tasks: Vec<SharedTask> = (0..5)
            .map(|i| {
                let order = Arc::clone(&order);
                task_fn(format!("t{i}"), move || {
                    let order = Arc::clone(&order);
                    async move {
                        order.lock().push(i);
                        Ok(())
                    }
                })
            })
            .collect();

        run_tasks(tasks, 1).await.unwrap();
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_tasks_run_concurrently() {
        let tasks: Vec<SharedTask> = (0..4)
            .map(|i| {
                task_fn(format!("sleep-{i}"), || async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(())
                })
            })
            .collect();

        let start = Instant::now();
        run_tasks(tasks, 4).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_sub_millisecond_task_duration_is_recorded() {
        let tasks = vec![task_fn("short", || async {
            std::thread::sleep(Duration::from_micros(400));
            Ok(())
        })];

        let report = run_tasks(tasks, 1).await.unwrap();
        let duration_ms = report.task_duration_ms("short").unwrap();
        assert!(duration_ms >= 0.4, "duration_ms={duration_ms}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_run_abandons_queue() {
        let pool = WorkerPool::new(PoolOptions::with_concurrency(1)).unwrap();
        let tasks: Vec<SharedTask> = (0..5)
            .map(|i| {
                task_fn(format!("slow-{i}"), || async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(())
                })
            })
            .collect();

        let result = tokio::time::timeout(Duration::from_millis(50), pool.run(tasks)).await;
        assert!(result.is_err());

        // The in-flight task finishes; the queued remainder is discarded.
        tokio::time::sleep(Duration::from_millis(400)).await;
        let snapshot = pool.metrics().snapshot();
        assert_eq!(snapshot.tasks_submitted(), 5);
        assert_eq!(snapshot.tasks_completed(), 1);
        assert_eq!(snapshot.tasks_dropped(), 4);
    }
}
