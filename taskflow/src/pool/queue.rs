//! Bounded FIFO task queue shared by the workers of one run.
//!
//! Single producer (the pool's `run`), many consumers (workers). Each task is
//! handed to exactly one worker. Once closed, `push` fails and `pop` returns
//! `None` after the remaining tasks are drained.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::task::SharedTask;
use crate::error::{EngineError, EngineResult};
use crate::metrics::EngineMetricsStorage;

pub struct TaskQueue {
    capacity: usize,
    sender: Mutex<Option<mpsc::Sender<SharedTask>>>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<SharedTask>>,
    abandoned: AtomicBool,
    dropped: AtomicUsize,
    metrics: Arc<EngineMetricsStorage>,
}

impl TaskQueue {
    /// Create a queue holding up to `capacity` tasks.
    ///
    /// An empty batch still gets a one-slot channel; nothing is ever sent.
    pub fn new(capacity: usize, metrics: Arc<EngineMetricsStorage>) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            capacity,
            sender: Mutex::new(Some(tx)),
            receiver: tokio::sync::Mutex::new(rx),
            abandoned: AtomicBool::new(false),
            dropped: AtomicUsize::new(0),
            metrics,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue a task, waiting for space if the queue is full.
    ///
    /// Fails with [`EngineError::QueueClosed`] after `close()`.
    pub async fn push(&self, task: SharedTask) -> EngineResult<()> {
        let sender = self.sender.lock().clone().ok_or(EngineError::QueueClosed)?;
        sender
            .send(task)
            .await
            .map_err(|_| EngineError::QueueClosed)
    }

    /// Close the queue for writing. Already queued tasks remain poppable.
    pub fn close(&self) {
        if self.sender.lock().take().is_some() {
            tracing::trace!(capacity = self.capacity, "task queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Dequeue the next task.
    ///
    /// Returns `None` once the queue is closed and empty, or once it has been
    /// abandoned.
    pub async fn pop(&self) -> Option<SharedTask> {
        if self.abandoned.load(Ordering::Acquire) {
            return None;
        }

        let mut receiver = self.receiver.lock().await;
        let task = receiver.recv().await?;

        if self.abandoned.load(Ordering::Acquire) {
            self.record_dropped(1 + Self::discard(&mut receiver));
            return None;
        }
        Some(task)
    }

    /// Close the queue and drop every task still in it.
    ///
    /// Returns the number of tasks dropped by this call. If a worker is
    /// currently parked on the queue, that worker discards the remainder on
    /// wake-up and counts it in [`dropped`](Self::dropped).
    pub fn abandon(&self) -> usize {
        self.close();
        self.abandoned.store(true, Ordering::Release);

        let dropped = match self.receiver.try_lock() {
            Ok(mut receiver) => Self::discard(&mut receiver),
            Err(_) => 0,
        };
        self.record_dropped(dropped);
        dropped
    }

    /// Total tasks dropped by abandonment.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    fn discard(receiver: &mut mpsc::Receiver<SharedTask>) -> usize {
        receiver.close();
        let mut count = 0;
        while receiver.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    fn record_dropped(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.dropped.fetch_add(count, Ordering::Relaxed);
        EngineMetricsStorage::add(&self.metrics.tasks_dropped, count as u64);
        tracing::warn!(dropped = count, "abandoned task queue, dropping queued tasks");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::task::task_fn;

    fn noop(name: &str) -> SharedTask {
        task_fn(name.to_string(), || async { Ok(()) })
    }

    fn queue(capacity: usize) -> TaskQueue {
        TaskQueue::new(capacity, Arc::new(EngineMetricsStorage::new()))
    }

    #[tokio::test]
    async fn test_fifo_then_none_after_close() {
        let queue = queue(3);
        for name in ["a", "b", "c"] {
            queue.push(noop(name)).await.unwrap();
        }
        queue.close();

        let mut names = Vec::new();
        while let Some(task) = queue.pop().await {
            names.push(task.name().to_string());
        }
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_push_after_close_fails() {
        let queue = queue(1);
        queue.close();
        assert!(queue.is_closed());

        let err = queue.push(noop("late")).await.unwrap_err();
        assert!(matches!(err, EngineError::QueueClosed));
    }

    #[tokio::test]
    async fn test_empty_closed_queue_yields_none() {
        let queue = queue(0);
        queue.close();
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_abandon_counts_dropped_tasks() {
        let metrics = Arc::new(EngineMetricsStorage::new());
        let queue = TaskQueue::new(4, Arc::clone(&metrics));
        for i in 0..4 {
            queue.push(noop(&format!("t{i}"))).await.unwrap();
        }

        assert!(queue.pop().await.is_some());
        assert_eq!(queue.abandon(), 3);
        assert_eq!(queue.dropped(), 3);
        assert_eq!(metrics.snapshot().tasks_dropped(), 3);
        assert!(queue.pop().await.is_none());
        assert!(matches!(
            queue.push(noop("late")).await,
            Err(EngineError::QueueClosed)
        ));
    }
}
