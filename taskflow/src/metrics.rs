//! Engine-wide counters.
//!
//! `EngineMetricsStorage` is the lock-free sink every component reports into.
//! `EngineMetrics` is the read-only snapshot handed to callers. Counters are
//! monotonic and never reset; delta calculation is the caller's job.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter storage shared by the pool, pipeline and guard.
#[derive(Debug, Default)]
pub struct EngineMetricsStorage {
    pub(crate) tasks_submitted: AtomicU64,
    pub(crate) tasks_completed: AtomicU64,
    pub(crate) tasks_failed: AtomicU64,
    pub(crate) tasks_panicked: AtomicU64,
    pub(crate) tasks_dropped: AtomicU64,
    pub(crate) values_processed: AtomicU64,
    pub(crate) values_failed: AtomicU64,
    pub(crate) values_dropped: AtomicU64,
    pub(crate) guard_timeouts: AtomicU64,
    pub(crate) guard_cancellations: AtomicU64,
}

impl EngineMetricsStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    /// Take a consistent-enough snapshot (each counter read independently).
    pub fn snapshot(&self) -> EngineMetrics {
        EngineMetrics {
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_panicked: self.tasks_panicked.load(Ordering::Relaxed),
            tasks_dropped: self.tasks_dropped.load(Ordering::Relaxed),
            values_processed: self.values_processed.load(Ordering::Relaxed),
            values_failed: self.values_failed.load(Ordering::Relaxed),
            values_dropped: self.values_dropped.load(Ordering::Relaxed),
            guard_timeouts: self.guard_timeouts.load(Ordering::Relaxed),
            guard_cancellations: self.guard_cancellations.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`EngineMetricsStorage`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineMetrics {
    tasks_submitted: u64,
    tasks_completed: u64,
    tasks_failed: u64,
    tasks_panicked: u64,
    tasks_dropped: u64,
    values_processed: u64,
    values_failed: u64,
    values_dropped: u64,
    guard_timeouts: u64,
    guard_cancellations: u64,
}

impl EngineMetrics {
    /// Tasks handed to a worker pool.
    pub fn tasks_submitted(&self) -> u64 {
        self.tasks_submitted
    }

    /// Tasks whose execution was reported to the barrier (any outcome).
    pub fn tasks_completed(&self) -> u64 {
        self.tasks_completed
    }

    /// Tasks that returned an error.
    pub fn tasks_failed(&self) -> u64 {
        self.tasks_failed
    }

    /// Tasks that panicked inside `execute`.
    pub fn tasks_panicked(&self) -> u64 {
        self.tasks_panicked
    }

    /// Tasks discarded from an abandoned queue.
    pub fn tasks_dropped(&self) -> u64 {
        self.tasks_dropped
    }

    /// Values that passed through a pipeline stage.
    pub fn values_processed(&self) -> u64 {
        self.values_processed
    }

    /// Values rejected by a transform.
    pub fn values_failed(&self) -> u64 {
        self.values_failed
    }

    /// Values lost to cancellation between stages.
    pub fn values_dropped(&self) -> u64 {
        self.values_dropped
    }

    pub fn guard_timeouts(&self) -> u64 {
        self.guard_timeouts
    }

    pub fn guard_cancellations(&self) -> u64 {
        self.guard_cancellations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let storage = EngineMetricsStorage::new();
        EngineMetricsStorage::incr(&storage.tasks_completed);
        EngineMetricsStorage::add(&storage.values_processed, 3);

        let snapshot = storage.snapshot();
        assert_eq!(snapshot.tasks_completed(), 1);
        assert_eq!(snapshot.values_processed(), 3);
        assert_eq!(snapshot.guard_timeouts(), 0);
    }
}
