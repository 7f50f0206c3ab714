//! Completion barrier.
//!
//! Counts outstanding units of work and lets a caller wait for all of them.
//! The producer must `add` the full amount before any corresponding `done`;
//! adding after a `wait` has begun is not supported.

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{EngineError, EngineResult};

/// Counter-based "wait for everything" primitive.
///
/// Clones share the same counter.
#[derive(Debug, Clone)]
pub struct CompletionBarrier {
    count: Arc<watch::Sender<usize>>,
}

impl Default for CompletionBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionBarrier {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            count: Arc::new(count),
        }
    }

    /// Increase the outstanding count by `n`.
    pub fn add(&self, n: usize) {
        if n == 0 {
            return;
        }
        self.count.send_modify(|count| *count += n);
    }

    /// Report one unit of work as finished.
    ///
    /// Fails with [`EngineError::Underflow`] when nothing is outstanding; the
    /// counter is left at zero in that case.
    pub fn done(&self) -> EngineResult<()> {
        let mut underflow = false;
        self.count.send_if_modified(|count| {
            if *count == 0 {
                underflow = true;
                return false;
            }
            *count -= 1;
            // Only wake waiters when the last unit finishes.
            *count == 0
        });

        if underflow {
            tracing::error!("completion barrier underflow");
            return Err(EngineError::Underflow);
        }
        Ok(())
    }

    /// Snapshot of the outstanding count.
    pub fn outstanding(&self) -> usize {
        *self.count.borrow()
    }

    /// Wait until the outstanding count reaches zero.
    ///
    /// Returns immediately if it already is zero.
    pub async fn wait(&self) {
        let mut rx = self.count.subscribe();
        // The sender is owned by `self`, so the channel cannot close here.
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}
