//! Bounded worker pool.
//!
//! ## Architecture
//!
//! ```text
//! run(tasks)
//!   │  push × N, then close
//!   ▼
//! TaskQueue (bounded, FIFO) ──pop──▶ Worker 0 ─┐
//!                           ──pop──▶ Worker 1 ─┼─ done() ──▶ CompletionBarrier ──▶ run returns
//!                           ──pop──▶ Worker k ─┘
//! ```
//!
//! - Each task is popped by exactly one worker and reported exactly once.
//! - Task errors and panics are recorded in the [`PoolReport`], never
//!   propagated as a run failure.
//! - Dropping a `run` future early abandons the queue (see `DrainGuard`).
//!
//! ## Example
//!
//! ```ignore
//! use taskflow::pool::{WorkerPool, task_fn};
//! use taskflow::options::PoolOptions;
//!
//! let pool = WorkerPool::new(PoolOptions::with_concurrency(4))?;
//! let report = pool
//!     .run(vec![task_fn("hello", || async { Ok(()) })])
//!     .await?;
//! assert_eq!(report.completed(), 1);
//! ```

#[allow(clippy::module_inception)]
mod pool;
mod queue;
mod report;
mod task;

pub use pool::{WorkerPool, run_tasks};
pub use queue::TaskQueue;
pub use report::{PoolReport, TaskMetrics, TaskStatus};
pub use task::{FnTask, SharedTask, Task, task_fn};
