//! Concurrent task execution engine on tokio.
//!
//! - [`pool`]: bounded worker pool that drains a batch of heterogeneous
//!   tasks and waits on a [`CompletionBarrier`].
//! - [`pipeline`]: chain of stages connected by single-producer links, all
//!   observing a shared [`CancellationSignal`].
//! - [`timeout`]: [`TimeoutGuard`] racing an operation against a duration and
//!   the signal, returning a tagged [`Outcome`].
//!
//! [`Engine`] bundles validated [`EngineOptions`] with one metrics sink for
//! all three.

pub mod barrier;
pub mod engine;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod options;
pub mod pipeline;
pub mod pool;
pub mod signal;
pub mod timeout;

pub use barrier::CompletionBarrier;
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use logging::{init_logging, init_logging_to};
pub use metrics::{EngineMetrics, EngineMetricsStorage};
pub use options::{EngineOptions, GuardOptions, PipelineOptions, PoolOptions};
pub use pipeline::{Pipeline, PipelineBuilder, Stage, Transform};
pub use pool::{PoolReport, SharedTask, Task, WorkerPool, run_tasks, task_fn};
pub use signal::{CancelReason, CancellationSignal};
pub use timeout::{Outcome, TimeoutGuard, guard};
