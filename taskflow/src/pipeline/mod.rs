//! Cancellable staged pipeline.
//!
//! ## Architecture
//!
//! ```text
//! PipelineInput ─link─▶ Stage 0 ─link─▶ Stage 1 ─link─▶ … ─link─▶ PipelineOutput
//!                          │               │
//!                          └──── CancellationSignal (child of the caller's) ────┘
//! ```
//!
//! - Each stage owns its outbound link; the next stage only reads it.
//! - Links default to rendezvous (capacity 0), giving natural backpressure.
//!   `PipelineOptions::link_capacity` trades memory for fewer stalls.
//! - Closing the input drains and stops every stage without cancellation.
//! - A stage timeout (`Stage::with_timeout` or
//!   `PipelineOptions::stage_timeout_ms`) bounds each transform call. An
//!   overrun drops that value only; the stage keeps running.
//!
//! ## Delivery
//!
//! Without cancellation every value that enters comes out exactly once, in
//! order (or is dropped by a failing or timed-out transform). Under
//! cancellation delivery is at-most-once and best effort: a value between
//! two stages when the signal fires may be dropped silently, and the output
//! closes promptly. This is the contract; guaranteeing delivery would
//! require blocking shutdown on slow consumers.
//!
//! ## Example
//!
//! ```ignore
//! let signal = CancellationSignal::new();
//! let (input, mut output, handle) = Pipeline::build(
//!     vec![
//!         Stage::map("transform", |v: i64| v + 10),
//!         Stage::map("enrich", |v: i64| v + 20),
//!         Stage::map("result", |v: i64| v + 30),
//!     ],
//!     signal,
//!     PipelineOptions::default(),
//! )?;
//!
//! input.send(5).await?;
//! assert_eq!(output.recv().await, Some(65));
//! input.close();
//! let metrics = handle.join().await?;
//! ```

mod link;
mod metrics;
#[allow(clippy::module_inception)]
mod pipeline;
mod stage;
mod transform;

pub use metrics::{PipelineMetrics, StageMetrics};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineHandle, PipelineInput, PipelineOutput};
pub use stage::Stage;
pub use transform::Transform;
