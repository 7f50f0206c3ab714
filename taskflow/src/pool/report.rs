use chrono::{DateTime, Utc};
use serde::Serialize;
use ulid::Ulid;

use crate::error::EngineError;

/// How one task's execution ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum TaskStatus {
    Succeeded,
    /// `execute` returned an error.
    Failed(String),
    /// `execute` panicked; the worker caught it and moved on.
    Panicked(String),
}

impl TaskStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Succeeded)
    }

    /// The recorded failure as an [`EngineError::TaskExecutionFailure`].
    pub fn error(&self) -> Option<EngineError> {
        match self {
            TaskStatus::Succeeded => None,
            TaskStatus::Failed(message) => Some(EngineError::TaskExecutionFailure(message.clone())),
            TaskStatus::Panicked(message) => Some(EngineError::TaskExecutionFailure(format!(
                "panicked: {}",
                message
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskMetrics {
    pub name: String,
    pub worker: usize,
    /// Wall time of `execute`, in fractional milliseconds.
    pub duration_ms: f64,
    pub status: TaskStatus,
}

/// Outcome of one [`WorkerPool::run`](super::WorkerPool::run).
///
/// Holds one entry per executed task in completion order.
#[derive(Debug, Clone, Serialize)]
pub struct PoolReport {
    pub run_id: Ulid,
    pub started_at: DateTime<Utc>,
    pub concurrency: usize,
    pub total_duration_ms: u128,
    pub tasks: Vec<TaskMetrics>,
}

impl PoolReport {
    /// Number of completion reports observed.
    pub fn completed(&self) -> usize {
        self.tasks.len()
    }

    pub fn succeeded(&self) -> usize {
        self.tasks.iter().filter(|t| t.status.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.completed() - self.succeeded()
    }

    /// Failed tasks paired with their recorded error.
    pub fn failures(&self) -> impl Iterator<Item = (&str, EngineError)> + '_ {
        self.tasks
            .iter()
            .filter_map(|t| t.status.error().map(|e| (t.name.as_str(), e)))
    }

    pub fn task_duration_ms(&self, name: &str) -> Option<f64> {
        self.tasks
            .iter()
            .find(|task| task.name == name)
            .map(|task| task.duration_ms)
    }
}
