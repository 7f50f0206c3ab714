use crate::signal::CancelReason;

#[derive(Debug, Clone, Default)]
pub struct StageMetrics {
    pub index: usize,
    pub name: String,
    /// Values transformed and handed downstream.
    pub processed: u64,
    /// Values rejected by the transform.
    pub failed: u64,
    /// Values lost because cancellation fired mid-transform or mid-send, a
    /// transform timed out, or the downstream side was gone.
    ///
    /// Upper bound on actual loss. On a rendezvous link the value already
    /// sits in the slot while the send waits for pickup; if cancellation wins
    /// that race and the next stage still takes the value, it is counted
    /// here and as `processed` downstream.
    pub dropped: u64,
    /// Values dropped because the transform overran the stage timeout.
    /// Included in `dropped`.
    pub timed_out: u64,
    /// Total time spent inside the transform, in milliseconds.
    pub busy_ms: f64,
    /// Whether the stage stopped on cancellation rather than a closed input.
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub total_duration_ms: u128,
    pub stages: Vec<StageMetrics>,
    pub cancel_reason: Option<CancelReason>,
}

impl PipelineMetrics {
    pub fn stage(&self, name: &str) -> Option<&StageMetrics> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    /// Values that left the final stage.
    pub fn delivered(&self) -> u64 {
        self.stages.last().map_or(0, |stage| stage.processed)
    }

    pub fn dropped(&self) -> u64 {
        self.stages.iter().map(|stage| stage.dropped).sum()
    }

    pub fn failed(&self) -> u64 {
        self.stages.iter().map(|stage| stage.failed).sum()
    }

    pub fn timed_out(&self) -> u64 {
        self.stages.iter().map(|stage| stage.timed_out).sum()
    }
}
