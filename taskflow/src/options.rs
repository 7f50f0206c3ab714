//! Engine configuration.
//!
//! Options are plain serde structs so they can be loaded from JSON or built
//! in code. Call `sanitize()` (done automatically by the components) before
//! any work starts.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Top-level options for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineOptions {
    pub pool: PoolOptions,
    pub pipeline: PipelineOptions,
    pub guard: GuardOptions,
}

impl EngineOptions {
    /// Parse options from a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.sanitize()?;
        Ok(options)
    }

    /// Read and parse a JSON options file.
    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn sanitize(&self) -> EngineResult<()> {
        self.pool.sanitize()?;
        self.pipeline.sanitize()?;
        self.guard.sanitize()
    }
}

/// Worker pool options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PoolOptions {
    /// Number of worker loops started per run. Must be >= 1.
    pub concurrency: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

impl PoolOptions {
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self { concurrency }
    }

    pub fn sanitize(&self) -> EngineResult<()> {
        if self.concurrency == 0 {
            return Err(EngineError::InvalidConfiguration(
                "pool concurrency must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Pipeline options.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineOptions {
    /// Buffer size of every inter-stage link. 0 means rendezvous: a sender
    /// waits until the next stage has taken the value.
    pub link_capacity: usize,
    /// Upper bound on one transform call, applied to every stage that does
    /// not set its own. `None` lets transforms run until cancellation.
    pub stage_timeout_ms: Option<u64>,
}

impl PipelineOptions {
    /// Largest buffer accepted per link.
    pub const MAX_LINK_CAPACITY: usize = 1 << 20;

    pub fn with_link_capacity(link_capacity: usize) -> Self {
        Self {
            link_capacity,
            ..Default::default()
        }
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_ms.map(Duration::from_millis)
    }

    pub fn sanitize(&self) -> EngineResult<()> {
        if self.link_capacity > Self::MAX_LINK_CAPACITY {
            return Err(EngineError::InvalidConfiguration(format!(
                "pipeline link_capacity {} exceeds maximum {}",
                self.link_capacity,
                Self::MAX_LINK_CAPACITY
            )));
        }
        if self.stage_timeout_ms == Some(0) {
            return Err(EngineError::InvalidConfiguration(
                "pipeline stage_timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Timeout guard options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GuardOptions {
    /// Default guard duration in milliseconds.
    pub timeout_ms: u64,
}

impl Default for GuardOptions {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

impl GuardOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn sanitize(&self) -> EngineResult<()> {
        if self.timeout_ms == 0 {
            return Err(EngineError::InvalidConfiguration(
                "guard timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let options = EngineOptions::default();
        assert!(options.sanitize().is_ok());
        assert!(options.pool.concurrency >= 1);
        assert_eq!(options.pipeline.link_capacity, 0);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = PoolOptions::with_concurrency(0).sanitize().unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let options = EngineOptions::from_json_str(r#"{"pool": {"concurrency": 3}}"#).unwrap();
        assert_eq!(options.pool.concurrency, 3);
        assert_eq!(options.guard, GuardOptions::default());
    }

    #[test]
    fn test_invalid_json_values_rejected() {
        let err = EngineOptions::from_json_str(r#"{"guard": {"timeout_ms": 0}}"#).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfiguration(_)));

        let err = EngineOptions::from_json_str("not json").unwrap_err();
        assert!(matches!(err, EngineError::Json(_)));
    }

    #[test]
    fn test_stage_timeout_option() {
        let options =
            EngineOptions::from_json_str(r#"{"pipeline": {"stage_timeout_ms": 250}}"#).unwrap();
        assert_eq!(
            options.pipeline.stage_timeout(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(PipelineOptions::default().stage_timeout(), None);

        let err = EngineOptions::from_json_str(r#"{"pipeline": {"stage_timeout_ms": 0}}"#)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"pipeline": {{"link_capacity": 8}}}}"#).unwrap();

        let options = EngineOptions::from_file(file.path()).unwrap();
        assert_eq!(options.pipeline.link_capacity, 8);
    }
}
