//! Error types for every stage of the counting pipeline.

use std::time::Duration;

use thiserror::Error;

/// Failures while opening or reading a video source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source could not be opened.
    #[error("failed to open source {address}: {reason}")]
    Open { address: String, reason: String },

    /// A single frame read failed.
    #[error("frame read failed: {0}")]
    Read(String),

    /// An operation against the source did not finish in time.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// Reconnection budget used up; the source will not be retried.
    #[error("source exhausted after {attempts} reconnection attempts")]
    Exhausted { attempts: u32 },

    /// The camera provider could not be queried.
    #[error("camera directory unavailable: {0}")]
    Directory(String),
}

impl SourceError {
    pub fn open(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Open {
            address: address.into(),
            reason: reason.into(),
        }
    }

    pub fn read(msg: impl Into<String>) -> Self {
        Self::Read(msg.into())
    }
}

/// Failures while loading the object detector. Inference failures use
/// the detector's own error type.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("detector load failed: {0}")]
    Load(String),
}

/// Failures while handing accumulated totals to the external sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink answered but refused the payload.
    #[error("sink rejected counts: {0}")]
    Rejected(String),

    /// The sink could not be reached.
    #[error("sink transport error: {0}")]
    Transport(String),

    #[error("sink call timed out after {0:?}")]
    Timeout(Duration),

    /// A previous call is still outstanding.
    #[error("previous sink call still in flight")]
    Busy,

    #[error("failed to serialize counts: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Top-level error surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Detection(#[from] DetectionError),

    #[error("no camera resolved for mode {mode}")]
    NoCameraResolved { mode: String },

    #[error("gave up after {attempts} pipeline restarts")]
    RestartBudgetExhausted { attempts: u32 },

    #[error("snapshot writer failed to start: {0}")]
    Snapshot(std::io::Error),
}
