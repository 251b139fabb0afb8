use std::fmt;

/// Lifecycle of the counting pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    /// Resolving the camera, loading the detector and opening the source
    Initializing,
    Running,
    /// Capture thread is re-opening the source
    Reconnecting,
    /// Torn down, waiting out the restart backoff
    Restarting,
    Terminated,
}

impl PipelineState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Reconnecting => "reconnecting",
            Self::Restarting => "restarting",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running totals since the orchestrator was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub cycles: u64,
    /// Cycles in which the detector ran
    pub detection_cycles: u64,
    pub detection_failures: u64,
    pub crossings: u64,
    pub flushes_ok: u64,
    pub flushes_failed: u64,
    pub restarts: u64,
}
