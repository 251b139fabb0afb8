//! Pipeline configuration document.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregation::AggregatorConfig;
use crate::counting::LinesConfig;
use crate::error::ConfigError;
use crate::integration::DetectionConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::snapshot::SnapshotConfig;
use crate::source::CaptureConfig;
use crate::tracker::TrackerConfig;

/// Which camera to count and under what mode it reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Camera to pick from the provider; also the reporting name
    pub camera_name: Option<String>,
    pub mode: String,
    /// Fixed stream address, used when no camera provider is attached
    pub address: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            camera_name: None,
            mode: "traffic".to_string(),
            address: None,
        }
    }
}

/// Full configuration. Every section is optional in the document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub lines: LinesConfig,
    pub detection: DetectionConfig,
    pub tracking: TrackerConfig,
    pub capture: CaptureConfig,
    pub aggregation: AggregatorConfig,
    pub orchestrator: OrchestratorConfig,
    pub snapshots: Option<SnapshotConfig>,
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "loading configuration");
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.mode.trim().is_empty() {
            return Err(ConfigError::invalid("source.mode must not be empty"));
        }
        self.lines.validate()?;
        self.detection.validate()?;
        self.tracking.validate()?;
        self.capture.validate()?;
        self.aggregation.validate()?;
        self.orchestrator.validate()?;
        if let Some(snapshots) = &self.snapshots {
            snapshots.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::SummaryPolicy;
    use crate::integration::DetectionThrottle;
    use crate::tracker::{ClassLabel, MatchStrategy};

    #[test]
    fn test_partial_document_uses_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "source": {"camera_name": "gate-north", "address": "rtsp://10.1.1.5/stream"},
                "lines": {"up": [0.4, 0.5], "down": [0.6]}
            }"#,
        )
        .unwrap();

        assert_eq!(config.source.mode, "traffic");
        assert_eq!(config.lines.up, vec![0.4, 0.5]);
        assert_eq!(config.detection.confidence_threshold, 0.5);
        assert_eq!(config.detection.throttle, DetectionThrottle::MinIntervalMs(200));
        assert_eq!(config.tracking.match_distance_px, 50.0);
        assert_eq!(config.tracking.history_capacity, 30);
        assert_eq!(config.capture.target_fps, 15.0);
        assert_eq!(config.aggregation.reset_interval_secs, 20);
        assert_eq!(config.aggregation.flush_interval_secs, 300);
        assert_eq!(config.aggregation.summary, SummaryPolicy::BusiestLine);
        assert_eq!(config.orchestrator.max_restarts, 5);
        assert!(config.snapshots.is_none());
    }

    #[test]
    fn test_full_sections() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "lines": {"down": [0.5]},
                "detection": {"classes": ["car", "truck"], "throttle": {"every_n_cycles": 2}},
                "tracking": {"strategy": "optimal", "match_distance_px": 80.0},
                "aggregation": {"summary": "sum"},
                "snapshots": {"dir": "/tmp/shots"}
            }"#,
        )
        .unwrap();
        assert_eq!(config.detection.classes, vec![ClassLabel::Car, ClassLabel::Truck]);
        assert_eq!(config.tracking.strategy, MatchStrategy::Optimal);
        assert_eq!(config.aggregation.summary, SummaryPolicy::Sum);
        assert_eq!(config.snapshots.unwrap().queue_capacity, 16);
    }

    #[test]
    fn test_invalid_documents() {
        assert!(matches!(
            PipelineConfig::from_json_str(r#"{"lines": {"up": [1.5]}}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PipelineConfig::from_json_str(
                r#"{"lines": {"up": [0.5]}, "aggregation": {"reset_interval_secs": 0}}"#
            ),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PipelineConfig::from_json_str(
                r#"{"lines": {"up": [0.5]}, "detection": {"classes": []}}"#
            ),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PipelineConfig::from_json_str(
                r#"{"lines": {"up": [0.5]}, "detection": {"classes": ["tram"]}}"#
            ),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(PipelineConfig::from_json_str("{"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let json = r#"{"lines": {"up": [0.5]}, "capture": {"target_fps": 10.0}}"#;
        std::fs::write(&path, json).unwrap();
        assert_eq!(PipelineConfig::from_path(&path).unwrap().capture.target_fps, 10.0);
        assert!(matches!(
            PipelineConfig::from_path(dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }
}
