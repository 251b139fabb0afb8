use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::ConfigError;
use crate::tracker::{ClassLabel, Detection};

/// How often the detector runs relative to the main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionThrottle {
    /// Run on every n-th cycle that has a fresh frame
    EveryNCycles(u32),
    /// Run at most once per interval
    MinIntervalMs(u64),
}

impl Default for DetectionThrottle {
    fn default() -> Self {
        Self::MinIntervalMs(200)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub confidence_threshold: f32,
    /// Classes kept after detection; everything else is dropped
    pub classes: Vec<ClassLabel>,
    pub throttle: DetectionThrottle,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            classes: ClassLabel::ALL.to_vec(),
            throttle: DetectionThrottle::default(),
        }
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::invalid(format!(
                "detection.confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.classes.is_empty() {
            return Err(ConfigError::invalid("detection.classes must not be empty"));
        }
        if self.throttle == DetectionThrottle::EveryNCycles(0) {
            return Err(ConfigError::invalid(
                "detection.throttle.every_n_cycles must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Drops detections below the confidence threshold or outside the class
/// vocabulary.
#[derive(Debug, Clone)]
pub struct DetectionFilter {
    threshold: f32,
    allowed: [bool; ClassLabel::COUNT],
}

impl DetectionFilter {
    pub fn new(config: &DetectionConfig) -> Self {
        let mut allowed = [false; ClassLabel::COUNT];
        for class in &config.classes {
            allowed[class.index()] = true;
        }
        Self {
            threshold: config.confidence_threshold,
            allowed,
        }
    }

    #[inline]
    pub fn accepts(&self, detection: &Detection) -> bool {
        detection.confidence >= self.threshold && self.allowed[detection.class.index()]
    }

    pub fn apply(&self, mut detections: Vec<Detection>) -> Vec<Detection> {
        let before = detections.len();
        detections.retain(|d| self.accepts(d));
        if detections.len() != before {
            trace!(
                kept = detections.len(),
                dropped = before - detections.len(),
                "detections filtered"
            );
        }
        detections
    }
}

impl Default for DetectionFilter {
    fn default() -> Self {
        Self::new(&DetectionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::BBox;

    fn det(class: ClassLabel, confidence: f32) -> Detection {
        Detection::new(BBox::new(0, 0, 10, 10).unwrap(), class, confidence)
    }

    #[test]
    fn test_threshold_and_vocabulary() {
        let filter = DetectionFilter::new(&DetectionConfig {
            confidence_threshold: 0.5,
            classes: vec![ClassLabel::Car, ClassLabel::Truck],
            ..DetectionConfig::default()
        });

        let kept = filter.apply(vec![
            det(ClassLabel::Car, 0.9),
            det(ClassLabel::Car, 0.49),
            det(ClassLabel::Truck, 0.5),
            det(ClassLabel::Person, 0.99),
        ]);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|d| d.class != ClassLabel::Person));
    }

    #[test]
    fn test_throttle_serde() {
        let config: DetectionConfig =
            serde_json::from_str(r#"{"throttle": {"every_n_cycles": 3}}"#).unwrap();
        assert_eq!(config.throttle, DetectionThrottle::EveryNCycles(3));
        assert_eq!(config.classes.len(), ClassLabel::COUNT);

        let bad = DetectionConfig {
            throttle: DetectionThrottle::EveryNCycles(0),
            ..DetectionConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
