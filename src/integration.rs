//! Connects object detection backends to tracking and line counting.
//!
//! This module provides the detector traits, the per-cycle detection
//! filter, and [`CountingPipeline`], which runs detect → track → count →
//! aggregate for one video source.

mod builder;
mod detector;
mod filter;
mod pipeline;

pub use builder::DetectionBuilder;
pub use detector::{DetectorLoader, IntoDetections, ObjectDetector};
pub use filter::{DetectionConfig, DetectionFilter, DetectionThrottle};
pub use pipeline::{CountingPipeline, CycleOutcome};

#[cfg(feature = "burn-backend")]
mod burn_backend;

#[cfg(feature = "burn-backend")]
pub use burn_backend::{BurnDetector, BurnDetectorError, BurnModel, RawDetection};
