//! Traits for object detection inference backends.

use std::fmt::Display;

use crate::error::DetectionError;
use crate::source::Frame;
use crate::tracker::Detection;

/// Object detector consumed by the counting pipeline.
///
/// Implement this trait to connect any detection model.
///
/// # Example
///
/// ```ignore
/// use linecount_rs::{Detection, Frame, ObjectDetector};
///
/// struct MyDetector {
///     // Your model here
/// }
///
/// impl ObjectDetector for MyDetector {
///     type Error = std::io::Error;
///
///     fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Self::Error> {
///         // Run inference and return detections
///         Ok(vec![])
///     }
/// }
/// ```
pub trait ObjectDetector {
    /// Error type for detection failures.
    type Error: Display;

    /// Run inference on one frame.
    ///
    /// Detections may come back in any order and may include classes or
    /// confidences the pipeline filters out afterwards.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Self::Error>;
}

impl<D: ObjectDetector + ?Sized> ObjectDetector for Box<D> {
    type Error = D::Error;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Self::Error> {
        (**self).detect(frame)
    }
}

/// Helper trait for converting model-specific outputs to `Detection`.
pub trait IntoDetections {
    fn into_detections(self) -> Vec<Detection>;
}

impl IntoDetections for Vec<Detection> {
    fn into_detections(self) -> Vec<Detection> {
        self
    }
}

/// Builds a fresh detector each time the pipeline (re)initializes.
pub trait DetectorLoader {
    type Detector: ObjectDetector;

    fn load(&mut self) -> Result<Self::Detector, DetectionError>;
}

impl<F, D> DetectorLoader for F
where
    F: FnMut() -> Result<D, DetectionError>,
    D: ObjectDetector,
{
    type Detector = D;

    fn load(&mut self) -> Result<D, DetectionError> {
        self()
    }
}
