//! Burn inference backend for object detection.
//!
//! # Example
//!
//! ```ignore
//! use linecount_rs::integration::{BurnDetector, BurnModel, RawDetection};
//! use burn::backend::NdArray;
//!
//! struct MyYoloModel { /* ... */ }
//!
//! impl BurnModel<NdArray> for MyYoloModel {
//!     fn forward(&self, input: burn::tensor::Tensor<NdArray, 4>) -> Vec<RawDetection> {
//!         // Run inference
//!     }
//! }
//!
//! let detector = BurnDetector::new(MyYoloModel::load("model.bin"), Default::default());
//! ```

use burn::prelude::*;
use burn::tensor::Tensor;
use thiserror::Error;
use tracing::trace;

use super::{DetectionBuilder, ObjectDetector};
use crate::source::Frame;
use crate::tracker::Detection;

#[derive(Debug, Clone, Error)]
pub enum BurnDetectorError {
    /// Frame size does not match the model input.
    #[error("frame is {got:?} (w, h), model expects {expected:?}")]
    InvalidInputDimensions {
        expected: (u32, u32),
        got: (u32, u32),
    },
}

/// Raw detection output from the model.
#[derive(Debug, Clone)]
pub struct RawDetection {
    /// `[x1, y1, x2, y2]` or `[cx, cy, w, h]` depending on the model
    pub bbox: [f32; 4],
    pub score: f32,
    /// COCO-80 class index
    pub class_id: usize,
}

/// Trait for Burn-based detection models.
pub trait BurnModel<B: Backend>: Send + Sync {
    /// Run forward pass on a `[batch, channels, height, width]` tensor.
    fn forward(&self, input: Tensor<B, 4>) -> Vec<RawDetection>;

    /// Expected input size (width, height).
    fn input_size(&self) -> (u32, u32) {
        (640, 640)
    }

    /// Whether bbox output is in XYWH format (vs TLBR).
    fn bbox_is_xywh(&self) -> bool {
        true
    }
}

/// Burn-based object detector.
pub struct BurnDetector<B: Backend, M: BurnModel<B>> {
    model: M,
    device: B::Device,
    conf_threshold: f32,
}

impl<B: Backend, M: BurnModel<B>> BurnDetector<B, M> {
    pub fn new(model: M, device: B::Device) -> Self {
        Self {
            model,
            device,
            conf_threshold: 0.25,
        }
    }

    /// Pre-filter raw outputs before they reach the pipeline's own filter.
    pub fn with_conf_threshold(mut self, threshold: f32) -> Self {
        self.conf_threshold = threshold;
        self
    }

    /// Convert an HWC RGB frame into a normalized `[1, 3, H, W]` tensor.
    pub fn preprocess(&self, frame: &Frame) -> Result<Tensor<B, 4>, BurnDetectorError> {
        let expected = self.model.input_size();
        let got = frame.dimensions();
        if got != expected {
            return Err(BurnDetectorError::InvalidInputDimensions { expected, got });
        }

        let (w, h) = (got.0 as usize, got.1 as usize);
        let chw = frame.pixels().permuted_axes([2, 0, 1]);
        let data: Vec<f32> = chw.iter().map(|&x| x as f32 / 255.0).collect();

        Ok(Tensor::<B, 1>::from_floats(data.as_slice(), &self.device).reshape([1, 3, h, w]))
    }

    fn postprocess(&self, raw: Vec<RawDetection>) -> Vec<Detection> {
        let total = raw.len();
        let detections: Vec<Detection> = raw
            .into_iter()
            .filter(|d| d.score >= self.conf_threshold)
            .filter_map(|d| {
                let builder = DetectionBuilder::new().score(d.score).coco_class(d.class_id);
                let [a, b, c, e] = d.bbox;
                if self.model.bbox_is_xywh() {
                    builder.xywh(a, b, c, e).build()
                } else {
                    builder.tlbr(a, b, c, e).build()
                }
            })
            .collect();
        trace!(raw = total, kept = detections.len(), "burn postprocess");
        detections
    }
}

impl<B: Backend, M: BurnModel<B>> ObjectDetector for BurnDetector<B, M> {
    type Error = BurnDetectorError;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Self::Error> {
        let tensor = self.preprocess(frame)?;
        let raw = self.model.forward(tensor);
        Ok(self.postprocess(raw))
    }
}
