//! Builder for creating Detection objects from raw model outputs.

use crate::tracker::{BBox, ClassLabel, Detection};

/// Builder for creating `Detection` objects from various box formats.
#[derive(Debug, Clone, Default)]
pub struct DetectionBuilder {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
    class: Option<ClassLabel>,
}

impl DetectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set bounding box in TLBR format (x1, y1, x2, y2).
    pub fn tlbr(mut self, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        self.x1 = x1;
        self.y1 = y1;
        self.x2 = x2;
        self.y2 = y2;
        self
    }

    /// Set bounding box in XYWH format (center_x, center_y, width, height).
    pub fn xywh(mut self, cx: f32, cy: f32, w: f32, h: f32) -> Self {
        self.x1 = cx - w / 2.0;
        self.y1 = cy - h / 2.0;
        self.x2 = cx + w / 2.0;
        self.y2 = cy + h / 2.0;
        self
    }

    /// Set bounding box in TLWH format (left, top, width, height).
    pub fn tlwh(mut self, l: f32, t: f32, w: f32, h: f32) -> Self {
        self.x1 = l;
        self.y1 = t;
        self.x2 = l + w;
        self.y2 = t + h;
        self
    }

    pub fn score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    pub fn class(mut self, class: ClassLabel) -> Self {
        self.class = Some(class);
        self
    }

    /// Set the class from a COCO-80 class index. Indices outside the
    /// vocabulary leave the class unset.
    pub fn coco_class(mut self, class_id: usize) -> Self {
        self.class = ClassLabel::from_coco_id(class_id);
        self
    }

    /// Build the final `Detection`. `None` when the class is unset or the
    /// box is degenerate after rounding to pixels.
    pub fn build(self) -> Option<Detection> {
        let class = self.class?;
        let bbox = BBox::from_tlbr(self.x1, self.y1, self.x2, self.y2)?;
        Some(Detection::new(bbox, class, self.score.clamp(0.0, 1.0)))
    }
}
