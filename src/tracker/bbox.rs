/// Pixel-space bounding box with centroid helpers.
///
/// Boxes are stored in TLBR form (x1, y1, x2, y2) as integer pixel
/// coordinates. A valid box always satisfies `x1 < x2` and `y1 < y2`;
/// the constructors refuse anything else.
use nalgebra::Point2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BBox {
    /// Create a box from TLBR corners, or `None` if it is degenerate.
    #[inline]
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Option<Self> {
        (x1 < x2 && y1 < y2).then_some(Self { x1, y1, x2, y2 })
    }

    /// Create a box from float TLBR corners, rounding to the nearest pixel.
    #[inline]
    pub fn from_tlbr(x1: f32, y1: f32, x2: f32, y2: f32) -> Option<Self> {
        Self::new(
            x1.round() as i32,
            y1.round() as i32,
            x2.round() as i32,
            y2.round() as i32,
        )
    }

    /// Create a box from center x, center y, width and height.
    #[inline]
    pub fn from_xywh(cx: f32, cy: f32, w: f32, h: f32) -> Option<Self> {
        Self::from_tlbr(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    /// Create a box from top-left x, top-left y, width and height.
    #[inline]
    pub fn from_tlwh(x: f32, y: f32, w: f32, h: f32) -> Option<Self> {
        Self::from_tlbr(x, y, x + w, y + h)
    }

    #[inline]
    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    #[inline]
    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    #[inline]
    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    /// Center of the box in pixel coordinates.
    #[inline]
    pub fn centroid(&self) -> Point2<f32> {
        Point2::new(
            (self.x1 + self.x2) as f32 / 2.0,
            (self.y1 + self.y2) as f32 / 2.0,
        )
    }

    /// Clip the box to a `width` x `height` frame. Returns `None` when
    /// nothing of the box remains inside the frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        let (w, h) = (width as i32, height as i32);
        Self::new(
            self.x1.clamp(0, w),
            self.y1.clamp(0, h),
            self.x2.clamp(0, w),
            self.y2.clamp(0, h),
        )
    }

    #[inline]
    pub fn to_tlbr(&self) -> [i32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_degenerate_boxes() {
        assert!(BBox::new(10, 10, 10, 20).is_none());
        assert!(BBox::new(10, 20, 30, 5).is_none());
        assert!(BBox::new(0, 0, 1, 1).is_some());
    }

    #[test]
    fn test_conversions() {
        let b = BBox::from_xywh(25.0, 40.0, 30.0, 40.0).unwrap();
        assert_eq!(b.to_tlbr(), [10, 20, 40, 60]);

        let b = BBox::from_tlwh(10.0, 20.0, 30.0, 40.0).unwrap();
        assert_eq!(b.to_tlbr(), [10, 20, 40, 60]);
        assert_eq!(b.width(), 30);
        assert_eq!(b.height(), 40);
        assert_eq!(b.area(), 1200);
    }

    #[test]
    fn test_centroid() {
        let b = BBox::new(10, 20, 40, 61).unwrap();
        let c = b.centroid();
        assert_eq!(c.x, 25.0);
        assert_eq!(c.y, 40.5);
    }

    #[test]
    fn test_clamp_to_frame() {
        let b = BBox::new(-10, -5, 50, 70).unwrap();
        assert_eq!(b.clamp_to(40, 60).unwrap().to_tlbr(), [0, 0, 40, 60]);

        let outside = BBox::new(100, 100, 120, 130).unwrap();
        assert!(outside.clamp_to(40, 60).is_none());
    }
}
