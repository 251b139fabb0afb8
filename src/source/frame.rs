use std::time::Instant;

use ndarray::{Array3, ArrayView3};

use crate::error::SourceError;

/// One decoded RGB frame, stored row-major as `(height, width, 3)`.
#[derive(Debug, Clone)]
pub struct Frame {
    pixels: Array3<u8>,
    captured_at: Instant,
    sequence: u64,
}

impl Frame {
    pub fn new(pixels: Array3<u8>, captured_at: Instant) -> Self {
        Self {
            pixels,
            captured_at,
            sequence: 0,
        }
    }

    /// Build a frame from packed RGB8 bytes.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self, SourceError> {
        let shape = (height as usize, width as usize, 3);
        let pixels = Array3::from_shape_vec(shape, data).map_err(|e| {
            SourceError::read(format!("frame buffer does not match {width}x{height} RGB: {e}"))
        })?;
        Ok(Self::new(pixels, Instant::now()))
    }

    /// All-black frame of the given size.
    pub fn blank(width: u32, height: u32) -> Self {
        Self::new(
            Array3::zeros((height as usize, width as usize, 3)),
            Instant::now(),
        )
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.pixels.dim().1 as u32
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.pixels.dim().0 as u32
    }

    /// `(width, height)`
    #[inline]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    pub fn pixels(&self) -> ArrayView3<'_, u8> {
        self.pixels.view()
    }

    /// Packed RGB8 bytes in row-major order.
    pub fn to_rgb_vec(&self) -> Vec<u8> {
        self.pixels.iter().copied().collect()
    }

    /// Monotonic number assigned by the capture thread.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub(crate) fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }
}
