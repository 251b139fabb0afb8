//! Tracked identity state and its bounded trajectory.

use std::collections::VecDeque;

use nalgebra::Point2;

use crate::tracker::matching::ClassLabel;

/// Fixed-capacity centroid history. Pushing onto a full trajectory
/// evicts the oldest point.
#[derive(Debug, Clone)]
pub struct Trajectory {
    points: VecDeque<Point2<f32>>,
    capacity: usize,
}

impl Trajectory {
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a point, returning the evicted one when at capacity.
    pub fn push(&mut self, point: Point2<f32>) -> Option<Point2<f32>> {
        if self.capacity == 0 {
            return Some(point);
        }
        let evicted = if self.points.len() == self.capacity {
            self.points.pop_front()
        } else {
            None
        };
        self.points.push_back(point);
        evicted
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn latest(&self) -> Option<&Point2<f32>> {
        self.points.back()
    }

    /// Points from oldest to newest.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Point2<f32>> {
        self.points.iter()
    }
}

/// An object followed across detection cycles.
#[derive(Debug, Clone)]
pub struct TrackedIdentity {
    /// Unique, never reused within a tracker
    pub id: u64,
    /// Class from the most recent matched detection
    pub class: ClassLabel,
    pub current: Point2<f32>,
    /// Centroid from the previous matched cycle, absent on first sighting
    pub previous: Option<Point2<f32>>,
    pub trajectory: Trajectory,
    /// Display color for renderers
    pub color: [u8; 3],
    /// Number of cycles this identity has been matched
    pub hits: u32,
}

impl TrackedIdentity {
    pub fn new(id: u64, class: ClassLabel, centroid: Point2<f32>, history: usize) -> Self {
        Self {
            id,
            class,
            current: centroid,
            previous: None,
            trajectory: Trajectory::with_capacity(history),
            color: identity_color(id),
            hits: 1,
        }
    }

    /// Record a new matched observation.
    pub fn observe(&mut self, class: ClassLabel, centroid: Point2<f32>) {
        self.previous = Some(self.current);
        self.current = centroid;
        self.class = class;
        self.hits = self.hits.saturating_add(1);
    }
}

/// Stable, well-spread RGB color for an identity id.
pub fn identity_color(id: u64) -> [u8; 3] {
    // Fibonacci hashing spreads consecutive ids across the hue circle.
    let hue = (id.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 40) as f32 / (1u64 << 24) as f32;
    let h = hue * 6.0;
    let x = 1.0 - (h % 2.0 - 1.0).abs();
    let (r, g, b) = match h as u32 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };
    [(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8]
}
