//! Detection inputs and centroid-distance assignment for identity tracking.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use nalgebra::Point2;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::tracker::bbox::BBox;

/// Object classes the counting pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassLabel {
    Car,
    Bus,
    Truck,
    Motorcycle,
    Bicycle,
    Person,
}

impl ClassLabel {
    pub const COUNT: usize = 6;

    pub const ALL: [ClassLabel; Self::COUNT] = [
        ClassLabel::Car,
        ClassLabel::Bus,
        ClassLabel::Truck,
        ClassLabel::Motorcycle,
        ClassLabel::Bicycle,
        ClassLabel::Person,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Car => "car",
            Self::Bus => "bus",
            Self::Truck => "truck",
            Self::Motorcycle => "motorcycle",
            Self::Bicycle => "bicycle",
            Self::Person => "person",
        }
    }

    /// Map a COCO-80 class index onto the vocabulary.
    pub fn from_coco_id(id: usize) -> Option<Self> {
        match id {
            0 => Some(Self::Person),
            1 => Some(Self::Bicycle),
            2 => Some(Self::Car),
            3 => Some(Self::Motorcycle),
            5 => Some(Self::Bus),
            7 => Some(Self::Truck),
            _ => None,
        }
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a class name is outside the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownClass(pub String);

impl fmt::Display for UnknownClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown class label: {}", self.0)
    }
}

impl std::error::Error for UnknownClass {}

impl FromStr for ClassLabel {
    type Err = UnknownClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "car" => Ok(Self::Car),
            "bus" => Ok(Self::Bus),
            "truck" => Ok(Self::Truck),
            "motorcycle" | "motorbike" => Ok(Self::Motorcycle),
            "bicycle" => Ok(Self::Bicycle),
            "person" => Ok(Self::Person),
            _ => Err(UnknownClass(s.to_string())),
        }
    }
}

/// Detection input for the tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    /// Bounding box in pixel TLBR form
    pub bbox: BBox,
    pub class: ClassLabel,
    /// Detection confidence in [0, 1]
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BBox, class: ClassLabel, confidence: f32) -> Self {
        Self {
            bbox,
            class,
            confidence,
        }
    }

    #[inline]
    pub fn centroid(&self) -> Point2<f32> {
        self.bbox.centroid()
    }
}

/// Sort detections into the order the tracker consumes them: highest
/// confidence first, then left to right, then top to bottom.
///
/// Detector output order is unspecified, and with greedy matching the
/// order decides which detection claims a contested identity.
pub fn order_detections(detections: &mut [Detection]) {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                let (ca, cb) = (a.centroid(), b.centroid());
                ca.x.partial_cmp(&cb.x)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| ca.y.partial_cmp(&cb.y).unwrap_or(Ordering::Equal))
            })
    });
}

/// Euclidean distance matrix of shape (detections, candidates).
pub fn distance_matrix(detections: &[Point2<f32>], candidates: &[Point2<f32>]) -> Array2<f32> {
    let mut dists = Array2::zeros((detections.len(), candidates.len()));
    for (i, d) in detections.iter().enumerate() {
        for (j, c) in candidates.iter().enumerate() {
            dists[[i, j]] = nalgebra::distance(d, c);
        }
    }
    dists
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentResult {
    /// (detection row, candidate column) pairs
    pub matches: Vec<(usize, usize)>,
    pub unmatched_detections: Vec<usize>,
    pub unmatched_candidates: Vec<usize>,
}

impl AssignmentResult {
    fn from_mask(matches: Vec<(usize, usize)>, rows: usize, cols: usize) -> Self {
        let mut row_used = vec![false; rows];
        let mut col_used = vec![false; cols];
        for &(r, c) in &matches {
            row_used[r] = true;
            col_used[c] = true;
        }
        Self {
            matches,
            unmatched_detections: (0..rows).filter(|&r| !row_used[r]).collect(),
            unmatched_candidates: (0..cols).filter(|&c| !col_used[c]).collect(),
        }
    }
}

/// Greedy nearest-neighbour assignment in row order.
///
/// Each row claims the nearest unclaimed column if it lies within
/// `thresh`; a claimed column cannot match a second row. Equal distances
/// go to the lowest column index.
pub fn greedy_assignment(cost_matrix: &Array2<f32>, thresh: f32) -> AssignmentResult {
    let (num_rows, num_cols) = cost_matrix.dim();
    let mut claimed = vec![false; num_cols];
    let mut matches = Vec::new();

    for row in 0..num_rows {
        let mut best: Option<(usize, f32)> = None;
        for col in (0..num_cols).filter(|&c| !claimed[c]) {
            let cost = cost_matrix[[row, col]];
            if best.is_none_or(|(_, b)| cost < b) {
                best = Some((col, cost));
            }
        }

        if let Some((col, cost)) = best {
            if cost <= thresh {
                claimed[col] = true;
                matches.push((row, col));
            }
        }
    }

    AssignmentResult::from_mask(matches, num_rows, num_cols)
}

const GATED_COST: f64 = 1e5;
const PADDING_COST: f64 = 1e6;

/// Globally optimal assignment (Jonker-Volgenant) with distance gating.
///
/// Pairs further apart than `thresh` are never matched.
pub fn linear_assignment(cost_matrix: &Array2<f32>, thresh: f32) -> AssignmentResult {
    let (num_rows, num_cols) = cost_matrix.dim();

    if num_rows == 0 || num_cols == 0 {
        return AssignmentResult::from_mask(vec![], num_rows, num_cols);
    }

    let size = num_rows.max(num_cols);
    let mut padded = Array2::<f64>::from_elem((size, size), PADDING_COST);

    for i in 0..num_rows {
        for j in 0..num_cols {
            let cost = cost_matrix[[i, j]];
            padded[[i, j]] = if cost <= thresh {
                cost as f64
            } else {
                GATED_COST
            };
        }
    }

    let mut matches = vec![];
    match lapjv::lapjv(&padded) {
        Ok((row_to_col, _)) => {
            for (row_idx, &col_idx) in row_to_col.iter().enumerate() {
                if row_idx >= num_rows || col_idx >= num_cols {
                    continue;
                }
                if cost_matrix[[row_idx, col_idx]] <= thresh {
                    matches.push((row_idx, col_idx));
                }
            }
        }
        Err(err) => {
            tracing::warn!(?err, "linear assignment failed, falling back to greedy");
            return greedy_assignment(cost_matrix, thresh);
        }
    }

    AssignmentResult::from_mask(matches, num_rows, num_cols)
}
