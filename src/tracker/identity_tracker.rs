//! Nearest-centroid identity tracker.

use std::collections::{BTreeMap, HashSet};

use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::tracker::identity::TrackedIdentity;
use crate::tracker::matching::{
    self, AssignmentResult, ClassLabel, Detection, distance_matrix, order_detections,
};

/// How new detections are assigned to previous-cycle identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// One greedy nearest-neighbour pass in detection order.
    #[default]
    Greedy,
    /// Minimum total distance over all pairs.
    Optimal,
}

/// Configuration for the IdentityTracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Maximum centroid displacement, in pixels, for a match
    pub match_distance_px: f32,
    /// Trajectory points kept per identity
    pub history_capacity: usize,
    pub strategy: MatchStrategy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            match_distance_px: 50.0,
            history_capacity: 30,
            strategy: MatchStrategy::Greedy,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.match_distance_px.is_finite() && self.match_distance_px > 0.0) {
            return Err(ConfigError::invalid(format!(
                "tracking.match_distance_px must be positive, got {}",
                self.match_distance_px
            )));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::invalid(
                "tracking.history_capacity must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Result of matching one detection in a cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackUpdate {
    pub id: u64,
    pub class: ClassLabel,
    /// Centroid in the previous cycle; `None` for a new identity
    pub previous: Option<Point2<f32>>,
    pub current: Point2<f32>,
}

impl TrackUpdate {
    #[inline]
    pub fn is_new(&self) -> bool {
        self.previous.is_none()
    }
}

/// Assigns stable integer ids to detections across cycles.
///
/// Identities live only as long as they keep matching: an identity that
/// is not matched in a cycle is dropped when the cycle ends.
pub struct IdentityTracker {
    identities: BTreeMap<u64, TrackedIdentity>,
    /// Previous-cycle centroids not yet claimed this cycle, ordered by id
    candidates: Vec<(u64, Point2<f32>)>,
    matched: HashSet<u64>,
    next_id: u64,
    config: TrackerConfig,
}

impl IdentityTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            identities: BTreeMap::new(),
            candidates: Vec::new(),
            matched: HashSet::new(),
            next_id: 1,
            config,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Open a matching cycle: every current identity becomes a candidate.
    pub fn begin_cycle(&mut self) {
        self.candidates = self
            .identities
            .values()
            .map(|ident| (ident.id, ident.current))
            .collect();
        self.matched.clear();
    }

    /// Match a single detection centroid against the unclaimed candidates
    /// of this cycle, returning the existing or newly allocated id.
    pub fn match_centroid(&mut self, centroid: Point2<f32>, class: ClassLabel) -> u64 {
        let mut best: Option<(usize, f32)> = None;
        for (idx, (_, candidate)) in self.candidates.iter().enumerate() {
            let dist = nalgebra::distance(&centroid, candidate);
            if best.is_none_or(|(_, b)| dist < b) {
                best = Some((idx, dist));
            }
        }

        let id = match best {
            Some((idx, dist)) if dist <= self.config.match_distance_px => {
                let (id, _) = self.candidates.remove(idx);
                self.observe(id, class, centroid);
                id
            }
            _ => self.allocate(class, centroid),
        };
        self.matched.insert(id);
        id
    }

    /// Append a centroid to an identity's bounded history.
    pub fn update_trajectory(&mut self, id: u64, centroid: Point2<f32>) {
        if let Some(ident) = self.identities.get_mut(&id) {
            ident.trajectory.push(centroid);
        }
    }

    /// Drop every identity not present in `active`. Returns the removed ids.
    pub fn clear_stale(&mut self, active: &HashSet<u64>) -> Vec<u64> {
        let stale: Vec<u64> = self
            .identities
            .keys()
            .filter(|id| !active.contains(id))
            .copied()
            .collect();
        for id in &stale {
            self.identities.remove(id);
        }
        if !stale.is_empty() {
            trace!(removed = stale.len(), "dropped unmatched identities");
        }
        stale
    }

    /// Run a full matching cycle over one detector output.
    pub fn update(&mut self, detections: &[Detection]) -> Vec<TrackUpdate> {
        let mut ordered = detections.to_vec();
        order_detections(&mut ordered);

        self.begin_cycle();

        let ids: Vec<u64> = match self.config.strategy {
            MatchStrategy::Greedy => ordered
                .iter()
                .map(|det| self.match_centroid(det.centroid(), det.class))
                .collect(),
            MatchStrategy::Optimal => self.match_optimal(&ordered),
        };

        let mut updates = Vec::with_capacity(ids.len());
        for (det, id) in ordered.iter().zip(ids) {
            self.update_trajectory(id, det.centroid());
            if let Some(ident) = self.identities.get(&id) {
                updates.push(TrackUpdate {
                    id,
                    class: ident.class,
                    previous: ident.previous,
                    current: ident.current,
                });
            }
        }

        let active = std::mem::take(&mut self.matched);
        self.clear_stale(&active);
        self.matched = active;
        self.candidates.clear();

        updates
    }

    fn match_optimal(&mut self, ordered: &[Detection]) -> Vec<u64> {
        let centroids: Vec<Point2<f32>> = ordered.iter().map(|d| d.centroid()).collect();
        let candidate_points: Vec<Point2<f32>> = self.candidates.iter().map(|(_, p)| *p).collect();
        let cost = distance_matrix(&centroids, &candidate_points);

        let AssignmentResult { matches, .. } =
            matching::linear_assignment(&cost, self.config.match_distance_px);

        let mut assigned: Vec<Option<u64>> = vec![None; ordered.len()];
        for (row, col) in matches {
            let (id, _) = self.candidates[col];
            self.observe(id, ordered[row].class, centroids[row]);
            self.matched.insert(id);
            assigned[row] = Some(id);
        }

        assigned
            .into_iter()
            .enumerate()
            .map(|(row, id)| match id {
                Some(id) => id,
                None => {
                    let id = self.allocate(ordered[row].class, centroids[row]);
                    self.matched.insert(id);
                    id
                }
            })
            .collect()
    }

    fn observe(&mut self, id: u64, class: ClassLabel, centroid: Point2<f32>) {
        if let Some(ident) = self.identities.get_mut(&id) {
            ident.observe(class, centroid);
        }
    }

    fn allocate(&mut self, class: ClassLabel, centroid: Point2<f32>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.identities.insert(
            id,
            TrackedIdentity::new(id, class, centroid, self.config.history_capacity),
        );
        id
    }

    pub fn identity(&self, id: u64) -> Option<&TrackedIdentity> {
        self.identities.get(&id)
    }

    /// Currently tracked identities in id order.
    pub fn identities(&self) -> impl Iterator<Item = &TrackedIdentity> {
        self.identities.values()
    }

    /// Drop every identity. Ids already handed out are never reused.
    pub fn reset(&mut self) {
        if !self.identities.is_empty() {
            debug!(dropped = self.identities.len(), "tracker reset");
        }
        self.identities.clear();
        self.candidates.clear();
        self.matched.clear();
    }

    /// Ids matched in the most recent cycle.
    pub fn active_ids(&self) -> &HashSet<u64> {
        &self.matched
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}
