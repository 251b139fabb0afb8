mod bbox;
mod identity;
mod identity_tracker;
mod matching;

pub use bbox::BBox;
pub use identity::{TrackedIdentity, Trajectory, identity_color};
pub use identity_tracker::{IdentityTracker, MatchStrategy, TrackUpdate, TrackerConfig};
pub use matching::{
    AssignmentResult, ClassLabel, Detection, UnknownClass, distance_matrix, greedy_assignment,
    linear_assignment, order_detections,
};
