//! Object tracking and directional line-crossing counting over unreliable
//! video streams.
//!
//! Frames are captured on a background thread ([`FrameSource`]), run
//! through an [`ObjectDetector`] at a throttled cadence, matched to stable
//! identities by nearest centroid ([`IdentityTracker`]), checked against
//! horizontal counting lines ([`LineCrossingCounter`]), and aggregated
//! into periodic totals handed to a [`CountsSink`]
//! ([`WindowedAggregator`]). [`Orchestrator`] ties the stages together
//! and restarts them when the source fails for good.

pub mod aggregation;
pub mod config;
pub mod counting;
pub mod error;
pub mod integration;
pub mod logging;
pub mod orchestrator;
pub mod snapshot;
pub mod source;
pub mod tracker;

pub use aggregation::{CountsSink, SummaryPolicy, TimeoutSink, Totals, WindowedAggregator};
pub use config::PipelineConfig;
pub use counting::{CrossingEvent, Direction, LineCrossingCounter, LineId, LineSet};
pub use error::{ConfigError, DetectionError, PipelineError, SinkError, SourceError};
pub use integration::{CountingPipeline, ObjectDetector};
pub use orchestrator::{Orchestrator, PipelineState, PipelineStats};
pub use source::{Frame, FrameSource, VideoBackend, VideoStream};
pub use tracker::{BBox, ClassLabel, Detection, IdentityTracker};
