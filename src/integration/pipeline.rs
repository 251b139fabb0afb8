//! CountingPipeline for combining detection, tracking and counting.

use std::time::Instant;

use tracing::{debug, info};

use crate::aggregation::{CountsSink, TickReport, WindowedAggregator};
use crate::config::PipelineConfig;
use crate::counting::{CrossingEvent, LineCrossingCounter, LineSet, ResolvedLines};
use crate::error::ConfigError;
use crate::source::Frame;
use crate::tracker::{Detection, IdentityTracker, TrackUpdate};

use super::{DetectionFilter, ObjectDetector};

/// What one detection cycle produced.
#[derive(Debug, Clone, Default)]
pub struct CycleOutcome {
    pub updates: Vec<TrackUpdate>,
    pub events: Vec<CrossingEvent>,
}

/// Detector, tracker, line counter and aggregator for one video source.
///
/// Everything here is owned by the thread driving the pipeline; nothing
/// is shared with the capture thread.
pub struct CountingPipeline<D: ObjectDetector> {
    detector: D,
    filter: DetectionFilter,
    tracker: IdentityTracker,
    lines: LineSet,
    resolved: Option<ResolvedLines>,
    counter: LineCrossingCounter,
    aggregator: WindowedAggregator,
    last_detections: Vec<Detection>,
}

impl<D: ObjectDetector> CountingPipeline<D> {
    pub fn new(
        detector: D,
        filter: DetectionFilter,
        tracker: IdentityTracker,
        lines: LineSet,
        aggregator: WindowedAggregator,
    ) -> Self {
        Self {
            counter: LineCrossingCounter::new(&lines),
            detector,
            filter,
            tracker,
            lines,
            resolved: None,
            aggregator,
            last_detections: Vec::new(),
        }
    }

    /// Build every stage from configuration. Aggregator timers start at `now`.
    pub fn from_config(
        detector: D,
        config: &PipelineConfig,
        now: Instant,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            detector,
            DetectionFilter::new(&config.detection),
            IdentityTracker::new(config.tracking.clone()),
            LineSet::new(&config.lines)?,
            WindowedAggregator::new(config.aggregation.clone(), now),
        ))
    }

    /// Re-derive line pixel rows if the frame height changed.
    ///
    /// Centroids from the old resolution are not comparable with new ones,
    /// so a height change also drops every identity and its crossed state.
    /// Counts already taken are kept.
    pub fn ensure_lines(&mut self, frame_height: u32) -> &ResolvedLines {
        let previous = self.resolved.as_ref().map(ResolvedLines::frame_height);
        if previous != Some(frame_height) {
            if let Some(previous) = previous {
                info!(from = previous, to = frame_height, "frame height changed, tracker reset");
                self.tracker.reset();
                self.counter.forget_stale(self.tracker.active_ids());
            }
            let resolved = self.lines.resolve(frame_height);
            info!(
                frame_height,
                lines = ?resolved.iter().map(|l| (l.id.to_string(), l.y)).collect::<Vec<_>>(),
                "counting lines resolved"
            );
            self.resolved = Some(resolved);
        }
        self.resolved.get_or_insert_with(|| self.lines.resolve(frame_height))
    }

    /// Run the detector on `frame`, then track and count.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<CycleOutcome, D::Error> {
        self.ensure_lines(frame.height());
        let detections = self.detector.detect(frame)?;
        Ok(self.process_detections(detections))
    }

    /// Track and count one cycle's raw detections.
    ///
    /// Lines must have been resolved with [`ensure_lines`](Self::ensure_lines);
    /// until then identities are tracked but nothing is counted.
    pub fn process_detections(&mut self, detections: Vec<Detection>) -> CycleOutcome {
        let detections = self.filter.apply(detections);
        let updates = self.tracker.update(&detections);

        let mut events = Vec::new();
        if let Some(lines) = &self.resolved {
            for update in &updates {
                events.extend(self.counter.check_crossings(
                    update.id,
                    update.previous.map(|p| p.y),
                    update.current.y,
                    update.class,
                    lines,
                ));
            }
        }
        self.counter.forget_stale(self.tracker.active_ids());

        debug!(
            detections = detections.len(),
            tracked = self.tracker.len(),
            crossings = events.len(),
            "detection cycle"
        );
        self.last_detections = detections;
        CycleOutcome { updates, events }
    }

    /// Poll the aggregator's reset and flush timers.
    pub fn tick_aggregator<S>(&mut self, now: Instant, sink: &S) -> TickReport
    where
        S: CountsSink + ?Sized,
    {
        self.aggregator.tick(now, self.counter.counts_mut(), sink)
    }

    /// Filtered detections from the most recent detection cycle.
    pub fn last_detections(&self) -> &[Detection] {
        &self.last_detections
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn detector_mut(&mut self) -> &mut D {
        &mut self.detector
    }

    pub fn tracker(&self) -> &IdentityTracker {
        &self.tracker
    }

    pub fn counter(&self) -> &LineCrossingCounter {
        &self.counter
    }

    pub fn aggregator(&self) -> &WindowedAggregator {
        &self.aggregator
    }

    pub fn aggregator_mut(&mut self) -> &mut WindowedAggregator {
        &mut self.aggregator
    }

    pub fn lines(&self) -> &LineSet {
        &self.lines
    }

    pub fn resolved_lines(&self) -> Option<&ResolvedLines> {
        self.resolved.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{AggregatorConfig, FlushOutcome, LogSink};
    use crate::counting::{Direction, LineId, LinesConfig};
    use crate::tracker::{BBox, ClassLabel};
    use std::collections::VecDeque;
    use std::time::Duration;

    struct MockDetector {
        script: VecDeque<Vec<Detection>>,
    }

    impl ObjectDetector for MockDetector {
        type Error = std::convert::Infallible;

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, Self::Error> {
            Ok(self.script.pop_front().unwrap_or_default())
        }
    }

    fn car_at(cx: i32, cy: i32) -> Detection {
        Detection::new(
            BBox::new(cx - 10, cy - 10, cx + 10, cy + 10).unwrap(),
            ClassLabel::Car,
            0.9,
        )
    }

    fn pipeline(script: Vec<Vec<Detection>>) -> CountingPipeline<MockDetector> {
        let mut config = PipelineConfig::default();
        config.lines = LinesConfig {
            up: vec![0.5],
            down: vec![0.75],
        };
        CountingPipeline::from_config(
            MockDetector {
                script: script.into(),
            },
            &config,
            Instant::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_counting_pipeline() {
        let mut pipeline = pipeline(vec![
            vec![car_at(100, 130)],
            vec![car_at(102, 90)],
            vec![car_at(104, 80)],
        ]);
        let frame = Frame::blank(320, 200);

        let first = pipeline.process_frame(&frame).unwrap();
        assert_eq!(first.updates.len(), 1);
        assert!(first.updates[0].is_new());
        assert!(first.events.is_empty());

        let second = pipeline.process_frame(&frame).unwrap();
        assert_eq!(second.updates[0].id, first.updates[0].id);
        assert_eq!(second.events.len(), 1);
        assert_eq!(second.events[0].line, LineId::up(0));

        let third = pipeline.process_frame(&frame).unwrap();
        assert!(third.events.is_empty());
        assert_eq!(pipeline.counter().counts().get(ClassLabel::Car, LineId::up(0)), 1);
    }

    #[test]
    fn test_lines_follow_frame_height() {
        let mut pipeline = pipeline(vec![]);
        assert_eq!(pipeline.ensure_lines(200).get(LineId::up(0)).unwrap().y, 100.0);
        assert_eq!(pipeline.ensure_lines(480).get(LineId::down(0)).unwrap().y, 360.0);
    }

    #[test]
    fn test_height_change_resets_tracking() {
        let mut pipeline = pipeline(vec![]);
        pipeline.ensure_lines(200);
        pipeline.process_detections(vec![car_at(100, 130)]);
        let before = pipeline.process_detections(vec![car_at(100, 90)]);
        let id = before.events[0].id;
        pipeline.process_detections(vec![car_at(100, 80)]);
        assert!(pipeline.counter().has_crossed(id, LineId::up(0)));

        // Same physical car in a half-height stream: up line now at 50.
        assert_eq!(pipeline.ensure_lines(100).get(LineId::up(0)).unwrap().y, 50.0);
        assert!(pipeline.tracker().is_empty());
        assert!(pipeline.counter().crossed().is_empty());

        let after = pipeline.process_detections(vec![car_at(100, 45)]);
        assert!(after.updates[0].is_new());
        assert_ne!(after.updates[0].id, id);
        assert!(after.events.is_empty());
        assert_eq!(pipeline.counter().counts().get(ClassLabel::Car, LineId::up(0)), 1);

        // Same height again is a no-op.
        pipeline.ensure_lines(100);
        assert_eq!(pipeline.tracker().len(), 1);
    }

    #[test]
    fn test_low_confidence_detections_are_ignored() {
        let mut pipeline = pipeline(vec![]);
        pipeline.ensure_lines(200);
        let mut weak = car_at(50, 150);
        weak.confidence = 0.1;
        let outcome = pipeline.process_detections(vec![weak]);
        assert!(outcome.updates.is_empty());
        assert!(pipeline.tracker().is_empty());
    }

    #[test]
    fn test_vanished_identity_forgets_crossings() {
        let mut pipeline = pipeline(vec![]);
        pipeline.ensure_lines(200);
        pipeline.process_detections(vec![car_at(100, 130)]);
        let outcome = pipeline.process_detections(vec![car_at(100, 95)]);
        let id = outcome.events[0].id;
        assert!(pipeline.counter().has_crossed(id, LineId::up(0)));

        pipeline.process_detections(vec![]);
        assert!(!pipeline.counter().has_crossed(id, LineId::up(0)));
        assert!(pipeline.tracker().identity(id).is_none());
    }

    #[test]
    fn test_aggregator_drains_counts() {
        let start = Instant::now();
        let mut config = PipelineConfig::default();
        config.lines.up = vec![0.5];
        config.aggregation = AggregatorConfig {
            reset_interval_secs: 1,
            flush_interval_secs: 2,
            ..AggregatorConfig::default()
        };
        let detector = MockDetector {
            script: VecDeque::new(),
        };
        let mut pipeline = CountingPipeline::from_config(detector, &config, start).unwrap();
        pipeline.ensure_lines(200);
        pipeline.process_detections(vec![car_at(100, 130)]);
        pipeline.process_detections(vec![car_at(100, 95)]);

        let report = pipeline.tick_aggregator(start + Duration::from_secs(1), &LogSink);
        assert_eq!(report.accumulated.unwrap().get(ClassLabel::Car, Direction::Up), 1);
        assert!(pipeline.counter().counts().is_zero());
        // No camera identity yet, so the flush is skipped and totals stay.
        let report = pipeline.tick_aggregator(start + Duration::from_secs(2), &LogSink);
        assert!(matches!(report.flush, FlushOutcome::Skipped));
        assert!(!pipeline.aggregator().accumulated().is_empty());
    }
}
