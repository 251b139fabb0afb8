//! Two-timescale aggregation of per-interval counters.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregation::sink::{CountsSink, SourceIdentity};
use crate::counting::{CounterTable, Direction};
use crate::error::{ConfigError, SinkError};
use crate::tracker::ClassLabel;

/// How per-line counts collapse into one number per class and direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryPolicy {
    /// Busiest line wins; parallel lines watch the same lane.
    #[default]
    BusiestLine,
    /// Lines are distinct lanes and add up.
    Sum,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub reset_interval_secs: u64,
    pub flush_interval_secs: u64,
    pub flush_timeout_ms: u64,
    pub summary: SummaryPolicy,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            reset_interval_secs: 20,
            flush_interval_secs: 300,
            flush_timeout_ms: 5000,
            summary: SummaryPolicy::BusiestLine,
        }
    }
}

impl AggregatorConfig {
    pub fn reset_interval(&self) -> Duration {
        Duration::from_secs(self.reset_interval_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reset_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "aggregation.reset_interval_secs must be positive",
            ));
        }
        if self.flush_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "aggregation.flush_interval_secs must be positive",
            ));
        }
        if self.flush_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "aggregation.flush_timeout_ms must be positive",
            ));
        }
        Ok(())
    }
}

/// Polled interval against the monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct IntervalTimer {
    interval: Duration,
    started: Instant,
}

impl IntervalTimer {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            started: now,
        }
    }

    #[inline]
    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= self.interval
    }

    #[inline]
    pub fn restart(&mut self, now: Instant) {
        self.started = now;
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.interval
            .saturating_sub(now.saturating_duration_since(self.started))
    }
}

/// Totals per class and direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    counts: [[u64; 2]; ClassLabel::COUNT],
}

impl Totals {
    /// Collapse a counter table according to `policy`.
    pub fn summarize(table: &CounterTable, policy: SummaryPolicy) -> Self {
        let mut totals = Self::default();
        for class in ClassLabel::ALL {
            for direction in Direction::ALL {
                let per_line = table.per_line(class, direction);
                totals.counts[class.index()][direction.index()] = match policy {
                    SummaryPolicy::BusiestLine => per_line.max().unwrap_or(0),
                    SummaryPolicy::Sum => per_line.sum(),
                };
            }
        }
        totals
    }

    #[inline]
    pub fn get(&self, class: ClassLabel, direction: Direction) -> u64 {
        self.counts[class.index()][direction.index()]
    }

    pub fn add(&mut self, other: &Totals) {
        for (mine, theirs) in self.counts.iter_mut().zip(other.counts.iter()) {
            for (a, b) in mine.iter_mut().zip(theirs.iter()) {
                *a = a.saturating_add(*b);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts.iter().flatten().all(|&n| n == 0)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Flat `{class}_{direction}` mapping for every class and direction.
    pub fn to_payload(&self) -> BTreeMap<String, u64> {
        let mut payload = BTreeMap::new();
        for class in ClassLabel::ALL {
            for direction in Direction::ALL {
                payload.insert(format!("{class}_{direction}"), self.get(class, direction));
            }
        }
        payload
    }

    pub fn to_json(&self) -> Result<String, SinkError> {
        Ok(serde_json::to_string(&self.to_payload())?)
    }
}

/// Outcome of a flush check.
#[derive(Debug)]
pub enum FlushOutcome {
    /// Flush interval has not elapsed.
    NotDue,
    /// Interval elapsed but there was nothing to send or nobody to send it as.
    Skipped,
    /// Sink accepted these totals; accumulated state was cleared.
    Flushed(Totals),
    /// Sink failed; accumulated totals are kept for the next attempt.
    Failed(SinkError),
}

/// What a single aggregator poll did.
#[derive(Debug)]
pub struct TickReport {
    /// Summary folded into the accumulated totals, if the reset interval elapsed
    pub accumulated: Option<Totals>,
    pub flush: FlushOutcome,
}

/// Folds the current-interval counters into accumulated totals on a short
/// timer and ships them to the sink on a long one.
#[derive(Debug)]
pub struct WindowedAggregator {
    config: AggregatorConfig,
    reset_timer: IntervalTimer,
    flush_timer: IntervalTimer,
    accumulated: Totals,
    identity: Option<SourceIdentity>,
}

impl WindowedAggregator {
    pub fn new(config: AggregatorConfig, now: Instant) -> Self {
        Self {
            reset_timer: IntervalTimer::new(config.reset_interval(), now),
            flush_timer: IntervalTimer::new(config.flush_interval(), now),
            config,
            accumulated: Totals::default(),
            identity: None,
        }
    }

    /// Camera name and mode the flushed totals are reported under.
    pub fn set_identity(&mut self, identity: SourceIdentity) {
        self.identity = Some(identity);
    }

    pub fn identity(&self) -> Option<&SourceIdentity> {
        self.identity.as_ref()
    }

    pub fn accumulated(&self) -> &Totals {
        &self.accumulated
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// When the reset interval has elapsed, fold `current` into the
    /// accumulated totals and zero it.
    pub fn accumulate_if_due(
        &mut self,
        now: Instant,
        current: &mut CounterTable,
    ) -> Option<Totals> {
        if !self.reset_timer.is_due(now) {
            return None;
        }
        let summary = Totals::summarize(current, self.config.summary);
        self.accumulated.add(&summary);
        current.reset();
        self.reset_timer.restart(now);
        if !summary.is_empty() {
            debug!(?summary, "interval counts accumulated");
        }
        Some(summary)
    }

    /// When the flush interval has elapsed, hand accumulated totals to
    /// `sink`. Failures are logged and absorbed; totals are cleared only
    /// on success.
    pub fn flush_if_due<S>(&mut self, now: Instant, sink: &S) -> FlushOutcome
    where
        S: CountsSink + ?Sized,
    {
        if !self.flush_timer.is_due(now) {
            return FlushOutcome::NotDue;
        }
        self.flush_timer.restart(now);

        if self.accumulated.is_empty() {
            return FlushOutcome::Skipped;
        }
        let Some(identity) = &self.identity else {
            warn!("flush skipped: camera identity unknown");
            return FlushOutcome::Skipped;
        };

        let payload = match self.accumulated.to_json() {
            Ok(payload) => payload,
            Err(err) => return FlushOutcome::Failed(err),
        };

        match sink.save(&identity.camera_name, &identity.mode, &payload) {
            Ok(()) => {
                info!(
                    camera = %identity.camera_name,
                    mode = %identity.mode,
                    %payload,
                    "counts flushed"
                );
                let flushed = self.accumulated;
                self.accumulated.clear();
                FlushOutcome::Flushed(flushed)
            }
            Err(err) => {
                warn!(
                    camera = %identity.camera_name,
                    error = %err,
                    "flush failed, keeping totals for retry"
                );
                FlushOutcome::Failed(err)
            }
        }
    }

    /// Poll both timers.
    pub fn tick<S: CountsSink + ?Sized>(
        &mut self,
        now: Instant,
        current: &mut CounterTable,
        sink: &S,
    ) -> TickReport {
        let accumulated = self.accumulate_if_due(now, current);
        let flush = self.flush_if_due(now, sink);
        TickReport { accumulated, flush }
    }
}
