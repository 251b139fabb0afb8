use std::time::{Duration, Instant};

use crate::integration::DetectionThrottle;

/// Decides which cycles run the detector.
#[derive(Debug, Clone)]
pub struct DetectionCadence {
    throttle: DetectionThrottle,
    cycles: u64,
    last_run: Option<Instant>,
}

impl DetectionCadence {
    pub fn new(throttle: DetectionThrottle) -> Self {
        Self {
            throttle,
            cycles: 0,
            last_run: None,
        }
    }

    /// Called once per cycle that has a frame. The first call always runs.
    pub fn should_detect(&mut self, now: Instant) -> bool {
        let due = match self.throttle {
            DetectionThrottle::EveryNCycles(n) => self.cycles % u64::from(n.max(1)) == 0,
            DetectionThrottle::MinIntervalMs(ms) => {
                let interval = Duration::from_millis(ms);
                self.last_run
                    .is_none_or(|last| now.saturating_duration_since(last) >= interval)
            }
        };
        self.cycles = self.cycles.wrapping_add(1);
        if due {
            self.last_run = Some(now);
        }
        due
    }
}
