//! Destinations for flushed totals.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::SinkError;

/// Camera name and mode that flushed totals are reported under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceIdentity {
    pub camera_name: String,
    pub mode: String,
}

impl SourceIdentity {
    pub fn new(camera_name: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            camera_name: camera_name.into(),
            mode: mode.into(),
        }
    }
}

/// External store that accepts accumulated counts.
///
/// `counts_json` is a flat JSON object of `{class}_{direction}` keys.
pub trait CountsSink: Send + Sync {
    fn save(&self, camera: &str, mode: &str, counts_json: &str) -> Result<(), SinkError>;
}

impl<S: CountsSink + ?Sized> CountsSink for Arc<S> {
    fn save(&self, camera: &str, mode: &str, counts_json: &str) -> Result<(), SinkError> {
        (**self).save(camera, mode, counts_json)
    }
}

impl<S: CountsSink + ?Sized> CountsSink for Box<S> {
    fn save(&self, camera: &str, mode: &str, counts_json: &str) -> Result<(), SinkError> {
        (**self).save(camera, mode, counts_json)
    }
}

/// Sink that only logs. Useful for dry runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl CountsSink for LogSink {
    fn save(&self, camera: &str, mode: &str, counts_json: &str) -> Result<(), SinkError> {
        info!(camera, mode, counts = counts_json, "counts");
        Ok(())
    }
}

/// Bounds every call to the inner sink by a timeout.
///
/// The call runs on its own thread. A call that overruns keeps running in
/// the background, and until it returns further saves fail with
/// [`SinkError::Busy`] so that at most one call is outstanding.
pub struct TimeoutSink<S> {
    inner: Arc<S>,
    timeout: Duration,
    in_flight: Arc<AtomicBool>,
}

impl<S: CountsSink + 'static> TimeoutSink<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self::from_arc(Arc::new(inner), timeout)
    }

    pub fn from_arc(inner: Arc<S>, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Clears the in-flight flag when dropped, including on unwind.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<S: CountsSink + 'static> CountsSink for TimeoutSink<S> {
    fn save(&self, camera: &str, mode: &str, counts_json: &str) -> Result<(), SinkError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SinkError::Busy);
        }

        let (tx, rx) = crossbeam_channel::bounded(1);
        let inner = Arc::clone(&self.inner);
        let in_flight = Arc::clone(&self.in_flight);
        let (camera, mode) = (camera.to_string(), mode.to_string());
        let payload = counts_json.to_string();

        let spawned = thread::Builder::new()
            .name("counts-sink".into())
            .spawn(move || {
                let result = {
                    let _release = InFlight(in_flight);
                    inner.save(&camera, &mode, &payload)
                };
                let _ = tx.send(result);
            });
        if let Err(err) = spawned {
            self.in_flight.store(false, Ordering::Release);
            return Err(SinkError::Transport(format!(
                "failed to spawn sink call: {err}"
            )));
        }

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout = ?self.timeout, "sink call overran, left running in background");
                Err(SinkError::Timeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(SinkError::Transport("sink call panicked".into()))
            }
        }
    }
}
