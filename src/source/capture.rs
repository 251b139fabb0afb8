//! Background frame capture with a single-slot latest-frame cell.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{ConfigError, SourceError};
use crate::source::frame::Frame;

/// An open video stream. Reads block until a frame is decoded or fail.
pub trait VideoStream: Send {
    fn read(&mut self) -> Result<Frame, SourceError>;

    /// `(width, height)` of frames this stream produces.
    fn dimensions(&self) -> (u32, u32);
}

/// Opens streams by address (URL, device path, file...).
pub trait VideoBackend: Send + Sync + 'static {
    type Stream: VideoStream + 'static;

    fn open(&self, address: &str) -> Result<Self::Stream, SourceError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub target_fps: f32,
    /// Consecutive read failures tolerated before reconnecting
    pub max_consecutive_failures: u32,
    pub max_reconnect_attempts: u32,
    pub reconnect_backoff_ms: u64,
    pub open_timeout_ms: u64,
    /// Pause between failed reads
    pub read_retry_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_fps: 15.0,
            max_consecutive_failures: 30,
            max_reconnect_attempts: 5,
            reconnect_backoff_ms: 1000,
            open_timeout_ms: 5000,
            read_retry_ms: 50,
        }
    }
}

impl CaptureConfig {
    /// Minimum spacing between reads; zero when `target_fps` is unusable.
    pub fn frame_interval(&self) -> Duration {
        if self.target_fps.is_finite() && self.target_fps > 0.0 {
            Duration::from_secs_f32(1.0 / self.target_fps)
        } else {
            Duration::ZERO
        }
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn read_retry(&self) -> Duration {
        Duration::from_millis(self.read_retry_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.target_fps.is_finite() && self.target_fps > 0.0) {
            return Err(ConfigError::invalid(format!(
                "capture.target_fps must be positive, got {}",
                self.target_fps
            )));
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::invalid(
                "capture.max_consecutive_failures must be at least 1",
            ));
        }
        if self.open_timeout_ms == 0 {
            return Err(ConfigError::invalid("capture.open_timeout_ms must be positive"));
        }
        Ok(())
    }
}

/// Health of the capture thread as seen by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    Streaming,
    /// Re-opening the source; `attempt` is one-based
    Reconnecting { attempt: u32 },
    /// Reconnection budget used up; no more frames will arrive.
    Exhausted,
    Stopped,
}

struct Shared {
    latest: Mutex<Option<Frame>>,
    dimensions: Mutex<(u32, u32)>,
    status: Mutex<CaptureStatus>,
}

impl Shared {
    fn publish(&self, frame: Frame) {
        *self.dimensions.lock() = frame.dimensions();
        *self.latest.lock() = Some(frame);
    }

    fn set_status(&self, status: CaptureStatus) {
        *self.status.lock() = status;
    }
}

/// Handle to a stream read continuously on a background thread.
///
/// Only the most recent frame is kept; older unread frames are overwritten.
pub struct FrameSource {
    address: String,
    shared: Arc<Shared>,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    close_timeout: Duration,
    reconnect_attempts: u32,
}

impl FrameSource {
    /// Open `address` and start the capture thread.
    pub fn open<B: VideoBackend>(
        backend: Arc<B>,
        address: impl Into<String>,
        config: CaptureConfig,
    ) -> Result<Self, SourceError> {
        let address = address.into();
        let stream = open_with_timeout(&backend, &address, config.open_timeout())?;
        let dimensions = stream.dimensions();
        info!(%address, width = dimensions.0, height = dimensions.1, "source opened");

        let shared = Arc::new(Shared {
            latest: Mutex::new(None),
            dimensions: Mutex::new(dimensions),
            status: Mutex::new(CaptureStatus::Streaming),
        });
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(0);
        let close_timeout =
            config.open_timeout().max(config.frame_interval()) + Duration::from_millis(100);
        let reconnect_attempts = config.max_reconnect_attempts;

        let worker = CaptureWorker {
            backend,
            address: address.clone(),
            config,
            shared: Arc::clone(&shared),
            stop: stop_rx,
        };
        let handle = thread::Builder::new()
            .name("frame-capture".into())
            .spawn(move || worker.run(stream))
            .map_err(|e| {
                SourceError::open(address.clone(), format!("failed to spawn capture thread: {e}"))
            })?;

        Ok(Self {
            address,
            shared,
            stop: Some(stop_tx),
            handle: Some(handle),
            close_timeout,
            reconnect_attempts,
        })
    }

    /// Take the freshest captured frame, if one arrived since the last call.
    pub fn read_latest(&self) -> Option<Frame> {
        self.shared.latest.lock().take()
    }

    /// Current `(width, height)`. May change after a reconnect.
    pub fn dimensions(&self) -> (u32, u32) {
        *self.shared.dimensions.lock()
    }

    pub fn status(&self) -> CaptureStatus {
        *self.shared.status.lock()
    }

    /// Status, or [`SourceError::Exhausted`] once the capture thread has
    /// given up reconnecting.
    pub fn check(&self) -> Result<CaptureStatus, SourceError> {
        match self.status() {
            CaptureStatus::Exhausted => Err(SourceError::Exhausted {
                attempts: self.reconnect_attempts,
            }),
            status => Ok(status),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Stop the capture thread. A thread stuck inside a blocking read is
    /// detached after a bounded wait.
    pub fn close(&mut self) {
        let Some(stop) = self.stop.take() else {
            return;
        };
        drop(stop);

        if let Some(handle) = self.handle.take() {
            let deadline = Instant::now() + self.close_timeout;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    error!(address = %self.address, "capture thread panicked");
                }
            } else {
                warn!(address = %self.address, "capture thread did not stop in time, detaching");
            }
        }
        self.shared.set_status(CaptureStatus::Stopped);
        debug!(address = %self.address, "source closed");
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Run `backend.open` on a helper thread and give up after `timeout`.
fn open_with_timeout<B: VideoBackend>(
    backend: &Arc<B>,
    address: &str,
    timeout: Duration,
) -> Result<B::Stream, SourceError> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let opener = Arc::clone(backend);
    let target = address.to_string();
    thread::Builder::new()
        .name("source-open".into())
        .spawn(move || {
            let _ = tx.send(opener.open(&target));
        })
        .map_err(|e| SourceError::open(address, format!("failed to spawn opener: {e}")))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(SourceError::Timeout {
            operation: "source open",
            timeout,
        }),
        Err(RecvTimeoutError::Disconnected) => Err(SourceError::open(address, "opener panicked")),
    }
}

struct CaptureWorker<B: VideoBackend> {
    backend: Arc<B>,
    address: String,
    config: CaptureConfig,
    shared: Arc<Shared>,
    stop: Receiver<()>,
}

impl<B: VideoBackend> CaptureWorker<B> {
    fn stopped(&self) -> bool {
        matches!(self.stop.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep for `duration` unless stopped first. Returns `false` on stop.
    fn pause(&self, duration: Duration) -> bool {
        matches!(self.stop.recv_timeout(duration), Err(RecvTimeoutError::Timeout))
    }

    fn run(self, mut stream: B::Stream) {
        let frame_interval = self.config.frame_interval();
        let mut next_due = Instant::now();
        let mut failures = 0u32;
        let mut sequence = 0u64;

        while !self.stopped() {
            let now = Instant::now();
            if now < next_due {
                if !self.pause(next_due - now) {
                    break;
                }
                continue;
            }

            match stream.read() {
                Ok(frame) => {
                    failures = 0;
                    sequence += 1;
                    self.shared.publish(frame.with_sequence(sequence));
                    next_due = now + frame_interval;
                }
                Err(err) => {
                    failures += 1;
                    if failures < self.config.max_consecutive_failures {
                        debug!(
                            address = %self.address,
                            failures,
                            error = %err,
                            "frame read failed"
                        );
                        if !self.pause(self.config.read_retry()) {
                            break;
                        }
                        continue;
                    }

                    warn!(
                        address = %self.address,
                        failures,
                        error = %err,
                        "frame reads failing, reconnecting"
                    );
                    match self.reconnect() {
                        Some(reopened) => {
                            stream = reopened;
                            failures = 0;
                            next_due = Instant::now();
                        }
                        None if self.stopped() => break,
                        None => {
                            error!(
                                address = %self.address,
                                attempts = self.config.max_reconnect_attempts,
                                "source exhausted"
                            );
                            self.shared.set_status(CaptureStatus::Exhausted);
                            return;
                        }
                    }
                }
            }
        }
        self.shared.set_status(CaptureStatus::Stopped);
    }

    fn reconnect(&self) -> Option<B::Stream> {
        for attempt in 1..=self.config.max_reconnect_attempts {
            self.shared.set_status(CaptureStatus::Reconnecting { attempt });
            if !self.pause(self.config.reconnect_backoff() * attempt) {
                return None;
            }
            match open_with_timeout(&self.backend, &self.address, self.config.open_timeout()) {
                Ok(stream) => {
                    let (width, height) = stream.dimensions();
                    *self.shared.dimensions.lock() = (width, height);
                    self.shared.set_status(CaptureStatus::Streaming);
                    info!(
                        address = %self.address,
                        attempt,
                        width,
                        height,
                        "source reconnected"
                    );
                    return Some(stream);
                }
                Err(err) => {
                    warn!(address = %self.address, attempt, error = %err, "reconnect failed");
                }
            }
        }
        None
    }
}
