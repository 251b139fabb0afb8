//! Bounded background writer for crossing-event snapshots.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Local};
use crossbeam_channel::{Sender, TrySendError};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::counting::CrossingEvent;
use crate::error::ConfigError;
use crate::source::Frame;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    pub dir: PathBuf,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    16
}

impl SnapshotConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            queue_capacity: default_queue_capacity(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid("snapshots.queue_capacity must be at least 1"));
        }
        Ok(())
    }
}

/// Frame captured at the moment of a crossing.
#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    pub frame: Frame,
    pub event: CrossingEvent,
    pub camera: String,
    pub taken_at: DateTime<Local>,
}

impl SnapshotRequest {
    pub fn new(frame: Frame, event: CrossingEvent, camera: impl Into<String>) -> Self {
        Self {
            frame,
            event,
            camera: camera.into(),
            taken_at: Local::now(),
        }
    }

    /// `{camera}_{line}_{class}_{id}_{timestamp}.jpg`
    pub fn file_name(&self) -> String {
        let camera: String = self
            .camera
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        format!(
            "{camera}_{}_{}_{}_{}.jpg",
            self.event.line,
            self.event.class,
            self.event.id,
            self.taken_at.format("%Y%m%d_%H%M%S%.3f")
        )
    }
}

#[derive(Debug, Error)]
enum WriteError {
    #[error("frame buffer does not match its dimensions")]
    Buffer,
    #[error(transparent)]
    Encode(#[from] image::ImageError),
}

fn write_snapshot(dir: &Path, request: &SnapshotRequest) -> Result<PathBuf, WriteError> {
    let (width, height) = request.frame.dimensions();
    let image = RgbImage::from_raw(width, height, request.frame.to_rgb_vec())
        .ok_or(WriteError::Buffer)?;
    let path = dir.join(request.file_name());
    image.save(&path)?;
    Ok(path)
}

/// Single writer thread fed by a bounded queue. Requests arriving while
/// the queue is full are dropped.
pub struct SnapshotWriter {
    tx: Option<Sender<SnapshotRequest>>,
    handle: Option<JoinHandle<()>>,
    dropped: AtomicU64,
    written: Arc<AtomicU64>,
}

impl SnapshotWriter {
    pub fn spawn(config: &SnapshotConfig) -> io::Result<Self> {
        std::fs::create_dir_all(&config.dir)?;
        let capacity = config.queue_capacity.max(1);
        let (tx, rx) = crossbeam_channel::bounded::<SnapshotRequest>(capacity);
        let written = Arc::new(AtomicU64::new(0));

        let dir = config.dir.clone();
        let counter = Arc::clone(&written);
        let handle = thread::Builder::new()
            .name("snapshot-writer".into())
            .spawn(move || {
                for request in rx {
                    match write_snapshot(&dir, &request) {
                        Ok(path) => {
                            counter.fetch_add(1, Ordering::Relaxed);
                            debug!(path = %path.display(), "snapshot written");
                        }
                        Err(err) => {
                            warn!(
                                id = request.event.id,
                                line = %request.event.line,
                                error = %err,
                                "snapshot failed"
                            );
                        }
                    }
                }
            })?;

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
            dropped: AtomicU64::new(0),
            written,
        })
    }

    /// Queue a snapshot without blocking. Returns `false` if it was dropped.
    pub fn submit(&self, request: SnapshotRequest) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(request) {
            Ok(()) => true,
            Err(TrySendError::Full(request)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    id = request.event.id,
                    line = %request.event.line,
                    dropped,
                    "snapshot queue full, dropping"
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Drain the queue and stop the writer thread.
    pub fn shutdown(&mut self) {
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("snapshot writer panicked");
            }
        }
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
