//! Drives the counting pipeline through its lifecycle.
//!
//! The orchestrator polls: every [`Orchestrator::step`] advances the state
//! machine by at most one transition or one processing cycle, against an
//! explicit `now`. [`Orchestrator::run`] loops `step` until shutdown.

mod cadence;
mod camera;
mod restart;
mod state;

pub use cadence::DetectionCadence;
pub use camera::{CameraDirectory, CameraInfo, StaticCameras, resolve_camera};
pub use restart::RestartPolicy;
pub use state::{PipelineState, PipelineStats};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::aggregation::{CountsSink, FlushOutcome, SourceIdentity, TimeoutSink};
use crate::config::PipelineConfig;
use crate::error::{ConfigError, PipelineError};
use crate::integration::{CountingPipeline, DetectorLoader, ObjectDetector};
use crate::snapshot::{SnapshotRequest, SnapshotWriter};
use crate::source::{CaptureStatus, FrameSource, VideoBackend};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub poll_interval_ms: u64,
    pub max_restarts: u32,
    pub restart_backoff_ms: u64,
    pub max_restart_backoff_ms: u64,
    /// Running this long without trouble resets the restart budget
    pub stable_period_secs: u64,
    pub camera_refresh_secs: u64,
    /// Longest a reconnect may take before the pipeline restarts instead
    pub reconnect_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            max_restarts: 5,
            restart_backoff_ms: 1000,
            max_restart_backoff_ms: 30_000,
            stable_period_secs: 300,
            camera_refresh_secs: 60,
            reconnect_timeout_secs: 30,
        }
    }
}

impl OrchestratorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn camera_refresh(&self) -> Duration {
        Duration::from_secs(self.camera_refresh_secs)
    }

    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.reconnect_timeout_secs)
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy::new(
            self.max_restarts,
            Duration::from_millis(self.restart_backoff_ms),
            Duration::from_millis(self.max_restart_backoff_ms),
            Duration::from_secs(self.stable_period_secs),
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_restart_backoff_ms < self.restart_backoff_ms {
            return Err(ConfigError::invalid(
                "orchestrator.max_restart_backoff_ms must not be below restart_backoff_ms",
            ));
        }
        if self.camera_refresh_secs == 0 {
            return Err(ConfigError::invalid(
                "orchestrator.camera_refresh_secs must be positive",
            ));
        }
        if self.reconnect_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "orchestrator.reconnect_timeout_secs must be positive",
            ));
        }
        Ok(())
    }
}

/// Everything torn down and rebuilt on restart.
struct Session<D: ObjectDetector> {
    camera: CameraInfo,
    source: FrameSource,
    pipeline: CountingPipeline<D>,
    cadence: DetectionCadence,
    started_at: Instant,
}

/// What a running cycle asks the state machine to do next.
enum CycleVerdict {
    Continue,
    Reconnecting,
    Restart(&'static str),
}

pub struct Orchestrator<B, L, S>
where
    B: VideoBackend,
    L: DetectorLoader,
    S: CountsSink + 'static,
{
    config: PipelineConfig,
    backend: Arc<B>,
    loader: L,
    sink: TimeoutSink<S>,
    directory: Option<Box<dyn CameraDirectory>>,
    snapshots: Option<SnapshotWriter>,
    session: Option<Session<L::Detector>>,
    state: PipelineState,
    restart: RestartPolicy,
    stats: PipelineStats,
    initialized_once: bool,
    restart_at: Option<Instant>,
    reconnecting_since: Option<Instant>,
    camera_checked_at: Option<Instant>,
}

impl<B, L, S> Orchestrator<B, L, S>
where
    B: VideoBackend,
    L: DetectorLoader,
    S: CountsSink + 'static,
{
    /// Validate configuration and prepare to initialize. Nothing is
    /// opened until the first [`step`](Self::step).
    ///
    /// Every `sink` call is bounded by `aggregation.flush_timeout_ms`.
    pub fn new(
        config: PipelineConfig,
        backend: Arc<B>,
        loader: L,
        sink: S,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let sink = TimeoutSink::new(sink, config.aggregation.flush_timeout());
        let snapshots = config
            .snapshots
            .as_ref()
            .map(SnapshotWriter::spawn)
            .transpose()
            .map_err(PipelineError::Snapshot)?;

        Ok(Self {
            restart: config.orchestrator.restart_policy(),
            config,
            backend,
            loader,
            sink,
            directory: None,
            snapshots,
            session: None,
            state: PipelineState::Initializing,
            stats: PipelineStats::default(),
            initialized_once: false,
            restart_at: None,
            reconnecting_since: None,
            camera_checked_at: None,
        })
    }

    /// Resolve the source address through `directory` instead of the
    /// configured address, and watch it for changes.
    pub fn with_camera_directory(mut self, directory: impl CameraDirectory + 'static) -> Self {
        self.directory = Some(Box::new(directory));
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Camera the current session is reading from.
    pub fn camera(&self) -> Option<&CameraInfo> {
        self.session.as_ref().map(|s| &s.camera)
    }

    pub fn pipeline(&self) -> Option<&CountingPipeline<L::Detector>> {
        self.session.as_ref().map(|s| &s.pipeline)
    }

    pub fn snapshots(&self) -> Option<&SnapshotWriter> {
        self.snapshots.as_ref()
    }

    /// Advance the state machine once.
    ///
    /// Errors are returned only when the pipeline gives up for good: a
    /// failed first initialization or an exhausted restart budget. The
    /// state is `Terminated` afterwards.
    pub fn step(&mut self, now: Instant) -> Result<PipelineState, PipelineError> {
        match self.state {
            PipelineState::Initializing => self.step_initializing(now)?,
            PipelineState::Running => match self.run_cycle(now) {
                CycleVerdict::Continue => {}
                CycleVerdict::Reconnecting => {
                    info!("source reconnecting");
                    self.reconnecting_since = Some(now);
                    self.transition(PipelineState::Reconnecting);
                }
                CycleVerdict::Restart(reason) => self.begin_restart(now, reason)?,
            },
            PipelineState::Reconnecting => self.step_reconnecting(now)?,
            PipelineState::Restarting => {
                if self.restart_at.is_none_or(|at| now >= at) {
                    self.restart_at = None;
                    self.transition(PipelineState::Initializing);
                }
            }
            PipelineState::Terminated => {}
        }
        Ok(self.state)
    }

    /// Tear down and re-initialize, e.g. after a configuration change.
    /// Consumes restart budget like any other restart.
    pub fn request_restart(
        &mut self,
        now: Instant,
        reason: &'static str,
    ) -> Result<(), PipelineError> {
        if self.state == PipelineState::Terminated {
            return Ok(());
        }
        self.begin_restart(now, reason)
    }

    /// Poll `step` every `poll_interval` until `shutdown` is set or the
    /// pipeline terminates. Resources are released on every exit path.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<(), PipelineError> {
        let poll = self.config.orchestrator.poll_interval();
        while !shutdown.load(Ordering::Acquire) {
            match self.step(Instant::now()) {
                Ok(PipelineState::Terminated) => break,
                Ok(_) => thread::sleep(poll),
                Err(err) => {
                    self.shutdown();
                    return Err(err);
                }
            }
        }
        self.shutdown();
        Ok(())
    }

    /// Close the source and drain pending snapshots.
    pub fn shutdown(&mut self) {
        self.teardown();
        if let Some(writer) = self.snapshots.as_mut() {
            writer.shutdown();
        }
        self.transition(PipelineState::Terminated);
    }

    fn transition(&mut self, next: PipelineState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "pipeline state");
            self.state = next;
        }
    }

    fn step_initializing(&mut self, now: Instant) -> Result<(), PipelineError> {
        match self.initialize(now) {
            Ok(session) => {
                info!(
                    camera = %session.camera.name,
                    address = %session.camera.address,
                    mode = %session.camera.mode,
                    "pipeline initialized"
                );
                self.session = Some(session);
                self.initialized_once = true;
                self.restart.mark_running(now);
                self.camera_checked_at = Some(now);
                self.transition(PipelineState::Running);
                Ok(())
            }
            Err(err) if !self.initialized_once => {
                error!(error = %err, "initialization failed");
                self.transition(PipelineState::Terminated);
                Err(err)
            }
            Err(err) => {
                warn!(error = %err, "re-initialization failed");
                self.begin_restart(now, "re-initialization failed")
            }
        }
    }

    fn initialize(&mut self, now: Instant) -> Result<Session<L::Detector>, PipelineError> {
        let camera = self.resolve_camera()?;
        let source = FrameSource::open(
            Arc::clone(&self.backend),
            &camera.address,
            self.config.capture.clone(),
        )?;
        let detector = self.loader.load()?;
        let mut pipeline = CountingPipeline::from_config(detector, &self.config, now)?;
        pipeline
            .aggregator_mut()
            .set_identity(SourceIdentity::new(&camera.name, &camera.mode));

        Ok(Session {
            camera,
            source,
            pipeline,
            cadence: DetectionCadence::new(self.config.detection.throttle),
            started_at: now,
        })
    }

    fn resolve_camera(&self) -> Result<CameraInfo, PipelineError> {
        let source = &self.config.source;
        if let Some(directory) = &self.directory {
            let cameras = directory.list_cameras(&source.mode)?;
            return resolve_camera(&cameras, source.camera_name.as_deref())
                .cloned()
                .ok_or_else(|| PipelineError::NoCameraResolved {
                    mode: source.mode.clone(),
                });
        }
        let address = source.address.clone().ok_or_else(|| PipelineError::NoCameraResolved {
            mode: source.mode.clone(),
        })?;
        Ok(CameraInfo {
            name: source.camera_name.clone().unwrap_or_else(|| address.clone()),
            address,
            mode: source.mode.clone(),
        })
    }

    /// Whether the provider now resolves a different address.
    fn camera_changed(&mut self, now: Instant) -> bool {
        let refresh = self.config.orchestrator.camera_refresh();
        let due = self
            .camera_checked_at
            .is_none_or(|at| now.saturating_duration_since(at) >= refresh);
        let (Some(directory), Some(session), true) = (&self.directory, &self.session, due) else {
            return false;
        };
        self.camera_checked_at = Some(now);

        let source = &self.config.source;
        match directory.list_cameras(&source.mode) {
            Ok(cameras) => match resolve_camera(&cameras, source.camera_name.as_deref()) {
                Some(camera) if camera.address != session.camera.address => {
                    info!(
                        camera = %camera.name,
                        from = %session.camera.address,
                        to = %camera.address,
                        "camera address changed"
                    );
                    true
                }
                Some(_) => false,
                None => {
                    warn!(mode = %source.mode, "camera no longer listed, keeping current source");
                    false
                }
            },
            Err(err) => {
                warn!(error = %err, "camera refresh failed");
                false
            }
        }
    }

    fn run_cycle(&mut self, now: Instant) -> CycleVerdict {
        self.stats.cycles += 1;
        if self.restart.note_stable(now) {
            debug!("stable run, restart budget reset");
        }
        if self.camera_changed(now) {
            return CycleVerdict::Restart("camera address changed");
        }

        let Some(session) = self.session.as_mut() else {
            return CycleVerdict::Restart("no active session");
        };
        match session.source.check() {
            Ok(CaptureStatus::Streaming) => {}
            Ok(CaptureStatus::Reconnecting { .. }) => return CycleVerdict::Reconnecting,
            Ok(CaptureStatus::Exhausted | CaptureStatus::Stopped) => {
                return CycleVerdict::Restart("capture stopped");
            }
            Err(err) => {
                warn!(camera = %session.camera.name, error = %err, "source lost");
                return CycleVerdict::Restart("source exhausted");
            }
        }

        if let Some(frame) = session.source.read_latest() {
            if session.cadence.should_detect(now) {
                self.stats.detection_cycles += 1;
                match session.pipeline.process_frame(&frame) {
                    Ok(outcome) => {
                        self.stats.crossings += outcome.events.len() as u64;
                        for event in &outcome.events {
                            info!(
                                camera = %session.camera.name,
                                id = event.id,
                                line = %event.line,
                                class = %event.class,
                                "crossing"
                            );
                            if let Some(writer) = &self.snapshots {
                                let request = SnapshotRequest::new(
                                    frame.clone(),
                                    *event,
                                    &session.camera.name,
                                );
                                writer.submit(request);
                            }
                        }
                    }
                    Err(err) => {
                        self.stats.detection_failures += 1;
                        warn!(error = %err, "detection failed, keeping previous results");
                    }
                }
            }
        }

        Self::tick_aggregator(session, &self.sink, &mut self.stats, now);
        CycleVerdict::Continue
    }

    fn tick_aggregator(
        session: &mut Session<L::Detector>,
        sink: &TimeoutSink<S>,
        stats: &mut PipelineStats,
        now: Instant,
    ) {
        let report = session.pipeline.tick_aggregator(now, sink);
        match report.flush {
            FlushOutcome::Flushed(_) => stats.flushes_ok += 1,
            FlushOutcome::Failed(_) => stats.flushes_failed += 1,
            FlushOutcome::NotDue | FlushOutcome::Skipped => {}
        }
    }

    fn step_reconnecting(&mut self, now: Instant) -> Result<(), PipelineError> {
        let Some(session) = self.session.as_mut() else {
            return self.begin_restart(now, "no active session");
        };
        Self::tick_aggregator(session, &self.sink, &mut self.stats, now);

        match session.source.check() {
            Ok(CaptureStatus::Streaming) => {
                info!(camera = %session.camera.name, "source back");
                self.reconnecting_since = None;
                self.transition(PipelineState::Running);
                Ok(())
            }
            Ok(CaptureStatus::Reconnecting { attempt }) => {
                let elapsed = self
                    .reconnecting_since
                    .map_or(Duration::ZERO, |since| now.saturating_duration_since(since));
                if elapsed >= self.config.orchestrator.reconnect_timeout() {
                    warn!(attempt, ?elapsed, "reconnect taking too long");
                    self.begin_restart(now, "reconnect timed out")
                } else {
                    Ok(())
                }
            }
            Ok(CaptureStatus::Exhausted | CaptureStatus::Stopped) => {
                self.begin_restart(now, "capture stopped")
            }
            Err(err) => {
                warn!(camera = %session.camera.name, error = %err, "source lost");
                self.begin_restart(now, "source exhausted")
            }
        }
    }

    fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.source.close();
            let lifetime = session.started_at.elapsed();
            debug!(camera = %session.camera.name, ?lifetime, "session torn down");
        }
        self.reconnecting_since = None;
    }

    fn begin_restart(&mut self, now: Instant, reason: &'static str) -> Result<(), PipelineError> {
        self.teardown();
        self.stats.restarts += 1;
        match self.restart.next_backoff() {
            Some(backoff) => {
                warn!(reason, attempt = self.restart.attempts(), ?backoff, "restarting pipeline");
                self.restart_at = Some(now + backoff);
                self.transition(PipelineState::Restarting);
                Ok(())
            }
            None => {
                let attempts = self.restart.attempts();
                error!(reason, attempts, "restart budget exhausted");
                self.transition(PipelineState::Terminated);
                Err(PipelineError::RestartBudgetExhausted { attempts })
            }
        }
    }
}
