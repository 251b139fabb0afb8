use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use linecount_rs::orchestrator::{CameraDirectory, CameraInfo};
use linecount_rs::snapshot::{SnapshotConfig, SnapshotRequest};
use linecount_rs::{
    BBox, ClassLabel, CountsSink, CrossingEvent, Detection, DetectionError, Direction, Frame,
    LineId, ObjectDetector, Orchestrator, PipelineConfig, PipelineError, PipelineState,
    SinkError, SourceError, VideoBackend, VideoStream,
};
use parking_lot::Mutex;

struct FakeStream {
    size: (u32, u32),
    broken: bool,
    failing: Arc<AtomicBool>,
}

impl VideoStream for FakeStream {
    fn read(&mut self) -> Result<Frame, SourceError> {
        if self.broken || self.failing.load(Ordering::SeqCst) {
            return Err(SourceError::read("decoder error"));
        }
        Ok(Frame::blank(self.size.0, self.size.1))
    }

    fn dimensions(&self) -> (u32, u32) {
        self.size
    }
}

#[derive(Default)]
struct FakeBackend {
    opened: Mutex<Vec<String>>,
    opens: AtomicU32,
    /// Opens numbered at or above this fail
    refuse_from: Option<u32>,
    broken_streams: bool,
    /// While set, reads on every open stream fail
    reads_fail: Arc<AtomicBool>,
}

impl VideoBackend for FakeBackend {
    type Stream = FakeStream;

    fn open(&self, address: &str) -> Result<FakeStream, SourceError> {
        let n = self.opens.fetch_add(1, Ordering::SeqCst);
        if self.refuse_from.is_some_and(|limit| n >= limit) {
            return Err(SourceError::open(address, "connection refused"));
        }
        self.opened.lock().push(address.to_string());
        Ok(FakeStream {
            size: (320, 200),
            broken: self.broken_streams,
            failing: Arc::clone(&self.reads_fail),
        })
    }
}

/// Returns one scripted batch per call, repeating the last one.
struct ScriptedDetector {
    script: VecDeque<Result<Vec<Detection>, String>>,
    last: Vec<Detection>,
}

impl ObjectDetector for ScriptedDetector {
    type Error = String;

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, String> {
        match self.script.pop_front() {
            Some(Ok(batch)) => {
                self.last = batch.clone();
                Ok(batch)
            }
            Some(Err(err)) => Err(err),
            None => Ok(self.last.clone()),
        }
    }
}

fn car_at(y: i32) -> Detection {
    Detection::new(BBox::new(150, y - 10, 170, y + 10).unwrap(), ClassLabel::Car, 0.9)
}

fn crossing_script() -> Vec<Result<Vec<Detection>, String>> {
    [150, 110, 95, 85].into_iter().map(|y| Ok(vec![car_at(y)])).collect()
}

#[derive(Default)]
struct RecordingSink {
    saved: Mutex<Vec<(String, String, String)>>,
}

impl CountsSink for RecordingSink {
    fn save(&self, camera: &str, mode: &str, counts_json: &str) -> Result<(), SinkError> {
        self.saved
            .lock()
            .push((camera.to_string(), mode.to_string(), counts_json.to_string()));
        Ok(())
    }
}

fn config() -> PipelineConfig {
    PipelineConfig::from_json_str(
        r#"{
            "source": {"camera_name": "gate-north", "mode": "traffic",
                       "address": "fake://gate-north"},
            "lines": {"up": [0.5]},
            "detection": {"throttle": {"every_n_cycles": 1}},
            "capture": {"target_fps": 200.0, "max_consecutive_failures": 1,
                        "max_reconnect_attempts": 1, "reconnect_backoff_ms": 1, "read_retry_ms": 1},
            "aggregation": {"reset_interval_secs": 1, "flush_interval_secs": 2},
            "orchestrator": {"restart_backoff_ms": 1, "max_restart_backoff_ms": 1,
                             "max_restarts": 1}
        }"#,
    )
    .unwrap()
}

fn loader(
    script: Vec<Result<Vec<Detection>, String>>,
) -> impl FnMut() -> Result<ScriptedDetector, DetectionError> {
    move || {
        Ok(ScriptedDetector {
            script: script.clone().into(),
            last: Vec::new(),
        })
    }
}

/// Step with a fixed clock until `done` holds or three seconds pass.
fn step_until<B, L, S>(
    orchestrator: &mut Orchestrator<B, L, S>,
    now: Instant,
    mut done: impl FnMut(&Orchestrator<B, L, S>) -> bool,
) -> bool
where
    B: VideoBackend,
    L: linecount_rs::integration::DetectorLoader,
    S: CountsSink + 'static,
{
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if orchestrator.step(now).is_err() {
            return done(orchestrator);
        }
        if done(orchestrator) {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

#[test]
fn test_counts_reach_the_sink() {
    let backend = Arc::new(FakeBackend::default());
    let sink = Arc::new(RecordingSink::default());
    let mut orchestrator = Orchestrator::new(
        config(),
        Arc::clone(&backend),
        loader(crossing_script()),
        Arc::clone(&sink),
    )
    .unwrap();

    let t0 = Instant::now();
    assert_eq!(orchestrator.step(t0).unwrap(), PipelineState::Running);
    assert_eq!(orchestrator.camera().unwrap().name, "gate-north");
    assert!(step_until(&mut orchestrator, t0, |o| o.stats().detection_cycles >= 4));
    assert_eq!(orchestrator.stats().crossings, 1);

    orchestrator.step(t0 + Duration::from_secs(1)).unwrap();
    orchestrator.step(t0 + Duration::from_secs(2)).unwrap();

    let saved = sink.saved.lock();
    assert_eq!(saved.len(), 1);
    let (camera, mode, json) = &saved[0];
    assert_eq!(camera, "gate-north");
    assert_eq!(mode, "traffic");
    let payload: BTreeMap<String, u64> = serde_json::from_str(json).unwrap();
    assert_eq!(payload["car_up"], 1);
    assert_eq!(payload["car_down"], 0);
    assert_eq!(orchestrator.stats().flushes_ok, 1);
    drop(saved);

    orchestrator.shutdown();
    assert_eq!(orchestrator.state(), PipelineState::Terminated);
}

#[test]
fn test_detection_failure_is_absorbed() {
    let backend = Arc::new(FakeBackend::default());
    let script = vec![
        Ok(vec![car_at(150)]),
        Err("gpu busy".to_string()),
        Ok(vec![car_at(140)]),
    ];
    let sink = Arc::new(RecordingSink::default());
    let mut orchestrator = Orchestrator::new(config(), backend, loader(script), sink).unwrap();

    let t0 = Instant::now();
    assert!(step_until(&mut orchestrator, t0, |o| o.stats().detection_cycles >= 3));
    assert_eq!(orchestrator.stats().detection_failures, 1);
    assert_eq!(orchestrator.state(), PipelineState::Running);
    assert_eq!(orchestrator.pipeline().unwrap().tracker().len(), 1);
}

#[test]
fn test_first_initialization_failure_is_fatal() {
    let backend = Arc::new(FakeBackend {
        refuse_from: Some(0),
        ..FakeBackend::default()
    });
    let sink = Arc::new(RecordingSink::default());
    let mut orchestrator = Orchestrator::new(config(), backend, loader(vec![]), sink).unwrap();

    let err = orchestrator.step(Instant::now()).unwrap_err();
    assert!(matches!(err, PipelineError::Source(SourceError::Open { .. })));
    assert_eq!(orchestrator.state(), PipelineState::Terminated);
}

#[test]
fn test_detector_load_failure_is_fatal() {
    let backend = Arc::new(FakeBackend::default());
    let failing = || -> Result<ScriptedDetector, DetectionError> {
        Err(DetectionError::Load("weights missing".into()))
    };
    let sink = Arc::new(RecordingSink::default());
    let mut orchestrator = Orchestrator::new(config(), backend, failing, sink).unwrap();

    assert!(matches!(
        orchestrator.step(Instant::now()),
        Err(PipelineError::Detection(DetectionError::Load(_)))
    ));
}

#[test]
fn test_exhausted_source_restarts_until_budget_is_spent() {
    let backend = Arc::new(FakeBackend {
        refuse_from: Some(1),
        broken_streams: true,
        ..FakeBackend::default()
    });
    let sink = Arc::new(RecordingSink::default());
    let mut orchestrator = Orchestrator::new(config(), backend, loader(vec![]), sink).unwrap();

    assert_eq!(orchestrator.step(Instant::now()).unwrap(), PipelineState::Running);

    let deadline = Instant::now() + Duration::from_secs(3);
    let mut result = Ok(PipelineState::Running);
    while Instant::now() < deadline {
        result = orchestrator.step(Instant::now());
        if result.is_err() {
            break;
        }
        thread::sleep(Duration::from_millis(2));
    }

    assert!(matches!(result, Err(PipelineError::RestartBudgetExhausted { attempts: 1 })));
    assert_eq!(orchestrator.state(), PipelineState::Terminated);
    assert_eq!(orchestrator.stats().restarts, 2);
}

struct SharedDirectory(Arc<Mutex<Vec<CameraInfo>>>);

impl CameraDirectory for SharedDirectory {
    fn list_cameras(&self, mode: &str) -> Result<Vec<CameraInfo>, SourceError> {
        Ok(self.0.lock().iter().filter(|c| c.mode == mode).cloned().collect())
    }
}

fn camera(address: &str) -> CameraInfo {
    CameraInfo {
        name: "gate-north".into(),
        address: address.into(),
        mode: "traffic".into(),
    }
}

#[test]
fn test_camera_address_change_restarts_pipeline() {
    let backend = Arc::new(FakeBackend::default());
    let cameras = Arc::new(Mutex::new(vec![camera("rtsp://10.0.0.1/live")]));
    let mut orchestrator = Orchestrator::new(
        config(),
        Arc::clone(&backend),
        loader(vec![]),
        Arc::new(RecordingSink::default()),
    )
    .unwrap()
    .with_camera_directory(SharedDirectory(Arc::clone(&cameras)));

    let t0 = Instant::now();
    assert_eq!(orchestrator.step(t0).unwrap(), PipelineState::Running);
    assert_eq!(orchestrator.camera().unwrap().address, "rtsp://10.0.0.1/live");

    // Unchanged listing keeps running.
    let t1 = t0 + Duration::from_secs(60);
    assert_eq!(orchestrator.step(t1).unwrap(), PipelineState::Running);

    *cameras.lock() = vec![camera("rtsp://10.0.0.9/live")];
    let t2 = t1 + Duration::from_secs(60);
    assert_eq!(orchestrator.step(t2).unwrap(), PipelineState::Restarting);
    assert_eq!(orchestrator.stats().restarts, 1);

    let t3 = t2 + Duration::from_millis(5);
    assert_eq!(orchestrator.step(t3).unwrap(), PipelineState::Initializing);
    assert_eq!(orchestrator.step(t3).unwrap(), PipelineState::Running);
    assert_eq!(orchestrator.camera().unwrap().address, "rtsp://10.0.0.9/live");
    assert_eq!(
        *backend.opened.lock(),
        vec!["rtsp://10.0.0.1/live".to_string(), "rtsp://10.0.0.9/live".to_string()]
    );
}

#[test]
fn test_reconnect_recovers_without_losing_counts() {
    let backend = Arc::new(FakeBackend::default());
    let mut config = config();
    config.capture.reconnect_backoff_ms = 200;
    let sink = Arc::new(RecordingSink::default());
    let mut orchestrator =
        Orchestrator::new(config, Arc::clone(&backend), loader(crossing_script()), sink).unwrap();

    let t0 = Instant::now();
    assert!(step_until(&mut orchestrator, t0, |o| o.stats().crossings == 1));

    backend.reads_fail.store(true, Ordering::SeqCst);
    assert!(step_until(&mut orchestrator, t0, |o| {
        o.state() == PipelineState::Reconnecting
    }));
    backend.reads_fail.store(false, Ordering::SeqCst);
    assert!(step_until(&mut orchestrator, t0, |o| o.state() == PipelineState::Running));

    assert_eq!(orchestrator.stats().restarts, 0);
    assert_eq!(backend.opens.load(Ordering::SeqCst), 2);
    let pipeline = orchestrator.pipeline().unwrap();
    assert_eq!(pipeline.counter().counts().get(ClassLabel::Car, LineId::up(0)), 1);
}

#[test]
fn test_slow_reconnect_escalates_to_restart() {
    let backend = Arc::new(FakeBackend {
        refuse_from: Some(1),
        ..FakeBackend::default()
    });
    let mut config = config();
    config.capture.max_reconnect_attempts = 5;
    config.capture.reconnect_backoff_ms = 500;
    config.orchestrator.max_restarts = 3;
    config.orchestrator.reconnect_timeout_secs = 5;
    let sink = Arc::new(RecordingSink::default());
    let mut orchestrator =
        Orchestrator::new(config, Arc::clone(&backend), loader(vec![]), sink).unwrap();

    let t0 = Instant::now();
    assert_eq!(orchestrator.step(t0).unwrap(), PipelineState::Running);
    backend.reads_fail.store(true, Ordering::SeqCst);
    assert!(step_until(&mut orchestrator, t0, |o| {
        o.state() == PipelineState::Reconnecting
    }));

    let t1 = t0 + Duration::from_secs(4);
    assert_eq!(orchestrator.step(t1).unwrap(), PipelineState::Reconnecting);
    assert_eq!(orchestrator.stats().restarts, 0);

    let t2 = t0 + Duration::from_secs(5);
    assert_eq!(orchestrator.step(t2).unwrap(), PipelineState::Restarting);
    assert_eq!(orchestrator.stats().restarts, 1);
    assert!(orchestrator.pipeline().is_none());
}

#[derive(Default)]
struct StalledSink {
    calls: AtomicU32,
}

impl CountsSink for StalledSink {
    fn save(&self, _camera: &str, _mode: &str, _counts_json: &str) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_secs(2));
        Ok(())
    }
}

#[test]
fn test_stalled_sink_does_not_block_the_cycle() {
    let backend = Arc::new(FakeBackend::default());
    let sink = Arc::new(StalledSink::default());
    let mut config = config();
    config.aggregation.flush_timeout_ms = 50;
    let mut orchestrator =
        Orchestrator::new(config, backend, loader(crossing_script()), Arc::clone(&sink)).unwrap();

    let t0 = Instant::now();
    assert!(step_until(&mut orchestrator, t0, |o| o.stats().crossings == 1));
    orchestrator.step(t0 + Duration::from_secs(1)).unwrap();

    let started = Instant::now();
    let state = orchestrator.step(t0 + Duration::from_secs(2)).unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(state, PipelineState::Running);

    assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.stats().flushes_ok, 0);
    assert_eq!(orchestrator.stats().flushes_failed, 1);
    let totals = orchestrator.pipeline().unwrap().aggregator().accumulated();
    assert_eq!(totals.get(ClassLabel::Car, Direction::Up), 1);
}

#[test]
fn test_run_releases_resources_when_initialization_fails() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend {
        refuse_from: Some(0),
        ..FakeBackend::default()
    });
    let mut config = config();
    config.snapshots = Some(SnapshotConfig::new(dir.path()));
    let sink = Arc::new(RecordingSink::default());
    let mut orchestrator = Orchestrator::new(config, backend, loader(vec![]), sink).unwrap();

    let result = orchestrator.run(&AtomicBool::new(false));
    assert!(matches!(result, Err(PipelineError::Source(SourceError::Open { .. }))));
    assert_eq!(orchestrator.state(), PipelineState::Terminated);

    // The snapshot writer was shut down, so nothing more is queued.
    let event = CrossingEvent {
        id: 1,
        line: LineId::up(0),
        class: ClassLabel::Car,
    };
    let request = SnapshotRequest::new(Frame::blank(8, 8), event, "gate-north");
    assert!(!orchestrator.snapshots().unwrap().submit(request));
}
