use std::path::Path;
use std::sync::atomic::AtomicBool;

use anyhow::Result;
use tempfile::TempDir;

use exam_invigilator::detect::{build_backends, BackendKind, InferenceBackends, StubBackend};
use exam_invigilator::{
    EventFilter, FileConfig, FileSource, Frame, FrameDetections, FrameSource, Keypoint, Landmark,
    MalpracticeStore, Monitor, MonitorConfig, ObjectBox, ObjectDetector, PersistenceGateway, Pose,
    SqliteMalpracticeStore, StopReason, Y4mClipFactory,
};

const WIDTH: u32 = 32;
const HEIGHT: u32 = 24;
const Y4M_HEADER: &str = "YUV4MPEG2 W32 H24 F30:1 Ip A1:1 C444 XCOLORRANGE=FULL\n";

fn hand_raise_pose() -> Pose {
    let mut keypoints = vec![Keypoint::HIDDEN; 17];
    keypoints[Landmark::LeftShoulder as usize] = Keypoint::new(300.0, 250.0);
    keypoints[Landmark::RightShoulder as usize] = Keypoint::new(200.0, 250.0);
    keypoints[Landmark::LeftElbow as usize] = Keypoint::new(320.0, 200.0);
    keypoints[Landmark::RightElbow as usize] = Keypoint::new(180.0, 280.0);
    keypoints[Landmark::LeftWrist as usize] = Keypoint::new(330.0, 150.0);
    keypoints[Landmark::RightWrist as usize] = Keypoint::new(170.0, 300.0);
    Pose::new(keypoints)
}

/// One replay line per signal: a raised hand for `true`, nothing for `false`.
fn write_replay(dir: &Path, signals: &[bool]) -> std::path::PathBuf {
    let lines: Vec<String> = signals
        .iter()
        .map(|raised| {
            let frame = FrameDetections {
                poses: if *raised { vec![hand_raise_pose()] } else { Vec::new() },
                boxes: Vec::new(),
            };
            serde_json::to_string(&frame).unwrap()
        })
        .collect();
    let path = dir.join("detections.jsonl");
    std::fs::write(&path, lines.join("\n")).unwrap();
    path
}

fn config(dir: &TempDir, frames: usize) -> MonitorConfig {
    let mut cfg = MonitorConfig::default();
    cfg.db_path = dir.path().join("invigilator.db").to_str().unwrap().to_string();
    cfg.media_dir = dir.path().join("media");
    cfg.temp_dir = dir.path().to_path_buf();
    cfg.capture.source = format!("stub://exam_room?frames={}", frames);
    cfg.capture.width = WIDTH;
    cfg.capture.height = HEIGHT;
    cfg
}

fn source(cfg: &MonitorConfig) -> FileSource {
    let mut source = FileSource::new(FileConfig::from(&cfg.capture)).unwrap();
    source.connect().unwrap();
    source
}

fn clip_len(frames: usize) -> u64 {
    (Y4M_HEADER.len() + frames * (6 + 3 * (WIDTH * HEIGHT) as usize)) as u64
}

#[test]
fn hand_raise_episodes_are_confirmed_or_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let signals = [
        true, true, true, true, true, false, // confirmed after 5 frames
        true, true, true, true, false, // discarded after 4
        false,
    ];
    let mut cfg = config(&dir, signals.len());
    cfg.inference.pose_backend = BackendKind::Replay;
    cfg.inference.object_backend = BackendKind::Replay;
    cfg.inference.replay_path = Some(write_replay(dir.path(), &signals));

    let mut gateway = PersistenceGateway::from_config(&cfg).unwrap();
    let hall = gateway.store_mut().add_lecture_hall("LH1", "Main Block").unwrap();
    let backends = build_backends(&cfg.inference).unwrap();
    let mut monitor = Monitor::new(&cfg, backends, Box::new(Y4mClipFactory), Box::new(gateway));

    let stop = AtomicBool::new(false);
    let summary = monitor.run(&mut source(&cfg), &stop, None).unwrap();
    drop(monitor);

    assert_eq!(summary.stop, StopReason::Exhausted);
    assert_eq!(summary.frames, signals.len() as u64);
    assert_eq!(summary.confirmed, 1);
    assert_eq!(summary.discarded, 1);
    assert_eq!(summary.persistence_failures, 0);
    assert_eq!(summary.interrupted_recordings, 0);

    let mut store = SqliteMalpracticeStore::open(&cfg.db_path).unwrap();
    let events = store.list_events(&EventFilter::default()).unwrap();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.malpractice, "Hand Raised");
    assert_eq!(event.lecture_hall_id, Some(hall));
    assert!(!event.verified);
    assert!(event.proof.starts_with("handraise_"));
    assert!(event.proof.ends_with(".y4m"));

    let proof = cfg.media_dir.join(&event.proof);
    let bytes = std::fs::read(&proof).unwrap();
    assert!(bytes.starts_with(Y4M_HEADER.as_bytes()));
    // five raised-hand frames; the closing frame is not recorded
    assert_eq!(bytes.len() as u64, clip_len(5));

    // the discarded episode removed its temporary clip
    assert!(!dir.path().join("output_handraise.y4m").exists());
}

#[test]
fn open_episode_at_exhaustion_leaves_partial_clip_and_no_record() {
    let dir = tempfile::tempdir().unwrap();
    let signals = [true, true, true, true, true, true];
    let mut cfg = config(&dir, signals.len());
    cfg.inference.pose_backend = BackendKind::Replay;
    cfg.inference.replay_path = Some(write_replay(dir.path(), &signals));

    let gateway = PersistenceGateway::from_config(&cfg).unwrap();
    let backends = build_backends(&cfg.inference).unwrap();
    let mut monitor = Monitor::new(&cfg, backends, Box::new(Y4mClipFactory), Box::new(gateway));

    let stop = AtomicBool::new(false);
    let summary = monitor.run(&mut source(&cfg), &stop, None).unwrap();
    drop(monitor);

    assert_eq!(summary.confirmed, 0);
    assert_eq!(summary.interrupted_recordings, 1);

    let partial = dir.path().join("output_handraise.y4m");
    assert_eq!(std::fs::metadata(&partial).unwrap().len(), clip_len(6));

    let mut store = SqliteMalpracticeStore::open(&cfg.db_path).unwrap();
    assert!(store.list_events(&EventFilter::default()).unwrap().is_empty());
}

struct CrashingPhoneDetector {
    calls: u64,
}

impl ObjectDetector for CrashingPhoneDetector {
    fn name(&self) -> &'static str {
        "crashing"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<ObjectBox>> {
        self.calls += 1;
        if self.calls % 2 == 0 {
            anyhow::bail!("detector crashed on frame {}", self.calls);
        }
        Ok(vec![ObjectBox {
            class_id: 67,
            x1: 2.0,
            y1: 2.0,
            x2: 10.0,
            y2: 10.0,
            confidence: 0.7,
        }])
    }
}

#[test]
fn crashing_phone_detector_never_stops_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir, 8);
    let gateway = PersistenceGateway::from_config(&cfg).unwrap();
    let backends = InferenceBackends::new(
        Box::new(StubBackend::new()),
        Box::new(CrashingPhoneDetector { calls: 0 }),
    );
    let mut monitor = Monitor::new(&cfg, backends, Box::new(Y4mClipFactory), Box::new(gateway));

    let stop = AtomicBool::new(false);
    let summary = monitor.run(&mut source(&cfg), &stop, None).unwrap();
    drop(monitor);

    // every failure reads as "no phone", so each episode lasts a single frame
    assert_eq!(summary.frames, 8);
    assert_eq!(summary.confirmed, 0);
    assert_eq!(summary.discarded, 4);
    assert!(!dir.path().join("output_mobiledetection.y4m").exists());
}
