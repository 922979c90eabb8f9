use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use exam_invigilator::config::MonitorConfig;
use exam_invigilator::detect::BackendKind;
use exam_invigilator::BehaviorKind;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "INVIGILATOR_CONFIG",
        "INVIGILATOR_DB_PATH",
        "INVIGILATOR_MEDIA_DIR",
        "INVIGILATOR_SOURCE",
        "INVIGILATOR_HALL_NAME",
        "INVIGILATOR_BUILDING",
        "INVIGILATOR_REMOTE_HOST",
        "INVIGILATOR_REMOTE_USER",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "db_path": "exams.db",
            "media_dir": "/srv/invigilator/media",
            "capture": {
                "source": "/srv/exams/hall1.mp4",
                "width": 960,
                "height": 540
            },
            "lecture_hall": {
                "name": "LH4",
                "building": "Science Block"
            },
            "thresholds": {
                "hand_raise": 8
            },
            "inference": {
                "pose_backend": "replay",
                "object_backend": "stub",
                "replay_path": "detections.jsonl",
                "parallel": true
            }
        }"#,
    );

    std::env::set_var("INVIGILATOR_CONFIG", file.path());
    std::env::set_var("INVIGILATOR_HALL_NAME", "LH5");
    std::env::set_var("INVIGILATOR_DB_PATH", "override.db");

    let cfg = MonitorConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "override.db");
    assert_eq!(cfg.media_dir, PathBuf::from("/srv/invigilator/media"));
    assert_eq!(cfg.capture.source, "/srv/exams/hall1.mp4");
    assert_eq!((cfg.capture.width, cfg.capture.height), (960, 540));
    assert_eq!(cfg.capture.fps, 30);
    assert_eq!(cfg.lecture_hall.name, "LH5");
    assert_eq!(cfg.lecture_hall.building, "Science Block");
    assert_eq!(cfg.thresholds.for_kind(BehaviorKind::HandRaise), 8);
    assert_eq!(cfg.thresholds.for_kind(BehaviorKind::Leaning), 3);
    assert_eq!(cfg.inference.pose_backend, BackendKind::Replay);
    assert_eq!(cfg.inference.object_backend, BackendKind::Stub);
    assert!(cfg.inference.parallel);
    assert!(!cfg.is_distributed());

    clear_env();
}

#[test]
fn remote_host_env_enables_distributed_mode() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("INVIGILATOR_REMOTE_HOST", "192.168.1.20");
    std::env::set_var("INVIGILATOR_REMOTE_USER", "invig");

    let cfg = MonitorConfig::load().expect("load config");
    let remote = cfg.remote.as_ref().expect("remote settings");
    assert_eq!(remote.host, "192.168.1.20");
    assert_eq!(remote.user, "invig");
    assert_eq!(remote.port, 22);
    assert_eq!(remote.remote_root, "AIInvigilator");
    assert!(cfg.is_distributed());

    clear_env();
}

#[test]
fn remote_host_without_user_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("INVIGILATOR_REMOTE_HOST", "192.168.1.20");
    assert!(MonitorConfig::load().is_err());

    clear_env();
}

#[test]
fn invalid_files_are_reported() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{"capture": {"width": 0}}"#);
    std::env::set_var("INVIGILATOR_CONFIG", file.path());
    assert!(MonitorConfig::load().is_err());

    let file = write_config("not json");
    std::env::set_var("INVIGILATOR_CONFIG", file.path());
    let err = MonitorConfig::load().unwrap_err();
    assert!(err.to_string().contains("invalid config file"));

    std::env::set_var("INVIGILATOR_CONFIG", "/nonexistent/invigilator.json");
    assert!(MonitorConfig::load().is_err());

    clear_env();
}
