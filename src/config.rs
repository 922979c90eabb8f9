use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::BackendKind;
use crate::BehaviorKind;

const DEFAULT_DB_PATH: &str = "invigilator.db";
const DEFAULT_MEDIA_DIR: &str = "media";
const DEFAULT_TEMP_DIR: &str = ".";
const DEFAULT_SOURCE: &str = "stub://exam_room";
const DEFAULT_FRAME_WIDTH: u32 = 1280;
const DEFAULT_FRAME_HEIGHT: u32 = 720;
const DEFAULT_CAPTURE_FPS: u32 = 30;
const DEFAULT_HALL_NAME: &str = "LH1";
const DEFAULT_BUILDING: &str = "Main Block";
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_SSH_PORT: u16 = 22;
const DEFAULT_REMOTE_ROOT: &str = "AIInvigilator";

// Geometry constants. Distances are pixels in the monitoring frame
// (capture resolution after resize); ratios are unitless.

/// Eye/shoulder width ratio below which a head is turned away.
pub const TURNED_AWAY_RATIO: f32 = 0.17;
/// Eye/shoulder width ratio above which a face is too frontal to judge lean.
pub const LEAN_MAX_EYE_SHOULDER_RATIO: f32 = 0.35;
/// Maximum vertical shoulder misalignment for a lean reading.
pub const LEAN_MAX_SHOULDER_TILT: f32 = 40.0;
/// Head-centre vs shoulder-centre horizontal offset that counts as leaning.
pub const LEAN_MIN_HEAD_OFFSET: f32 = 80.0;
/// Shoulder widths below this are degenerate poses.
pub const MIN_SHOULDER_WIDTH: f32 = 10.0;
/// How far above the higher shoulder a wrist must be for a raised hand.
pub const HAND_RAISE_MARGIN: f32 = 30.0;
/// Cross-person wrist distance below which paper may be changing hands.
pub const PASS_MAX_WRIST_DISTANCE: f32 = 200.0;
/// A person's own wrists closer than this mark an unusable pose.
pub const PASS_MIN_SELF_WRIST_DISTANCE: f32 = 100.0;
/// Largest vertical gap between the two wrists of a passing pair.
pub const PASS_MAX_VERTICAL_DIFF: f32 = 150.0;
/// Wrist height above the shoulder line that marks a vertical hand raise.
pub const PASS_RAISE_WRIST_MARGIN: f32 = 80.0;
/// Elbow height above the shoulder line that marks a vertical hand raise.
pub const PASS_RAISE_ELBOW_MARGIN: f32 = 40.0;
/// COCO class id of "cell phone".
pub const PHONE_CLASS_ID: u32 = 67;

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    db_path: Option<String>,
    media_dir: Option<PathBuf>,
    temp_dir: Option<PathBuf>,
    capture: Option<CaptureConfigFile>,
    lecture_hall: Option<LectureHallConfigFile>,
    thresholds: Option<EpisodeThresholds>,
    geometry: Option<Geometry>,
    inference: Option<InferenceConfigFile>,
    remote: Option<RemoteConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct LectureHallConfigFile {
    name: Option<String>,
    building: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct InferenceConfigFile {
    pose_backend: Option<BackendKind>,
    object_backend: Option<BackendKind>,
    pose_model: Option<PathBuf>,
    object_model: Option<PathBuf>,
    replay_path: Option<PathBuf>,
    parallel: Option<bool>,
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct RemoteConfigFile {
    enabled: Option<bool>,
    host: Option<String>,
    user: Option<String>,
    port: Option<u16>,
    remote_root: Option<String>,
    identity_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub db_path: String,
    pub media_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub capture: CaptureSettings,
    pub lecture_hall: LectureHallSettings,
    pub thresholds: EpisodeThresholds,
    pub geometry: Geometry,
    pub inference: InferenceSettings,
    /// Present only in distributed deployment mode.
    pub remote: Option<RemoteSettings>,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LectureHallSettings {
    pub name: String,
    pub building: String,
}

#[derive(Debug, Clone)]
pub struct InferenceSettings {
    pub pose_backend: BackendKind,
    pub object_backend: BackendKind,
    pub pose_model: Option<PathBuf>,
    pub object_model: Option<PathBuf>,
    pub replay_path: Option<PathBuf>,
    /// Run pose and object inference on separate threads.
    pub parallel: bool,
    pub confidence: f32,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            pose_backend: BackendKind::Stub,
            object_backend: BackendKind::Stub,
            pose_model: None,
            object_model: None,
            replay_path: None,
            parallel: false,
            confidence: DEFAULT_CONFIDENCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub remote_root: String,
    pub identity_file: Option<PathBuf>,
}

/// Minimum confirmed episode length, in frames, per behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EpisodeThresholds {
    pub leaning: u32,
    pub passing_paper: u32,
    pub turning_back: u32,
    pub hand_raise: u32,
    pub mobile: u32,
}

impl Default for EpisodeThresholds {
    fn default() -> Self {
        Self {
            leaning: BehaviorKind::Leaning.default_threshold(),
            passing_paper: BehaviorKind::PassingPaper.default_threshold(),
            turning_back: BehaviorKind::TurningBack.default_threshold(),
            hand_raise: BehaviorKind::HandRaise.default_threshold(),
            mobile: BehaviorKind::Mobile.default_threshold(),
        }
    }
}

impl EpisodeThresholds {
    pub fn for_kind(&self, kind: BehaviorKind) -> u32 {
        match kind {
            BehaviorKind::Leaning => self.leaning,
            BehaviorKind::PassingPaper => self.passing_paper,
            BehaviorKind::TurningBack => self.turning_back,
            BehaviorKind::HandRaise => self.hand_raise,
            BehaviorKind::Mobile => self.mobile,
        }
    }
}

/// Classifier constants. See the module-level constants for units.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct Geometry {
    pub turned_away_ratio: f32,
    pub lean_max_eye_shoulder_ratio: f32,
    pub lean_max_shoulder_tilt: f32,
    pub lean_min_head_offset: f32,
    pub min_shoulder_width: f32,
    pub hand_raise_margin: f32,
    pub pass_max_wrist_distance: f32,
    pub pass_min_self_wrist_distance: f32,
    pub pass_max_vertical_diff: f32,
    pub pass_raise_wrist_margin: f32,
    pub pass_raise_elbow_margin: f32,
    pub phone_class_id: u32,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            turned_away_ratio: TURNED_AWAY_RATIO,
            lean_max_eye_shoulder_ratio: LEAN_MAX_EYE_SHOULDER_RATIO,
            lean_max_shoulder_tilt: LEAN_MAX_SHOULDER_TILT,
            lean_min_head_offset: LEAN_MIN_HEAD_OFFSET,
            min_shoulder_width: MIN_SHOULDER_WIDTH,
            hand_raise_margin: HAND_RAISE_MARGIN,
            pass_max_wrist_distance: PASS_MAX_WRIST_DISTANCE,
            pass_min_self_wrist_distance: PASS_MIN_SELF_WRIST_DISTANCE,
            pass_max_vertical_diff: PASS_MAX_VERTICAL_DIFF,
            pass_raise_wrist_margin: PASS_RAISE_WRIST_MARGIN,
            pass_raise_elbow_margin: PASS_RAISE_ELBOW_MARGIN,
            phone_class_id: PHONE_CLASS_ID,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from_file(MonitorConfigFile::default())
    }
}

impl MonitorConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("INVIGILATOR_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Self {
        let capture = file.capture.unwrap_or_default();
        let hall = file.lecture_hall.unwrap_or_default();
        let inference = file.inference.unwrap_or_default();
        let defaults = InferenceSettings::default();

        let remote = file.remote.and_then(|remote| {
            if !remote.enabled.unwrap_or(remote.host.is_some()) {
                return None;
            }
            Some(RemoteSettings {
                host: remote.host.unwrap_or_default(),
                user: remote.user.unwrap_or_default(),
                port: remote.port.unwrap_or(DEFAULT_SSH_PORT),
                remote_root: remote
                    .remote_root
                    .unwrap_or_else(|| DEFAULT_REMOTE_ROOT.to_string()),
                identity_file: remote.identity_file,
            })
        });

        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            media_dir: file
                .media_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MEDIA_DIR)),
            temp_dir: file
                .temp_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMP_DIR)),
            capture: CaptureSettings {
                source: capture.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
                width: capture.width.unwrap_or(DEFAULT_FRAME_WIDTH),
                height: capture.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
                fps: capture.fps.unwrap_or(DEFAULT_CAPTURE_FPS),
            },
            lecture_hall: LectureHallSettings {
                name: hall.name.unwrap_or_else(|| DEFAULT_HALL_NAME.to_string()),
                building: hall.building.unwrap_or_else(|| DEFAULT_BUILDING.to_string()),
            },
            thresholds: file.thresholds.unwrap_or_default(),
            geometry: file.geometry.unwrap_or_default(),
            inference: InferenceSettings {
                pose_backend: inference.pose_backend.unwrap_or(defaults.pose_backend),
                object_backend: inference.object_backend.unwrap_or(defaults.object_backend),
                pose_model: inference.pose_model,
                object_model: inference.object_model,
                replay_path: inference.replay_path,
                parallel: inference.parallel.unwrap_or(defaults.parallel),
                confidence: inference.confidence.unwrap_or(defaults.confidence),
            },
            remote,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = non_empty_env("INVIGILATOR_DB_PATH") {
            self.db_path = path;
        }
        if let Some(dir) = non_empty_env("INVIGILATOR_MEDIA_DIR") {
            self.media_dir = PathBuf::from(dir);
        }
        if let Some(source) = non_empty_env("INVIGILATOR_SOURCE") {
            self.capture.source = source;
        }
        if let Some(name) = non_empty_env("INVIGILATOR_HALL_NAME") {
            self.lecture_hall.name = name;
        }
        if let Some(building) = non_empty_env("INVIGILATOR_BUILDING") {
            self.lecture_hall.building = building;
        }
        if let Some(host) = non_empty_env("INVIGILATOR_REMOTE_HOST") {
            let remote = self.remote.get_or_insert_with(|| RemoteSettings {
                host: String::new(),
                user: String::new(),
                port: DEFAULT_SSH_PORT,
                remote_root: DEFAULT_REMOTE_ROOT.to_string(),
                identity_file: None,
            });
            remote.host = host;
        }
        if let Some(user) = non_empty_env("INVIGILATOR_REMOTE_USER") {
            match self.remote.as_mut() {
                Some(remote) => remote.user = user,
                None => {
                    return Err(anyhow!(
                        "INVIGILATOR_REMOTE_USER is set but no remote host is configured"
                    ))
                }
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for kind in BehaviorKind::ALL {
            if self.thresholds.for_kind(kind) == 0 {
                return Err(anyhow!("threshold for {} must be at least 1 frame", kind));
            }
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture width and height must be greater than zero"));
        }
        if self.capture.fps == 0 {
            return Err(anyhow!("capture fps must be greater than zero"));
        }
        if self.lecture_hall.name.trim().is_empty() || self.lecture_hall.building.trim().is_empty()
        {
            return Err(anyhow!("lecture hall name and building must be set"));
        }
        if !(0.0..=1.0).contains(&self.inference.confidence) {
            return Err(anyhow!("inference confidence must be within 0..=1"));
        }
        if let Some(remote) = &self.remote {
            if remote.host.trim().is_empty() || remote.user.trim().is_empty() {
                return Err(anyhow!("remote replication requires host and user"));
            }
            if remote.remote_root.trim().is_empty() {
                return Err(anyhow!("remote replication requires remote_root"));
            }
        }
        Ok(())
    }

    /// True when proof files are also copied to a remote host.
    pub fn is_distributed(&self) -> bool {
        self.remote.is_some()
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
