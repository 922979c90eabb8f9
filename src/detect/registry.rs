use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::str::FromStr;

use crate::config::InferenceSettings;

use super::backend::{ObjectDetector, PoseEstimator};
use super::backends::{ReplayBackend, StubBackend};

/// Which implementation serves an inference collaborator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Stub,
    Replay,
    Tract,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(BackendKind::Stub),
            "replay" => Ok(BackendKind::Replay),
            "tract" => Ok(BackendKind::Tract),
            other => Err(anyhow!("unknown inference backend '{}'", other)),
        }
    }
}

/// The two per-frame inference collaborators of a monitoring session.
pub struct InferenceBackends {
    pub pose: Box<dyn PoseEstimator>,
    pub objects: Box<dyn ObjectDetector>,
}

impl InferenceBackends {
    pub fn new(pose: Box<dyn PoseEstimator>, objects: Box<dyn ObjectDetector>) -> Self {
        Self { pose, objects }
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.pose.warm_up()?;
        self.objects.warm_up()
    }
}

/// Instantiate the configured backends.
///
/// When both sides replay the same file it is loaded once.
pub fn build_backends(settings: &InferenceSettings) -> Result<InferenceBackends> {
    let replay = match (settings.pose_backend, settings.object_backend) {
        (BackendKind::Replay, _) | (_, BackendKind::Replay) => {
            let path = settings
                .replay_path
                .as_ref()
                .ok_or_else(|| anyhow!("replay backend requires inference.replay_path"))?;
            Some(ReplayBackend::open(path)?)
        }
        _ => None,
    };

    let pose: Box<dyn PoseEstimator> = match settings.pose_backend {
        BackendKind::Stub => Box::new(StubBackend::new()),
        BackendKind::Replay => Box::new(replay_handle(&replay)?),
        BackendKind::Tract => tract_pose(settings)?,
    };
    let objects: Box<dyn ObjectDetector> = match settings.object_backend {
        BackendKind::Stub => Box::new(StubBackend::new()),
        BackendKind::Replay => Box::new(replay_handle(&replay)?),
        BackendKind::Tract => tract_objects(settings)?,
    };

    log::info!(
        "inference backends: pose={} objects={} parallel={}",
        pose.name(),
        objects.name(),
        settings.parallel
    );
    Ok(InferenceBackends { pose, objects })
}

fn replay_handle(replay: &Option<ReplayBackend>) -> Result<ReplayBackend> {
    replay
        .as_ref()
        .map(ReplayBackend::rewound)
        .ok_or_else(|| anyhow!("replay data not loaded"))
}

#[cfg(feature = "backend-tract")]
fn tract_pose(settings: &InferenceSettings) -> Result<Box<dyn PoseEstimator>> {
    let path = settings
        .pose_model
        .as_ref()
        .ok_or_else(|| anyhow!("tract pose backend requires inference.pose_model"))?;
    Ok(Box::new(super::backends::TractPoseEstimator::new(
        path,
        settings.confidence,
    )?))
}

#[cfg(not(feature = "backend-tract"))]
fn tract_pose(_settings: &InferenceSettings) -> Result<Box<dyn PoseEstimator>> {
    Err(anyhow!("tract pose backend requires the backend-tract feature"))
}

#[cfg(feature = "backend-tract")]
fn tract_objects(settings: &InferenceSettings) -> Result<Box<dyn ObjectDetector>> {
    let path = settings
        .object_model
        .as_ref()
        .ok_or_else(|| anyhow!("tract object backend requires inference.object_model"))?;
    Ok(Box::new(super::backends::TractObjectDetector::new(
        path,
        settings.confidence,
    )?))
}

#[cfg(not(feature = "backend-tract"))]
fn tract_objects(_settings: &InferenceSettings) -> Result<Box<dyn ObjectDetector>> {
    Err(anyhow!("tract object backend requires the backend-tract feature"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backend_names() {
        assert_eq!("Replay".parse::<BackendKind>().unwrap(), BackendKind::Replay);
        assert_eq!(" stub ".parse::<BackendKind>().unwrap(), BackendKind::Stub);
        assert!("opencv".parse::<BackendKind>().is_err());
    }

    #[test]
    fn replay_requires_a_path() {
        let settings = InferenceSettings {
            pose_backend: BackendKind::Replay,
            ..InferenceSettings::default()
        };
        assert!(build_backends(&settings).is_err());
    }

    #[test]
    fn stub_backends_build_without_models() {
        let backends = build_backends(&InferenceSettings::default()).unwrap();
        assert_eq!(backends.pose.name(), "stub");
        assert_eq!(backends.objects.name(), "stub");
    }
}
