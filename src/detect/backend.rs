use anyhow::Result;

use crate::detect::result::{ObjectBox, Pose};
use crate::frame::Frame;

/// Pose estimation collaborator.
///
/// Implementations return one `Pose` per detected person, keypoints in frame
/// pixel coordinates and the fixed COCO landmark order.
pub trait PoseEstimator: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn estimate(&mut self, frame: &Frame) -> Result<Vec<Pose>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Object detection collaborator.
pub trait ObjectDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<ObjectBox>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Failure policy shared by every inference call: an error is logged and the
/// frame is treated as having no detections.
pub fn or_no_detection<T>(backend: &str, result: Result<Vec<T>>) -> Vec<T> {
    match result {
        Ok(found) => found,
        Err(e) => {
            log::warn!("{} inference failed, treating frame as empty: {:#}", backend, e);
            Vec::new()
        }
    }
}
