use anyhow::Result;

use crate::detect::backend::{ObjectDetector, PoseEstimator};
use crate::detect::result::{ObjectBox, Pose};
use crate::frame::Frame;

/// Stub backend for dry runs. Sees nobody and nothing.
#[derive(Debug, Default)]
pub struct StubBackend {
    frames_seen: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

impl PoseEstimator for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn estimate(&mut self, _frame: &Frame) -> Result<Vec<Pose>> {
        self.frames_seen += 1;
        Ok(Vec::new())
    }
}

impl ObjectDetector for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<ObjectBox>> {
        self.frames_seen += 1;
        Ok(Vec::new())
    }
}
