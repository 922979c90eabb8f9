use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::detect::backend::{ObjectDetector, PoseEstimator};
use crate::detect::result::{FrameDetections, ObjectBox, Pose};
use crate::frame::Frame;

/// Replays pre-computed detections, one JSON line per captured frame.
///
/// Line format: `{"poses": [[[x, y], ...], ...], "boxes": [{"class_id": 67, "x1": .., "y1": .., "x2": .., "y2": ..}]}`.
/// Each handle keeps its own cursor, so the pose and object sides of a run can
/// share one loaded file. Frames past the end of the file have no detections.
#[derive(Clone, Debug)]
pub struct ReplayBackend {
    frames: Arc<Vec<FrameDetections>>,
    cursor: usize,
}

impl ReplayBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read replay file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid replay file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut frames = Vec::new();
        for (lineno, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let frame: FrameDetections = serde_json::from_str(line)
                .map_err(|e| anyhow!("line {}: {}", lineno + 1, e))?;
            frames.push(frame);
        }
        Ok(Self::from_frames(frames))
    }

    pub fn from_frames(frames: Vec<FrameDetections>) -> Self {
        Self {
            frames: Arc::new(frames),
            cursor: 0,
        }
    }

    /// Another handle over the same data, starting at the first frame.
    pub fn rewound(&self) -> Self {
        Self {
            frames: Arc::clone(&self.frames),
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn advance(&mut self) -> Option<&FrameDetections> {
        let idx = self.cursor;
        self.cursor += 1;
        self.frames.get(idx)
    }
}

impl PoseEstimator for ReplayBackend {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn estimate(&mut self, _frame: &Frame) -> Result<Vec<Pose>> {
        Ok(self.advance().map(|f| f.poses.clone()).unwrap_or_default())
    }
}

impl ObjectDetector for ReplayBackend {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<ObjectBox>> {
        Ok(self.advance().map(|f| f.boxes.clone()).unwrap_or_default())
    }
}
