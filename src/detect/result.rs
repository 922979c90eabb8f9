use serde::{Deserialize, Serialize};

/// Number of landmarks in a COCO-style pose.
pub const POSE_KEYPOINTS: usize = 17;

/// Fixed anatomical keypoint order produced by the pose collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum Landmark {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

/// A 2-D landmark position in frame pixels. `(0, 0)` means "not seen".
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 2]", into = "[f32; 2]")]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
}

impl Keypoint {
    pub const HIDDEN: Keypoint = Keypoint { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Seen at all: finite and not the `(0, 0)` sentinel.
    pub fn is_visible(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && !(self.x == 0.0 && self.y == 0.0)
    }

    /// Stricter check used where a zero on either axis marks a dropped landmark.
    pub fn is_nonzero(&self) -> bool {
        self.is_visible() && self.x != 0.0 && self.y != 0.0
    }

    pub fn distance(&self, other: &Keypoint) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl From<[f32; 2]> for Keypoint {
    fn from(v: [f32; 2]) -> Self {
        Self { x: v[0], y: v[1] }
    }
}

impl From<Keypoint> for [f32; 2] {
    fn from(k: Keypoint) -> Self {
        [k.x, k.y]
    }
}

/// One detected person: an ordered keypoint sequence.
///
/// Poses shorter than [`POSE_KEYPOINTS`] are kept as delivered; accessors treat
/// missing trailing landmarks as hidden.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pose {
    pub keypoints: Vec<Keypoint>,
}

impl Pose {
    pub fn new(keypoints: Vec<Keypoint>) -> Self {
        Self { keypoints }
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    pub fn get(&self, landmark: Landmark) -> Keypoint {
        self.keypoints
            .get(landmark as usize)
            .copied()
            .unwrap_or(Keypoint::HIDDEN)
    }

    /// True when the pose carries the landmark slot at all.
    pub fn has(&self, landmark: Landmark) -> bool {
        (landmark as usize) < self.keypoints.len()
    }

    /// Left and right wrist, when the pose is long enough to carry them.
    pub fn wrists(&self) -> Option<(Keypoint, Keypoint)> {
        if !self.has(Landmark::RightWrist) {
            return None;
        }
        Some((self.get(Landmark::LeftWrist), self.get(Landmark::RightWrist)))
    }
}

/// Object detector output box in frame pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectBox {
    pub class_id: u32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

impl ObjectBox {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn iou(&self, other: &ObjectBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Everything the inference collaborators produced for one frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameDetections {
    #[serde(default)]
    pub poses: Vec<Pose>,
    #[serde(default)]
    pub boxes: Vec<ObjectBox>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_keypoint_is_hidden() {
        assert!(!Keypoint::HIDDEN.is_visible());
        assert!(Keypoint::new(0.0, 12.0).is_visible());
        assert!(!Keypoint::new(0.0, 12.0).is_nonzero());
        assert!(!Keypoint::new(f32::NAN, 3.0).is_visible());
    }

    #[test]
    fn short_pose_reads_missing_landmarks_as_hidden() {
        let pose = Pose::new(vec![Keypoint::new(1.0, 1.0); 7]);
        assert!(pose.has(Landmark::RightShoulder));
        assert!(!pose.has(Landmark::LeftWrist));
        assert_eq!(pose.get(Landmark::RightWrist), Keypoint::HIDDEN);
        assert!(pose.wrists().is_none());
    }

    #[test]
    fn detections_parse_from_replay_json() {
        let json = r#"{"poses": [[[10.0, 20.0], [0, 0]]], "boxes": [{"class_id": 67, "x1": 1, "y1": 2, "x2": 3, "y2": 4}]}"#;
        let parsed: FrameDetections = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.poses[0].keypoints[0], Keypoint::new(10.0, 20.0));
        assert!(!parsed.poses[0].keypoints[1].is_visible());
        assert_eq!(parsed.boxes[0].class_id, 67);
        assert_eq!(parsed.boxes[0].confidence, 1.0);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = ObjectBox { class_id: 0, x1: 0.0, y1: 0.0, x2: 10.0, y2: 10.0, confidence: 1.0 };
        let b = ObjectBox { x1: 20.0, x2: 30.0, ..a };
        assert_eq!(a.iou(&b), 0.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }
}
