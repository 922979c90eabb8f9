mod backend;
mod backends;
mod decode;
mod registry;
mod result;

pub use backend::{or_no_detection, ObjectDetector, PoseEstimator};
pub use backends::{ReplayBackend, StubBackend};
#[cfg(feature = "backend-tract")]
pub use backends::{TractObjectDetector, TractPoseEstimator};
pub use decode::{decode_box_output, decode_pose_output, nms, DecodeParams, KEYPOINT_VISIBILITY};
pub use registry::{build_backends, BackendKind, InferenceBackends};
pub use result::{FrameDetections, Keypoint, Landmark, ObjectBox, Pose, POSE_KEYPOINTS};
