//! Per-frame behaviour signals.
//!
//! Single-pose rules (leaning, turning back, hand raised) are pure functions of
//! one `Pose`; paper passing lives in `passing` because it pairs people; phone
//! use comes straight from the object detector.

use crate::config::Geometry;
use crate::detect::{FrameDetections, Landmark, ObjectBox, Pose};
use crate::passing::{detect_passing_paper, PassingResult};
use crate::BehaviorKind;

fn eye_and_shoulder_width(pose: &Pose) -> (f32, f32) {
    let eyes = (pose.get(Landmark::LeftEye).x - pose.get(Landmark::RightEye).x).abs();
    let shoulders =
        (pose.get(Landmark::LeftShoulder).x - pose.get(Landmark::RightShoulder).x).abs();
    (eyes, shoulders)
}

/// Head centre offset from shoulder centre, with profile and noise gates.
pub fn is_leaning(pose: &Pose, g: &Geometry) -> bool {
    const HEAD_AND_SHOULDERS: [Landmark; 7] = [
        Landmark::Nose,
        Landmark::LeftEye,
        Landmark::RightEye,
        Landmark::LeftEar,
        Landmark::RightEar,
        Landmark::LeftShoulder,
        Landmark::RightShoulder,
    ];
    if !HEAD_AND_SHOULDERS
        .iter()
        .all(|&lm| pose.has(lm) && pose.get(lm).is_visible())
    {
        return false;
    }

    let (eye_dist, shoulder_dist) = eye_and_shoulder_width(pose);
    // Turned away: left to the turning-back rule.
    if shoulder_dist > 0.0 && eye_dist / shoulder_dist < g.turned_away_ratio {
        return false;
    }
    if eye_dist > g.lean_max_eye_shoulder_ratio * shoulder_dist {
        return false;
    }

    let (l_eye, r_eye) = (pose.get(Landmark::LeftEye), pose.get(Landmark::RightEye));
    let (l_sh, r_sh) = (
        pose.get(Landmark::LeftShoulder),
        pose.get(Landmark::RightShoulder),
    );
    if (l_sh.y - r_sh.y).abs() > g.lean_max_shoulder_tilt {
        return false;
    }

    let head_center_x = (l_eye.x + r_eye.x) / 2.0;
    let shoulder_center_x = (l_sh.x + r_sh.x) / 2.0;
    (head_center_x - shoulder_center_x).abs() > g.lean_min_head_offset
}

/// Apparent eye spacing collapses relative to shoulder width when the head
/// faces away from the camera.
pub fn is_turning_back(pose: &Pose, g: &Geometry) -> bool {
    let required = [
        Landmark::LeftEye,
        Landmark::RightEye,
        Landmark::LeftShoulder,
        Landmark::RightShoulder,
    ];
    if !required.iter().all(|&lm| pose.get(lm).is_nonzero()) {
        return false;
    }

    let (eye_dist, shoulder_dist) = eye_and_shoulder_width(pose);
    if shoulder_dist < g.min_shoulder_width {
        return false;
    }
    eye_dist / shoulder_dist < g.turned_away_ratio
}

/// Either wrist above the higher shoulder by the configured margin.
///
/// Image y grows downwards, so "above" means a smaller y.
pub fn is_hand_raised(pose: &Pose, g: &Geometry) -> bool {
    let required = [
        Landmark::LeftShoulder,
        Landmark::RightShoulder,
        Landmark::LeftElbow,
        Landmark::RightElbow,
        Landmark::LeftWrist,
        Landmark::RightWrist,
    ];
    if !required.iter().all(|&lm| pose.get(lm).is_nonzero()) {
        return false;
    }

    let shoulder_y = pose
        .get(Landmark::LeftShoulder)
        .y
        .min(pose.get(Landmark::RightShoulder).y);
    let threshold = shoulder_y - g.hand_raise_margin;
    pose.get(Landmark::LeftWrist).y < threshold || pose.get(Landmark::RightWrist).y < threshold
}

pub fn phone_detected(boxes: &[ObjectBox], g: &Geometry) -> bool {
    boxes.iter().any(|b| b.class_id == g.phone_class_id)
}

/// Single-pose readings for one person; the overlay colours by them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PersonSignals {
    pub turning_back: bool,
    pub leaning: bool,
    pub hand_raised: bool,
}

/// The five per-frame booleans plus the evidence behind them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameSignals {
    flags: [bool; BehaviorKind::COUNT],
    pub people: Vec<PersonSignals>,
    /// Cross-person wrist contacts behind the paper-passing flag.
    pub passing: PassingResult,
}

impl FrameSignals {
    pub fn get(&self, kind: BehaviorKind) -> bool {
        self.flags[kind.index()]
    }

    pub fn set(&mut self, kind: BehaviorKind, value: bool) {
        self.flags[kind.index()] = value;
    }

    pub fn active(&self) -> impl Iterator<Item = BehaviorKind> + '_ {
        BehaviorKind::ALL.into_iter().filter(|kind| self.get(*kind))
    }

    pub fn any(&self) -> bool {
        self.flags.iter().any(|f| *f)
    }
}

pub fn classify_frame(detections: &FrameDetections, g: &Geometry) -> FrameSignals {
    let mut signals = FrameSignals::default();

    let passing = detect_passing_paper(&detections.poses, g);
    signals.set(BehaviorKind::PassingPaper, passing.detected());
    signals.passing = passing;

    for pose in &detections.poses {
        let mut person = PersonSignals::default();
        // Turning back is checked first so a turned head never reads as a lean.
        if is_turning_back(pose, g) {
            person.turning_back = true;
        } else if is_leaning(pose, g) {
            person.leaning = true;
        }
        person.hand_raised = is_hand_raised(pose, g);

        if person.turning_back {
            signals.set(BehaviorKind::TurningBack, true);
        }
        if person.leaning {
            signals.set(BehaviorKind::Leaning, true);
        }
        if person.hand_raised {
            signals.set(BehaviorKind::HandRaise, true);
        }
        signals.people.push(person);
    }

    signals.set(BehaviorKind::Mobile, phone_detected(&detections.boxes, g));
    signals
}
