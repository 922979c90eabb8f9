//! Overlay drawn on frames before they are appended to proof clips.

use crate::classify::{FrameSignals, PersonSignals};
use crate::config::Geometry;
use crate::detect::{FrameDetections, Landmark, Pose};
use crate::frame::Frame;
use crate::passing::{Hand, PassingResult};

const SKELETON_COLOR: [u8; 3] = [0, 255, 0];
const KEYPOINT_COLOR: [u8; 3] = [255, 255, 0];
const LEAN_COLOR: [u8; 3] = [0, 128, 255];
const PASSING_WRIST_COLOR: [u8; 3] = [255, 128, 0];
const CONTACT_COLOR: [u8; 3] = [255, 0, 0];
const PHONE_COLOR: [u8; 3] = [255, 0, 255];

const LIMBS: [(Landmark, Landmark); 8] = [
    (Landmark::LeftShoulder, Landmark::RightShoulder),
    (Landmark::LeftShoulder, Landmark::LeftElbow),
    (Landmark::LeftElbow, Landmark::LeftWrist),
    (Landmark::RightShoulder, Landmark::RightElbow),
    (Landmark::RightElbow, Landmark::RightWrist),
    (Landmark::LeftShoulder, Landmark::LeftHip),
    (Landmark::RightShoulder, Landmark::RightHip),
    (Landmark::LeftHip, Landmark::RightHip),
];

/// Nose, eyes, ears and shoulders: the landmarks the lean rule reads.
const HEAD_AND_SHOULDERS: usize = Landmark::RightShoulder as usize + 1;

fn keypoint_style(
    index: usize,
    person: usize,
    signals: PersonSignals,
    passing: &PassingResult,
) -> ([u8; 3], i64) {
    let hand = match index {
        i if i == Landmark::LeftWrist as usize => Some(Hand::Left),
        i if i == Landmark::RightWrist as usize => Some(Hand::Right),
        _ => None,
    };
    if hand.is_some_and(|hand| passing.involves(person, hand)) {
        return (PASSING_WRIST_COLOR, 3);
    }
    if signals.leaning && index < HEAD_AND_SHOULDERS {
        return (LEAN_COLOR, 2);
    }
    (KEYPOINT_COLOR, 2)
}

fn draw_pose(
    frame: &mut Frame,
    pose: &Pose,
    person: usize,
    signals: PersonSignals,
    passing: &PassingResult,
) {
    for (a, b) in LIMBS {
        let (pa, pb) = (pose.get(a), pose.get(b));
        if pa.is_visible() && pb.is_visible() {
            frame.draw_line((pa.x, pa.y), (pb.x, pb.y), SKELETON_COLOR);
        }
    }
    for (index, kp) in pose.keypoints.iter().enumerate() {
        if kp.is_visible() {
            let (color, radius) = keypoint_style(index, person, signals, passing);
            frame.draw_dot(kp.x, kp.y, radius, color);
        }
    }
}

pub fn annotate(
    frame: &mut Frame,
    detections: &FrameDetections,
    signals: &FrameSignals,
    g: &Geometry,
) {
    for (person, pose) in detections.poses.iter().enumerate() {
        let readings = signals.people.get(person).copied().unwrap_or_default();
        draw_pose(frame, pose, person, readings, &signals.passing);
    }
    for contact in &signals.passing.contacts {
        let (Some(a), Some(b)) = (
            detections.poses.get(contact.first),
            detections.poses.get(contact.second),
        ) else {
            continue;
        };
        let wa = a.get(contact.first_hand.landmark());
        let wb = b.get(contact.second_hand.landmark());
        frame.draw_line((wa.x, wa.y), (wb.x, wb.y), CONTACT_COLOR);
    }
    for b in detections.boxes.iter().filter(|b| b.class_id == g.phone_class_id) {
        frame.draw_rect(b.x1, b.y1, b.x2, b.y2, PHONE_COLOR);
    }
}
