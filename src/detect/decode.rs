//! Decoding of raw YOLO-family output tensors.
//!
//! Both heads emit a channels-first `[channels, anchors]` matrix. Detection
//! heads carry `cx, cy, w, h` followed by one score per class; pose heads carry
//! `cx, cy, w, h, person_score` followed by `x, y, visibility` per landmark.
//! Coordinates are in model-input pixels and are rescaled to frame pixels.

use anyhow::{anyhow, Result};
use std::cmp::Ordering;

use crate::detect::result::{Keypoint, ObjectBox, Pose};

/// Landmarks below this visibility are reported as the hidden sentinel.
pub const KEYPOINT_VISIBILITY: f32 = 0.5;

#[derive(Clone, Copy, Debug)]
pub struct DecodeParams {
    pub confidence: f32,
    pub iou: f32,
    /// Frame width / model input width.
    pub scale_x: f32,
    /// Frame height / model input height.
    pub scale_y: f32,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            confidence: 0.25,
            iou: 0.45,
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }
}

struct Matrix<'a> {
    data: &'a [f32],
    anchors: usize,
}

impl Matrix<'_> {
    fn at(&self, channel: usize, anchor: usize) -> f32 {
        self.data[channel * self.anchors + anchor]
    }
}

fn matrix(data: &[f32], channels: usize, anchors: usize) -> Result<Matrix<'_>> {
    let expected = channels
        .checked_mul(anchors)
        .ok_or_else(|| anyhow!("output shape overflows"))?;
    if data.len() != expected {
        return Err(anyhow!(
            "output has {} values, expected {}x{}",
            data.len(),
            channels,
            anchors
        ));
    }
    Ok(Matrix { data, anchors })
}

fn anchor_box(m: &Matrix<'_>, a: usize, class_id: u32, score: f32, p: &DecodeParams) -> ObjectBox {
    let (cx, cy) = (m.at(0, a), m.at(1, a));
    let (w, h) = (m.at(2, a), m.at(3, a));
    ObjectBox {
        class_id,
        x1: (cx - w / 2.0) * p.scale_x,
        y1: (cy - h / 2.0) * p.scale_y,
        x2: (cx + w / 2.0) * p.scale_x,
        y2: (cy + h / 2.0) * p.scale_y,
        confidence: score,
    }
}

/// Decode a detection head into class-labelled boxes.
pub fn decode_box_output(
    data: &[f32],
    channels: usize,
    anchors: usize,
    p: &DecodeParams,
) -> Result<Vec<ObjectBox>> {
    if channels < 5 {
        return Err(anyhow!("detection head needs at least 5 channels, got {}", channels));
    }
    let m = matrix(data, channels, anchors)?;
    let mut candidates = Vec::new();
    for a in 0..anchors {
        let mut best = (0u32, f32::NEG_INFINITY);
        for c in 4..channels {
            let score = m.at(c, a);
            if score > best.1 {
                best = ((c - 4) as u32, score);
            }
        }
        if best.1 >= p.confidence {
            candidates.push(anchor_box(&m, a, best.0, best.1, p));
        }
    }
    let keep = nms(&candidates, p.iou);
    Ok(keep.into_iter().map(|i| candidates[i]).collect())
}

/// Decode a pose head into one `Pose` per surviving person box.
pub fn decode_pose_output(
    data: &[f32],
    channels: usize,
    anchors: usize,
    p: &DecodeParams,
) -> Result<Vec<Pose>> {
    if channels < 8 || (channels - 5) % 3 != 0 {
        return Err(anyhow!("pose head has unexpected channel count {}", channels));
    }
    let landmarks = (channels - 5) / 3;
    let m = matrix(data, channels, anchors)?;

    let mut boxes = Vec::new();
    let mut poses = Vec::new();
    for a in 0..anchors {
        let score = m.at(4, a);
        if score < p.confidence {
            continue;
        }
        boxes.push(anchor_box(&m, a, 0, score, p));
        let keypoints = (0..landmarks)
            .map(|j| {
                let base = 5 + j * 3;
                if m.at(base + 2, a) < KEYPOINT_VISIBILITY {
                    Keypoint::HIDDEN
                } else {
                    Keypoint::new(m.at(base, a) * p.scale_x, m.at(base + 1, a) * p.scale_y)
                }
            })
            .collect();
        poses.push(Pose::new(keypoints));
    }

    let keep = nms(&boxes, p.iou);
    Ok(keep.into_iter().map(|i| poses[i].clone()).collect())
}

/// Greedy per-class non-maximum suppression. Returns kept indices, best first.
pub fn nms(boxes: &[ObjectBox], iou_threshold: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..boxes.len()).collect();
    order.sort_by(|&a, &b| {
        boxes[b]
            .confidence
            .partial_cmp(&boxes[a].confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut keep: Vec<usize> = Vec::new();
    for idx in order {
        let candidate = &boxes[idx];
        let suppressed = keep.iter().any(|&k| {
            boxes[k].class_id == candidate.class_id && boxes[k].iou(candidate) > iou_threshold
        });
        if !suppressed {
            keep.push(idx);
        }
    }
    keep
}
