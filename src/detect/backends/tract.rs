#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{ObjectDetector, PoseEstimator};
use crate::detect::decode::{decode_box_output, decode_pose_output, DecodeParams};
use crate::detect::result::{ObjectBox, Pose};
use crate::frame::Frame;

/// Square input edge of exported YOLO models.
pub const DEFAULT_INPUT_SIZE: u32 = 640;

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>>;

/// A loaded YOLO ONNX model with a fixed `1x3xSxS` input.
///
/// Frames are sampled down to the model input (no letterboxing); decoded
/// coordinates are scaled back to frame pixels.
struct YoloModel {
    plan: Plan,
    input_size: u32,
    confidence: f32,
    iou: f32,
}

impl YoloModel {
    fn load(model_path: &Path, input_size: u32, confidence: f32) -> Result<Self> {
        let size = input_size as usize;
        let plan = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        Ok(Self {
            plan,
            input_size,
            confidence,
            iou: 0.45,
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.width == 0 || frame.height == 0 {
            return Err(anyhow!("cannot run inference on an empty frame"));
        }
        let size = self.input_size as usize;
        let (fw, fh) = (frame.width as usize, frame.height as usize);
        let pixels = frame.pixels();
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
            let sx = (x * fw / size).min(fw - 1);
            let sy = (y * fh / size).min(fh - 1);
            pixels[(sy * fw + sx) * 3 + channel] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    /// Run the model and return the `[channels, anchors]` output with its shape.
    fn run(&self, frame: &Frame) -> Result<(Vec<f32>, usize, usize, DecodeParams)> {
        let input = self.build_input(frame)?;
        let outputs = self.plan.run(tvec!(input.into())).context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected output shape {:?}", shape));
        }
        let (channels, anchors) = (shape[1], shape[2]);
        let data: Vec<f32> = view.iter().copied().collect();
        let params = DecodeParams {
            confidence: self.confidence,
            iou: self.iou,
            scale_x: frame.width as f32 / self.input_size as f32,
            scale_y: frame.height as f32 / self.input_size as f32,
        };
        Ok((data, channels, anchors, params))
    }
}

/// YOLO pose model (`yolov8n-pose` style export).
pub struct TractPoseEstimator {
    model: YoloModel,
}

impl TractPoseEstimator {
    pub fn new<P: AsRef<Path>>(model_path: P, confidence: f32) -> Result<Self> {
        Ok(Self {
            model: YoloModel::load(model_path.as_ref(), DEFAULT_INPUT_SIZE, confidence)?,
        })
    }
}

impl PoseEstimator for TractPoseEstimator {
    fn name(&self) -> &'static str {
        "tract-pose"
    }

    fn estimate(&mut self, frame: &Frame) -> Result<Vec<Pose>> {
        let (data, channels, anchors, params) = self.model.run(frame)?;
        decode_pose_output(&data, channels, anchors, &params)
    }
}

/// YOLO detection model trained on COCO classes.
pub struct TractObjectDetector {
    model: YoloModel,
}

impl TractObjectDetector {
    pub fn new<P: AsRef<Path>>(model_path: P, confidence: f32) -> Result<Self> {
        Ok(Self {
            model: YoloModel::load(model_path.as_ref(), DEFAULT_INPUT_SIZE, confidence)?,
        })
    }
}

impl ObjectDetector for TractObjectDetector {
    fn name(&self) -> &'static str {
        "tract-detect"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<ObjectBox>> {
        let (data, channels, anchors, params) = self.model.run(frame)?;
        decode_box_output(&data, channels, anchors, &params)
    }
}
