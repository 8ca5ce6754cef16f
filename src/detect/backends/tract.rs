#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::ObjectDetector;
use crate::detect::result::{Detection, COCO_LABELS};
use crate::frame::Frame;

/// Tract-based backend for YOLO-family ONNX models trained on COCO.
///
/// Frames are resized to the square model input and scaled to `[0, 1]`.
/// Two output layouts are understood:
/// - `[1, boxes, 5 + classes]` with an objectness column (YOLOv5)
/// - `[1, 4 + classes, boxes]` without objectness (YOLOv8)
///
/// The detector reports the best confidence per label, highest first. Boxes
/// are not returned, so no non-maximum suppression is needed.
pub struct TractDetector {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
}

impl TractDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn load<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model, input_size })
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let side = self.input_size;
        let resized = image::imageops::resize(frame.image(), side, side, FilterType::Triangle);
        let side = side as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        })
        .into_tensor()
    }
}

impl ObjectDetector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame, min_confidence: f32) -> Result<Vec<Detection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output tensor was not rank 3")?;

        let (_, dim1, dim2) = view.dim();
        let classes = COCO_LABELS.len();
        let mut best = vec![0f32; classes];

        if dim2 == 5 + classes {
            for row in 0..dim1 {
                let objectness = view[[0, row, 4]];
                for class in 0..classes {
                    let score = objectness * view[[0, row, 5 + class]];
                    if score > best[class] {
                        best[class] = score;
                    }
                }
            }
        } else if dim1 == 4 + classes {
            for column in 0..dim2 {
                for class in 0..classes {
                    let score = view[[0, 4 + class, column]];
                    if score > best[class] {
                        best[class] = score;
                    }
                }
            }
        } else {
            return Err(anyhow!(
                "unsupported model output shape [1, {}, {}] for {} classes",
                dim1,
                dim2,
                classes
            ));
        }

        Ok(ranked_detections(&best, min_confidence))
    }

    fn warm_up(&mut self) -> Result<()> {
        let frame = Frame::filled(self.input_size, self.input_size, [0, 0, 0])?;
        self.detect(&frame, 1.0).map(|_| ())
    }
}

fn ranked_detections(best: &[f32], min_confidence: f32) -> Vec<Detection> {
    let mut detections: Vec<Detection> = best
        .iter()
        .zip(COCO_LABELS.iter())
        .filter(|(score, _)| score.is_finite() && **score >= min_confidence && **score > 0.0)
        .map(|(score, label)| Detection::new(*label, score.clamp(0.0, 1.0)))
        .collect();
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    detections
}
