use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Object detection capability.
///
/// Implementations return every object they believe is present with a
/// confidence of at least `min_confidence`. Result order is detector-defined;
/// callers that need an order must sort. An `Err` means infrastructure
/// failure (model crashed, tensor mismatch), never "no objects".
///
/// Detectors are called once per qualifying tick for the lifetime of the
/// process and must not degrade across calls.
pub trait ObjectDetector {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame, min_confidence: f32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
