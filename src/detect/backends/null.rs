use anyhow::Result;

use crate::detect::backend::ObjectDetector;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Stand-in used when no model could be loaded. Never finds anything.
#[derive(Debug, Default)]
pub struct NullDetector;

impl NullDetector {
    pub fn new() -> Self {
        Self
    }
}

impl ObjectDetector for NullDetector {
    fn name(&self) -> &'static str {
        "null"
    }

    fn detect(&mut self, _frame: &Frame, _min_confidence: f32) -> Result<Vec<Detection>> {
        Ok(Vec::new())
    }
}
