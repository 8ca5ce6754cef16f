use std::path::PathBuf;

use crate::detect::backend::ObjectDetector;
use crate::detect::backends::NullDetector;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_MODEL_PATH: &str = "models/yolov5n.onnx";
pub const DEFAULT_INPUT_SIZE: u32 = 640;

/// Detector construction settings.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectorSettings {
    /// Model candidates, tried in order.
    pub models: Vec<PathBuf>,
    /// Minimum confidence passed to every `detect` call.
    pub confidence_threshold: f32,
    /// Optional label allowlist (e.g. `["bird"]`).
    pub labels: Option<Vec<String>>,
    /// Square model input edge in pixels.
    pub input_size: u32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            models: vec![PathBuf::from(DEFAULT_MODEL_PATH)],
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            labels: None,
            input_size: DEFAULT_INPUT_SIZE,
        }
    }
}

/// Build the detection capability.
///
/// Model candidates are tried in order and the first that loads wins. When
/// none loads, the returned detector never finds anything, so the capture loop
/// degrades to motion monitoring instead of failing.
pub fn load_detector(settings: &DetectorSettings) -> Box<dyn ObjectDetector> {
    #[cfg(feature = "backend-tract")]
    for path in &settings.models {
        match crate::detect::backends::TractDetector::load(path, settings.input_size) {
            Ok(mut detector) => {
                if let Err(err) = detector.warm_up() {
                    log::warn!("model {} failed warm-up: {:#}", path.display(), err);
                    continue;
                }
                log::info!("detector: loaded {}", path.display());
                return Box::new(detector);
            }
            Err(err) => log::warn!("detector: model {} unavailable: {:#}", path.display(), err),
        }
    }

    #[cfg(not(feature = "backend-tract"))]
    if !settings.models.is_empty() {
        log::warn!(
            "detector: built without backend-tract, ignoring {} configured model(s)",
            settings.models.len()
        );
    }

    log::warn!("detector: no model available, object detection disabled");
    Box::new(NullDetector::new())
}
