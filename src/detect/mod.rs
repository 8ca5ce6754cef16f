//! Object detection capability.
//!
//! The capture loop only depends on `ObjectDetector`. Backends:
//! - `NullDetector`: used when no model is available; always empty
//! - `TractDetector`: ONNX inference (feature: backend-tract)
//!
//! `GuardedDetector` sits between the loop and the backend and enforces the
//! result contract.

mod backend;
mod backends;
mod guard;
mod loader;
mod result;

pub use backend::ObjectDetector;
pub use backends::NullDetector;
#[cfg(feature = "backend-tract")]
pub use backends::TractDetector;
pub use guard::GuardedDetector;
pub use loader::{
    load_detector, DetectorSettings, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_INPUT_SIZE,
    DEFAULT_MODEL_PATH,
};
pub use result::{Detection, COCO_LABELS};
