//! Wingsight: motion-gated wildlife capture.
//!
//! A camera is polled continuously. When enough of the scene changes between
//! consecutive frames, an object detector runs on the frame; the best
//! qualifying detection is saved as a JPEG and appended to a CSV log. A
//! cooldown (and optionally a daily cap) keeps a single visit from filling
//! the disk.
//!
//! # Module Structure
//!
//! - `frame`: RGB frames and their luma plane
//! - `ingest`: camera backends, device fallback, pacing
//! - `motion`: frame-difference motion gate
//! - `detect`: detector capability, backends, result guard
//! - `storage`: detection log and image store
//! - `capture`: the per-tick state machine and run loop
//! - `config`: TOML file plus environment overrides

pub mod capture;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod motion;
pub mod storage;
pub mod throttle;

pub use capture::{
    CaptureController, CaptureSettings, CaptureState, CaptureStats, Clock, ManualClock,
    SystemClock, TickOutcome,
};
pub use config::{StorageSettings, WingsightConfig};
pub use detect::{load_detector, Detection, DetectorSettings, GuardedDetector, ObjectDetector};
pub use frame::{Frame, FrameError, LumaPlane};
pub use ingest::{Camera, CameraError, CameraSettings, FrameOutcome, FrameSource};
pub use motion::{MotionGate, MotionReading, MotionSettings};
pub use storage::{DetectionEvent, DetectionLog, ImageStore, PersistenceError};
