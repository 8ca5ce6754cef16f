//! Frame ingestion sources.
//!
//! This module provides the cameras the capture loop can pull frames from:
//! - Synthetic scenes (`stub://<name>`, testing and demos)
//! - Directory replay (`replay:<dir>`, desktop runs without a camera)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! Every backend implements `Camera`. `FrameSource` wraps the selected camera
//! and is responsible for:
//! - Selecting the preferred device, falling back to probing device indices
//! - Mapping read failures to skippable ticks
//! - Pacing (minimum inter-frame interval)
//! - Releasing the camera exactly once
//!
//! Frames leave this module in RGB order regardless of the native format.

mod normalize;
pub mod replay;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use std::time::Duration;
use thiserror::Error;

use crate::frame::{Frame, FrameError};

pub use normalize::{normalize_to_rgb, PixelFormat};
pub use replay::ReplayCamera;
pub use synthetic::SyntheticCamera;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Camera;

pub const DEFAULT_DEVICE: &str = "/dev/video0";
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;
pub const DEFAULT_FRAMERATE: u32 = 15;
/// Number of `/dev/videoN` indices probed by the fallback.
pub const DEFAULT_PROBE_INDICES: u32 = 4;

#[derive(Debug, Error)]
pub enum CameraError {
    /// The capability cannot be initialised. Triggers fallback at startup.
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    /// A single read failed. The tick is skipped.
    #[error("capture failed: {0}")]
    Capture(String),
    /// The backend produced a buffer that does not form a frame.
    #[error("malformed frame from {camera}: {cause}")]
    MalformedFrame {
        camera: String,
        #[source]
        cause: FrameError,
    },
}

/// Camera configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraSettings {
    /// Preferred device (`/dev/video0`, `stub://garden`, `replay:/path/to/dir`).
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Target frames per second. 0 disables pacing.
    pub framerate: u32,
    /// Probe `/dev/video0..probe_indices` when the preferred device is unavailable.
    pub fallback: bool,
    pub probe_indices: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            framerate: DEFAULT_FRAMERATE,
            fallback: true,
            probe_indices: DEFAULT_PROBE_INDICES,
        }
    }
}

/// A camera backend.
pub trait Camera {
    /// Human-readable identifier (device path or stub name).
    fn name(&self) -> &str;

    /// Read the next frame. `Ok(None)` signals end of stream.
    fn read(&mut self) -> Result<Option<Frame>, CameraError>;

    /// Release the underlying device. Called at most once by `FrameSource`.
    fn release(&mut self);
}

/// Result of asking the source for a frame.
#[derive(Debug)]
pub enum FrameOutcome {
    Frame(Frame),
    EndOfStream,
    /// One failed read. The caller skips the tick and retries after pacing.
    TransientFailure(String),
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub failed_reads: u64,
}

/// The selected camera plus pacing and release bookkeeping.
pub struct FrameSource {
    camera: Option<Box<dyn Camera>>,
    name: String,
    pending: Option<Frame>,
    frame_interval: Option<Duration>,
    stats: SourceStats,
}

impl FrameSource {
    /// Open the preferred camera, falling back to the device probe.
    pub fn open(settings: &CameraSettings) -> Result<Self, CameraError> {
        select_camera(settings, |device| open_camera(device, settings))
    }

    /// Wrap an already opened camera.
    pub fn from_camera(camera: Box<dyn Camera>, framerate: u32) -> Self {
        Self {
            name: camera.name().to_string(),
            camera: Some(camera),
            pending: None,
            frame_interval: frame_interval(framerate),
            stats: SourceStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.camera.is_some()
    }

    /// Minimum interval between ticks, `None` when pacing is disabled.
    pub fn frame_interval(&self) -> Option<Duration> {
        self.frame_interval
    }

    /// Sleep for the pacing interval.
    pub fn sleep_between_frames(&self) {
        if let Some(interval) = self.frame_interval {
            std::thread::sleep(interval);
        }
    }

    pub fn stats(&self) -> SourceStats {
        self.stats.clone()
    }

    /// Capture the next frame.
    ///
    /// Only a malformed frame is returned as `Err`. Read failures become
    /// `TransientFailure`, and a closed source reports `EndOfStream`.
    pub fn next_frame(&mut self) -> Result<FrameOutcome, CameraError> {
        if let Some(frame) = self.pending.take() {
            self.stats.frames_captured += 1;
            return Ok(FrameOutcome::Frame(frame));
        }
        let Some(camera) = self.camera.as_mut() else {
            return Ok(FrameOutcome::EndOfStream);
        };
        match camera.read() {
            Ok(Some(frame)) => {
                self.stats.frames_captured += 1;
                Ok(FrameOutcome::Frame(frame))
            }
            Ok(None) => Ok(FrameOutcome::EndOfStream),
            Err(err @ CameraError::MalformedFrame { .. }) => Err(err),
            Err(err) => {
                self.stats.failed_reads += 1;
                Ok(FrameOutcome::TransientFailure(err.to_string()))
            }
        }
    }

    /// Release the camera. Subsequent calls do nothing.
    pub fn close(&mut self) {
        self.pending = None;
        if let Some(mut camera) = self.camera.take() {
            camera.release();
            log::info!("FrameSource: camera resources released ({})", self.name);
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn frame_interval(framerate: u32) -> Option<Duration> {
    (framerate > 0).then(|| Duration::from_secs_f64(1.0 / framerate as f64))
}

/// Open a single device by name.
pub fn open_camera(
    device: &str,
    settings: &CameraSettings,
) -> Result<Box<dyn Camera>, CameraError> {
    if let Some(name) = device.strip_prefix("stub://") {
        return Ok(Box::new(SyntheticCamera::new(
            name,
            settings.width,
            settings.height,
        )?));
    }
    if let Some(dir) = device.strip_prefix("replay:") {
        return Ok(Box::new(ReplayCamera::open(dir)?));
    }
    open_device(device, settings)
}

#[cfg(feature = "ingest-v4l2")]
fn open_device(device: &str, settings: &CameraSettings) -> Result<Box<dyn Camera>, CameraError> {
    Ok(Box::new(V4l2Camera::open(device, settings)?))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_device(device: &str, _settings: &CameraSettings) -> Result<Box<dyn Camera>, CameraError> {
    Err(CameraError::Unavailable(format!(
        "{} requires the ingest-v4l2 feature",
        device
    )))
}

/// Selection policy: preferred device, then the index probe on unavailability.
///
/// Any error other than `Unavailable` from the preferred device aborts
/// selection. Probe candidates must produce a frame on their first read; that
/// frame is handed out by the first `next_frame` call.
pub fn select_camera<F>(settings: &CameraSettings, mut opener: F) -> Result<FrameSource, CameraError>
where
    F: FnMut(&str) -> Result<Box<dyn Camera>, CameraError>,
{
    let reason = match opener(&settings.device) {
        Ok(camera) => {
            log::info!(
                "FrameSource: opened {} ({}x{} @ {} fps)",
                camera.name(),
                settings.width,
                settings.height,
                settings.framerate
            );
            return Ok(FrameSource::from_camera(camera, settings.framerate));
        }
        Err(CameraError::Unavailable(reason)) => reason,
        Err(err) => return Err(err),
    };

    if !settings.fallback {
        return Err(CameraError::Unavailable(reason));
    }
    log::info!(
        "FrameSource: {} unavailable ({}); probing fallback devices",
        settings.device,
        reason
    );

    for index in 0..settings.probe_indices {
        let candidate = format!("/dev/video{}", index);
        if candidate == settings.device {
            continue;
        }
        let mut camera = match opener(&candidate) {
            Ok(camera) => camera,
            Err(err) => {
                log::debug!("FrameSource: probe {} failed: {}", candidate, err);
                continue;
            }
        };
        match camera.read() {
            Ok(Some(frame)) => {
                log::info!("FrameSource: fallback camera {} initialised", camera.name());
                let mut source = FrameSource::from_camera(camera, settings.framerate);
                source.pending = Some(frame);
                return Ok(source);
            }
            Ok(None) => {
                log::debug!("FrameSource: probe {} produced no frame", candidate);
                camera.release();
            }
            Err(err) => {
                log::debug!("FrameSource: probe {} read failed: {}", candidate, err);
                camera.release();
            }
        }
    }

    Err(CameraError::Unavailable(format!(
        "{} unavailable ({}) and no fallback among /dev/video0..{} produced a frame",
        settings.device,
        reason,
        settings.probe_indices.saturating_sub(1)
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Default)]
    struct Journal {
        opened: Vec<String>,
        released: Vec<String>,
    }

    struct ScriptedCamera {
        name: String,
        reads: VecDeque<Result<Option<Frame>, CameraError>>,
        journal: Rc<RefCell<Journal>>,
    }

    impl Camera for ScriptedCamera {
        fn name(&self) -> &str {
            &self.name
        }

        fn read(&mut self) -> Result<Option<Frame>, CameraError> {
            self.reads.pop_front().unwrap_or(Ok(None))
        }

        fn release(&mut self) {
            self.journal.borrow_mut().released.push(self.name.clone());
        }
    }

    fn frame() -> Frame {
        Frame::filled(4, 4, [1, 2, 3]).unwrap()
    }

    fn scripted(
        name: &str,
        reads: Vec<Result<Option<Frame>, CameraError>>,
        journal: &Rc<RefCell<Journal>>,
    ) -> Box<dyn Camera> {
        journal.borrow_mut().opened.push(name.to_string());
        Box::new(ScriptedCamera {
            name: name.to_string(),
            reads: reads.into(),
            journal: journal.clone(),
        })
    }

    fn settings(device: &str) -> CameraSettings {
        CameraSettings {
            device: device.to_string(),
            framerate: 0,
            ..CameraSettings::default()
        }
    }

    #[test]
    fn preferred_device_wins_when_available() {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let source = select_camera(&settings("picam"), |name| {
            Ok(scripted(name, vec![Ok(Some(frame()))], &journal))
        })
        .unwrap();
        assert_eq!(source.name(), "picam");
        assert_eq!(journal.borrow().opened, vec!["picam"]);
    }

    #[test]
    fn unavailable_preferred_falls_back_to_first_working_index() {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let mut source = select_camera(&settings("picam"), |name| match name {
            "picam" => Err(CameraError::Unavailable("no libcamera".into())),
            "/dev/video0" => Err(CameraError::Unavailable("busy".into())),
            "/dev/video1" => Ok(scripted(name, vec![Ok(None)], &journal)),
            "/dev/video2" => Ok(scripted(name, vec![Ok(Some(frame()))], &journal)),
            _ => panic!("probe went past the first working device: {}", name),
        })
        .unwrap();

        assert_eq!(source.name(), "/dev/video2");
        assert_eq!(journal.borrow().released, vec!["/dev/video1"]);
        // The probe frame is not thrown away.
        assert!(matches!(source.next_frame().unwrap(), FrameOutcome::Frame(_)));
        assert_eq!(source.stats().frames_captured, 1);
    }

    #[test]
    fn other_open_errors_do_not_trigger_fallback() {
        let result = select_camera(&settings("picam"), |name| match name {
            "picam" => Err(CameraError::Capture("driver crashed".into())),
            _ => panic!("fallback must not run"),
        });
        assert!(matches!(result, Err(CameraError::Capture(_))));
    }

    #[test]
    fn exhausted_probe_is_unavailable() {
        let result = select_camera(&settings("picam"), |_| {
            Err(CameraError::Unavailable("nothing".into()))
        });
        assert!(matches!(result, Err(CameraError::Unavailable(_))));

        let no_fallback = CameraSettings {
            fallback: false,
            ..settings("picam")
        };
        let result = select_camera(&no_fallback, |name| {
            assert_eq!(name, "picam");
            Err(CameraError::Unavailable("nothing".into()))
        });
        assert!(matches!(result, Err(CameraError::Unavailable(_))));
    }

    #[test]
    fn read_failures_are_transient() {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let camera = scripted(
            "cam",
            vec![
                Err(CameraError::Capture("timeout".into())),
                Ok(Some(frame())),
                Ok(None),
            ],
            &journal,
        );
        let mut source = FrameSource::from_camera(camera, 0);
        assert!(matches!(
            source.next_frame().unwrap(),
            FrameOutcome::TransientFailure(_)
        ));
        assert!(matches!(source.next_frame().unwrap(), FrameOutcome::Frame(_)));
        assert!(matches!(source.next_frame().unwrap(), FrameOutcome::EndOfStream));
        assert_eq!(
            source.stats(),
            SourceStats {
                frames_captured: 1,
                failed_reads: 1
            }
        );
    }

    #[test]
    fn malformed_frames_are_fatal() {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let camera = scripted(
            "cam",
            vec![Err(CameraError::MalformedFrame {
                camera: "cam".into(),
                cause: FrameError::LengthMismatch {
                    expected: 12,
                    actual: 3,
                },
            })],
            &journal,
        );
        let mut source = FrameSource::from_camera(camera, 0);
        assert!(source.next_frame().is_err());
    }

    #[test]
    fn close_releases_exactly_once() {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let mut source = FrameSource::from_camera(scripted("cam", vec![], &journal), 0);
        source.close();
        source.close();
        assert!(!source.is_open());
        assert!(matches!(source.next_frame().unwrap(), FrameOutcome::EndOfStream));
        drop(source);
        assert_eq!(journal.borrow().released, vec!["cam"]);
    }

    #[test]
    fn pacing_interval_follows_framerate() {
        assert_eq!(frame_interval(0), None);
        assert_eq!(frame_interval(4), Some(Duration::from_millis(250)));
    }

    #[test]
    fn stub_and_replay_schemes_dispatch() {
        let cfg = CameraSettings::default();
        let camera = open_camera("stub://garden", &cfg).unwrap();
        assert_eq!(camera.name(), "stub://garden");
        assert!(matches!(
            open_camera("replay:/definitely/not/here", &cfg),
            Err(CameraError::Unavailable(_))
        ));
    }
}
