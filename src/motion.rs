//! Frame-differencing motion gate.
//!
//! The gate is a sliding one-frame-lag detector: every evaluated frame becomes
//! the reference for the next one. It costs O(pixels) and runs on every captured
//! frame so the expensive object detector only sees frames where something moved.

use imageproc::filter::separable_filter_equal;
use thiserror::Error;

use crate::frame::{Frame, LumaPlane};

pub const DEFAULT_PIXEL_THRESHOLD: u8 = 30;
pub const DEFAULT_MOTION_THRESHOLD: f32 = 0.01;
pub const DEFAULT_BLUR_SIZE: u32 = 5;

#[derive(Debug, Error, PartialEq)]
pub enum MotionSettingsError {
    #[error("motion_threshold must be within [0, 1] (got {0})")]
    MotionThreshold(f32),
    #[error("blur_size must be an odd positive integer (got {0})")]
    BlurSize(u32),
}

/// Tuning knobs for the gate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionSettings {
    /// A pixel counts as changed when its luminance difference exceeds this.
    pub pixel_threshold: u8,
    /// Fraction of changed pixels at which motion is reported.
    pub motion_threshold: f32,
    /// Gaussian kernel size (odd). 1 disables smoothing.
    pub blur_size: u32,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            pixel_threshold: DEFAULT_PIXEL_THRESHOLD,
            motion_threshold: DEFAULT_MOTION_THRESHOLD,
            blur_size: DEFAULT_BLUR_SIZE,
        }
    }
}

impl MotionSettings {
    pub fn validate(&self) -> Result<(), MotionSettingsError> {
        if !(0.0..=1.0).contains(&self.motion_threshold) {
            return Err(MotionSettingsError::MotionThreshold(self.motion_threshold));
        }
        if self.blur_size == 0 || self.blur_size % 2 == 0 {
            return Err(MotionSettingsError::BlurSize(self.blur_size));
        }
        Ok(())
    }
}

/// Outcome of one evaluation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionReading {
    pub has_motion: bool,
    /// Fraction of pixels that changed, always within `[0, 1]`.
    pub motion_ratio: f32,
}

impl MotionReading {
    pub const STILL: MotionReading = MotionReading {
        has_motion: false,
        motion_ratio: 0.0,
    };
}

/// Stateful motion detector holding at most one blurred luminance reference.
pub struct MotionGate {
    settings: MotionSettings,
    kernel: Vec<f32>,
    reference: Option<LumaPlane>,
}

impl MotionGate {
    pub fn new(settings: MotionSettings) -> Result<Self, MotionSettingsError> {
        settings.validate()?;
        Ok(Self {
            kernel: gaussian_kernel(settings.blur_size),
            settings,
            reference: None,
        })
    }

    pub fn settings(&self) -> &MotionSettings {
        &self.settings
    }

    /// True once a reference frame is held.
    pub fn is_primed(&self) -> bool {
        self.reference.is_some()
    }

    /// Compare `frame` against the previous one and make it the new reference.
    ///
    /// The first frame after construction or `reset` never reports motion. A
    /// frame whose dimensions differ from the reference is handled the same way.
    pub fn evaluate(&mut self, frame: &Frame) -> MotionReading {
        let current = blur(frame.to_luma(), &self.kernel);

        let Some(reference) = self.reference.as_ref() else {
            self.reference = Some(current);
            return MotionReading::STILL;
        };

        if !reference.same_shape(&current) {
            log::warn!(
                "MotionGate: frame size changed {}x{} -> {}x{}, restarting from cold",
                reference.width(),
                reference.height(),
                current.width(),
                current.height()
            );
            self.reference = Some(current);
            return MotionReading::STILL;
        }

        let threshold = self.settings.pixel_threshold;
        let changed = reference
            .as_raw()
            .iter()
            .zip(current.as_raw())
            .filter(|(prev, cur)| prev.abs_diff(**cur) > threshold)
            .count();
        let motion_ratio = (changed as f64 / current.len() as f64).clamp(0.0, 1.0) as f32;

        self.reference = Some(current);

        MotionReading {
            has_motion: motion_ratio >= self.settings.motion_threshold,
            motion_ratio,
        }
    }

    /// Forget the reference frame.
    pub fn reset(&mut self) {
        self.reference = None;
    }
}

fn gaussian_kernel(size: u32) -> Vec<f32> {
    if size <= 1 {
        return vec![1.0];
    }
    let radius = (size / 2) as i32;
    let sigma = 0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|x| (-((x * x) as f32) / denom).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    for w in &mut kernel {
        *w /= sum;
    }
    kernel
}

/// Separable Gaussian smoothing of the luminance plane.
fn blur(plane: LumaPlane, kernel: &[f32]) -> LumaPlane {
    if kernel.len() == 1 {
        return plane;
    }
    LumaPlane::from_image(separable_filter_equal(plane.image(), kernel))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn half_white(width: u32, height: u32) -> Frame {
        let mut pixels = vec![0u8; (width * height * 3) as usize];
        for y in 0..height {
            for x in 0..width / 2 {
                let idx = ((y * width + x) * 3) as usize;
                pixels[idx..idx + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        Frame::from_rgb(width, height, pixels).unwrap()
    }

    fn gradient(width: u32, height: u32, offset: u8) -> Frame {
        let pixels = (0..width * height * 3)
            .map(|i| ((i / 3) as u8).wrapping_mul(7).wrapping_add(offset))
            .collect();
        Frame::from_rgb(width, height, pixels).unwrap()
    }

    #[test]
    fn first_frame_never_reports_motion() {
        let mut gate = MotionGate::new(MotionSettings::default()).unwrap();
        assert!(!gate.is_primed());
        let reading = gate.evaluate(&half_white(40, 20));
        assert_eq!(reading, MotionReading::STILL);
        assert!(gate.is_primed());
    }

    #[test]
    fn identical_frames_report_no_motion() {
        let mut gate = MotionGate::new(MotionSettings::default()).unwrap();
        let frame = gradient(32, 24, 0);
        gate.evaluate(&frame);
        let reading = gate.evaluate(&frame);
        assert!(!reading.has_motion);
        assert_eq!(reading.motion_ratio, 0.0);
    }

    #[test]
    fn half_white_after_black_is_about_half_changed() {
        let settings = MotionSettings {
            pixel_threshold: 30,
            motion_threshold: 0.01,
            blur_size: 5,
        };
        let mut gate = MotionGate::new(settings).unwrap();
        gate.evaluate(&Frame::filled(200, 100, [0, 0, 0]).unwrap());
        let reading = gate.evaluate(&half_white(200, 100));
        assert!(reading.has_motion);
        assert!(
            (reading.motion_ratio - 0.5).abs() < 0.02,
            "ratio {}",
            reading.motion_ratio
        );
    }

    #[test]
    fn reference_always_advances() {
        let mut gate = MotionGate::new(MotionSettings::default()).unwrap();
        gate.evaluate(&Frame::filled(20, 20, [0, 0, 0]).unwrap());
        assert!(gate.evaluate(&half_white(20, 20)).has_motion);
        // Same content again: change is measured frame-to-frame, not from baseline.
        assert!(!gate.evaluate(&half_white(20, 20)).has_motion);
    }

    #[test]
    fn has_motion_matches_threshold_comparison() {
        for threshold in [0.0f32, 0.1, 0.5, 0.505, 0.9, 1.0] {
            let settings = MotionSettings {
                motion_threshold: threshold,
                ..MotionSettings::default()
            };
            let mut gate = MotionGate::new(settings).unwrap();
            let frames = [
                Frame::filled(50, 10, [0, 0, 0]).unwrap(),
                half_white(50, 10),
                gradient(50, 10, 3),
                gradient(50, 10, 90),
                Frame::filled(50, 10, [255, 255, 255]).unwrap(),
            ];
            for frame in &frames {
                let reading = gate.evaluate(frame);
                assert!((0.0..=1.0).contains(&reading.motion_ratio));
                if gate.is_primed() && reading != MotionReading::STILL {
                    assert_eq!(reading.has_motion, reading.motion_ratio >= threshold);
                }
            }
        }
    }

    #[test]
    fn reset_replays_identically() {
        let frames = [
            Frame::filled(30, 30, [10, 10, 10]).unwrap(),
            half_white(30, 30),
            gradient(30, 30, 40),
            gradient(30, 30, 41),
        ];
        let mut gate = MotionGate::new(MotionSettings::default()).unwrap();
        let first: Vec<_> = frames.iter().map(|f| gate.evaluate(f)).collect();
        gate.reset();
        assert!(!gate.is_primed());
        let second: Vec<_> = frames.iter().map(|f| gate.evaluate(f)).collect();
        assert_eq!(first, second);
        assert_eq!(second[0], MotionReading::STILL);
    }

    #[test]
    fn size_change_restarts_from_cold() {
        let mut gate = MotionGate::new(MotionSettings::default()).unwrap();
        gate.evaluate(&Frame::filled(20, 20, [0, 0, 0]).unwrap());
        let reading = gate.evaluate(&Frame::filled(10, 10, [255, 255, 255]).unwrap());
        assert_eq!(reading, MotionReading::STILL);
    }

    #[test]
    fn settings_validation() {
        let even = MotionSettings {
            blur_size: 4,
            ..MotionSettings::default()
        };
        assert_eq!(even.validate(), Err(MotionSettingsError::BlurSize(4)));
        let ratio = MotionSettings {
            motion_threshold: 1.5,
            ..MotionSettings::default()
        };
        assert!(MotionGate::new(ratio).is_err());
        let unblurred = MotionSettings {
            blur_size: 1,
            ..MotionSettings::default()
        };
        assert!(MotionGate::new(unblurred).is_ok());
    }

    #[test]
    fn blur_smooths_an_isolated_spike() {
        let mut gray = image::GrayImage::new(9, 9);
        gray.put_pixel(4, 4, image::Luma([255]));
        let blurred = blur(LumaPlane::from_image(gray), &gaussian_kernel(5));
        let centre = blurred.image().get_pixel(4, 4)[0];
        let neighbour = blurred.image().get_pixel(5, 4)[0];
        assert!(centre < 255 && centre > neighbour && neighbour > 0);
        assert_eq!(blurred.image().get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn unit_kernel_leaves_plane_untouched() {
        let plane = half_white(12, 6).to_luma();
        assert_eq!(blur(plane.clone(), &gaussian_kernel(1)), plane);
    }

    #[test]
    fn kernel_is_normalized_and_symmetric() {
        let k = gaussian_kernel(5);
        assert_eq!(k.len(), 5);
        assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!((k[0] - k[4]).abs() < 1e-6);
        assert!(k[2] > k[1] && k[1] > k[0]);
    }
}
