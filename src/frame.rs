//! Frame container shared by the capture pipeline.
//!
//! - `Frame`: RGB pixel grid with a validated `(height, width, 3)` shape.
//! - `LumaPlane`: single-channel luminance plane used by the motion gate.
//!
//! Frames are ephemeral. Sources produce them, the controller hands them to the
//! motion gate and the detector, and at most one tick later they are dropped.

use image::{GrayImage, RgbImage};
use std::time::Instant;
use thiserror::Error;

/// Number of colour channels in a canonical frame.
pub const CHANNELS: usize = 3;

/// Shape violations. These are programming/driver invariant failures and are
/// treated as fatal by the controller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame dimensions must be non-zero (got {width}x{height})")]
    EmptyDimensions { width: u32, height: u32 },
    #[error("frame dimensions {width}x{height} overflow")]
    Overflow { width: u32, height: u32 },
    #[error("frame buffer length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// RGB frame in canonical channel order.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    captured_at: Instant,
}

impl Frame {
    /// Build a frame from tightly packed RGB bytes.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, FrameError> {
        let expected = expected_len(width, height)?;
        if pixels.len() != expected {
            return Err(FrameError::LengthMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        let image = RgbImage::from_raw(width, height, pixels).ok_or(FrameError::LengthMismatch {
            expected,
            actual: 0,
        })?;
        Ok(Self {
            image,
            captured_at: Instant::now(),
        })
    }

    /// Wrap an already decoded RGB image.
    pub fn from_image(image: RgbImage) -> Result<Self, FrameError> {
        let (width, height) = image.dimensions();
        expected_len(width, height)?;
        Ok(Self {
            image,
            captured_at: Instant::now(),
        })
    }

    /// Solid-colour frame, mostly for synthetic sources and tests.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self, FrameError> {
        expected_len(width, height)?;
        Ok(Self {
            image: RgbImage::from_pixel(width, height, image::Rgb(rgb)),
            captured_at: Instant::now(),
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixel_count(&self) -> usize {
        self.image.width() as usize * self.image.height() as usize
    }

    /// Packed RGB bytes, row-major.
    pub fn as_rgb(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Single-channel luminance of the frame.
    pub fn to_luma(&self) -> LumaPlane {
        LumaPlane::from_image(image::imageops::grayscale(&self.image))
    }
}

/// Single-channel 8-bit plane.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LumaPlane(GrayImage);

impl LumaPlane {
    pub fn from_image(image: GrayImage) -> Self {
        Self(image)
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn image(&self) -> &GrayImage {
        &self.0
    }

    /// Row-major luminance bytes.
    pub fn as_raw(&self) -> &[u8] {
        self.0.as_raw()
    }

    pub fn len(&self) -> usize {
        self.0.as_raw().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.as_raw().is_empty()
    }

    pub fn same_shape(&self, other: &LumaPlane) -> bool {
        self.0.dimensions() == other.0.dimensions()
    }
}

fn expected_len(width: u32, height: u32) -> Result<usize, FrameError> {
    if width == 0 || height == 0 {
        return Err(FrameError::EmptyDimensions { width, height });
    }
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(CHANNELS))
        .ok_or(FrameError::Overflow { width, height })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_validates_length() {
        let err = Frame::from_rgb(2, 2, vec![0u8; 11]).unwrap_err();
        assert_eq!(
            err,
            FrameError::LengthMismatch {
                expected: 12,
                actual: 11
            }
        );
        assert!(Frame::from_rgb(2, 2, vec![0u8; 12]).is_ok());
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        assert!(matches!(
            Frame::from_rgb(0, 4, Vec::new()),
            Err(FrameError::EmptyDimensions { .. })
        ));
        assert!(Frame::filled(4, 0, [0, 0, 0]).is_err());
    }

    #[test]
    fn luma_keeps_shape_and_extremes() {
        let white = Frame::filled(3, 2, [255, 255, 255]).unwrap().to_luma();
        assert!(white.as_raw().iter().all(|&y| y == 255));
        assert_eq!((white.width(), white.height(), white.len()), (3, 2, 6));

        let black = Frame::filled(3, 2, [0, 0, 0]).unwrap().to_luma();
        assert!(black.as_raw().iter().all(|&y| y == 0));
        assert!(white.same_shape(&black));
        assert!(!white.same_shape(&Frame::filled(2, 3, [0, 0, 0]).unwrap().to_luma()));
    }

    #[test]
    fn green_is_the_brightest_primary() {
        let luma = |rgb| Frame::filled(1, 1, rgb).unwrap().to_luma().as_raw()[0];
        let (r, g, b) = (luma([255, 0, 0]), luma([0, 255, 0]), luma([0, 0, 255]));
        assert!(g > r && r > b, "r={} g={} b={}", r, g, b);
    }
}
