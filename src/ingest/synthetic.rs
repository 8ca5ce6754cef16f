//! Synthetic camera (`stub://`).
//!
//! Produces a static textured background. Every `VISIT_PERIOD` frames a bright
//! block ("visitor") appears for `VISIT_LENGTH` frames and moves across the
//! scene, so the motion gate fires at a predictable cadence.

use super::{Camera, CameraError};
use crate::frame::Frame;

const VISIT_PERIOD: u64 = 50;
const VISIT_LENGTH: u64 = 5;

pub struct SyntheticCamera {
    name: String,
    width: u32,
    height: u32,
    frame_count: u64,
    background: Vec<u8>,
}

impl SyntheticCamera {
    pub fn new(name: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if width < 8 || height < 8 {
            return Err(CameraError::Unavailable(format!(
                "synthetic scene needs at least 8x8 pixels (got {}x{})",
                width, height
            )));
        }
        Ok(Self {
            name: format!("stub://{}", name),
            width,
            height,
            frame_count: 0,
            background: background(width, height),
        })
    }

    pub fn frames_generated(&self) -> u64 {
        self.frame_count
    }

    fn visitor_at(&self, frame_index: u64) -> Option<(u32, u32)> {
        let phase = frame_index % VISIT_PERIOD;
        if frame_index < VISIT_PERIOD || phase >= VISIT_LENGTH {
            return None;
        }
        let size = self.width.min(self.height) / 4;
        let span = self.width - size;
        let x = (phase as u32 * span) / VISIT_LENGTH as u32;
        let y = (self.height - size) / 2;
        Some((x, y))
    }
}

impl Camera for SyntheticCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self) -> Result<Option<Frame>, CameraError> {
        let index = self.frame_count;
        self.frame_count += 1;

        let mut pixels = self.background.clone();
        if let Some((x0, y0)) = self.visitor_at(index) {
            let size = self.width.min(self.height) / 4;
            for y in y0..y0 + size {
                for x in x0..x0 + size {
                    let idx = ((y * self.width + x) * 3) as usize;
                    pixels[idx..idx + 3].copy_from_slice(&[240, 200, 60]);
                }
            }
        }

        Frame::from_rgb(self.width, self.height, pixels)
            .map(Some)
            .map_err(|cause| CameraError::MalformedFrame {
                camera: self.name.clone(),
                cause,
            })
    }

    fn release(&mut self) {
        log::debug!(
            "SyntheticCamera: {} released after {} frames",
            self.name,
            self.frame_count
        );
    }
}

fn background(width: u32, height: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            let shade = (40 + (x / 16 + y / 16) % 2 * 20) as u8;
            pixels.extend_from_slice(&[shade / 2, shade + 30, shade / 2]);
        }
    }
    pixels
}
