//! V4L2 camera.
//!
//! This module provides `V4l2Camera` for capturing from local V4L2 device
//! nodes (e.g., /dev/video0). The camera:
//! - Negotiates RGB3 at the configured resolution, accepting what the driver offers
//! - Requests the configured frame rate
//! - Normalizes the native format (RGB3, BGR3, YUYV, NV12) to RGB
//!
//! Opening a missing or unsupported device reports `Unavailable` so the
//! selection policy can move on to the next candidate.

use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{Camera, CameraError, CameraSettings};
use crate::frame::Frame;

const BUFFER_COUNT: u32 = 4;

pub struct V4l2Camera {
    device_path: String,
    state: Option<V4l2State>,
    width: u32,
    height: u32,
    format: PixelFormat,
    frame_count: u64,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this>,
}

impl V4l2Camera {
    pub fn open(device_path: &str, settings: &CameraSettings) -> Result<Self, CameraError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(device_path).map_err(|err| {
            CameraError::Unavailable(format!("open v4l2 device {}: {}", device_path, err))
        })?;
        let mut format = device
            .format()
            .map_err(|err| CameraError::Unavailable(format!("read v4l2 format: {}", err)))?;
        format.width = settings.width;
        format.height = settings.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Camera: failed to set format on {}: {}",
                    device_path,
                    err
                );
                device.format().map_err(|err| {
                    CameraError::Unavailable(format!("read v4l2 format after set failure: {}", err))
                })?
            }
        };

        let pixel_format = pixel_format_for(&format.fourcc).ok_or_else(|| {
            CameraError::Unavailable(format!(
                "{} delivers unsupported pixel format {}",
                device_path, format.fourcc
            ))
        })?;

        if settings.framerate > 0 {
            let params = v4l::video::capture::Parameters::with_fps(settings.framerate);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Camera: failed to set fps on {}: {}",
                    device_path,
                    err
                );
            }
        }

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
            },
        }
        .try_build()
        .map_err(|err| CameraError::Unavailable(format!("create v4l2 buffer stream: {}", err)))?;

        log::info!(
            "V4l2Camera: connected to {} ({}x{} {:?})",
            device_path,
            format.width,
            format.height,
            pixel_format
        );
        Ok(Self {
            device_path: device_path.to_string(),
            state: Some(state),
            width: format.width,
            height: format.height,
            format: pixel_format,
            frame_count: 0,
        })
    }
}

impl Camera for V4l2Camera {
    fn name(&self) -> &str {
        &self.device_path
    }

    fn read(&mut self) -> Result<Option<Frame>, CameraError> {
        use v4l::io::traits::CaptureStream;

        let state = self
            .state
            .as_mut()
            .ok_or_else(|| CameraError::Capture("v4l2 device released".to_string()))?;
        let (width, height, format) = (self.width, self.height, self.format);
        let frame = state.with_stream_mut(|stream| {
            let (buf, meta) = stream
                .next()
                .map_err(|err| CameraError::Capture(format!("capture v4l2 frame: {}", err)))?;
            let used = (meta.bytesused as usize).min(buf.len());
            let used = if used == 0 { buf.len() } else { used };
            Ok::<_, CameraError>(normalize_to_rgb(&buf[..used], width, height, format))
        })?;

        let frame = frame.map_err(|cause| CameraError::MalformedFrame {
            camera: self.device_path.clone(),
            cause,
        })?;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            log::debug!(
                "V4l2Camera: {} released after {} frames",
                self.device_path,
                self.frame_count
            );
        }
    }
}

fn pixel_format_for(fourcc: &v4l::FourCC) -> Option<PixelFormat> {
    match &fourcc.repr {
        b"RGB3" => Some(PixelFormat::Rgb24),
        b"BGR3" => Some(PixelFormat::Bgr24),
        b"YUYV" => Some(PixelFormat::Yuyv),
        b"NV12" => Some(PixelFormat::Nv12),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_fourccs_map_to_pixel_formats() {
        assert_eq!(
            pixel_format_for(&v4l::FourCC::new(b"YUYV")),
            Some(PixelFormat::Yuyv)
        );
        assert_eq!(
            pixel_format_for(&v4l::FourCC::new(b"RGB3")),
            Some(PixelFormat::Rgb24)
        );
        assert_eq!(pixel_format_for(&v4l::FourCC::new(b"MJPG")), None);
    }

    #[test]
    fn missing_device_is_unavailable() {
        let result = V4l2Camera::open("/dev/video-does-not-exist", &CameraSettings::default());
        assert!(matches!(result, Err(CameraError::Unavailable(_))));
    }
}
