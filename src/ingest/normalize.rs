use crate::frame::{Frame, FrameError};

/// Native pixel layouts a backend may deliver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    /// Packed 4:2:2, `Y0 U Y1 V`.
    Yuyv,
    /// Planar Y followed by interleaved UV at quarter resolution.
    Nv12,
}

impl PixelFormat {
    /// Buffer length for a frame of this format.
    pub fn frame_len(self, width: u32, height: u32) -> Option<usize> {
        let pixels = (width as usize).checked_mul(height as usize)?;
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => pixels.checked_mul(3),
            PixelFormat::Yuyv => pixels.checked_mul(2),
            PixelFormat::Nv12 => pixels.checked_add(pixels / 2),
        }
    }
}

/// Convert a native buffer into a canonical RGB frame.
pub fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Frame, FrameError> {
    if width == 0 || height == 0 {
        return Err(FrameError::EmptyDimensions { width, height });
    }
    let expected = format
        .frame_len(width, height)
        .ok_or(FrameError::Overflow { width, height })?;
    if pixels.len() != expected {
        return Err(FrameError::LengthMismatch {
            expected,
            actual: pixels.len(),
        });
    }

    let rgb = match format {
        PixelFormat::Rgb24 => pixels.to_vec(),
        PixelFormat::Bgr24 => pixels
            .chunks_exact(3)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect(),
        PixelFormat::Yuyv => yuyv_to_rgb(pixels),
        PixelFormat::Nv12 => nv12_to_rgb(pixels, width as usize, height as usize)?,
    };
    Frame::from_rgb(width, height, rgb)
}

fn yuyv_to_rgb(pixels: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(pixels.len() / 2 * 3);
    for chunk in pixels.chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        rgb.extend_from_slice(&yuv_to_rgb(chunk[0] as f32, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(chunk[2] as f32, u, v));
    }
    rgb
}

fn nv12_to_rgb(pixels: &[u8], w: usize, h: usize) -> Result<Vec<u8>, FrameError> {
    let y_plane = w * h;
    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let (Some(&u), Some(&v)) = (pixels.get(uv_index), pixels.get(uv_index + 1)) else {
                return Err(FrameError::LengthMismatch {
                    expected: uv_index + 2,
                    actual: pixels.len(),
                });
            };
            let offset = (j * w + i) * 3;
            rgb[offset..offset + 3]
                .copy_from_slice(&yuv_to_rgb(y, u as f32 - 128.0, v as f32 - 128.0));
        }
    }
    Ok(rgb)
}

fn yuv_to_rgb(y: f32, u: f32, v: f32) -> [u8; 3] {
    let r = y + 1.402_f32 * v;
    let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
    let b = y + 1.772_f32 * u;
    [clamp_to_u8(r), clamp_to_u8(g), clamp_to_u8(b)]
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_conversion_produces_gray() -> Result<(), FrameError> {
        let nv12 = [vec![128u8; 4], vec![128u8; 2]].concat();
        let frame = normalize_to_rgb(&nv12, 2, 2, PixelFormat::Nv12)?;
        assert_eq!(frame.as_rgb(), vec![128u8; 12].as_slice());
        Ok(())
    }

    #[test]
    fn bgr_is_swapped_into_rgb() -> Result<(), FrameError> {
        let frame = normalize_to_rgb(&[10, 20, 30, 40, 50, 60], 2, 1, PixelFormat::Bgr24)?;
        assert_eq!(frame.as_rgb(), &[30, 20, 10, 60, 50, 40]);
        Ok(())
    }

    #[test]
    fn yuyv_neutral_chroma_is_gray() -> Result<(), FrameError> {
        let frame = normalize_to_rgb(&[16, 128, 235, 128], 2, 1, PixelFormat::Yuyv)?;
        assert_eq!(frame.as_rgb(), &[16, 16, 16, 235, 235, 235]);
        Ok(())
    }

    #[test]
    fn rgb_pass_through_validates_length() {
        let pixels = vec![1u8; 9];
        assert!(normalize_to_rgb(&pixels, 1, 3, PixelFormat::Rgb24).is_ok());
        assert!(matches!(
            normalize_to_rgb(&pixels, 2, 3, PixelFormat::Rgb24),
            Err(FrameError::LengthMismatch {
                expected: 18,
                actual: 9
            })
        ));
    }
}
