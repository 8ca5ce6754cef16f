//! Directory replay camera (`replay:<dir>`).
//!
//! Replays the still images of a local directory in lexical filename order and
//! then reports end of stream. Decoding happens per read, so only one frame is
//! held at a time.

use std::path::{Path, PathBuf};

use super::{Camera, CameraError};
use crate::frame::Frame;

const EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

pub struct ReplayCamera {
    name: String,
    files: Vec<PathBuf>,
    cursor: usize,
}

impl ReplayCamera {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, CameraError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|err| {
            CameraError::Unavailable(format!("cannot read replay dir {}: {}", dir.display(), err))
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && has_image_extension(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(CameraError::Unavailable(format!(
                "replay dir {} contains no images",
                dir.display()
            )));
        }

        log::info!(
            "ReplayCamera: {} images queued from {}",
            files.len(),
            dir.display()
        );
        Ok(Self {
            name: format!("replay:{}", dir.display()),
            files,
            cursor: 0,
        })
    }

    pub fn remaining(&self) -> usize {
        self.files.len() - self.cursor
    }
}

impl Camera for ReplayCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self) -> Result<Option<Frame>, CameraError> {
        let Some(path) = self.files.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;

        let decoded = image::open(path)
            .map_err(|err| CameraError::Capture(format!("decode {}: {}", path.display(), err)))?;
        Frame::from_image(decoded.to_rgb8())
            .map(Some)
            .map_err(|cause| CameraError::MalformedFrame {
                camera: self.name.clone(),
                cause,
            })
    }

    fn release(&mut self) {
        self.cursor = self.files.len();
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn replays_images_in_order_then_ends() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(8, 6, Rgb([0, 0, 0]))
            .save(dir.path().join("b.png"))
            .unwrap();
        RgbImage::from_pixel(4, 4, Rgb([255, 0, 0]))
            .save(dir.path().join("a.png"))
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut camera = ReplayCamera::open(dir.path()).unwrap();
        assert_eq!(camera.remaining(), 2);

        let first = camera.read().unwrap().unwrap();
        assert_eq!((first.width(), first.height()), (4, 4));
        assert_eq!(&first.as_rgb()[..3], &[255, 0, 0]);

        let second = camera.read().unwrap().unwrap();
        assert_eq!((second.width(), second.height()), (8, 6));

        assert!(camera.read().unwrap().is_none());
    }

    #[test]
    fn undecodable_file_is_a_transient_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.jpg"), b"not a jpeg").unwrap();
        let mut camera = ReplayCamera::open(dir.path()).unwrap();
        assert!(matches!(camera.read(), Err(CameraError::Capture(_))));
        assert!(camera.read().unwrap().is_none());
    }

    #[test]
    fn empty_dir_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ReplayCamera::open(dir.path()),
            Err(CameraError::Unavailable(_))
        ));
    }
}
