//! Persistence: the append-only detection log and the image artifact store.
//!
//! `DetectionLog` keeps one CSV file open for the whole run. Rows are flushed
//! on every append, so nothing accumulates in memory and a crash loses at most
//! the row being written. Existing rows are never rewritten.
//!
//! `ImageStore` writes JPEG files into the output directory. Names combine the
//! label, a microsecond timestamp and a per-run sequence number, and files are
//! created with `create_new`, so a save never overwrites an earlier one.

use chrono::{DateTime, Local, SecondsFormat};
use image::codecs::jpeg::JpegEncoder;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::frame::Frame;

pub const DEFAULT_LOG_FILE: &str = "detections.csv";
pub const DEFAULT_OUTPUT_DIR: &str = "captures";
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Fixed column set of the detection log.
pub const LOG_HEADER: [&str; 4] = ["timestamp", "detection_label", "confidence", "image_path"];

const MAX_NAME_ATTEMPTS: u32 = 64;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("detection log {}: {source}", path.display())]
    Log { path: PathBuf, source: csv::Error },
    #[error("image {}: {source}", path.display())]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("{context} {}: {source}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("detection log {} is closed", .0.display())]
    Closed(PathBuf),
}

impl PersistenceError {
    fn io(context: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One logged detection.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionEvent {
    pub timestamp: DateTime<Local>,
    pub label: String,
    pub confidence: f32,
    /// Saved image, `None` when the image could not be written.
    pub image_path: Option<PathBuf>,
}

#[derive(Serialize)]
struct LogRow<'a> {
    timestamp: String,
    detection_label: &'a str,
    confidence: String,
    image_path: String,
}

impl<'a> From<&'a DetectionEvent> for LogRow<'a> {
    fn from(event: &'a DetectionEvent) -> Self {
        Self {
            timestamp: event
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Micros, false),
            detection_label: &event.label,
            confidence: format!("{:.4}", event.confidence.clamp(0.0, 1.0)),
            image_path: event
                .image_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        }
    }
}

/// Destination of encoded log rows.
trait LogSink: Write {
    fn sync(&mut self) -> std::io::Result<()>;
}

impl LogSink for File {
    fn sync(&mut self) -> std::io::Result<()> {
        self.sync_all()
    }
}

/// Append-only CSV detection log.
///
/// Each row is encoded on its own and written to the file in one call, so a
/// failed write never leaves a row behind to reappear on a later flush.
pub struct DetectionLog {
    path: PathBuf,
    sink: Option<Box<dyn LogSink>>,
    rows_appended: u64,
}

impl DetectionLog {
    /// Open (or create) the log. The header is written only into an empty file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| PersistenceError::io("create log directory", parent, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| PersistenceError::io("open detection log", &path, e))?;
        let len = file
            .metadata()
            .map_err(|e| PersistenceError::io("stat detection log", &path, e))?
            .len();

        let mut log = Self {
            path,
            sink: Some(Box::new(file)),
            rows_appended: 0,
        };
        if len == 0 {
            let header = encode_row(&log.path, |w| w.write_record(LOG_HEADER))?;
            log.write_bytes(&header)?;
            log::info!("DetectionLog: created {}", log.path.display());
        } else {
            check_header(&log.path);
        }
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows appended by this handle.
    pub fn rows_appended(&self) -> u64 {
        self.rows_appended
    }

    /// Append one event and flush it to the file.
    pub fn append(&mut self, event: &DetectionEvent) -> Result<(), PersistenceError> {
        if self.sink.is_none() {
            return Err(PersistenceError::Closed(self.path.clone()));
        }
        let row = encode_row(&self.path, |w| w.serialize(LogRow::from(event)))?;
        self.write_bytes(&row)?;
        self.rows_appended += 1;
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), PersistenceError> {
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| PersistenceError::Closed(self.path.clone()))?;
        sink.write_all(bytes)
            .and_then(|()| sink.flush())
            .map_err(|e| PersistenceError::io("write detection log", &self.path, e))
    }

    /// Flush buffered output. A closed log has nothing to flush.
    pub fn flush(&mut self) -> Result<(), PersistenceError> {
        match self.sink.as_mut() {
            Some(sink) => sink
                .flush()
                .map_err(|e| PersistenceError::io("flush detection log", &self.path, e)),
            None => Ok(()),
        }
    }

    /// Flush and release the file. Subsequent calls do nothing.
    pub fn close(&mut self) -> Result<(), PersistenceError> {
        let Some(mut sink) = self.sink.take() else {
            return Ok(());
        };
        sink.flush()
            .and_then(|()| sink.sync())
            .map_err(|e| PersistenceError::io("sync detection log", &self.path, e))
    }
}

/// Encode a single CSV record into memory.
fn encode_row<F>(path: &Path, write: F) -> Result<Vec<u8>, PersistenceError>
where
    F: FnOnce(&mut csv::Writer<Vec<u8>>) -> csv::Result<()>,
{
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    write(&mut writer).map_err(|source| PersistenceError::Log {
        path: path.to_path_buf(),
        source,
    })?;
    writer
        .into_inner()
        .map_err(|e| PersistenceError::io("encode log row", path, e.into_error()))
}

impl Drop for DetectionLog {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::error!("DetectionLog: {}", err);
        }
    }
}

fn check_header(path: &Path) {
    let Ok(file) = File::open(path) else {
        return;
    };
    let mut first = String::new();
    if BufReader::new(file).read_line(&mut first).is_err() {
        return;
    }
    let expected = LOG_HEADER.join(",");
    if first.trim_end() != expected {
        log::warn!(
            "DetectionLog: {} has unexpected header {:?}, appending anyway",
            path.display(),
            first.trim_end()
        );
    }
}

/// JPEG artifact writer.
pub struct ImageStore {
    dir: PathBuf,
    quality: u8,
    sequence: u64,
}

impl ImageStore {
    pub fn open<P: AsRef<Path>>(dir: P, quality: u8) -> Result<Self, PersistenceError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| PersistenceError::io("create output directory", &dir, e))?;
        Ok(Self {
            dir,
            quality: quality.clamp(1, 100),
            sequence: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Encode and write `frame`, returning the new file's path.
    pub fn save(
        &mut self,
        frame: &Frame,
        label: &str,
        at: DateTime<Local>,
    ) -> Result<PathBuf, PersistenceError> {
        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, self.quality)
            .encode_image(frame.image())
            .map_err(|source| PersistenceError::Image {
                path: self.dir.clone(),
                source,
            })?;

        let stamp = at.format("%Y%m%d_%H%M%S_%6f");
        let label = sanitize_label(label);
        for _ in 0..MAX_NAME_ATTEMPTS {
            self.sequence += 1;
            let path = self
                .dir
                .join(format!("{}_{}_{:06}.jpg", label, stamp, self.sequence));
            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(PersistenceError::io("create image", &path, err)),
            };
            if let Err(err) = file.write_all(&encoded).and_then(|_| file.sync_all()) {
                drop(file);
                let _ = std::fs::remove_file(&path);
                return Err(PersistenceError::io("write image", &path, err));
            }
            return Ok(path);
        }

        Err(PersistenceError::io(
            "allocate image name",
            &self.dir,
            std::io::Error::new(ErrorKind::AlreadyExists, "no free file name"),
        ))
    }

    /// Remove an image written by this store.
    pub fn discard(&self, path: &Path) -> Result<(), PersistenceError> {
        std::fs::remove_file(path).map_err(|e| PersistenceError::io("remove image", path, e))
    }
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(32)
        .collect();
    if cleaned.is_empty() {
        "detection".to_string()
    } else {
        cleaned
    }
}
