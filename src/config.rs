use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::capture::{secs_to_duration, CaptureSettings};
use crate::detect::DetectorSettings;
use crate::ingest::CameraSettings;
use crate::motion::MotionSettings;
use crate::storage::{DEFAULT_JPEG_QUALITY, DEFAULT_LOG_FILE, DEFAULT_OUTPUT_DIR};

pub const CONFIG_ENV: &str = "WINGSIGHT_CONFIG";

#[derive(Debug, Deserialize, Default)]
struct WingsightConfigFile {
    camera: Option<CameraConfigFile>,
    motion: Option<MotionConfigFile>,
    detection: Option<DetectionConfigFile>,
    capture: Option<CaptureConfigFile>,
    storage: Option<StorageConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    framerate: Option<u32>,
    fallback: Option<bool>,
    probe_indices: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct MotionConfigFile {
    enabled: Option<bool>,
    pixel_threshold: Option<u8>,
    motion_threshold: Option<f32>,
    blur_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    object_confidence_threshold: Option<f32>,
    models: Option<Vec<PathBuf>>,
    labels: Option<Vec<String>>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    cooldown_seconds: Option<f64>,
    max_images_per_day: Option<u32>,
    status_interval: Option<u64>,
    notice_interval_seconds: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    output_dir: Option<PathBuf>,
    log_file: Option<PathBuf>,
    jpeg_quality: Option<u8>,
}

/// Fully resolved configuration for the capture loop.
#[derive(Debug, Clone, PartialEq)]
pub struct WingsightConfig {
    pub camera: CameraSettings,
    /// When false every frame is treated as motion.
    pub motion_enabled: bool,
    pub motion: MotionSettings,
    pub detection: DetectorSettings,
    pub capture: CaptureSettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub output_dir: PathBuf,
    pub log_file: PathBuf,
    pub jpeg_quality: u8,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl Default for WingsightConfig {
    fn default() -> Self {
        Self {
            camera: CameraSettings::default(),
            motion_enabled: true,
            motion: MotionSettings::default(),
            detection: DetectorSettings::default(),
            capture: CaptureSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

impl WingsightConfig {
    /// Load from `path` (or `WINGSIGHT_CONFIG`), then apply environment overrides.
    ///
    /// Call `validate` after any further (CLI) overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        let config_path = path.map(Path::to_path_buf).or(env_path);
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        Ok(cfg)
    }

    /// Parse a TOML document on top of the defaults.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let file: WingsightConfigFile =
            toml::from_str(raw).map_err(|e| anyhow!("invalid config: {}", e))?;
        Ok(Self::from_file(file))
    }

    fn from_file(file: WingsightConfigFile) -> Self {
        let defaults = Self::default();

        let camera = file.camera.unwrap_or_default();
        let camera = CameraSettings {
            device: camera.device.unwrap_or(defaults.camera.device),
            width: camera.width.unwrap_or(defaults.camera.width),
            height: camera.height.unwrap_or(defaults.camera.height),
            framerate: camera.framerate.unwrap_or(defaults.camera.framerate),
            fallback: camera.fallback.unwrap_or(defaults.camera.fallback),
            probe_indices: camera.probe_indices.unwrap_or(defaults.camera.probe_indices),
        };

        let motion = file.motion.unwrap_or_default();
        let motion_enabled = motion.enabled.unwrap_or(defaults.motion_enabled);
        let motion = MotionSettings {
            pixel_threshold: motion
                .pixel_threshold
                .unwrap_or(defaults.motion.pixel_threshold),
            motion_threshold: motion
                .motion_threshold
                .unwrap_or(defaults.motion.motion_threshold),
            blur_size: motion.blur_size.unwrap_or(defaults.motion.blur_size),
        };

        let detection = file.detection.unwrap_or_default();
        let detection = DetectorSettings {
            models: detection.models.unwrap_or(defaults.detection.models),
            confidence_threshold: detection
                .object_confidence_threshold
                .unwrap_or(defaults.detection.confidence_threshold),
            labels: detection.labels.filter(|labels| !labels.is_empty()),
            input_size: detection
                .input_size
                .unwrap_or(defaults.detection.input_size),
        };

        let capture = file.capture.unwrap_or_default();
        let capture = CaptureSettings {
            cooldown: capture
                .cooldown_seconds
                .map(secs_to_duration)
                .unwrap_or(defaults.capture.cooldown),
            max_images_per_day: capture.max_images_per_day,
            status_interval: capture
                .status_interval
                .unwrap_or(defaults.capture.status_interval),
            notice_interval: capture
                .notice_interval_seconds
                .map(secs_to_duration)
                .unwrap_or(defaults.capture.notice_interval),
            min_confidence: detection.confidence_threshold,
        };

        let storage = file.storage.unwrap_or_default();
        let storage = StorageSettings {
            output_dir: storage.output_dir.unwrap_or(defaults.storage.output_dir),
            log_file: storage.log_file.unwrap_or(defaults.storage.log_file),
            jpeg_quality: storage
                .jpeg_quality
                .unwrap_or(defaults.storage.jpeg_quality),
        };

        Self {
            camera,
            motion_enabled,
            motion,
            detection,
            capture,
            storage,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("WINGSIGHT_CAMERA_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(framerate) = std::env::var("WINGSIGHT_FRAMERATE") {
            self.camera.framerate = framerate
                .trim()
                .parse()
                .map_err(|_| anyhow!("WINGSIGHT_FRAMERATE must be a non-negative integer"))?;
        }
        if let Ok(dir) = std::env::var("WINGSIGHT_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.storage.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(path) = std::env::var("WINGSIGHT_LOG_FILE") {
            if !path.trim().is_empty() {
                self.storage.log_file = PathBuf::from(path);
            }
        }
        if let Ok(cooldown) = std::env::var("WINGSIGHT_COOLDOWN_SECS") {
            let seconds: f64 = cooldown
                .trim()
                .parse()
                .map_err(|_| anyhow!("WINGSIGHT_COOLDOWN_SECS must be a number of seconds"))?;
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(anyhow!("WINGSIGHT_COOLDOWN_SECS must be >= 0"));
            }
            self.capture.cooldown = secs_to_duration(seconds);
        }
        if let Ok(cap) = std::env::var("WINGSIGHT_MAX_IMAGES_PER_DAY") {
            self.capture.max_images_per_day = if cap.trim().is_empty() {
                None
            } else {
                Some(cap.trim().parse().map_err(|_| {
                    anyhow!("WINGSIGHT_MAX_IMAGES_PER_DAY must be a positive integer")
                })?)
            };
        }
        if let Ok(models) = std::env::var("WINGSIGHT_MODELS") {
            let parsed = split_csv(&models);
            if !parsed.is_empty() {
                self.detection.models = parsed.into_iter().map(PathBuf::from).collect();
            }
        }
        if let Ok(labels) = std::env::var("WINGSIGHT_LABELS") {
            let parsed = split_csv(&labels);
            self.detection.labels = (!parsed.is_empty()).then_some(parsed);
        }
        Ok(())
    }

    /// Check ranges after all layers have been applied.
    pub fn validate(&mut self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera resolution must be non-zero"));
        }
        self.motion
            .validate()
            .map_err(|e| anyhow!("invalid motion settings: {}", e))?;
        let threshold = self.detection.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!(
                "object_confidence_threshold must be within [0, 1] (got {})",
                threshold
            ));
        }
        self.capture.min_confidence = threshold;
        if self.detection.input_size == 0 {
            return Err(anyhow!("detection input_size must be greater than zero"));
        }
        if self.capture.max_images_per_day == Some(0) {
            return Err(anyhow!(
                "max_images_per_day must be at least 1 (omit it to disable the cap)"
            ));
        }
        if self.capture.status_interval == 0 {
            return Err(anyhow!("status_interval must be greater than zero"));
        }
        if !(1..=100).contains(&self.storage.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be within 1..=100"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<WingsightConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = WingsightConfig::from_toml("").unwrap();
        assert_eq!(cfg, WingsightConfig::default());
        assert_eq!(cfg.camera.device, "/dev/video0");
        assert_eq!(cfg.capture.cooldown, Duration::from_secs(10));
        assert_eq!(cfg.motion.pixel_threshold, 30);
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = WingsightConfig::from_toml(
            r#"
            [camera]
            device = "stub://feeder"
            framerate = 0

            [motion]
            enabled = false
            blur_size = 7

            [detection]
            object_confidence_threshold = 0.5
            labels = ["bird"]

            [capture]
            cooldown_seconds = 2.5
            max_images_per_day = 200
            "#,
        )
        .unwrap();
        assert_eq!(cfg.camera.device, "stub://feeder");
        assert_eq!(cfg.camera.framerate, 0);
        assert!(!cfg.motion_enabled);
        assert_eq!(cfg.motion.blur_size, 7);
        assert_eq!(cfg.detection.labels, Some(vec!["bird".to_string()]));
        assert_eq!(cfg.capture.min_confidence, 0.5);
        assert_eq!(cfg.capture.cooldown, Duration::from_millis(2500));
        assert_eq!(cfg.capture.max_images_per_day, Some(200));
    }

    #[test]
    fn out_of_range_pixel_threshold_is_rejected_at_parse() {
        assert!(WingsightConfig::from_toml("[motion]\npixel_threshold = 300").is_err());
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut cfg = WingsightConfig::default();
        cfg.motion.blur_size = 6;
        assert!(cfg.validate().is_err());

        let mut cfg = WingsightConfig::default();
        cfg.detection.confidence_threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = WingsightConfig::default();
        cfg.capture.max_images_per_day = Some(0);
        assert!(cfg.validate().is_err());

        let mut cfg = WingsightConfig::default();
        cfg.detection.confidence_threshold = 0.6;
        cfg.validate().unwrap();
        assert_eq!(cfg.capture.min_confidence, 0.6);
    }

    #[test]
    fn negative_cooldown_clamps_to_zero() {
        let cfg = WingsightConfig::from_toml("[capture]\ncooldown_seconds = -3.0").unwrap();
        assert_eq!(cfg.capture.cooldown, Duration::ZERO);
    }

    #[test]
    fn huge_intervals_saturate() {
        let mut cfg = WingsightConfig::from_toml(
            "[capture]\ncooldown_seconds = 1e30\nnotice_interval_seconds = 1e300",
        )
        .unwrap();
        assert_eq!(cfg.capture.cooldown, Duration::MAX);
        assert_eq!(cfg.capture.notice_interval, Duration::MAX);
        assert!(cfg.validate().is_ok());
    }
}
