//! wingsightd - motion-gated wildlife capture daemon
//!
//! This daemon:
//! 1. Opens the configured camera (falling back to probing /dev/video0..N)
//! 2. Gates frames through the motion detector
//! 3. Runs the object detector on motion frames, outside the cooldown window
//! 4. Saves the best detection as a JPEG and appends it to the CSV log
//! 5. Shuts down cleanly on Ctrl-C / SIGTERM

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use wingsight::capture::secs_to_duration;
use wingsight::{
    load_detector, CaptureController, DetectionLog, FrameSource, GuardedDetector, ImageStore,
    MotionGate, WingsightConfig,
};

#[derive(Parser, Debug)]
#[command(about = "Motion-gated wildlife capture loop")]
struct Args {
    /// TOML configuration file.
    #[arg(long, env = "WINGSIGHT_CONFIG")]
    config: Option<PathBuf>,

    /// Camera device (`/dev/videoN`, `stub://<name>` or `replay:<dir>`).
    #[arg(long)]
    device: Option<String>,

    /// Directory for captured images.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// CSV detection log.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Treat every frame as motion.
    #[arg(long)]
    no_motion: bool,

    /// Seconds between saves.
    #[arg(long)]
    cooldown: Option<f64>,

    /// Stop saving after this many images per local day.
    #[arg(long)]
    max_images_per_day: Option<u32>,
}

impl Args {
    fn apply(self, cfg: &mut WingsightConfig) {
        if let Some(device) = self.device {
            cfg.camera.device = device;
        }
        if let Some(dir) = self.output_dir {
            cfg.storage.output_dir = dir;
        }
        if let Some(path) = self.log_file {
            cfg.storage.log_file = path;
        }
        if self.no_motion {
            cfg.motion_enabled = false;
        }
        if let Some(secs) = self.cooldown {
            cfg.capture.cooldown = secs_to_duration(secs);
        }
        if let Some(cap) = self.max_images_per_day {
            cfg.capture.max_images_per_day = Some(cap);
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = WingsightConfig::load(args.config.as_deref())?;
    args.apply(&mut cfg);
    cfg.validate()?;

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let source = FrameSource::open(&cfg.camera)
        .with_context(|| format!("no camera available (preferred {})", cfg.camera.device))?;
    log::info!(
        "camera: {} at {}x{} @ {} fps",
        source.name(),
        cfg.camera.width,
        cfg.camera.height,
        cfg.camera.framerate
    );

    let gate = if cfg.motion_enabled {
        Some(MotionGate::new(cfg.motion.clone())?)
    } else {
        log::warn!("motion gating disabled, every frame goes to the detector");
        None
    };

    let detector = GuardedDetector::new(load_detector(&cfg.detection), cfg.detection.labels.clone())
        .with_warning_interval(cfg.capture.notice_interval);
    let log = DetectionLog::open(&cfg.storage.log_file)?;
    let images = ImageStore::open(&cfg.storage.output_dir, cfg.storage.jpeg_quality)?;

    log::info!(
        "wingsightd running. images -> {}, log -> {}",
        cfg.storage.output_dir.display(),
        cfg.storage.log_file.display()
    );
    log::info!("press Ctrl-C to stop");

    let mut controller = CaptureController::new(
        source,
        gate,
        detector,
        log,
        images,
        cfg.capture.clone(),
    );
    let stats = controller.run(&stop)?;
    log::info!("wingsightd stopped after {} saves", stats.saves);
    Ok(())
}
