//! camera_check - verify a camera produces frames
//!
//! Opens the configured device (with fallback), reads a handful of frames and
//! writes the first one to disk so the framing can be inspected.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use wingsight::{FrameOutcome, FrameSource, WingsightConfig};

#[derive(Parser, Debug)]
#[command(about = "Capture test frames from the configured camera")]
struct Args {
    /// TOML configuration file.
    #[arg(long, env = "WINGSIGHT_CONFIG")]
    config: Option<PathBuf>,

    /// Camera device, overrides the configuration.
    #[arg(long)]
    device: Option<String>,

    /// Frames to read.
    #[arg(long, default_value = "10")]
    frames: u32,

    /// Where to write the first frame.
    #[arg(long, default_value = "capture.jpg")]
    output: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = WingsightConfig::load(args.config.as_deref())?;
    if let Some(device) = args.device {
        cfg.camera.device = device;
    }
    cfg.validate()?;

    let mut source = FrameSource::open(&cfg.camera).context("camera check failed")?;
    log::info!("opened {}", source.name());

    let mut captured = 0u32;
    let mut failed = 0u32;
    for _ in 0..args.frames {
        match source.next_frame()? {
            FrameOutcome::Frame(frame) => {
                if captured == 0 {
                    frame
                        .image()
                        .save(&args.output)
                        .with_context(|| format!("writing {}", args.output.display()))?;
                    log::info!(
                        "saved {}x{} frame to {}",
                        frame.width(),
                        frame.height(),
                        args.output.display()
                    );
                }
                captured += 1;
            }
            FrameOutcome::TransientFailure(reason) => {
                failed += 1;
                log::warn!("read failed: {}", reason);
            }
            FrameOutcome::EndOfStream => break,
        }
        source.sleep_between_frames();
    }
    source.close();

    log::info!("captured {} frames ({} failed reads)", captured, failed);
    if captured == 0 {
        return Err(anyhow!("camera produced no frames"));
    }
    Ok(())
}
