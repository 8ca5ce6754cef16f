//! Capture controller: the per-tick state machine.
//!
//! One tick walks `Idle → MotionCheck → CooldownWait → Detecting → Saving` and
//! stops at the first stage that says "no":
//!
//! 1. Pull a frame. A failed read skips the tick without touching the motion
//!    gate or the cooldown.
//! 2. Motion gate. No motion ends the tick (with a periodic heartbeat).
//! 3. Daily cap. Once exhausted, detection is skipped until the local day rolls over.
//! 4. Cooldown. Inside the window since the last save, detection is skipped.
//! 5. Detector. An empty result ends the tick with nothing written.
//! 6. Save. The primary (first) detection names the image and the log row.
//!
//! `run` repeats ticks with the source's pacing interval and observes the stop
//! flag only between ticks, so a capture or save is never interrupted.

use anyhow::Result;
use chrono::{DateTime, Local, NaiveDate};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::detect::{Detection, GuardedDetector};
use crate::frame::Frame;
use crate::ingest::{FrameOutcome, FrameSource};
use crate::motion::MotionGate;
use crate::storage::{DetectionEvent, DetectionLog, ImageStore};
use crate::throttle::Throttle;

pub const DEFAULT_COOLDOWN_SECS: f64 = 10.0;
/// Ticks between "still monitoring" heartbeats.
pub const DEFAULT_STATUS_INTERVAL: u64 = 100;
pub const DEFAULT_NOTICE_INTERVAL_SECS: f64 = 5.0;

/// Controller tuning.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureSettings {
    /// Minimum time between two saves.
    pub cooldown: Duration,
    /// Hard cap on images saved per local calendar day.
    pub max_images_per_day: Option<u32>,
    pub status_interval: u64,
    /// Minimum spacing of repeated cooldown / capture-failure notices.
    pub notice_interval: Duration,
    /// Passed to the detector on every call.
    pub min_confidence: f32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            cooldown: secs_to_duration(DEFAULT_COOLDOWN_SECS),
            max_images_per_day: None,
            status_interval: DEFAULT_STATUS_INTERVAL,
            notice_interval: secs_to_duration(DEFAULT_NOTICE_INTERVAL_SECS),
            min_confidence: crate::detect::DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

/// NaN and non-positive values map to zero, values too large for a
/// `Duration` saturate to `Duration::MAX`.
pub fn secs_to_duration(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}

/// Time source for cooldown (monotonic) and event timestamps (wall clock).
pub trait Clock {
    fn now(&self) -> Instant;
    fn local_now(&self) -> DateTime<Local>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn local_now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Manually advanced clock. Clones share the same time.
#[derive(Clone, Debug)]
pub struct ManualClock {
    inner: Rc<RefCell<(Instant, DateTime<Local>)>>,
}

impl ManualClock {
    pub fn new(wall: DateTime<Local>) -> Self {
        Self {
            inner: Rc::new(RefCell::new((Instant::now(), wall))),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut inner = self.inner.borrow_mut();
        inner.0 += by;
        inner.1 += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.inner.borrow().0
    }

    fn local_now(&self) -> DateTime<Local> {
        self.inner.borrow().1
    }
}

/// Stages of a tick, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CaptureState {
    Idle,
    MotionCheck,
    CooldownWait,
    Detecting,
    Saving,
}

/// What a single tick did.
#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    /// The source reported a transient failure.
    Skipped,
    EndOfStream,
    NoMotion,
    /// Daily cap exhausted; motion monitoring only.
    CapReached,
    InCooldown { remaining: Duration },
    /// Motion, but the detector found nothing qualifying.
    NothingDetected,
    /// Image written and logged.
    Saved(DetectionEvent),
    /// Image write failed; the event was logged with an empty image path.
    LoggedWithoutImage(DetectionEvent),
    /// Log write failed; the event was not recorded.
    PersistenceFailed(DetectionEvent),
}

impl TickOutcome {
    /// The furthest stage the tick reached.
    pub fn stage(&self) -> CaptureState {
        match self {
            TickOutcome::Skipped | TickOutcome::EndOfStream => CaptureState::Idle,
            TickOutcome::NoMotion => CaptureState::MotionCheck,
            TickOutcome::CapReached | TickOutcome::InCooldown { .. } => CaptureState::CooldownWait,
            TickOutcome::NothingDetected => CaptureState::Detecting,
            TickOutcome::Saved(_)
            | TickOutcome::LoggedWithoutImage(_)
            | TickOutcome::PersistenceFailed(_) => CaptureState::Saving,
        }
    }
}

/// Process-local counters, reported on shutdown.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_seen: u64,
    pub skipped_ticks: u64,
    pub motion_events: u64,
    pub detector_runs: u64,
    /// Images written and logged.
    pub saves: u64,
    pub cooldown_suppressed: u64,
    pub cap_suppressed: u64,
    pub persistence_failures: u64,
}

struct DailyQuota {
    limit: u32,
    day: NaiveDate,
    used: u32,
    announced: bool,
}

impl DailyQuota {
    fn new(limit: u32, today: NaiveDate) -> Self {
        Self {
            limit,
            day: today,
            used: 0,
            announced: false,
        }
    }

    fn roll(&mut self, today: NaiveDate) {
        if today != self.day {
            if self.used >= self.limit {
                log::info!(
                    "daily image cap window rolled over to {}, saving resumes",
                    today
                );
            }
            self.day = today;
            self.used = 0;
            self.announced = false;
        }
    }

    fn exhausted(&mut self, today: NaiveDate) -> bool {
        self.roll(today);
        self.used >= self.limit
    }

    fn record(&mut self, today: NaiveDate) {
        self.roll(today);
        self.used = self.used.saturating_add(1);
    }
}

/// The capture loop and all state it owns.
pub struct CaptureController {
    source: FrameSource,
    gate: Option<MotionGate>,
    detector: GuardedDetector,
    log: DetectionLog,
    images: ImageStore,
    settings: CaptureSettings,
    clock: Box<dyn Clock>,
    last_save: Option<Instant>,
    quota: Option<DailyQuota>,
    stats: CaptureStats,
    cooldown_notice: Throttle,
    failure_notice: Throttle,
    finished: bool,
}

impl CaptureController {
    /// `gate = None` disables motion gating: every frame counts as motion.
    pub fn new(
        source: FrameSource,
        gate: Option<MotionGate>,
        detector: GuardedDetector,
        log: DetectionLog,
        images: ImageStore,
        settings: CaptureSettings,
    ) -> Self {
        Self::with_clock(source, gate, detector, log, images, settings, Box::new(SystemClock))
    }

    pub fn with_clock(
        source: FrameSource,
        gate: Option<MotionGate>,
        detector: GuardedDetector,
        log: DetectionLog,
        images: ImageStore,
        settings: CaptureSettings,
        clock: Box<dyn Clock>,
    ) -> Self {
        let today = clock.local_now().date_naive();
        Self {
            quota: settings
                .max_images_per_day
                .map(|limit| DailyQuota::new(limit, today)),
            cooldown_notice: Throttle::new(settings.notice_interval),
            failure_notice: Throttle::new(settings.notice_interval),
            source,
            gate,
            detector,
            log,
            images,
            settings,
            clock,
            last_save: None,
            stats: CaptureStats::default(),
            finished: false,
        }
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    pub fn last_save(&self) -> Option<Instant> {
        self.last_save
    }

    /// Whether the motion gate holds a reference frame. `None` when gating is off.
    pub fn motion_primed(&self) -> Option<bool> {
        self.gate.as_ref().map(MotionGate::is_primed)
    }

    pub fn source(&self) -> &FrameSource {
        &self.source
    }

    /// Run one tick. Only fatal errors (malformed frames) are returned as `Err`.
    pub fn tick(&mut self) -> Result<TickOutcome> {
        let outcome = self.source.next_frame()?;
        // Sampled after the read, which may block for up to a frame.
        let now = self.clock.now();

        let frame = match outcome {
            FrameOutcome::Frame(frame) => frame,
            FrameOutcome::EndOfStream => return Ok(TickOutcome::EndOfStream),
            FrameOutcome::TransientFailure(reason) => {
                self.stats.skipped_ticks += 1;
                if let Some(suppressed) = self.failure_notice.check(now) {
                    log::warn!(
                        "failed to capture frame, skipping tick: {} ({} more suppressed)",
                        reason,
                        suppressed
                    );
                }
                return Ok(TickOutcome::Skipped);
            }
        };
        self.stats.frames_seen += 1;

        if let Some(gate) = self.gate.as_mut() {
            let reading = gate.evaluate(&frame);
            if !reading.has_motion {
                if self.stats.frames_seen % self.settings.status_interval == 0 {
                    log::info!(
                        "monitoring... (frames: {}, motion events: {}, saves: {})",
                        self.stats.frames_seen,
                        self.stats.motion_events,
                        self.stats.saves
                    );
                }
                return Ok(TickOutcome::NoMotion);
            }
            log::debug!("motion detected (ratio: {:.3})", reading.motion_ratio);
        }
        self.stats.motion_events += 1;

        let today = self.clock.local_now().date_naive();
        if let Some(quota) = self.quota.as_mut() {
            if quota.exhausted(today) {
                self.stats.cap_suppressed += 1;
                if !quota.announced {
                    quota.announced = true;
                    log::warn!(
                        "daily image cap of {} reached for {}; monitoring motion only",
                        quota.limit,
                        quota.day
                    );
                }
                return Ok(TickOutcome::CapReached);
            }
        }

        if let Some(last_save) = self.last_save {
            let elapsed = now.saturating_duration_since(last_save);
            if elapsed < self.settings.cooldown {
                let remaining = self.settings.cooldown - elapsed;
                self.stats.cooldown_suppressed += 1;
                if let Some(suppressed) = self.cooldown_notice.check(now) {
                    log::info!(
                        "in cooldown, skipping detection ({:.1}s remaining, {} more suppressed)",
                        remaining.as_secs_f64(),
                        suppressed
                    );
                }
                return Ok(TickOutcome::InCooldown { remaining });
            }
        }

        self.stats.detector_runs += 1;
        let detections = self
            .detector
            .detect(&frame, self.settings.min_confidence, now);
        let Some(primary) = detections.into_iter().next() else {
            log::debug!("motion but nothing detected");
            return Ok(TickOutcome::NothingDetected);
        };

        Ok(self.save(&frame, primary, now, today))
    }

    fn save(
        &mut self,
        frame: &Frame,
        primary: Detection,
        now: Instant,
        today: NaiveDate,
    ) -> TickOutcome {
        let at = self.clock.local_now();
        let image_path = match self.images.save(frame, &primary.label, at) {
            Ok(path) => Some(path),
            Err(err) => {
                self.stats.persistence_failures += 1;
                log::error!(
                    "failed to save image for {} (confidence {:.2}): {}",
                    primary.label,
                    primary.confidence,
                    err
                );
                None
            }
        };

        let event = DetectionEvent {
            timestamp: at,
            label: primary.label,
            confidence: primary.confidence,
            image_path,
        };

        if let Err(err) = self.log.append(&event) {
            self.stats.persistence_failures += 1;
            if let Some(path) = &event.image_path {
                if let Err(discard_err) = self.images.discard(path) {
                    log::error!("orphan image could not be removed: {}", discard_err);
                }
            }
            log::error!(
                "DETECTION NOT RECORDED: {} (confidence {:.2}) at {}, image {}: {}",
                event.label,
                event.confidence,
                event.timestamp.to_rfc3339(),
                event
                    .image_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "<none>".to_string()),
                err
            );
            return TickOutcome::PersistenceFailed(event);
        }

        self.last_save = Some(now);
        match &event.image_path {
            Some(path) => {
                self.stats.saves += 1;
                if let Some(quota) = self.quota.as_mut() {
                    quota.record(today);
                }
                log::info!(
                    "logged: {} (confidence: {:.2}) -> {}",
                    event.label,
                    event.confidence,
                    path.display()
                );
                TickOutcome::Saved(event)
            }
            None => {
                log::warn!(
                    "logged: {} (confidence: {:.2}) without image",
                    event.label,
                    event.confidence
                );
                TickOutcome::LoggedWithoutImage(event)
            }
        }
    }

    /// Tick until the source ends, a fatal error occurs, or `stop` is set.
    ///
    /// Resources are released on every exit path.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<CaptureStats> {
        log::info!(
            "capture loop running: source={} detector={} gating={} cooldown={:.1}s",
            self.source.name(),
            self.detector.name(),
            if self.gate.is_some() { "motion" } else { "off" },
            self.settings.cooldown.as_secs_f64()
        );

        let result = loop {
            match self.tick() {
                Ok(TickOutcome::EndOfStream) => {
                    log::info!("frame source ended");
                    break Ok(());
                }
                Ok(_) => {}
                Err(err) => break Err(err),
            }
            self.source.sleep_between_frames();
            if stop.load(Ordering::SeqCst) {
                log::info!("stop requested, shutting down");
                break Ok(());
            }
        };

        self.finish();
        result.map(|()| self.stats.clone())
    }

    /// Release the camera, close the log and report counters. Idempotent.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.source.close();
        if let Err(err) = self.log.close() {
            log::error!("failed to finalize detection log: {}", err);
        }
        let s = &self.stats;
        log::info!(
            "total frames: {}, skipped: {}, motion events: {}, detector runs: {}, saves: {}, \
             cooldown skips: {}, cap skips: {}, persistence failures: {}",
            s.frames_seen,
            s.skipped_ticks,
            s.motion_events,
            s.detector_runs,
            s.saves,
            s.cooldown_suppressed,
            s.cap_suppressed,
            s.persistence_failures
        );
        log::info!("detection log saved to: {}", self.log.path().display());
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.finish();
    }
}
