use std::time::{Duration, Instant};

use crate::capture::{secs_to_duration, DEFAULT_NOTICE_INTERVAL_SECS};
use crate::detect::backend::ObjectDetector;
use crate::detect::result::Detection;
use crate::frame::Frame;
use crate::throttle::Throttle;

/// Wraps a detector so the capture loop only ever sees a clean result list.
///
/// - Backend errors become an empty result plus a throttled warning
/// - Non-finite or out-of-range confidences are dropped
/// - Entries below `min_confidence` are dropped
/// - With an allowlist, other labels are dropped
///
/// Order of the surviving entries is the backend's order.
pub struct GuardedDetector {
    inner: Box<dyn ObjectDetector>,
    labels: Option<Vec<String>>,
    warnings: Throttle,
    failures: u64,
}

impl GuardedDetector {
    pub fn new(inner: Box<dyn ObjectDetector>, labels: Option<Vec<String>>) -> Self {
        Self {
            inner,
            labels: labels.map(|labels| labels.into_iter().map(|l| l.to_lowercase()).collect()),
            warnings: Throttle::new(secs_to_duration(DEFAULT_NOTICE_INTERVAL_SECS)),
            failures: 0,
        }
    }

    pub fn with_warning_interval(mut self, interval: Duration) -> Self {
        self.warnings = Throttle::new(interval);
        self
    }

    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    pub fn warning_interval(&self) -> Duration {
        self.warnings.interval()
    }

    /// Number of backend calls that failed.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn detect(&mut self, frame: &Frame, min_confidence: f32, now: Instant) -> Vec<Detection> {
        let detections = match self.inner.detect(frame, min_confidence) {
            Ok(detections) => detections,
            Err(err) => {
                self.failures += 1;
                if let Some(suppressed) = self.warnings.check(now) {
                    log::warn!(
                        "detector {} failed: {:#} ({} similar failures suppressed)",
                        self.inner.name(),
                        err,
                        suppressed
                    );
                }
                return Vec::new();
            }
        };

        detections
            .into_iter()
            .filter(|d| d.has_valid_confidence() && d.confidence >= min_confidence)
            .filter(|d| self.allows(&d.label))
            .collect()
    }

    fn allows(&self, label: &str) -> bool {
        match &self.labels {
            Some(labels) => labels.iter().any(|allowed| allowed.eq_ignore_ascii_case(label)),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};

    struct Canned(Result<Vec<Detection>, String>);

    impl ObjectDetector for Canned {
        fn name(&self) -> &'static str {
            "canned"
        }

        fn detect(&mut self, _frame: &Frame, _min_confidence: f32) -> Result<Vec<Detection>> {
            self.0.clone().map_err(|msg| anyhow!(msg))
        }
    }

    fn frame() -> Frame {
        Frame::filled(4, 4, [0, 0, 0]).unwrap()
    }

    #[test]
    fn errors_become_empty_results() {
        let mut guard = GuardedDetector::new(Box::new(Canned(Err("model crashed".into()))), None);
        let now = Instant::now();
        assert!(guard.detect(&frame(), 0.5, now).is_empty());
        assert!(guard.detect(&frame(), 0.5, now).is_empty());
        assert_eq!(guard.failures(), 2);
    }

    #[test]
    fn filters_preserve_backend_order() {
        let canned = Canned(Ok(vec![
            Detection::new("branch", 0.3),
            Detection::new("bird", 0.8),
            Detection::new("glitch", f32::NAN),
            Detection::new("cat", 0.9),
            Detection::new("overflow", 1.7),
        ]));
        let mut guard = GuardedDetector::new(Box::new(canned), None);
        let result = guard.detect(&frame(), 0.5, Instant::now());
        assert_eq!(
            result,
            vec![Detection::new("bird", 0.8), Detection::new("cat", 0.9)]
        );
    }

    #[test]
    fn allowlist_is_case_insensitive() {
        let canned = Canned(Ok(vec![
            Detection::new("cat", 0.9),
            Detection::new("Bird", 0.7),
        ]));
        let mut guard = GuardedDetector::new(Box::new(canned), Some(vec!["BIRD".into()]));
        let result = guard.detect(&frame(), 0.25, Instant::now());
        assert_eq!(result, vec![Detection::new("Bird", 0.7)]);
    }

    #[test]
    fn warning_interval_defaults_to_notice_interval() {
        let guard = GuardedDetector::new(Box::new(Canned(Ok(Vec::new()))), None);
        assert_eq!(guard.warning_interval(), Duration::from_secs(5));
        let guard = guard.with_warning_interval(Duration::from_secs(1));
        assert_eq!(guard.warning_interval(), Duration::from_secs(1));
    }
}
