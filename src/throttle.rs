//! Rate-limited notices.
//!
//! A `Throttle` answers "may I emit this notice now?" and counts how many
//! notices were swallowed since the last one, so the next emitted line can
//! report the suppressed total.

use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
    suppressed: u64,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
            suppressed: 0,
        }
    }

    /// Returns `Some(suppressed)` when a notice may be emitted at `now`.
    pub fn check(&mut self, now: Instant) -> Option<u64> {
        let ready = match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if ready {
            self.last = Some(now);
            Some(std::mem::take(&mut self.suppressed))
        } else {
            self.suppressed += 1;
            None
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_notice_passes_then_throttles() {
        let start = Instant::now();
        let mut throttle = Throttle::new(Duration::from_secs(5));
        assert_eq!(throttle.check(start), Some(0));
        assert_eq!(throttle.check(start + Duration::from_secs(1)), None);
        assert_eq!(throttle.check(start + Duration::from_secs(4)), None);
        assert_eq!(throttle.check(start + Duration::from_secs(5)), Some(2));
        assert_eq!(throttle.check(start + Duration::from_secs(6)), None);
    }

    #[test]
    fn zero_interval_never_throttles() {
        let start = Instant::now();
        let mut throttle = Throttle::new(Duration::ZERO);
        for _ in 0..3 {
            assert_eq!(throttle.check(start), Some(0));
        }
    }
}
