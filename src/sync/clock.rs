// ABOUTME: Monotonic clock shared by sessions and the playout pull
// ABOUTME: Provides microsecond timestamps from a per-instance epoch

use std::time::{Duration, Instant};

/// Monotonic clock for protocol timestamps
///
/// Every timestamp that goes on the wire or into a regression tracker is
/// taken from one of these. Values are microseconds since the clock was
/// created, so two peers never share an epoch and the time regression has to
/// learn the offset between them.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    /// Create a new clock starting now
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Current time in microseconds
    #[inline]
    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    /// Current time in microseconds as a float, for regression inputs
    #[inline]
    pub fn now_us_f64(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1e6
    }

    /// Convert a clock timestamp back into an `Instant`
    pub fn instant_at(&self, micros: u64) -> Instant {
        self.start + Duration::from_micros(micros)
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_clock_monotonic() {
        let clock = MonotonicClock::new();
        let t1 = clock.now_us();
        sleep(Duration::from_millis(10));
        let t2 = clock.now_us();

        assert!(t2 > t1, "Clock should be monotonically increasing");
        assert!(t2 - t1 >= 10_000, "At least 10ms should have passed");
    }

    #[test]
    fn test_instant_round_trip() {
        let clock = MonotonicClock::new();
        let at = clock.instant_at(1_500);
        assert_eq!(at.duration_since(clock.start), Duration::from_micros(1_500));
    }
}
