//! Wall-clock abstraction shared by every coordination loop.
//!
//! All persisted timestamps and deadline math go through [`Clock`] so tests
//! can drive the whole crate from tokio's paused time source instead of
//! sleeping for real.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

/// Source of "now" for timestamps written to the session document and for
/// deadline arithmetic.
pub trait Clock: Send + Sync + 'static {
    /// Milliseconds elapsed since the UNIX epoch.
    fn now_ms(&self) -> u64;

    /// Translate an absolute epoch-ms deadline into a tokio [`Instant`]
    /// usable with `sleep_until`. Deadlines already in the past resolve to
    /// the current instant.
    fn deadline(&self, at_ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(at_ms.saturating_sub(self.now_ms()))
    }
}

/// Production clock backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Deterministic clock for tests and simulations: a fixed epoch origin plus
/// the tokio time elapsed since construction. Under
/// `#[tokio::test(start_paused = true)]` it advances in lockstep with the
/// timers under test.
#[derive(Debug, Clone)]
pub struct SimClock {
    origin_ms: u64,
    started: Instant,
}

impl SimClock {
    /// Create a simulated clock that reports `origin_ms` as the current time.
    pub fn at(origin_ms: u64) -> Self {
        Self {
            origin_ms,
            started: Instant::now(),
        }
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.origin_ms + self.started.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_reports_a_recent_epoch() {
        // 2020-01-01 in epoch ms; anything earlier means the clock is broken.
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }

    #[tokio::test(start_paused = true)]
    async fn sim_clock_tracks_paused_tokio_time() {
        let clock = SimClock::at(1_000_000);
        assert_eq!(clock.now_ms(), 1_000_000);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(clock.now_ms(), 1_005_000);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_maps_past_timestamps_to_now() {
        let clock = SimClock::at(10_000);
        let at = clock.deadline(4_000);
        assert!(at <= Instant::now());

        let ahead = clock.deadline(12_500);
        assert_eq!(ahead - Instant::now(), Duration::from_millis(2_500));
    }
}
