//! Timing and policy knobs for the coordination loops.
//!
//! Defaults match the production cadence; tests shrink them to keep paused
//! tokio time fast to drive.

use std::time::Duration;

use crate::error::{SyncError, SyncResult};

/// Cadence of the local participant's heartbeat writes.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// A peer with no heartbeat newer than this is classified offline.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(15);
/// How often a follower re-reads the store while waiting for the leader to
/// create the session document.
pub const DEFAULT_CREATE_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// How long a follower waits for the session document before promoting
/// itself and creating the document on the leader's behalf.
pub const DEFAULT_PROMOTE_AFTER: Duration = Duration::from_secs(15);
/// Upper bound on one scoring call before the fallback score applies.
pub const DEFAULT_SCORE_TIMEOUT: Duration = Duration::from_secs(10);
/// Attempts for a session write before the error is surfaced, first try
/// included.
pub const DEFAULT_WRITE_ATTEMPTS: u32 = 3;
/// Base delay between write retries; doubles per attempt.
pub const DEFAULT_WRITE_RETRY_DELAY: Duration = Duration::from_millis(250);
/// Ceiling for the doubling retry delay.
pub const MAX_WRITE_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Earliest synthetic submit time, as a fraction of the phase window.
pub const DEFAULT_SYNTHETIC_EARLIEST: f64 = 0.5;
/// Latest synthetic submit time, as a fraction of the phase window.
pub const DEFAULT_SYNTHETIC_LATEST: f64 = 0.95;
/// Grace a client that did not write the synthetic schedule waits before
/// firing an entry on the scheduler's behalf.
pub const DEFAULT_TAKEOVER_GRACE: Duration = Duration::from_secs(3);
/// A session still not terminal this long after creation is abandoned.
pub const DEFAULT_ABANDON_AFTER: Duration = Duration::from_secs(30 * 60);
/// Buffered capacity of the local match event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Tunable policy shared by every component of one session handle.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Cadence of heartbeat writes for the local participant.
    pub heartbeat_interval: Duration,
    /// Staleness horizon for peer heartbeats.
    pub stale_after: Duration,
    /// Poll cadence while waiting for the leader's create.
    pub create_poll_interval: Duration,
    /// Follower patience before self-promotion.
    pub promote_after: Duration,
    /// Per-call budget for the external scorer.
    pub score_timeout: Duration,
    /// Write attempts before a transient store failure is surfaced.
    pub write_attempts: u32,
    /// Base delay between write retries.
    pub write_retry_delay: Duration,
    /// Lower bound of the synthetic submit window, fraction of the phase.
    pub synthetic_earliest: f64,
    /// Upper bound of the synthetic submit window, fraction of the phase.
    pub synthetic_latest: f64,
    /// Delay non-scheduling clients add before firing a due synthetic entry.
    pub takeover_grace: Duration,
    /// Ceiling after which a non-terminal session is marked abandoned.
    pub abandon_after: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            stale_after: DEFAULT_STALE_AFTER,
            create_poll_interval: DEFAULT_CREATE_POLL_INTERVAL,
            promote_after: DEFAULT_PROMOTE_AFTER,
            score_timeout: DEFAULT_SCORE_TIMEOUT,
            write_attempts: DEFAULT_WRITE_ATTEMPTS,
            write_retry_delay: DEFAULT_WRITE_RETRY_DELAY,
            synthetic_earliest: DEFAULT_SYNTHETIC_EARLIEST,
            synthetic_latest: DEFAULT_SYNTHETIC_LATEST,
            takeover_grace: DEFAULT_TAKEOVER_GRACE,
            abandon_after: DEFAULT_ABANDON_AFTER,
        }
    }
}

impl SyncConfig {
    /// Check cross-field invariants before the config is put to work.
    pub fn validate(&self) -> SyncResult<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(SyncError::InvalidConfig(
                "heartbeat interval must be non-zero".into(),
            ));
        }
        if self.stale_after < self.heartbeat_interval {
            return Err(SyncError::InvalidConfig(
                "staleness horizon must cover at least one heartbeat interval".into(),
            ));
        }
        if self.create_poll_interval.is_zero() {
            return Err(SyncError::InvalidConfig(
                "create poll interval must be non-zero".into(),
            ));
        }
        if self.write_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "at least one write attempt is required".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.synthetic_earliest)
            || !(0.0..=1.0).contains(&self.synthetic_latest)
            || self.synthetic_earliest > self.synthetic_latest
        {
            return Err(SyncError::InvalidConfig(
                "synthetic submit fractions must satisfy 0 <= earliest <= latest <= 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SyncConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_synthetic_window() {
        let config = SyncConfig {
            synthetic_earliest: 0.9,
            synthetic_latest: 0.4,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_staleness_below_heartbeat() {
        let config = SyncConfig {
            heartbeat_interval: Duration::from_secs(10),
            stale_after: Duration::from_secs(5),
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_write_attempts() {
        let config = SyncConfig {
            write_attempts: 0,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
