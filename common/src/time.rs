//! Time utilities and constants for RateFeed.

use chrono::{DateTime, Duration, Timelike, Utc};

/// Timing constants.
pub mod constants {
    use super::Duration;

    /// How long a scraped official rate pair is served without I/O (5 minutes).
    pub fn official_rate_ttl() -> Duration {
        Duration::minutes(5)
    }

    /// Default TTL for the tiered rate-list cache (300 seconds).
    pub fn default_cache_ttl() -> Duration {
        Duration::seconds(300)
    }

    /// External scheduler cadence (15 minutes).
    pub fn tick_interval() -> Duration {
        Duration::minutes(15)
    }

    /// Budget for a single origin request (10 seconds).
    pub fn request_timeout() -> Duration {
        Duration::seconds(10)
    }
}

/// Fixed local offset applied by the scheduler (UTC-4).
pub const DEFAULT_LOCAL_OFFSET_HOURS: i32 = -4;

/// A timestamp with timezone (always UTC inside RateFeed).
pub type Timestamp = DateTime<Utc>;

/// Check if a timestamp has passed relative to `at`.
pub fn is_expired_at(expiry: Timestamp, at: Timestamp) -> bool {
    at >= expiry
}

/// Age of `timestamp` as seen from `at`.
pub fn age_at(timestamp: Timestamp, at: Timestamp) -> Duration {
    at.signed_duration_since(timestamp)
}

/// Shift a UTC hour by a fixed offset, wrapping into `0..24`.
pub fn local_hour(utc_hour: u32, offset_hours: i32) -> u32 {
    (utc_hour as i32 + offset_hours).rem_euclid(24) as u32
}

/// Local hour and minute of a UTC timestamp under a fixed offset.
pub fn local_clock(at: Timestamp, offset_hours: i32) -> (u32, u32) {
    (local_hour(at.hour(), offset_hours), at.minute())
}

/// Duration extensions for convenient conversion.
pub trait DurationExt {
    fn as_std(&self) -> std::time::Duration;
}

impl DurationExt for Duration {
    fn as_std(&self) -> std::time::Duration {
        self.to_std().unwrap_or(std::time::Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_local_hour_wraps() {
        assert_eq!(local_hour(13, -4), 9);
        assert_eq!(local_hour(2, -4), 22);
        assert_eq!(local_hour(23, 3), 2);
        assert_eq!(local_hour(0, 0), 0);
    }

    #[test]
    fn test_local_clock() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 3, 30, 0).unwrap();
        assert_eq!(local_clock(at, -4), (23, 30));
    }

    #[test]
    fn test_is_expired_at() {
        let t = Utc::now();
        assert!(is_expired_at(t, t));
        assert!(!is_expired_at(t + Duration::seconds(1), t));
        assert_eq!(age_at(t - Duration::seconds(10), t), Duration::seconds(10));
    }

    #[test]
    fn test_negative_duration_converts_to_zero() {
        assert_eq!(Duration::seconds(-5).as_std(), std::time::Duration::ZERO);
        assert_eq!(
            constants::request_timeout().as_std(),
            std::time::Duration::from_secs(10)
        );
    }
}
