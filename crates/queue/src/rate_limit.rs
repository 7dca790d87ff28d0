//! Shared send-rate limiter.
//!
//! Counters live in Redis so every dispatcher across every instance draws
//! from the same per-second and per-day allowance. Reservation is
//! increment-then-check: we bump both windows by the requested amount,
//! compute what the ceilings actually permit, and hand the unused portion
//! back. Over-counting in the race window errs toward sending less than the
//! ceiling, never more.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fanwave_common::config::DeliveryConfig;
use fanwave_common::{AppError, AppResult};
use fred::clients::Client as RedisClient;
use fred::interfaces::KeysInterface;
use tracing::debug;

/// Per-second counters only need to survive their own second.
const SECOND_WINDOW_TTL_SECS: i64 = 2;

/// Per-day counters expire shortly after the UTC day ends.
const DAY_WINDOW_TTL_SECS: i64 = 90_000;

/// Which ceiling refused the reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LimitWindow {
    Second,
    Day,
}

/// Outcome of one reservation request.
#[derive(Debug, Clone)]
pub struct Reservation {
    /// How many sends were granted (may be less than requested, down to 0).
    pub allowed: u32,
    /// How long to wait before asking again, when not fully granted.
    pub retry_after: Option<Duration>,
}

impl Reservation {
    /// Whether the full requested amount was granted.
    #[must_use]
    pub const fn is_full(&self, requested: u32) -> bool {
        self.allowed >= requested
    }
}

/// Redis-backed send-rate limiter shared by all dispatchers.
#[derive(Clone)]
pub struct SendRateLimiter {
    redis: Arc<RedisClient>,
    prefix: String,
    per_second: u32,
    per_day: u32,
}

impl SendRateLimiter {
    /// Create a limiter from delivery configuration.
    #[must_use]
    pub fn new(redis: Arc<RedisClient>, prefix: &str, config: &DeliveryConfig) -> Self {
        Self {
            redis,
            prefix: format!("{prefix}:rate"),
            per_second: config.sends_per_second,
            per_day: config.sends_per_day,
        }
    }

    fn second_key(&self, now: DateTime<Utc>) -> String {
        format!("{}:sec:{}", self.prefix, now.timestamp())
    }

    fn day_key(&self, now: DateTime<Utc>) -> String {
        format!("{}:day:{}", self.prefix, now.format("%Y%m%d"))
    }

    /// Reserve up to `requested` sends against both windows.
    ///
    /// Fails closed: a Redis error grants nothing.
    pub async fn reserve(&self, requested: u32) -> AppResult<Reservation> {
        if requested == 0 {
            return Ok(Reservation {
                allowed: 0,
                retry_after: None,
            });
        }

        let now = Utc::now();
        let second_key = self.second_key(now);
        let day_key = self.day_key(now);

        let second_total: i64 = self
            .redis
            .incr_by(&second_key, i64::from(requested))
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        self.redis
            .expire::<(), _>(&second_key, SECOND_WINDOW_TTL_SECS, None)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;

        let day_total: i64 = self
            .redis
            .incr_by(&day_key, i64::from(requested))
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        self.redis
            .expire::<(), _>(&day_key, DAY_WINDOW_TTL_SECS, None)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;

        let (allowed, limited_by) = grant(
            requested,
            second_total,
            day_total,
            self.per_second,
            self.per_day,
        );

        // Hand back the part of the increment the ceilings refused.
        let give_back = i64::from(requested - allowed);
        if give_back > 0 {
            self.redis
                .decr_by::<i64, _>(&second_key, give_back)
                .await
                .map_err(|e| AppError::Redis(e.to_string()))?;
            self.redis
                .decr_by::<i64, _>(&day_key, give_back)
                .await
                .map_err(|e| AppError::Redis(e.to_string()))?;
        }

        let retry_after = limited_by.map(|window| match window {
            LimitWindow::Second => until_next_second(now),
            LimitWindow::Day => until_next_utc_day(now),
        });

        if allowed < requested {
            debug!(
                requested = requested,
                allowed = allowed,
                "Send rate ceiling reached"
            );
        }

        Ok(Reservation {
            allowed,
            retry_after,
        })
    }
}

/// Pure allowance computation over post-increment window totals.
///
/// `second_total` and `day_total` are the counter values after this request
/// added `requested` to each.
fn grant(
    requested: u32,
    second_total: i64,
    day_total: i64,
    per_second: u32,
    per_day: u32,
) -> (u32, Option<LimitWindow>) {
    let headroom = |total: i64, ceiling: u32| -> u32 {
        let prior = (total - i64::from(requested)).max(0);
        u32::try_from(i64::from(ceiling).saturating_sub(prior))
            .unwrap_or(0)
            .min(requested)
    };

    let second_headroom = headroom(second_total, per_second);
    let day_headroom = headroom(day_total, per_day);
    let allowed = second_headroom.min(day_headroom);

    if allowed >= requested {
        (allowed, None)
    } else if day_headroom < second_headroom {
        (allowed, Some(LimitWindow::Day))
    } else {
        (allowed, Some(LimitWindow::Second))
    }
}

/// Time until the next second boundary.
fn until_next_second(now: DateTime<Utc>) -> Duration {
    let elapsed_ms = u64::from(now.timestamp_subsec_millis().min(999));
    Duration::from_millis(1000 - elapsed_ms)
}

/// Time until the next UTC midnight.
fn until_next_utc_day(now: DateTime<Utc>) -> Duration {
    now.date_naive()
        .checked_add_days(chrono::Days::new(1))
        .map(|day| day.and_time(chrono::NaiveTime::MIN).and_utc())
        .and_then(|midnight| (midnight - now).to_std().ok())
        .unwrap_or(Duration::from_secs(86_400))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_grant_full_when_under_both_ceilings() {
        // 5 requested, totals after increment: 5 this second, 100 today.
        let (allowed, limited) = grant(5, 5, 100, 10, 50_000);
        assert_eq!(allowed, 5);
        assert!(limited.is_none());
    }

    #[test]
    fn test_grant_partial_against_second_ceiling() {
        // 8 already sent this second, 5 more requested, ceiling 10.
        let (allowed, limited) = grant(5, 13, 100, 10, 50_000);
        assert_eq!(allowed, 2);
        assert_eq!(limited, Some(LimitWindow::Second));
    }

    #[test]
    fn test_grant_zero_when_second_exhausted() {
        let (allowed, limited) = grant(5, 15, 100, 10, 50_000);
        assert_eq!(allowed, 0);
        assert_eq!(limited, Some(LimitWindow::Second));
    }

    #[test]
    fn test_grant_day_ceiling_wins_when_tighter() {
        // Day ceiling has 1 slot left, second ceiling has 10.
        let (allowed, limited) = grant(5, 5, 50_000, 10, 49_996);
        assert_eq!(allowed, 1);
        assert_eq!(limited, Some(LimitWindow::Day));
    }

    #[test]
    fn test_reservation_fullness() {
        let full = Reservation {
            allowed: 3,
            retry_after: None,
        };
        assert!(full.is_full(3));

        let partial = Reservation {
            allowed: 1,
            retry_after: Some(Duration::from_secs(1)),
        };
        assert!(!partial.is_full(3));
        assert!(partial.is_full(1));
    }

    #[test]
    fn test_until_next_second_is_positive_and_bounded() {
        let now = Utc.with_ymd_and_hms(2026, 8, 27, 12, 0, 0).unwrap()
            + chrono::TimeDelta::milliseconds(250);
        assert_eq!(until_next_second(now), Duration::from_millis(750));
    }

    #[test]
    fn test_until_next_utc_day() {
        let now = Utc.with_ymd_and_hms(2026, 8, 27, 23, 0, 0).unwrap();
        assert_eq!(until_next_utc_day(now), Duration::from_secs(3600));
    }
}
