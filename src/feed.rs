//! # Real-Time Feed Contract
//!
//! The arrival selector never talks to the network directly. It consumes
//! [`Trip`]s produced by a [`FeedClient`], which keeps the core logic testable
//! with hand-built trips and lets the GTFS-realtime client in
//! [`crate::gtfs_rt`] be swapped out.
//!
//! ## Retry Strategy
//! Feed fetches are retried with capped exponential backoff (2s, 4s, 8s with the
//! default [`RetryPolicy`]). Once the attempts are exhausted the error is handed
//! back to the caller, which shows "No trains" and tries again on the next
//! rotation instead of stopping.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::{io, path::PathBuf, time::Duration};
use thiserror::Error;
use tracing::warn;

/// Errors that can occur while fetching or decoding transit data.
#[derive(Error, Debug)]
pub enum FeedError {
    /// HTTP request failed (network, TLS, timeout)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Feed endpoint answered with a non-success status
    #[error("feed returned HTTP {0}")]
    Status(u16),

    /// Protobuf payload could not be decoded
    #[error("feed decode failed: {0}")]
    Decode(#[from] prost::DecodeError),

    /// GTFS static CSV was malformed
    #[error("static GTFS parse failed: {0}")]
    Csv(#[from] csv::Error),

    /// GTFS static file could not be read
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Arrival time as reported by a feed.
///
/// GTFS-realtime always reports POSIX seconds, but other sources hand out wall
/// clock times without an offset. Those are localized to the configured
/// timezone instead of being rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timestamp {
    Zoned(DateTime<Utc>),
    Naive(NaiveDateTime),
}

impl Timestamp {
    /// Build a zoned timestamp from POSIX seconds.
    pub fn from_unix(secs: i64) -> Option<Self> {
        DateTime::from_timestamp(secs, 0).map(Timestamp::Zoned)
    }

    /// Express the timestamp in `tz`, localizing naive values.
    ///
    /// Ambiguous local times (the repeated hour when clocks fall back) resolve
    /// to the earlier instant; nonexistent ones (spring forward gap) yield
    /// `None`.
    pub fn localize(&self, tz: Tz) -> Option<DateTime<Tz>> {
        match self {
            Timestamp::Zoned(at) => Some(at.with_timezone(&tz)),
            Timestamp::Naive(naive) => tz.from_local_datetime(naive).earliest(),
        }
    }
}

/// One predicted call of a trip at a stop.
#[derive(Clone, Debug, PartialEq)]
pub struct StopTimeUpdate {
    pub stop_id: String,
    pub arrival: Timestamp,
}

/// A trip that calls at one or more of the watched stops.
#[derive(Clone, Debug, PartialEq)]
pub struct Trip {
    pub trip_id: String,
    pub route_id: String,
    pub headsign_text: String,
    pub stop_time_updates: Vec<StopTimeUpdate>,
}

/// Source of real-time trips.
#[allow(async_fn_in_trait)]
pub trait FeedClient {
    /// Return the trips that are headed for any of `stop_ids`.
    async fn filter_trips(&self, stop_ids: &[String]) -> Result<Vec<Trip>, FeedError>;
}

/// Bounded retry with capped exponential backoff.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub attempts: u32,
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the `failed_attempt`-th failure (1-based).
    ///
    /// ```
    /// use std::time::Duration;
    /// use subway_clock_lib::feed::RetryPolicy;
    ///
    /// let policy = RetryPolicy::default();
    /// assert_eq!(policy.backoff(1), Duration::from_secs(2));
    /// assert_eq!(policy.backoff(3), Duration::from_secs(8));
    /// assert_eq!(policy.backoff(9), Duration::from_secs(8));
    /// ```
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }
}

/// Fetch trips, retrying transient failures according to `policy`.
///
/// Returns the last error once all attempts are used up.
pub async fn fetch_with_retry<F: FeedClient>(
    client: &F,
    stop_ids: &[String],
    policy: &RetryPolicy,
) -> Result<Vec<Trip>, FeedError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match client.filter_trips(stop_ids).await {
            Ok(trips) => return Ok(trips),
            Err(error) if attempt < attempts => {
                let delay = policy.backoff(attempt);
                warn!(attempt, attempts, ?delay, %error, "feed fetch failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                warn!(attempts, %error, "feed fetch failed, giving up for this rotation");
                return Err(error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::cell::Cell;

    /// Feed that fails a fixed number of times before succeeding.
    struct FlakyFeed {
        failures: Cell<u32>,
        calls: Cell<u32>,
    }

    impl FeedClient for FlakyFeed {
        async fn filter_trips(&self, _stop_ids: &[String]) -> Result<Vec<Trip>, FeedError> {
            self.calls.set(self.calls.get() + 1);
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(FeedError::Status(503));
            }
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=5).map(|n| policy.backoff(n).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 8, 8]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_after_transient_failures() {
        let feed = FlakyFeed {
            failures: Cell::new(2),
            calls: Cell::new(0),
        };
        let started = tokio::time::Instant::now();

        let result = fetch_with_retry(&feed, &[], &RetryPolicy::default()).await;

        assert!(result.is_ok());
        assert_eq!(feed.calls.get(), 3);
        // Slept 2s then 4s between the three attempts
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(6) && elapsed < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_bounded_attempts() {
        let feed = FlakyFeed {
            failures: Cell::new(100),
            calls: Cell::new(0),
        };
        let started = tokio::time::Instant::now();

        let result = fetch_with_retry(&feed, &[], &RetryPolicy::default()).await;

        assert!(matches!(result, Err(FeedError::Status(503))));
        assert_eq!(feed.calls.get(), 4);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(14) && elapsed < Duration::from_secs(15));
    }

    #[test]
    fn test_naive_timestamp_is_localized() {
        let naive = NaiveDate::from_ymd_opt(2025, 1, 16)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap();
        let local = Timestamp::Naive(naive)
            .localize(chrono_tz::America::New_York)
            .unwrap();
        // EST is UTC-5 in January
        assert_eq!(local.with_timezone(&Utc).format("%H:%M").to_string(), "19:30");
    }

    #[test]
    fn test_unix_timestamp_keeps_instant() {
        let ts = Timestamp::from_unix(1_700_000_000).unwrap();
        let local = ts.localize(chrono_tz::America::New_York).unwrap();
        assert_eq!(local.timestamp(), 1_700_000_000);
    }
}
