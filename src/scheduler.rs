//! # Day/Night Power Schedule
//!
//! The panel only needs to be lit while people are awake. By default it turns
//! on at local sunrise and off at 22:00. Either edge can be `sunrise`,
//! `sunset` or a fixed local `HH:MM`.
//!
//! Sunrise and sunset come from the free sunrise-sunset.org API, looked up
//! once per local date. A failed lookup never stops the appliance: the last
//! known times are reused, and with none the display simply stays on until a
//! retry succeeds.

use chrono::{DateTime, NaiveDate, NaiveTime};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default sunrise-sunset.org endpoint.
pub const SUNRISE_SUNSET_URL: &str = "https://api.sunrise-sunset.org/json";

/// Errors from sunrise/sunset lookups.
#[derive(Error, Debug)]
pub enum SunTimesError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("sun times API returned HTTP {0}")]
    Status(u16),

    #[error("sun times API status: {0}")]
    Api(String),

    #[error("cannot parse sun time {value:?}: {source}")]
    Parse {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Local sunrise and sunset for one date.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SunTimes {
    pub sunrise: NaiveTime,
    pub sunset: NaiveTime,
}

/// Source of sunrise/sunset times.
#[allow(async_fn_in_trait)]
pub trait SunTimesProvider {
    async fn lookup(
        &self,
        latitude: f64,
        longitude: f64,
        date: NaiveDate,
    ) -> Result<SunTimes, SunTimesError>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    results: Option<ApiResults>,
}

#[derive(Debug, Deserialize)]
struct ApiResults {
    sunrise: String,
    sunset: String,
}

/// sunrise-sunset.org client. Times arrive in UTC (`formatted=0`) and are
/// converted to the configured timezone.
pub struct SunriseSunsetClient {
    client: reqwest::Client,
    base_url: String,
    tz: Tz,
}

impl SunriseSunsetClient {
    pub fn new(client: reqwest::Client, tz: Tz) -> Self {
        Self::with_base_url(client, SUNRISE_SUNSET_URL, tz)
    }

    pub fn with_base_url(client: reqwest::Client, base_url: impl Into<String>, tz: Tz) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            tz,
        }
    }
}

impl SunTimesProvider for SunriseSunsetClient {
    async fn lookup(
        &self,
        latitude: f64,
        longitude: f64,
        date: NaiveDate,
    ) -> Result<SunTimes, SunTimesError> {
        let url = format!(
            "{}?lat={latitude}&lng={longitude}&formatted=0&date={date}",
            self.base_url
        );
        debug!(%url, "requesting sun times");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(SunTimesError::Status(response.status().as_u16()));
        }
        let body: ApiResponse = response.json().await?;
        parse_sun_times(body, self.tz)
    }
}

fn parse_sun_times(body: ApiResponse, tz: Tz) -> Result<SunTimes, SunTimesError> {
    let results = match (body.status.as_str(), body.results) {
        ("OK", Some(results)) => results,
        (status, _) => return Err(SunTimesError::Api(status.to_string())),
    };
    let local = |value: String| {
        DateTime::parse_from_rfc3339(&value)
            .map(|at| at.with_timezone(&tz).time())
            .map_err(|source| SunTimesError::Parse { value, source })
    };
    Ok(SunTimes {
        sunrise: local(results.sunrise)?,
        sunset: local(results.sunset)?,
    })
}

/// One edge of the on-window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Boundary {
    Sunrise,
    Sunset,
    Fixed(NaiveTime),
}

impl Boundary {
    fn needs_sun(&self) -> bool {
        !matches!(self, Boundary::Fixed(_))
    }

    /// Local time of this edge, if it can be known.
    pub fn resolve(&self, sun: Option<&SunTimes>) -> Option<NaiveTime> {
        match self {
            Boundary::Sunrise => sun.map(|s| s.sunrise),
            Boundary::Sunset => sun.map(|s| s.sunset),
            Boundary::Fixed(at) => Some(*at),
        }
    }
}

impl FromStr for Boundary {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sunrise" => Ok(Boundary::Sunrise),
            "sunset" => Ok(Boundary::Sunset),
            other => NaiveTime::parse_from_str(other, "%H:%M")
                .map(Boundary::Fixed)
                .map_err(|_| format!("expected sunrise, sunset or HH:MM, got {s:?}")),
        }
    }
}

impl TryFrom<String> for Boundary {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Boundary> for String {
    fn from(boundary: Boundary) -> Self {
        boundary.to_string()
    }
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Boundary::Sunrise => f.write_str("sunrise"),
            Boundary::Sunset => f.write_str("sunset"),
            Boundary::Fixed(at) => write!(f, "{}", at.format("%H:%M")),
        }
    }
}

/// Whether `t` lies in `[start, end]`, where the window may cross midnight.
///
/// ```
/// use chrono::NaiveTime;
/// use subway_clock_lib::scheduler::is_time_between;
///
/// let at = |h| NaiveTime::from_hms_opt(h, 0, 0).unwrap();
/// assert!(is_time_between(at(7), at(22), at(12)));
/// assert!(is_time_between(at(22), at(2), at(23)));
/// assert!(!is_time_between(at(22), at(2), at(12)));
/// ```
pub fn is_time_between(start: NaiveTime, end: NaiveTime, t: NaiveTime) -> bool {
    if start <= end {
        start <= t && t <= end
    } else {
        start <= t || t <= end
    }
}

/// Decides whether the display should be lit.
pub struct PowerScheduler<P: SunTimesProvider> {
    provider: P,
    latitude: f64,
    longitude: f64,
    on_at: Boundary,
    off_at: Boundary,
    enabled: bool,
    retry_delay: Duration,
    cached: Option<(NaiveDate, SunTimes)>,
    last_known: Option<SunTimes>,
    retry_at: Option<Instant>,
}

impl<P: SunTimesProvider> PowerScheduler<P> {
    pub fn new(provider: P, config: &crate::config::Config) -> Self {
        Self {
            provider,
            latitude: config.station.latitude,
            longitude: config.station.longitude,
            on_at: config.schedule.on_at,
            off_at: config.schedule.off_at,
            enabled: config.schedule.enabled,
            retry_delay: Duration::from_secs(config.schedule.retry_secs),
            cached: None,
            last_known: None,
            retry_at: None,
        }
    }

    /// True when the panel should show arrivals at `now`. Never fails: with
    /// no usable sun times the display stays on.
    pub async fn is_display_on(&mut self, now: &DateTime<Tz>) -> bool {
        if !self.enabled {
            return true;
        }

        let sun = if self.on_at.needs_sun() || self.off_at.needs_sun() {
            self.sun_times(now.date_naive()).await
        } else {
            None
        };

        match (self.on_at.resolve(sun.as_ref()), self.off_at.resolve(sun.as_ref())) {
            (Some(start), Some(end)) => is_time_between(start, end, now.time()),
            _ => {
                debug!("no sun times known yet, keeping display on");
                true
            }
        }
    }

    async fn sun_times(&mut self, date: NaiveDate) -> Option<SunTimes> {
        if let Some((cached_date, times)) = self.cached {
            if cached_date == date {
                return Some(times);
            }
        }
        if self.retry_at.is_some_and(|at| Instant::now() < at) {
            return self.last_known;
        }

        match self.provider.lookup(self.latitude, self.longitude, date).await {
            Ok(times) => {
                info!(%date, sunrise = %times.sunrise, sunset = %times.sunset, "sun times updated");
                self.cached = Some((date, times));
                self.last_known = Some(times);
                self.retry_at = None;
                Some(times)
            }
            Err(e) => {
                warn!("sun times lookup failed, retrying in {:?}: {e}", self.retry_delay);
                self.retry_at = Some(Instant::now() + self.retry_delay);
                self.last_known
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;
    use std::cell::Cell;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn at(day: u32, h: u32, m: u32) -> DateTime<Tz> {
        New_York.with_ymd_and_hms(2025, 6, day, h, m, 0).unwrap()
    }

    /// Provider returning fixed times, optionally failing the first calls.
    struct StubSun {
        failures: Cell<u32>,
        calls: Cell<u32>,
    }

    impl StubSun {
        fn new(failures: u32) -> Self {
            Self {
                failures: Cell::new(failures),
                calls: Cell::new(0),
            }
        }
    }

    impl SunTimesProvider for &StubSun {
        async fn lookup(
            &self,
            _lat: f64,
            _lon: f64,
            _date: NaiveDate,
        ) -> Result<SunTimes, SunTimesError> {
            self.calls.set(self.calls.get() + 1);
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(SunTimesError::Status(500));
            }
            Ok(SunTimes {
                sunrise: hm(5, 25),
                sunset: hm(20, 30),
            })
        }
    }

    #[test]
    fn test_window_crossing_midnight() {
        assert!(is_time_between(hm(22, 0), hm(6, 0), hm(0, 30)));
        assert!(is_time_between(hm(22, 0), hm(6, 0), hm(22, 0)));
        assert!(!is_time_between(hm(22, 0), hm(6, 0), hm(6, 1)));
    }

    #[test]
    fn test_boundary_parse_and_display() {
        assert_eq!("Sunrise".parse::<Boundary>(), Ok(Boundary::Sunrise));
        assert_eq!("22:00".parse::<Boundary>(), Ok(Boundary::Fixed(hm(22, 0))));
        assert!("noonish".parse::<Boundary>().is_err());
        assert_eq!(Boundary::Fixed(hm(7, 5)).to_string(), "07:05");
    }

    #[test]
    fn test_parse_api_response() {
        let body: ApiResponse = serde_json::from_str(
            r#"{"results":{"sunrise":"2025-06-21T09:25:09+00:00",
                "sunset":"2025-06-22T00:31:05+00:00","day_length":54356},"status":"OK"}"#,
        )
        .unwrap();
        let times = parse_sun_times(body, New_York).unwrap();
        // EDT is UTC-4
        assert_eq!(times.sunrise, NaiveTime::from_hms_opt(5, 25, 9).unwrap());
        assert_eq!(times.sunset, NaiveTime::from_hms_opt(20, 31, 5).unwrap());
    }

    #[test]
    fn test_parse_api_error_status() {
        let body: ApiResponse = serde_json::from_str(r#"{"status":"INVALID_REQUEST"}"#).unwrap();
        assert!(matches!(
            parse_sun_times(body, New_York),
            Err(SunTimesError::Api(s)) if s == "INVALID_REQUEST"
        ));
    }

    #[tokio::test]
    async fn test_default_window_sunrise_to_ten_pm() {
        let stub = StubSun::new(0);
        let mut scheduler = PowerScheduler::new(&stub, &Config::default());

        assert!(!scheduler.is_display_on(&at(21, 5, 0)).await);
        assert!(scheduler.is_display_on(&at(21, 5, 30)).await);
        assert!(scheduler.is_display_on(&at(21, 21, 59)).await);
        assert!(!scheduler.is_display_on(&at(21, 22, 1)).await);
        // One lookup per date
        assert_eq!(stub.calls.get(), 1);

        scheduler.is_display_on(&at(22, 12, 0)).await;
        assert_eq!(stub.calls.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_failure_fails_open_and_retries_after_delay() {
        let stub = StubSun::new(1);
        let mut scheduler = PowerScheduler::new(&stub, &Config::default());
        let night = at(21, 3, 0);

        // No sun times yet: stay on
        assert!(scheduler.is_display_on(&night).await);
        assert!(scheduler.is_display_on(&night).await);
        assert_eq!(stub.calls.get(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!scheduler.is_display_on(&night).await);
        assert_eq!(stub.calls.get(), 2);
    }

    #[tokio::test]
    async fn test_fixed_window_needs_no_lookup() {
        let stub = StubSun::new(0);
        let mut config = Config::default();
        config.schedule.on_at = Boundary::Fixed(hm(6, 0));
        let mut scheduler = PowerScheduler::new(&stub, &config);

        assert!(scheduler.is_display_on(&at(21, 6, 0)).await);
        assert_eq!(stub.calls.get(), 0);
    }

    #[tokio::test]
    async fn test_disabled_schedule_is_always_on() {
        let stub = StubSun::new(0);
        let mut config = Config::default();
        config.schedule.enabled = false;
        let mut scheduler = PowerScheduler::new(&stub, &config);

        assert!(scheduler.is_display_on(&at(21, 3, 0)).await);
        assert_eq!(stub.calls.get(), 0);
    }

    #[test]
    fn test_boundary_in_toml() {
        let config: Config =
            toml::from_str("[schedule]\non_at = \"sunset\"\noff_at = \"01:30\"\n").unwrap();
        assert_eq!(config.schedule.on_at, Boundary::Sunset);
        assert_eq!(config.schedule.off_at, Boundary::Fixed(hm(1, 30)));
    }
}
