//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the
//! subway-config.toml file, with environment variable overrides layered on top.
//! It provides a centralized way to configure the station, arrival selection,
//! display hardware, feed retries, the day/night schedule and logging.

use crate::arrivals::DirectionCaps;
use crate::feed::RetryPolicy;
use crate::gtfs_rt::feed_url_for_route;
use crate::layout::parse_hex_color;
use crate::scheduler::Boundary;
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "subway-config.toml";

/// Problems that make the configuration unusable. Each one is fatal at startup.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),
    #[error("no stop ids configured")]
    NoStops,
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("invalid route color: {0}")]
    RouteColor(String),
    #[error("GTFS static file not found: {}", .0.display())]
    MissingFile(PathBuf),
    #[error("configuration errors:\n{}", bullet_list(.0))]
    Many(Vec<ConfigError>),
}

fn bullet_list(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Application configuration loaded from subway-config.toml
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Station and feed configuration
    pub station: StationConfig,
    /// Arrival filtering limits
    pub arrivals: ArrivalsConfig,
    /// Display and LED matrix configuration
    pub display: DisplayConfig,
    /// Feed retry behaviour
    pub feed: FeedConfig,
    /// Day/night power schedule
    pub schedule: ScheduleConfig,
    /// Log level and log file
    pub logging: LoggingConfig,
}

/// Station being watched and where its data comes from
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StationConfig {
    /// Route used to pick the MTA feed group (e.g. "C" selects the A/C/E feed)
    pub route: String,
    /// Only show these routes; empty shows every route in the feed
    pub routes: Vec<String>,
    /// Platform stop ids, suffixed with N/S (e.g. "A44N")
    pub stop_ids: Vec<String>,
    /// IANA timezone name used for all local times
    pub timezone: String,
    /// Latitude used for sunrise/sunset lookups
    pub latitude: f64,
    /// Longitude used for sunrise/sunset lookups
    pub longitude: f64,
    /// Explicit feed URL; derived from `route` when absent
    pub feed_url: Option<String>,
    /// GTFS static trips.txt
    pub trips_file: PathBuf,
    /// GTFS static stops.txt
    pub stops_file: PathBuf,
}

/// How many trains to show and how far ahead to look
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ArrivalsConfig {
    /// Trains further out than this many minutes are not shown
    pub horizon_minutes: u32,
    /// Maximum trains in rotating mode (closest plus rotating lines)
    pub max_trains: usize,
    /// Maximum northbound trains in direction mode
    pub max_north: usize,
    /// Maximum southbound trains in direction mode
    pub max_south: usize,
}

/// Layout of the two display lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// One line per direction, each listing several trains
    Direction,
    /// Closest train fixed on line 1, the following trains rotate on line 2
    Rotating,
}

/// Display and LED matrix configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub mode: DisplayMode,
    /// Label for the northbound line (e.g. "MN" for Manhattan)
    pub north_label: String,
    /// Label for the southbound line (e.g. "BK" for Brooklyn)
    pub south_label: String,
    /// Seconds to hold the first frame after a refresh
    pub initial_delay_secs: u64,
    /// Seconds between rotation ticks
    pub cycle_delay_secs: u64,
    /// Text shown when there is nothing to display
    pub no_trains_text: String,
    /// Route bullet color as #RRGGBB
    pub route_color: String,
    /// Panel rows
    pub rows: u32,
    /// Panel columns per panel
    pub cols: u32,
    /// Number of chained panels
    pub chain_length: u32,
    pub gpio_slowdown: u32,
    pub pwm_lsb_nanoseconds: u32,
    pub pwm_bits: u8,
    pub hardware_mapping: String,
    pub show_refresh_rate: bool,
}

/// Feed fetch retries
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Attempts per refresh, including the first
    pub attempts: u32,
    /// Delay after the first failed attempt
    pub backoff_base_secs: u64,
    /// Cap on any single backoff delay
    pub backoff_max_secs: u64,
    /// HTTP request timeout
    pub timeout_secs: u64,
}

/// Day/night power schedule
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// When false the display stays on around the clock
    pub enabled: bool,
    /// "sunrise", "sunset" or a local "HH:MM"
    pub on_at: Boundary,
    /// "sunrise", "sunset" or a local "HH:MM"
    pub off_at: Boundary,
    /// How often to re-check while the display is off
    pub check_interval_secs: u64,
    /// Delay before retrying a failed sunrise/sunset lookup
    pub retry_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; RUST_LOG takes precedence
    pub level: String,
    /// Optional log file, appended to
    pub file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            station: StationConfig::default(),
            arrivals: ArrivalsConfig::default(),
            display: DisplayConfig::default(),
            feed: FeedConfig::default(),
            schedule: ScheduleConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        StationConfig {
            route: "C".to_string(),
            routes: Vec::new(),
            stop_ids: vec!["A44N".to_string(), "A44S".to_string()],
            timezone: "America/New_York".to_string(),
            // Clinton-Washington Avs, Brooklyn
            latitude: 40.682387,
            longitude: -73.963004,
            feed_url: None,
            trips_file: PathBuf::from("gtfs_static/trips.txt"),
            stops_file: PathBuf::from("gtfs_static/stops.txt"),
        }
    }
}

impl Default for ArrivalsConfig {
    fn default() -> Self {
        ArrivalsConfig {
            horizon_minutes: 30,
            max_trains: 4,
            max_north: 3,
            max_south: 3,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        DisplayConfig {
            mode: DisplayMode::Direction,
            north_label: "MN".to_string(),
            south_label: "BK".to_string(),
            initial_delay_secs: 3,
            cycle_delay_secs: 5,
            no_trains_text: "No trains".to_string(),
            route_color: "#003986".to_string(), // MTA A/C/E blue
            rows: 32,
            cols: 64,
            chain_length: 2,
            gpio_slowdown: 3,
            pwm_lsb_nanoseconds: 50,
            pwm_bits: 5,
            hardware_mapping: "adafruit-hat".to_string(),
            show_refresh_rate: true,
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig {
            attempts: 4,
            backoff_base_secs: 2,
            backoff_max_secs: 8,
            timeout_secs: 30,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            enabled: true,
            on_at: Boundary::Sunrise,
            off_at: Boundary::Fixed(NaiveTime::from_hms_opt(22, 0, 0).unwrap_or_default()),
            check_interval_secs: 60,
            retry_secs: 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: Some(PathBuf::from("logs/subway_clock.log")),
        }
    }
}

impl Config {
    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    info!(
                        "Loaded configuration for stops {}",
                        config.station.stop_ids.join(",")
                    );
                    config
                }
                Err(e) => {
                    warn!("Invalid config file format: {}", e);
                    warn!("Using default configuration (Clinton-Washington Avs)");
                    Self::default()
                }
            },
            Err(_) => {
                info!("No config file found, using default configuration (Clinton-Washington Avs)");
                Self::default()
            }
        }
    }

    /// Save current configuration to the specified path
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(&path, contents)?;
        info!("Configuration saved to {}", path.as_ref().display());
        Ok(())
    }

    /// Apply overrides using the historical environment variable names.
    ///
    /// `lookup` is usually `std::env::var`; values that fail to parse are
    /// logged and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let station = &mut self.station;
        override_parsed(&lookup, "LATITUDE", &mut station.latitude);
        override_parsed(&lookup, "LONGITUDE", &mut station.longitude);
        override_parsed(&lookup, "TIMEZONE", &mut station.timezone);
        override_parsed(&lookup, "SUBWAY_ROUTE", &mut station.route);
        if let Some(stops) = lookup("STOP_IDS") {
            station.stop_ids = split_list(&stops);
        }
        if let Some(routes) = lookup("ROUTES") {
            station.routes = split_list(&routes);
        }
        if let Some(url) = lookup("FEED_URL") {
            station.feed_url = Some(url);
        }

        let arrivals = &mut self.arrivals;
        override_parsed(&lookup, "MAX_TRAINS_DISPLAY", &mut arrivals.max_trains);
        override_parsed(&lookup, "MAX_MINUTES_AWAY", &mut arrivals.horizon_minutes);
        if let Some(raw) = lookup("MAX_TRAINS_PER_DIRECTION") {
            match raw.trim().parse::<usize>() {
                Ok(cap) => {
                    arrivals.max_north = cap;
                    arrivals.max_south = cap;
                }
                Err(e) => warn!("Ignoring MAX_TRAINS_PER_DIRECTION={raw:?}: {e}"),
            }
        }

        let display = &mut self.display;
        override_parsed(&lookup, "DIRECTION_NORTH_LABEL", &mut display.north_label);
        override_parsed(&lookup, "DIRECTION_SOUTH_LABEL", &mut display.south_label);
        override_parsed(&lookup, "DISPLAY_REFRESH_INITIAL", &mut display.initial_delay_secs);
        override_parsed(&lookup, "DISPLAY_REFRESH_CYCLE", &mut display.cycle_delay_secs);
        override_parsed(&lookup, "MATRIX_ROWS", &mut display.rows);
        override_parsed(&lookup, "MATRIX_COLS", &mut display.cols);
        override_parsed(&lookup, "MATRIX_CHAIN_LENGTH", &mut display.chain_length);
        override_parsed(&lookup, "MATRIX_GPIO_SLOWDOWN", &mut display.gpio_slowdown);
        override_parsed(&lookup, "MATRIX_PWM_LSB_NANOSECONDS", &mut display.pwm_lsb_nanoseconds);
        override_parsed(&lookup, "MATRIX_PWM_BITS", &mut display.pwm_bits);
        override_parsed(&lookup, "MATRIX_HARDWARE_MAPPING", &mut display.hardware_mapping);
        if let Some(raw) = lookup("MATRIX_SHOW_REFRESH_RATE") {
            display.show_refresh_rate = raw.trim().eq_ignore_ascii_case("true");
        }

        override_parsed(&lookup, "LOG_LEVEL", &mut self.logging.level);
        if let Some(file) = lookup("LOG_FILE") {
            self.logging.file = (!file.trim().is_empty()).then(|| PathBuf::from(file));
        }
    }

    /// Check everything that would otherwise fail later in the loop.
    ///
    /// All problems are reported together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if let Err(e) = self.timezone() {
            errors.push(e);
        }
        if self.station.stop_ids.is_empty() {
            errors.push(ConfigError::NoStops);
        }
        if self.arrivals.horizon_minutes == 0 {
            errors.push(ConfigError::Zero("arrivals.horizon_minutes"));
        }
        if self.arrivals.max_trains == 0 {
            errors.push(ConfigError::Zero("arrivals.max_trains"));
        }
        if self.arrivals.max_north == 0 && self.arrivals.max_south == 0 {
            errors.push(ConfigError::Zero("arrivals.max_north + arrivals.max_south"));
        }
        if parse_hex_color(&self.display.route_color).is_none() {
            errors.push(ConfigError::RouteColor(self.display.route_color.clone()));
        }
        for path in [&self.station.trips_file, &self.station.stops_file] {
            if !path.exists() {
                errors.push(ConfigError::MissingFile(path.clone()));
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::Many(errors)),
        }
    }

    /// Parsed timezone.
    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        Tz::from_str(self.station.timezone.trim())
            .map_err(|_| ConfigError::UnknownTimezone(self.station.timezone.clone()))
    }

    /// Feed URL, explicit or derived from the configured route.
    pub fn feed_url(&self) -> String {
        self.station
            .feed_url
            .clone()
            .unwrap_or_else(|| feed_url_for_route(&self.station.route))
    }

    pub fn direction_caps(&self) -> DirectionCaps {
        DirectionCaps {
            north: self.arrivals.max_north,
            south: self.arrivals.max_south,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.feed.attempts,
            base_delay: Duration::from_secs(self.feed.backoff_base_secs),
            max_delay: Duration::from_secs(self.feed.backoff_max_secs),
        }
    }

    /// Total panel width in pixels across the chain.
    pub fn panel_width(&self) -> u32 {
        self.display.cols * self.display.chain_length
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(e) => warn!("Ignoring {key}={raw:?}: {e}"),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
