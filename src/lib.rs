//! # Subway Clock Core Library
//!
//! This library provides the data structures and building blocks for the subway
//! clock appliance: a Raspberry Pi driving a 128x32 RGB LED matrix that shows the
//! next few trains at a single station.
//!
//! ## Design Philosophy
//!
//! ### One Loop, No Sharing
//! The appliance runs a single polling loop: fetch the real-time feed, select the
//! arrivals worth showing, render them, sleep. Nothing runs concurrently with the
//! loop, so the cached arrivals and the rotation index are plain owned fields.
//!
//! ### Failures Become Placeholders
//! A subway clock that crashes is worse than one that says "No trains". Every
//! steady-state failure (network, protobuf, display glitches) is logged and
//! downgraded to an empty selection. Only startup problems (bad timezone,
//! missing GTFS static files) stop the process.
//!
//! ### Data Flow
//! 1. **Fetch**: [`feed::FeedClient::filter_trips`] returns trips that call at the
//!    configured stops
//! 2. **Select**: [`arrivals`] turns them into [`ArrivalRecord`]s, drops trains that
//!    already left or are beyond the horizon, sorts and truncates
//! 3. **Layout**: [`layout`] formats the selection into display lines
//! 4. **Render**: a [`sink::DisplaySink`] puts the lines on the panel or terminal
//!
//! ## Core Types
//! - [`ArrivalRecord`]: one train arriving at one stop, in whole minutes from now
//! - [`Direction`]: the platform direction encoded in the stop-id suffix

use serde::{Deserialize, Serialize};

pub mod arrivals;
pub mod config;
pub mod cycler;
pub mod feed;
pub mod framebuffer;
pub mod gtfs_rt;
pub mod instance;
pub mod layout;
pub mod logging;
pub mod renderer;
pub mod scheduler;
pub mod sink;
pub mod static_data;

/// A single upcoming train at one of the watched stops.
///
/// `minutes_away` is computed against the clock at selection time and may be
/// negative for raw records; selected records always fall in `1..=horizon`.
///
/// # Example
/// ```
/// use subway_clock_lib::{ArrivalRecord, Direction};
///
/// let record = ArrivalRecord::new("C", "Euclid Av", "A44N", 5);
/// assert_eq!(record.direction(), Some(Direction::North));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrivalRecord {
    /// Route identifier, e.g. "A" or "C"
    pub route_id: String,
    /// Destination shown for the trip
    pub headsign: String,
    /// GTFS stop id including the direction suffix, e.g. "A44N"
    pub stop_id: String,
    /// Whole minutes until arrival (floored)
    pub minutes_away: i64,
}

impl ArrivalRecord {
    pub fn new(
        route_id: impl Into<String>,
        headsign: impl Into<String>,
        stop_id: impl Into<String>,
        minutes_away: i64,
    ) -> Self {
        Self {
            route_id: route_id.into(),
            headsign: headsign.into(),
            stop_id: stop_id.into(),
            minutes_away,
        }
    }

    /// Platform direction derived from the stop-id suffix.
    pub fn direction(&self) -> Option<Direction> {
        Direction::from_stop_id(&self.stop_id)
    }
}

/// Platform direction, following the NYCT convention of suffixing parent stop
/// ids with `N` (northbound) or `S` (southbound).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    North,
    South,
}

impl Direction {
    /// Parse the direction from the last character of a stop id.
    ///
    /// ```
    /// use subway_clock_lib::Direction;
    ///
    /// assert_eq!(Direction::from_stop_id("A44S"), Some(Direction::South));
    /// assert_eq!(Direction::from_stop_id("A44"), None);
    /// ```
    pub fn from_stop_id(stop_id: &str) -> Option<Self> {
        match stop_id.trim().chars().last()? {
            'N' | 'n' => Some(Direction::North),
            'S' | 's' => Some(Direction::South),
            _ => None,
        }
    }
}
