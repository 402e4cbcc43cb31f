//! GTFS static lookups.
//!
//! Real-time trip updates only carry ids. The destination text comes from the
//! static `trips.txt` table, and the stop names from `stops.txt`. Both files are
//! read once at startup; a missing file is a configuration error.

use crate::feed::FeedError;
use serde::Deserialize;
use std::{collections::HashMap, fs::File, io::Read, path::Path};
use tracing::debug;

#[derive(Debug, Deserialize)]
struct TripRow {
    trip_id: String,
    #[serde(default)]
    trip_headsign: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StopRow {
    stop_id: String,
    #[serde(default)]
    stop_name: Option<String>,
}

/// Headsign and stop-name tables from a GTFS static bundle.
#[derive(Debug, Default, Clone)]
pub struct StaticSchedule {
    headsigns: HashMap<String, String>,
    stop_names: HashMap<String, String>,
}

impl StaticSchedule {
    /// Read `trips.txt` and `stops.txt` from disk.
    pub fn load(trips_path: &Path, stops_path: &Path) -> Result<Self, FeedError> {
        let open = |path: &Path| {
            File::open(path).map_err(|source| FeedError::Io {
                path: path.to_path_buf(),
                source,
            })
        };
        let schedule = Self::from_readers(open(trips_path)?, open(stops_path)?)?;
        debug!(
            headsigns = schedule.headsigns.len(),
            stops = schedule.stop_names.len(),
            "loaded GTFS static tables"
        );
        Ok(schedule)
    }

    /// Parse the two CSV tables from arbitrary readers.
    pub fn from_readers<T: Read, S: Read>(trips: T, stops: S) -> Result<Self, FeedError> {
        let mut headsigns = HashMap::new();
        for row in csv::Reader::from_reader(trips).deserialize::<TripRow>() {
            let row = row?;
            let Some(headsign) = row.trip_headsign.filter(|h| !h.trim().is_empty()) else {
                continue;
            };
            // Realtime ids drop the static service prefix:
            // "AFA23GEN-1037-Sunday-00_000600_1..S03R" is "000600_1..S03R" on the wire
            if let Some((_, suffix)) = row.trip_id.split_once('_') {
                headsigns
                    .entry(suffix.to_string())
                    .or_insert_with(|| headsign.clone());
            }
            headsigns.insert(row.trip_id, headsign);
        }

        let mut stop_names = HashMap::new();
        for row in csv::Reader::from_reader(stops).deserialize::<StopRow>() {
            let row = row?;
            if let Some(name) = row.stop_name {
                stop_names.insert(row.stop_id, name);
            }
        }

        Ok(Self {
            headsigns,
            stop_names,
        })
    }

    /// Headsign for a trip id, matching either the full static id or its
    /// realtime suffix.
    pub fn headsign(&self, trip_id: &str) -> Option<&str> {
        self.headsigns.get(trip_id).map(String::as_str)
    }

    pub fn stop_name(&self, stop_id: &str) -> Option<&str> {
        self.stop_names.get(stop_id).map(String::as_str)
    }

    /// Best available destination text for a trip.
    ///
    /// Falls back to the name of the last stop the trip reports, then to the
    /// route id itself.
    pub fn resolve_headsign(
        &self,
        trip_id: &str,
        last_stop_id: Option<&str>,
        route_id: &str,
    ) -> String {
        self.headsign(trip_id)
            .or_else(|| last_stop_id.and_then(|stop| self.terminal_name(stop)))
            .unwrap_or(route_id)
            .to_string()
    }

    fn terminal_name(&self, stop_id: &str) -> Option<&str> {
        // Platform ids ("D43S") usually carry the same name as their parent ("D43")
        self.stop_name(stop_id)
            .or_else(|| parent_stop_id(stop_id).and_then(|parent| self.stop_name(parent)))
    }
}

fn parent_stop_id(stop_id: &str) -> Option<&str> {
    stop_id
        .strip_suffix('N')
        .or_else(|| stop_id.strip_suffix('S'))
}
