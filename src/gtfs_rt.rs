//! # GTFS-Realtime Feed Client
//!
//! Fetches the MTA subway protobuf feed over HTTP and converts its trip updates
//! into [`Trip`]s for the watched stops.
//!
//! ## Wire Format
//! Messages are the generated [`gtfs_realtime`] types. Only trip updates are
//! read; vehicle positions, alerts and the NYCT extension fields are skipped.
//!
//! ## Feed Groups
//! The MTA splits the subway into feeds by route family. [`feed_url_for_route`]
//! picks the endpoint that carries a given route, so configuring `route = "C"`
//! is enough to get the A/C/E feed.

use crate::feed::{FeedClient, FeedError, StopTimeUpdate, Timestamp, Trip};
use crate::static_data::StaticSchedule;
use gtfs_realtime::FeedMessage;
use prost::Message;
use std::time::Duration;
use tracing::{debug, trace};

const MTA_FEED_BASE: &str = "https://api-endpoint.mta.info/Dataservice/mtagtfsfeeds/nyct%2Fgtfs";

/// MTA feed endpoint carrying `route`.
///
/// ```
/// use subway_clock_lib::gtfs_rt::feed_url_for_route;
///
/// assert!(feed_url_for_route("C").ends_with("gtfs-ace"));
/// assert!(feed_url_for_route("4").ends_with("nyct%2Fgtfs"));
/// ```
pub fn feed_url_for_route(route: &str) -> String {
    let suffix = match route.trim().to_ascii_uppercase().as_str() {
        "A" | "C" | "E" | "H" | "FS" => "-ace",
        "B" | "D" | "F" | "M" => "-bdfm",
        "G" => "-g",
        "J" | "Z" => "-jz",
        "N" | "Q" | "R" | "W" => "-nqrw",
        "L" => "-l",
        "SI" | "SIR" => "-si",
        _ => "",
    };
    format!("{MTA_FEED_BASE}{suffix}")
}

/// Decode a raw protobuf payload.
pub fn decode_feed(bytes: &[u8]) -> Result<FeedMessage, FeedError> {
    Ok(FeedMessage::decode(bytes)?)
}

/// Convert decoded trip updates into trips calling at `stop_ids`.
///
/// Trips whose route is not in `routes` are dropped unless `routes` is empty.
/// Stop updates without a usable arrival (or departure) time are skipped.
pub fn trips_from_feed(
    feed: &FeedMessage,
    routes: &[String],
    stop_ids: &[String],
    schedule: &StaticSchedule,
) -> Vec<Trip> {
    let mut trips = Vec::new();

    for entity in &feed.entity {
        if entity.is_deleted == Some(true) {
            continue;
        }
        let Some(update) = &entity.trip_update else {
            continue;
        };
        let descriptor = &update.trip;

        let route_id = descriptor.route_id.clone().unwrap_or_default();
        if !routes.is_empty() && !routes.iter().any(|r| r.eq_ignore_ascii_case(&route_id)) {
            continue;
        }
        let trip_id = descriptor.trip_id.clone().unwrap_or_default();

        let stop_time_updates: Vec<StopTimeUpdate> = update
            .stop_time_update
            .iter()
            .filter_map(|stu| {
                let stop_id = stu.stop_id.as_ref()?;
                if !stop_ids.contains(stop_id) {
                    return None;
                }
                let secs = stu
                    .arrival
                    .as_ref()
                    .and_then(|event| event.time)
                    .or_else(|| stu.departure.as_ref().and_then(|event| event.time))?;
                Some(StopTimeUpdate {
                    stop_id: stop_id.clone(),
                    arrival: Timestamp::from_unix(secs)?,
                })
            })
            .collect();

        if stop_time_updates.is_empty() {
            trace!(%trip_id, "trip does not call at watched stops");
            continue;
        }

        let last_stop = update
            .stop_time_update
            .iter()
            .rev()
            .find_map(|stu| stu.stop_id.as_deref());
        let headsign_text = schedule.resolve_headsign(&trip_id, last_stop, &route_id);

        trips.push(Trip {
            trip_id,
            route_id,
            headsign_text,
            stop_time_updates,
        });
    }

    trips
}

/// HTTP client for one GTFS-realtime endpoint.
pub struct GtfsRealtimeFeed {
    client: reqwest::Client,
    url: String,
    routes: Vec<String>,
    schedule: StaticSchedule,
    timeout: Duration,
}

impl GtfsRealtimeFeed {
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        routes: Vec<String>,
        schedule: StaticSchedule,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            routes,
            schedule,
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl FeedClient for GtfsRealtimeFeed {
    async fn filter_trips(&self, stop_ids: &[String]) -> Result<Vec<Trip>, FeedError> {
        let response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FeedError::Status(response.status().as_u16()));
        }

        let bytes = response.bytes().await?;
        let feed = decode_feed(&bytes)?;
        let trips = trips_from_feed(&feed, &self.routes, stop_ids, &self.schedule);
        debug!(
            bytes = bytes.len(),
            entities = feed.entity.len(),
            trips = trips.len(),
            "decoded realtime feed"
        );
        Ok(trips)
    }
}
