//! # Arrival Selection
//!
//! Turns the trips reported by the feed into the short list of trains worth
//! putting on a 128x32 panel.
//!
//! ## Selection Rules
//! 1. **Flatten**: every (trip, watched stop) pair becomes one [`RawArrival`]
//! 2. **Minutes**: `floor((arrival - now) / 60s)`, so a train 90 seconds out shows "1m"
//! 3. **Filter**: trains under 1 minute away cannot be caught; trains past the
//!    horizon are noise
//! 4. **Clean**: headsigns keep letters, digits, spaces and hyphens only
//! 5. **Order**: ascending by minutes, ties keep feed order, duplicates dropped
//! 6. **Bound**: truncate overall, or per direction after partitioning on the
//!    stop-id suffix
//!
//! Selection is a pure function of its inputs. Callers that fail to fetch trips
//! pass an empty slice and get an empty selection back.

use crate::feed::Trip;
use crate::{ArrivalRecord, Direction};
use chrono::DateTime;
use chrono_tz::Tz;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Arrival of one trip at one watched stop, before any filtering.
#[derive(Clone, Debug, PartialEq)]
pub struct RawArrival {
    pub route_id: String,
    pub headsign: String,
    pub stop_id: String,
    pub arrival: DateTime<Tz>,
}

/// Per-direction truncation limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirectionCaps {
    pub north: usize,
    pub south: usize,
}

impl DirectionCaps {
    pub fn uniform(cap: usize) -> Self {
        Self {
            north: cap,
            south: cap,
        }
    }
}

/// Upcoming arrivals split by platform direction.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DirectionalSelection {
    pub north: Vec<ArrivalRecord>,
    pub south: Vec<ArrivalRecord>,
}

impl DirectionalSelection {
    pub fn lane(&self, direction: Direction) -> &[ArrivalRecord] {
        match direction {
            Direction::North => &self.north,
            Direction::South => &self.south,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.north.is_empty() && self.south.is_empty()
    }
}

/// Flatten trips into raw arrivals at the watched stops.
///
/// Timestamps are expressed in `tz`; naive feed times are localized rather
/// than rejected. Times that do not exist locally (inside a DST gap) are
/// dropped with a warning.
pub fn raw_arrivals(trips: &[Trip], stop_ids: &[String], tz: Tz) -> Vec<RawArrival> {
    let mut raw = Vec::new();
    for trip in trips {
        for update in &trip.stop_time_updates {
            if !stop_ids.contains(&update.stop_id) {
                continue;
            }
            let Some(arrival) = update.arrival.localize(tz) else {
                warn!(
                    trip_id = %trip.trip_id,
                    stop_id = %update.stop_id,
                    "arrival time does not exist in {tz}, skipping"
                );
                continue;
            };
            raw.push(RawArrival {
                route_id: trip.route_id.clone(),
                headsign: trip.headsign_text.clone(),
                stop_id: update.stop_id.clone(),
                arrival,
            });
        }
    }
    raw
}

/// Whole minutes from `now` until `arrival`, rounded toward negative infinity.
///
/// ```
/// use chrono::{Duration, TimeZone};
/// use chrono_tz::America::New_York;
/// use subway_clock_lib::arrivals::minutes_until;
///
/// let now = New_York.with_ymd_and_hms(2025, 1, 16, 14, 0, 0).unwrap();
/// assert_eq!(minutes_until(&(now + Duration::seconds(90)), &now), 1);
/// assert_eq!(minutes_until(&(now - Duration::seconds(30)), &now), -1);
/// ```
pub fn minutes_until(arrival: &DateTime<Tz>, now: &DateTime<Tz>) -> i64 {
    arrival
        .signed_duration_since(*now)
        .num_seconds()
        .div_euclid(60)
}

/// Keep only letters, digits, spaces and hyphens, trimming the ends.
///
/// ```
/// use subway_clock_lib::arrivals::sanitize_headsign;
///
/// assert_eq!(sanitize_headsign(" \"Far Rockaway\" "), "Far Rockaway");
/// assert_eq!(sanitize_headsign("Inwood-207 St!"), "Inwood-207 St");
/// ```
pub fn sanitize_headsign(headsign: &str) -> String {
    headsign
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Upcoming arrivals in display order, bounded to `max_count`.
pub fn select(
    raw: &[RawArrival],
    now: &DateTime<Tz>,
    horizon_minutes: u32,
    max_count: usize,
) -> Vec<ArrivalRecord> {
    let mut selected = upcoming(raw, now, horizon_minutes);
    selected.truncate(max_count);
    selected
}

/// Upcoming arrivals partitioned by direction, each side truncated to its own cap.
///
/// Stops without an `N`/`S` suffix cannot be placed and are left out.
pub fn select_by_direction(
    raw: &[RawArrival],
    now: &DateTime<Tz>,
    horizon_minutes: u32,
    caps: DirectionCaps,
) -> DirectionalSelection {
    let mut selection = DirectionalSelection::default();
    for record in upcoming(raw, now, horizon_minutes) {
        match record.direction() {
            Some(Direction::North) => selection.north.push(record),
            Some(Direction::South) => selection.south.push(record),
            None => debug!(stop_id = %record.stop_id, "no direction suffix, not shown"),
        }
    }
    selection.north.truncate(caps.north);
    selection.south.truncate(caps.south);
    selection
}

/// Filter, clean, order and dedupe, without truncation.
fn upcoming(raw: &[RawArrival], now: &DateTime<Tz>, horizon_minutes: u32) -> Vec<ArrivalRecord> {
    let horizon = i64::from(horizon_minutes);
    let mut records: Vec<ArrivalRecord> = raw
        .iter()
        .filter_map(|arrival| {
            let minutes_away = minutes_until(&arrival.arrival, now);
            if minutes_away < 1 || minutes_away > horizon {
                debug!(
                    route = %arrival.route_id,
                    stop_id = %arrival.stop_id,
                    minutes_away,
                    "outside display window"
                );
                return None;
            }
            Some(ArrivalRecord {
                route_id: arrival.route_id.clone(),
                headsign: sanitize_headsign(&arrival.headsign),
                stop_id: arrival.stop_id.clone(),
                minutes_away,
            })
        })
        .collect();

    records.sort_by_key(|record| record.minutes_away);

    let mut seen = HashSet::new();
    records.retain(|record| seen.insert(record.clone()));
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{StopTimeUpdate, Timestamp};
    use chrono::{Duration, NaiveDate, TimeZone};
    use chrono_tz::America::New_York;
    use proptest::prelude::*;

    fn now() -> DateTime<Tz> {
        New_York.with_ymd_and_hms(2025, 1, 16, 14, 0, 0).unwrap()
    }

    fn raw(route: &str, headsign: &str, stop: &str, seconds: i64) -> RawArrival {
        RawArrival {
            route_id: route.to_string(),
            headsign: headsign.to_string(),
            stop_id: stop.to_string(),
            arrival: now() + Duration::seconds(seconds),
        }
    }

    #[test]
    fn test_past_arrival_is_excluded() {
        let records = vec![raw("C", "Euclid", "A44N", -60)];
        assert!(select(&records, &now(), 30, 4).is_empty());
    }

    #[test]
    fn test_train_under_a_minute_cannot_be_caught() {
        let records = vec![raw("C", "Euclid", "A44N", 59), raw("A", "Lefferts", "A44S", 60)];
        let selected = select(&records, &now(), 30, 4);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].minutes_away, 1);
    }

    #[test]
    fn test_horizon_is_inclusive() {
        let records = vec![
            raw("C", "Euclid", "A44N", 30 * 60 + 59),
            raw("C", "Euclid", "A44S", 31 * 60),
        ];
        let selected = select(&records, &now(), 30, 4);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].minutes_away, 30);
    }

    #[test]
    fn test_sorted_and_truncated() {
        let records = vec![
            raw("C", "Euclid", "A44N", 9 * 60),
            raw("A", "Far Rockaway", "A44N", 3 * 60),
            raw("E", "Jamaica", "A44N", 7 * 60),
            raw("A", "Lefferts", "A44S", 2 * 60),
            raw("C", "168 St", "A44S", 12 * 60),
        ];
        let selected = select(&records, &now(), 30, 3);
        let minutes: Vec<i64> = selected.iter().map(|r| r.minutes_away).collect();
        assert_eq!(minutes, vec![2, 3, 7]);
    }

    #[test]
    fn test_duplicates_are_dropped() {
        let records = vec![
            raw("C", "Euclid", "A44N", 300),
            raw("C", "Euclid", "A44N", 330),
            raw("C", "Euclid", "A44S", 300),
        ];
        let selected = select(&records, &now(), 30, 4);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_headsign_is_sanitized() {
        let records = vec![raw("A", "\"Ozone Park-Lefferts Blvd\"", "A44S", 240)];
        let selected = select(&records, &now(), 30, 4);
        assert_eq!(selected[0].headsign, "Ozone Park-Lefferts Blvd");
    }

    #[test]
    fn test_end_to_end_direction_scenario() {
        let records = vec![
            raw("C", "Euclid", "A44N", 5 * 60),
            raw("A", "Far Rockaway", "A44N", 3 * 60),
            raw("A", "Rockaway Park", "A44S", 2 * 60),
        ];
        let selection = select_by_direction(&records, &now(), 30, DirectionCaps::uniform(3));

        assert_eq!(
            selection.north,
            vec![
                ArrivalRecord::new("A", "Far Rockaway", "A44N", 3),
                ArrivalRecord::new("C", "Euclid", "A44N", 5),
            ]
        );
        assert_eq!(
            selection.south,
            vec![ArrivalRecord::new("A", "Rockaway Park", "A44S", 2)]
        );
    }

    #[test]
    fn test_direction_caps_apply_independently() {
        let records = vec![
            raw("A", "Far Rockaway", "A44N", 180),
            raw("C", "Euclid", "A44N", 300),
            raw("E", "Jamaica", "A44N", 420),
            raw("A", "Rockaway Park", "A44S", 120),
            raw("C", "168 St", "A44S", 360),
            raw("A", "Far Rockaway", "A44N", 600),
        ];
        let caps = DirectionCaps { north: 3, south: 1 };
        let selection = select_by_direction(&records, &now(), 30, caps);
        assert_eq!(selection.north.len(), 3);
        assert_eq!(selection.south.len(), 1);
        assert_eq!(selection.lane(Direction::South)[0].headsign, "Rockaway Park");
    }

    #[test]
    fn test_empty_direction_stays_empty() {
        let records = vec![raw("A", "Far Rockaway", "A44N", 180), raw("C", "Euclid", "A44N", 300)];
        let selection = select_by_direction(&records, &now(), 30, DirectionCaps::uniform(3));
        assert_eq!(selection.north.len(), 2);
        assert!(selection.south.is_empty());
        assert!(!selection.is_empty());
    }

    #[test]
    fn test_raw_arrivals_localizes_naive_times() {
        let naive = NaiveDate::from_ymd_opt(2025, 1, 16)
            .unwrap()
            .and_hms_opt(14, 5, 0)
            .unwrap();
        let trips = vec![Trip {
            trip_id: "048450_C..N04R".to_string(),
            route_id: "C".to_string(),
            headsign_text: "Euclid Av".to_string(),
            stop_time_updates: vec![
                StopTimeUpdate {
                    stop_id: "A44N".to_string(),
                    arrival: Timestamp::Naive(naive),
                },
                StopTimeUpdate {
                    stop_id: "A42N".to_string(),
                    arrival: Timestamp::Naive(naive),
                },
            ],
        }];

        let raw = raw_arrivals(&trips, &["A44N".to_string()], New_York);
        assert_eq!(raw.len(), 1);
        assert_eq!(minutes_until(&raw[0].arrival, &now()), 5);
    }

    #[test]
    fn test_empty_input_is_empty_selection() {
        assert!(select(&[], &now(), 30, 4).is_empty());
        assert!(select_by_direction(&[], &now(), 30, DirectionCaps::uniform(3)).is_empty());
    }

    fn arb_raw() -> impl Strategy<Value = Vec<RawArrival>> {
        let stop = prop_oneof![Just("A44N"), Just("A44S"), Just("A44")];
        let route = prop_oneof![Just("A"), Just("C"), Just("E")];
        prop::collection::vec((route, stop, -3_600i64..7_200), 0..40).prop_map(|items| {
            items
                .into_iter()
                .map(|(route, stop, seconds)| raw(route, "Somewhere", stop, seconds))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn selection_is_sorted_bounded_and_in_window(
            records in arb_raw(),
            horizon in 1u32..90,
            max_count in 1usize..8,
        ) {
            let selected = select(&records, &now(), horizon, max_count);
            prop_assert!(selected.len() <= max_count);
            prop_assert!(selected.windows(2).all(|w| w[0].minutes_away <= w[1].minutes_away));
            for record in &selected {
                prop_assert!(record.minutes_away >= 1);
                prop_assert!(record.minutes_away <= i64::from(horizon));
            }
        }

        #[test]
        fn directions_never_mix(records in arb_raw(), cap in 1usize..6) {
            let selection = select_by_direction(&records, &now(), 60, DirectionCaps::uniform(cap));
            prop_assert!(selection.north.iter().all(|r| r.stop_id.ends_with('N')));
            prop_assert!(selection.south.iter().all(|r| r.stop_id.ends_with('S')));
            prop_assert!(selection.north.len() <= cap && selection.south.len() <= cap);
        }
    }
}
