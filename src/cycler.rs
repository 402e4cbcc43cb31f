//! # Display Cycle
//!
//! The cycler is the heart of the appliance. It owns the feed client, the
//! clock, the display sink and the rotation state, and moves through three
//! phases:
//!
//! ```text
//!   Initial ──fetch, select, render──▶ Cycling ──tick──▶ Cycling
//!                                        ▲                  │ index wrapped
//!                                        └──fetch, select── RefreshDue
//! ```
//!
//! Every tick advances the rotation index. When the index wraps back to 0 the
//! data is re-fetched before anything else is drawn, so a full rotation never
//! shows stale minutes twice.
//!
//! [`DisplayCycler::step`] performs exactly one transition and reports how
//! long to wait before the next one; it never sleeps itself. That keeps the
//! state machine testable without a runtime clock, while
//! [`DisplayCycler::run_rotation`] adds the real sleeps.

use crate::{
    arrivals::{raw_arrivals, select, select_by_direction, DirectionCaps, DirectionalSelection},
    config::{Config, DisplayMode},
    feed::{fetch_with_retry, FeedClient, RetryPolicy},
    layout::{direction_frame, rotating_frame, Frame, LayoutOptions},
    sink::DisplaySink,
    ArrivalRecord,
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Source of the current local time.
pub trait Clock {
    fn now(&self) -> DateTime<Tz>;
    fn timezone(&self) -> Tz;
}

/// Wall clock in a fixed timezone.
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }

    fn timezone(&self) -> Tz {
        self.tz
    }
}

/// Position in the rotation over the current selection.
///
/// ```
/// use subway_clock_lib::cycler::RotationState;
///
/// let mut rotation = RotationState::new(3);
/// assert!(!rotation.advance());
/// assert!(!rotation.advance());
/// assert!(rotation.advance());
/// assert_eq!(rotation.index(), 0);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RotationState {
    index: usize,
    total: usize,
}

impl RotationState {
    pub fn new(total: usize) -> Self {
        Self { index: 0, total }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Move to the next slot. Returns true when the rotation wrapped to 0,
    /// which is always the case for an empty rotation.
    pub fn advance(&mut self) -> bool {
        if self.total == 0 {
            self.index = 0;
            return true;
        }
        self.index = (self.index + 1) % self.total;
        self.index == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Initial,
    Cycling,
    RefreshDue,
}

/// Arrivals currently on display, shaped by the display mode.
#[derive(Clone, Debug, PartialEq)]
pub enum Selection {
    Direction(DirectionalSelection),
    Rotating(Vec<ArrivalRecord>),
}

impl Selection {
    fn empty(mode: DisplayMode) -> Self {
        match mode {
            DisplayMode::Direction => Selection::Direction(DirectionalSelection::default()),
            DisplayMode::Rotating => Selection::Rotating(Vec::new()),
        }
    }

    /// Ticks in one full rotation.
    ///
    /// Rotating mode cycles line 2 through every train after the closest one.
    /// Direction mode shows all trains at once, so the rotation only paces
    /// refreshes by the longer of the two lanes.
    pub fn rotation_total(&self) -> usize {
        match self {
            Selection::Direction(selection) => selection.north.len().max(selection.south.len()),
            Selection::Rotating(records) => records.len().saturating_sub(1),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Selection::Direction(selection) => selection.is_empty(),
            Selection::Rotating(records) => records.is_empty(),
        }
    }

    pub fn frame(&self, index: usize, options: &LayoutOptions) -> Frame {
        match self {
            Selection::Direction(selection) => direction_frame(selection, options),
            Selection::Rotating(records) => rotating_frame(records, index, options),
        }
    }
}

/// Everything the cycler needs from the configuration.
#[derive(Clone, Debug)]
pub struct CyclerSettings {
    pub mode: DisplayMode,
    pub stop_ids: Vec<String>,
    pub horizon_minutes: u32,
    pub max_trains: usize,
    pub caps: DirectionCaps,
    pub initial_delay: Duration,
    pub cycle_delay: Duration,
    pub retry: RetryPolicy,
    pub layout: LayoutOptions,
}

impl CyclerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: config.display.mode,
            stop_ids: config.station.stop_ids.clone(),
            horizon_minutes: config.arrivals.horizon_minutes,
            max_trains: config.arrivals.max_trains,
            caps: config.direction_caps(),
            initial_delay: Duration::from_secs(config.display.initial_delay_secs),
            cycle_delay: Duration::from_secs(config.display.cycle_delay_secs),
            retry: config.retry_policy(),
            layout: LayoutOptions::from_config(config),
        }
    }
}

/// Drives the fetch/select/render cycle.
pub struct DisplayCycler<F, S, C> {
    feed: F,
    sink: S,
    clock: C,
    settings: CyclerSettings,
    phase: Phase,
    selection: Selection,
    rotation: RotationState,
}

impl<F, S, C> DisplayCycler<F, S, C>
where
    F: FeedClient,
    S: DisplaySink,
    C: Clock,
{
    pub fn new(feed: F, sink: S, clock: C, settings: CyclerSettings) -> Self {
        let selection = Selection::empty(settings.mode);
        Self {
            feed,
            sink,
            clock,
            settings,
            phase: Phase::Initial,
            selection,
            rotation: RotationState::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn rotation(&self) -> RotationState {
        self.rotation
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Fetch and select fresh arrivals, resetting the rotation.
    ///
    /// Feed failures (after retries) leave an empty selection, which renders
    /// as the "no trains" placeholder.
    pub async fn refresh(&mut self) {
        let settings = &self.settings;
        let fetched = fetch_with_retry(&self.feed, &settings.stop_ids, &settings.retry).await;
        self.selection = match fetched {
            Ok(trips) => {
                let now = self.clock.now();
                let raw = raw_arrivals(&trips, &settings.stop_ids, self.clock.timezone());
                match settings.mode {
                    DisplayMode::Direction => Selection::Direction(select_by_direction(
                        &raw,
                        &now,
                        settings.horizon_minutes,
                        settings.caps,
                    )),
                    DisplayMode::Rotating => Selection::Rotating(select(
                        &raw,
                        &now,
                        settings.horizon_minutes,
                        settings.max_trains,
                    )),
                }
            }
            Err(e) => {
                warn!("no arrivals this rotation: {e}");
                Selection::empty(settings.mode)
            }
        };

        self.rotation = RotationState::new(self.selection.rotation_total());
        if self.selection.is_empty() {
            info!("no trains within {} minutes", settings.horizon_minutes);
        } else {
            debug!(ticks = self.rotation.total(), "arrivals refreshed");
        }
    }

    fn render(&mut self) {
        let frame = self.selection.frame(self.rotation.index(), &self.settings.layout);
        if let Err(e) = self.sink.render(&frame) {
            // A glitchy panel is not worth stopping for
            warn!("render failed: {e}");
        }
    }

    /// Perform one state transition and return how long to wait before the
    /// next one.
    pub async fn step(&mut self) -> Duration {
        match self.phase {
            Phase::Initial | Phase::RefreshDue => {
                self.refresh().await;
                self.render();
                self.phase = Phase::Cycling;
                self.settings.initial_delay
            }
            Phase::Cycling => {
                if self.rotation.advance() {
                    self.phase = Phase::RefreshDue;
                    Duration::ZERO
                } else {
                    self.render();
                    self.settings.cycle_delay
                }
            }
        }
    }

    /// Step and sleep until a refresh is due, i.e. one full rotation.
    pub async fn run_rotation(&mut self) {
        loop {
            let delay = self.step().await;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.phase == Phase::RefreshDue {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedError, StopTimeUpdate, Timestamp, Trip};
    use crate::layout::FormattedLine;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;
    use std::cell::Cell;

    fn now() -> DateTime<Tz> {
        New_York.with_ymd_and_hms(2025, 1, 16, 8, 0, 0).unwrap()
    }

    struct FixedClock;

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Tz> {
            now()
        }

        fn timezone(&self) -> Tz {
            New_York
        }
    }

    fn trip(route: &str, headsign: &str, stop: &str, minutes: i64) -> Trip {
        Trip {
            trip_id: format!("{route}-{headsign}-{minutes}"),
            route_id: route.to_string(),
            headsign_text: headsign.to_string(),
            stop_time_updates: vec![StopTimeUpdate {
                stop_id: stop.to_string(),
                arrival: Timestamp::from_unix(now().timestamp() + minutes * 60 + 20).unwrap(),
            }],
        }
    }

    /// Feed returning the same trips each time, or failing.
    struct StubFeed {
        trips: Vec<Trip>,
        fail: bool,
        calls: Cell<u32>,
    }

    impl StubFeed {
        fn with(trips: Vec<Trip>) -> Self {
            Self {
                trips,
                fail: false,
                calls: Cell::new(0),
            }
        }
    }

    impl FeedClient for &StubFeed {
        async fn filter_trips(&self, _stop_ids: &[String]) -> Result<Vec<Trip>, FeedError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                Err(FeedError::Status(503))
            } else {
                Ok(self.trips.clone())
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        frames: Vec<Frame>,
    }

    impl DisplaySink for RecordingSink {
        fn render(&mut self, frame: &Frame) -> Result<(), crate::sink::DisplayError> {
            self.frames.push(frame.clone());
            Ok(())
        }

        fn blank(&mut self) -> Result<(), crate::sink::DisplayError> {
            Ok(())
        }
    }

    fn settings(mode: DisplayMode) -> CyclerSettings {
        let mut config = Config::default();
        config.display.mode = mode;
        CyclerSettings::from_config(&config)
    }

    fn scenario_trips() -> Vec<Trip> {
        vec![
            trip("C", "Euclid", "A44N", 5),
            trip("A", "Far Rockaway", "A44N", 3),
            trip("A", "Rockaway Park", "A44S", 2),
        ]
    }

    fn text(frame: &Frame) -> Vec<String> {
        frame.lines.iter().map(FormattedLine::plain_text).collect()
    }

    #[test]
    fn test_rotation_wraps_after_total_ticks() {
        let mut rotation = RotationState::new(4);
        let wraps: Vec<bool> = (0..8).map(|_| rotation.advance()).collect();
        assert_eq!(wraps, vec![false, false, false, true, false, false, false, true]);
    }

    #[test]
    fn test_empty_rotation_always_wraps_at_zero() {
        let mut rotation = RotationState::new(0);
        assert!(rotation.advance());
        assert!(rotation.advance());
        assert_eq!(rotation.index(), 0);
    }

    #[tokio::test]
    async fn test_direction_mode_rotation_refreshes_after_full_cycle() {
        let feed = StubFeed::with(scenario_trips());
        let mut cycler = DisplayCycler::new(
            &feed,
            RecordingSink::default(),
            FixedClock,
            settings(DisplayMode::Direction),
        );

        assert_eq!(cycler.step().await, Duration::from_secs(3));
        assert_eq!(cycler.phase(), Phase::Cycling);
        assert_eq!(cycler.rotation().total(), 2);
        assert_eq!(
            text(&cycler.sink().frames[0]),
            vec!["MN  (A) 3m, (C) 5m", "BK  (A) 2m"]
        );

        assert_eq!(cycler.step().await, Duration::from_secs(5));
        assert_eq!(cycler.rotation().index(), 1);

        // Wrap: no render, refresh due
        assert_eq!(cycler.step().await, Duration::ZERO);
        assert_eq!(cycler.phase(), Phase::RefreshDue);
        assert_eq!(cycler.sink().frames.len(), 2);
        assert_eq!(feed.calls.get(), 1);

        cycler.step().await;
        assert_eq!(feed.calls.get(), 2);
        assert_eq!(cycler.rotation().index(), 0);
    }

    #[tokio::test]
    async fn test_rotating_mode_cycles_second_line() {
        let feed = StubFeed::with(scenario_trips());
        let mut cycler = DisplayCycler::new(
            &feed,
            RecordingSink::default(),
            FixedClock,
            settings(DisplayMode::Rotating),
        );

        cycler.step().await;
        cycler.step().await;
        let frames = &cycler.sink().frames;

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].lines[0].plain_text(), "1. (A) Rockaway...");
        assert_eq!(frames[0].lines[1].plain_text(), "2. (A) Far Rock...");
        assert_eq!(frames[1].lines[0], frames[0].lines[0]);
        assert_eq!(frames[1].lines[1].plain_text(), "3. (C) Euclid");
    }

    #[tokio::test]
    async fn test_no_trains_renders_placeholder_without_panicking() {
        let feed = StubFeed::with(vec![trip("C", "Euclid", "A44N", 45)]);
        let mut cycler = DisplayCycler::new(
            &feed,
            RecordingSink::default(),
            FixedClock,
            settings(DisplayMode::Direction),
        );

        cycler.step().await;
        assert_eq!(cycler.rotation().total(), 0);
        assert_eq!(cycler.sink().frames[0], Frame::no_trains("No trains"));

        // Empty rotation wraps immediately
        assert_eq!(cycler.step().await, Duration::ZERO);
        assert_eq!(cycler.phase(), Phase::RefreshDue);
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_failure_shows_placeholder_after_retries() {
        let feed = StubFeed {
            trips: Vec::new(),
            fail: true,
            calls: Cell::new(0),
        };
        let mut cycler = DisplayCycler::new(
            &feed,
            RecordingSink::default(),
            FixedClock,
            settings(DisplayMode::Direction),
        );

        cycler.step().await;

        assert_eq!(feed.calls.get(), 4);
        assert_eq!(cycler.sink().frames, vec![Frame::no_trains("No trains")]);
        assert_eq!(cycler.phase(), Phase::Cycling);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_rotation_sleeps_initial_then_cycle_delay() {
        let feed = StubFeed::with(scenario_trips());
        let mut cycler = DisplayCycler::new(
            &feed,
            RecordingSink::default(),
            FixedClock,
            settings(DisplayMode::Direction),
        );
        let started = tokio::time::Instant::now();

        cycler.run_rotation().await;

        // 3s after the first frame, 5s after the second, then the wrap
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(8) && elapsed < Duration::from_secs(9));
        assert_eq!(cycler.phase(), Phase::RefreshDue);
        assert_eq!(feed.calls.get(), 1);

        cycler.run_rotation().await;
        assert_eq!(feed.calls.get(), 2);
    }
}
