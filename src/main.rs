//! # Subway Clock Application Entry Point
//!
//! This binary wires the library together: configuration, logging, the
//! GTFS-realtime feed, the display sink and the day/night scheduler, then runs
//! the display cycle until SIGINT or SIGTERM. It supports both production mode
//! (RGB LED matrix, `hardware` feature) and development mode (`--stdout`,
//! ASCII board in the terminal).
//!
//! ## Usage
//! ```text
//! subway-clock [--stdout] [--config <path>]
//! ```

// Test modules
#[cfg(test)]
mod tests;

use anyhow::Context;
use std::{
    env,
    future::Future,
    path::{Path, PathBuf},
    time::Duration,
};
use subway_clock_lib::{
    config::{Config, CONFIG_FILE},
    cycler::{Clock, CyclerSettings, DisplayCycler, SystemClock},
    feed::FeedClient,
    gtfs_rt::GtfsRealtimeFeed,
    instance::{InstanceLock, DEFAULT_LOCK_PATH},
    layout::LayoutOptions,
    logging,
    scheduler::{PowerScheduler, SunTimesProvider, SunriseSunsetClient},
    sink::{DisplaySink, TerminalSink},
    static_data::StaticSchedule,
};
use tracing::{error, info, warn};

/// Command line options.
#[derive(Debug, Default, PartialEq)]
struct Args {
    /// Print frames to the terminal instead of driving the panel
    development_mode: bool,
    config_path: Option<PathBuf>,
}

impl Args {
    fn parse<I: IntoIterator<Item = String>>(args: I) -> anyhow::Result<Self> {
        let mut parsed = Args::default();
        let mut args = args.into_iter().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--stdout" => parsed.development_mode = true,
                "--config" => {
                    let path = args.next().context("--config needs a path")?;
                    parsed.config_path = Some(PathBuf::from(path));
                }
                other => anyhow::bail!("unknown argument: {other}"),
            }
        }
        Ok(parsed)
    }
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("cannot listen for SIGTERM: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
    }
}

/// Main loop: rotate arrivals while the schedule says on, keep the panel dark
/// otherwise. Returns once `shutdown` resolves, with the panel released.
async fn run<F, S, C, P>(
    config: &Config,
    feed: F,
    sink: S,
    clock: C,
    mut scheduler: PowerScheduler<P>,
    shutdown: impl Future<Output = &'static str>,
) -> anyhow::Result<()>
where
    F: FeedClient,
    S: DisplaySink,
    C: Clock + Clone,
    P: SunTimesProvider,
{
    let settings = CyclerSettings::from_config(config);
    let mut cycler = DisplayCycler::new(feed, sink, clock.clone(), settings);
    let check_interval = Duration::from_secs(config.schedule.check_interval_secs);

    tokio::pin!(shutdown);
    let mut display_on = None;

    loop {
        let iteration = async {
            let on = scheduler.is_display_on(&clock.now()).await;
            if display_on != Some(on) {
                info!("display {}", if on { "on" } else { "off for the night" });
                display_on = Some(on);
            }
            if on {
                cycler.run_rotation().await;
            } else {
                if let Err(e) = cycler.sink_mut().blank() {
                    warn!("failed to blank display: {e}");
                }
                tokio::time::sleep(check_interval).await;
            }
        };

        tokio::select! {
            signal = &mut shutdown => {
                info!("received {signal}, shutting down");
                break;
            }
            () = iteration => {}
        }
    }

    cycler
        .sink_mut()
        .shutdown()
        .context("failed to release display")?;
    info!("Subway clock shutdown complete");
    Ok(())
}

/// Log a startup error before handing it to anyhow, so it also lands in the
/// log file.
fn fatal<T, E>(result: Result<T, E>, what: &'static str) -> anyhow::Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    result.map_err(|e| {
        error!("{what}: {e}");
        anyhow::Error::new(e).context(what)
    })
}

/// Main application entry point.
fn main() -> anyhow::Result<()> {
    let args = Args::parse(env::args())?;

    let config_path = args.config_path.as_deref().unwrap_or(Path::new(CONFIG_FILE));
    let mut config = Config::load_from_path(config_path);
    config.apply_overrides(|key| env::var(key).ok());

    logging::init(&config.logging).context("failed to initialize logging")?;
    info!("Subway clock starting");

    // Startup problems are fatal; everything after this point is retried
    fatal(config.validate(), "invalid configuration")?;
    info!(
        route = %config.station.route,
        stops = %config.station.stop_ids.join(","),
        timezone = %config.station.timezone,
        "Configuration validated"
    );

    let _lock = fatal(InstanceLock::acquire(DEFAULT_LOCK_PATH), "cannot take instance lock")?;

    let schedule = fatal(
        StaticSchedule::load(&config.station.trips_file, &config.station.stops_file),
        "failed to load GTFS static data",
    )?;

    let http = reqwest::Client::builder()
        .user_agent(concat!("subway-clock/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;
    let tz = config.timezone()?;
    let clock = SystemClock::new(tz);
    let scheduler = PowerScheduler::new(SunriseSunsetClient::new(http.clone(), tz), &config);
    let feed = GtfsRealtimeFeed::new(
        http,
        config.feed_url(),
        config.station.routes.clone(),
        schedule,
        Duration::from_secs(config.feed.timeout_secs),
    );
    info!(url = feed.url(), "Using real-time feed");

    // Single-threaded runtime: the loop never does two things at once
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let width_cells = LayoutOptions::from_config(&config).width_cells;

    // Development mode: ASCII output for testing
    if args.development_mode {
        let sink = TerminalSink::stdout(width_cells);
        return rt.block_on(run(&config, feed, sink, clock, scheduler, shutdown_signal()));
    }

    #[cfg(feature = "hardware")]
    {
        use subway_clock_lib::{layout::parse_hex_color, renderer::Palette, sink::MatrixSink};

        let route_color =
            parse_hex_color(&config.display.route_color).context("invalid route color")?;
        let sink = fatal(
            MatrixSink::new(&config.display, Palette::new(route_color)),
            "failed to initialize LED matrix",
        )?;
        rt.block_on(run(&config, feed, sink, clock, scheduler, shutdown_signal()))
    }

    #[cfg(not(feature = "hardware"))]
    {
        warn!("LED matrix support not enabled. Rebuild with --features hardware for panel output.");
        warn!("Showing ASCII output instead");
        let sink = TerminalSink::stdout(width_cells);
        rt.block_on(run(&config, feed, sink, clock, scheduler, shutdown_signal()))
    }
}
