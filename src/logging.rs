//! Logging setup.
//!
//! Console output always; an optional plain-text log file on the SD card for
//! post-mortems after the Pi has been running unattended. `RUST_LOG`
//! overrides the configured level.

use crate::config::LoggingConfig;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter from `RUST_LOG` if set, otherwise from `level`.
/// Unparseable directives fall back to `info`.
pub fn env_filter(level: &str, rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Split a log path into the directory (created if needed) and file name.
fn log_target(path: &Path) -> io::Result<(PathBuf, PathBuf)> {
    let name = path
        .file_name()
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "log file path has no file name")
        })?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;
    Ok((dir, PathBuf::from(name)))
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init(config: &LoggingConfig) -> io::Result<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = env_filter(&config.level, rust_log.as_deref());

    let file_layer = match &config.file {
        Some(path) => {
            let (dir, name) = log_target(path)?;
            let appender = tracing_appender::rolling::never(dir, name);
            Some(fmt::layer().with_ansi(false).with_writer(appender))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()
        .map_err(io::Error::other)
}
