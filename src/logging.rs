// src/logging.rs

//! Logging setup for `plexmon` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log level:
//! 1. `PLEXMON_LOG` environment variable (e.g. "info", "debug")
//! 2. `-v` on the command line (forces debug)
//! 3. `log_level` from the configuration file
//! 4. default to `info`
//!
//! Destination follows the run mode: stdout in the foreground, the
//! configured log file through a non-blocking appender when daemonized. The
//! returned guard must be held for the lifetime of the process so buffered
//! lines are flushed on exit.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;

use crate::config::{Config, LogLevel};
use crate::errors::Result;

/// Initialise the global logging subscriber.
///
/// Safe to call once at startup, after daemonization (the appender spawns a
/// worker thread, which would not survive a fork).
pub fn init(config: &Config) -> Result<Option<WorkerGuard>> {
    let level = std::env::var("PLEXMON_LOG")
        .ok()
        .and_then(|s| parse_level_str(&s))
        .unwrap_or(if config.verbose {
            tracing::Level::DEBUG
        } else {
            match config.log_level {
                LogLevel::Info => tracing::Level::INFO,
                LogLevel::Debug => tracing::Level::DEBUG,
            }
        });

    if !config.daemonize {
        fmt()
            .with_max_level(level)
            .with_target(true)
            .init();
        return Ok(None);
    }

    let dir = config.log_file.parent().unwrap_or_else(|| Path::new("."));
    let file_name = config
        .log_file
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "plexmon.log".into());

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_ansi(false)
        .with_writer(writer)
        .init();

    Ok(Some(guard))
}

fn parse_level_str(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}
