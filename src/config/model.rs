// src/config/model.rs

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cli::CliArgs;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_FILE: &str = "/usr/local/etc/plexmon.conf";

/// Default base URL of the Plex Media Server.
pub const DEFAULT_PLEX_URL: &str = "http://localhost:32400";

/// Default log file used when daemonized.
pub const DEFAULT_LOG_FILE: &str = "/var/log/plexmon.log";

/// Default debounce window between the last filesystem event on a path and
/// the scan dispatched for it.
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 1;

/// Default maximum time to wait for the server at startup.
pub const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 60;

/// Log level threshold recognized in the configuration file.
///
/// The daemon only distinguishes operational logging from debug tracing;
/// finer `tracing` levels stay available to library users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Debug,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            other => Err(format!("invalid log_level: {other} (expected \"info\" or \"debug\")")),
        }
    }
}

/// Runtime configuration, merged from the config file and CLI flags.
///
/// The file format is line-oriented `key=value` with `#` comments:
///
/// ```text
/// # plexmon.conf
/// plex_url = http://localhost:32400
/// plex_token = xxxxxxxxxxxxxxxxxxxx
/// scan_interval = 2
/// startup_timeout = 120
/// log_level = info
/// log_file = /var/log/plexmon.log
/// ```
///
/// Every key is optional; a missing file means all defaults apply.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Plex Media Server.
    pub plex_url: String,

    /// Authentication token sent as `X-Plex-Token` on every request.
    pub plex_token: Option<String>,

    /// Debounce window applied by the scan scheduler.
    pub scan_interval: Duration,

    /// Maximum time to wait for the server to become reachable at startup.
    pub startup_timeout: Duration,

    /// Log level threshold.
    pub log_level: LogLevel,

    /// Log file used when daemonized; foreground runs log to stdout.
    pub log_file: PathBuf,

    /// Raise the log level to debug.
    pub verbose: bool,

    /// Detach from the terminal and run in the background.
    pub daemonize: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plex_url: DEFAULT_PLEX_URL.to_string(),
            plex_token: None,
            scan_interval: Duration::from_secs(DEFAULT_SCAN_INTERVAL_SECS),
            startup_timeout: Duration::from_secs(DEFAULT_STARTUP_TIMEOUT_SECS),
            log_level: LogLevel::Info,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            verbose: false,
            daemonize: false,
        }
    }
}

impl Config {
    /// Apply command-line overrides on top of file-derived values.
    pub fn apply_cli(&mut self, args: &CliArgs) {
        if args.verbose {
            self.verbose = true;
        }
        if args.daemon {
            self.daemonize = true;
        }
        if let Some(secs) = args.startup_timeout {
            self.startup_timeout = Duration::from_secs(secs.max(1));
        }
    }
}
