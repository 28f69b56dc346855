// src/config/loader.rs

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::model::{
    Config, LogLevel, DEFAULT_SCAN_INTERVAL_SECS, DEFAULT_STARTUP_TIMEOUT_SECS,
};

/// Load the configuration from a `key=value` file.
///
/// A missing or unreadable file is non-fatal: a warning is logged and the
/// defaults apply. Unknown keys warn and are ignored; invalid values warn
/// and fall back to their defaults. This function therefore always yields a
/// usable `Config`.
pub fn load_from_path(path: impl AsRef<Path>) -> Config {
    let path = path.as_ref();
    let mut config = Config::default();

    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "could not open config file");
            info!("using default configuration");
            return config;
        }
    };

    info!(path = %path.display(), "loading configuration");
    apply_str(&mut config, &contents);
    validate(&mut config);
    config
}

/// Parse `key=value` lines into an existing `Config`.
///
/// Lines starting with `#` and lines without a `=` separator are skipped.
/// Keys and values are whitespace-trimmed on both ends.
fn apply_str(config: &mut Config, contents: &str) {
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        match key {
            "plex_url" => {
                config.plex_url = value.trim_end_matches('/').to_string();
            }
            "plex_token" => {
                config.plex_token = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "scan_interval" => match value.parse::<u64>() {
                Ok(secs) => config.scan_interval = Duration::from_secs(secs),
                Err(_) => {
                    warn!(value, "invalid scan_interval, using default");
                }
            },
            "startup_timeout" => match value.parse::<u64>() {
                Ok(secs) => config.startup_timeout = Duration::from_secs(secs),
                Err(_) => {
                    warn!(value, "invalid startup_timeout, using default");
                }
            },
            "log_level" => match LogLevel::from_str(value) {
                Ok(level) => config.log_level = level,
                Err(err) => warn!(%err, "using default log_level"),
            },
            "log_file" => {
                config.log_file = value.into();
            }
            other => {
                warn!(key = other, "unknown configuration option");
            }
        }
    }
}

/// Warn-and-default pass over semantic constraints.
fn validate(config: &mut Config) {
    if config.plex_token.is_none() {
        warn!("no Plex token provided in configuration");
    }

    if config.startup_timeout.is_zero() {
        warn!(
            default_secs = DEFAULT_STARTUP_TIMEOUT_SECS,
            "invalid startup_timeout, using default"
        );
        config.startup_timeout = Duration::from_secs(DEFAULT_STARTUP_TIMEOUT_SECS);
    }

    if config.scan_interval.is_zero() {
        warn!(
            default_secs = DEFAULT_SCAN_INTERVAL_SECS,
            "invalid scan_interval, using default"
        );
        config.scan_interval = Duration::from_secs(DEFAULT_SCAN_INTERVAL_SECS);
    }
}
