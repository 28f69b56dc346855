// src/cli.rs

//! CLI argument parsing using `clap`.
//!
//! NOTE: this expects `clap` to be built with the `derive` feature, e.g.:
//! `clap = { version = "4.5", features = ["derive"] }` in `Cargo.toml`.

use std::path::PathBuf;

use clap::Parser;

use crate::config::DEFAULT_CONFIG_FILE;

/// Command-line arguments for `plexmon`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "plexmon",
    version,
    about = "Watch Plex library directories and trigger partial scans on change.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Verbose mode: raise the log level to debug.
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Run as a daemon (double fork, detach from the terminal, log to the
    /// configured log file).
    #[arg(short = 'd', long = "daemon")]
    pub daemon: bool,

    /// Override the startup connection timeout in seconds.
    #[arg(short = 't', long = "startup-timeout", value_name = "SECONDS")]
    pub startup_timeout: Option<u64>,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
