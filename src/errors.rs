// src/errors.rs

//! Crate-wide error type and `Result` alias.
//!
//! The variants follow the daemon's operational taxonomy: transient I/O,
//! recoverable structural problems (stale or over-long paths), resource
//! exhaustion (watch table, BFS queue), and indexer transport failures.
//! None of these are fatal once the event loop is running; callers log and
//! degrade.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlexmonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("watch registration error: {0}")]
    Watch(#[from] notify::Error),

    #[error("watch limit reached ({0} directories active)")]
    WatchLimit(usize),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("path exceeds maximum length: {0}")]
    PathTooLong(PathBuf),

    #[error("path queue capacity exceeded")]
    QueueFull,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned HTTP {0}")]
    HttpStatus(u16),

    #[error("connection timeout reached after {0} seconds")]
    ConnectTimeout(u64),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PlexmonError>;
