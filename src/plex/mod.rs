// src/plex/mod.rs

pub mod client;
pub mod types;

pub use client::PlexClient;
pub use types::LibrarySection;
