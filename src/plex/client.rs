// src/plex/client.rs

//! HTTP client for the Plex Media Server.
//!
//! Three endpoints are consumed: `/identity` as a liveness probe,
//! `/library/sections` to discover which directories to watch, and
//! `/library/sections/{id}/refresh?path=…` to trigger a partial scan.
//! Every request carries `Accept: application/json` and, when configured,
//! the `X-Plex-Token` header.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::{PlexmonError, Result};
use crate::plex::types::{LibrarySection, SectionsResponse};
use crate::sched::ScanDispatcher;

/// Per-request timeout; generous for a LAN media server.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between startup connection attempts.
const RETRY_DELAY: Duration = Duration::from_secs(5);

pub struct PlexClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl PlexClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: config.plex_url.trim_end_matches('/').to_string(),
            token: config.plex_token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header(header::ACCEPT, "application/json");
        if let Some(token) = &self.token {
            request = request.header("X-Plex-Token", token);
        }
        request
    }

    async fn identity(&self) -> Result<()> {
        let response = self.get("/identity").send().await?;
        if !response.status().is_success() {
            return Err(PlexmonError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }

    /// Block until the connectivity probe succeeds, retrying every few
    /// seconds. Gives up after `startup_timeout` and fails startup.
    pub async fn wait_for_server(&self, startup_timeout: Duration) -> Result<()> {
        info!(url = %self.base_url, "attempting to connect to Plex Media Server");
        let start = Instant::now();

        loop {
            match self.check_connectivity().await {
                Ok(()) => {
                    info!("successfully connected to Plex Media Server");
                    return Ok(());
                }
                Err(err) => {
                    debug!(error = %err, "Plex server not reachable yet");
                }
            }

            if start.elapsed() >= startup_timeout {
                return Err(PlexmonError::ConnectTimeout(startup_timeout.as_secs()));
            }

            debug!(delay_secs = RETRY_DELAY.as_secs(), "retrying connection");
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }

    /// Fetch the library sections and their on-disk locations.
    pub async fn sections(&self) -> Result<Vec<LibrarySection>> {
        info!("retrieving library sections from Plex");

        let response = self.get("/library/sections").send().await?;
        if !response.status().is_success() {
            return Err(PlexmonError::HttpStatus(response.status().as_u16()));
        }
        let body: SectionsResponse = response.json().await?;

        let mut sections = Vec::new();
        for directory in body.media_container.directories {
            if directory.locations.is_empty() {
                warn!(section_id = directory.key, "library section has no locations");
                continue;
            }
            sections.push(LibrarySection {
                id: directory.key,
                locations: directory
                    .locations
                    .into_iter()
                    .map(|location| location.path)
                    .collect(),
            });
        }

        info!(sections = sections.len(), "found library sections");
        Ok(sections)
    }

    /// Trigger a partial scan of `path` within a section.
    pub async fn trigger_scan(&self, path: &Path, section_id: i64) -> Result<()> {
        debug!(path = %path.display(), section_id, "triggering Plex scan");

        let response = self
            .get(&format!("/library/sections/{section_id}/refresh"))
            .query(&[("path", path.to_string_lossy().as_ref())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PlexmonError::HttpStatus(response.status().as_u16()));
        }

        debug!(path = %path.display(), "successfully triggered scan");
        Ok(())
    }
}

#[async_trait(?Send)]
impl ScanDispatcher for PlexClient {
    async fn check_connectivity(&self) -> Result<()> {
        self.identity().await
    }

    async fn scan(&self, path: &Path, section_id: i64) -> Result<()> {
        self.trigger_scan(path, section_id).await
    }
}
