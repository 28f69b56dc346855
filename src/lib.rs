// src/lib.rs

pub mod cache;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod plex;
pub mod sched;
pub mod watch;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use crate::cache::DirCache;
use crate::config::Config;
use crate::engine::Runtime;
use crate::plex::PlexClient;
use crate::sched::ScanScheduler;
use crate::watch::{watch_tree, ControlEvent, ControlSender, NotifyEventSource, WatchSet};

/// High-level entry point used by `main.rs`, called inside the tokio
/// runtime (after daemonization and logging are set up).
///
/// This wires together:
/// - the Plex client (connectivity probe + library discovery)
/// - the event source, watch set, cache and scheduler
/// - signal-driven shutdown/reload
/// - the event loop
pub async fn run(config: Config, config_path: PathBuf) -> anyhow::Result<()> {
    let client = PlexClient::new(&config)?;
    client
        .wait_for_server(config.startup_timeout)
        .await
        .context("could not reach the Plex Media Server")?;

    let sections = client.sections().await.context("library discovery failed")?;
    if sections.is_empty() {
        bail!("the server reported no library sections to watch");
    }

    let mut source = NotifyEventSource::new()?;
    let running = Arc::new(AtomicBool::new(true));
    spawn_signal_listeners(source.control_sender(), running.clone())?;

    let mut watches = WatchSet::new();
    let mut cache = DirCache::new();

    for section in &sections {
        for location in &section.locations {
            info!(
                section_id = section.id,
                path = %location.display(),
                "monitoring library"
            );
            if let Err(err) = watch_tree(&mut watches, &mut cache, &mut source, location, section.id)
            {
                warn!(
                    path = %location.display(),
                    error = %err,
                    "failed to register library tree"
                );
            }
        }
    }

    if watches.active_count() == 0 {
        bail!("no library directories could be watched");
    }
    info!(
        directories = watches.active_count(),
        "monitoring directories for changes"
    );

    let scheduler = ScanScheduler::new(config.scan_interval);
    let runtime = Runtime::new(
        source,
        watches,
        cache,
        scheduler,
        client,
        running,
        config_path,
    );
    runtime.run().await?;

    info!("plexmon terminated");
    Ok(())
}

/// Translate POSIX signals into control events on the event channel.
///
/// The handlers never touch daemon state: SIGINT/SIGTERM raise the shutdown
/// event (plus the atomic flag as a secondary guard), SIGHUP raises reload.
fn spawn_signal_listeners(
    control: ControlSender,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sigint.recv() => {
                    info!("received SIGINT, shutting down");
                    running.store(false, Ordering::SeqCst);
                    control.send(ControlEvent::Shutdown);
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                    running.store(false, Ordering::SeqCst);
                    control.send(ControlEvent::Shutdown);
                }
                _ = sighup.recv() => {
                    info!("received SIGHUP, reloading configuration");
                    control.send(ControlEvent::Reload);
                }
            }
        }
    });

    Ok(())
}
