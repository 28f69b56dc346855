// src/engine/runtime.rs

//! The event loop binding source, watch set, cache, scheduler and
//! dispatcher.
//!
//! One task owns all four subsystems; nothing here is shared across
//! threads, so there are no locks. The loop blocks on the event source for
//! at most the time until the scheduler's next deadline, handles whatever
//! arrived, then drains due scans. The only other suspension point is the
//! dispatcher's HTTP round trip inside the drain, which the debounce window
//! makes tolerable.
//!
//! No error past startup is fatal: a directory that cannot be read or a
//! dispatch that fails degrades coverage for one path and the loop moves
//! on.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::cache::StructureCache;
use crate::config;
use crate::errors::Result;
use crate::sched::{ScanDispatcher, ScanScheduler};
use crate::watch::{
    scan_new_directories, watch_tree, SourceEvent, VnodeEventSource, WatchSet,
};

/// Bounds on the per-wait event batch. A quiet process asks for few events;
/// a busy one amortizes wakeups, capped so a storm cannot demand an
/// arbitrarily large batch.
const MIN_EVENT_BATCH: usize = 16;
const MAX_EVENT_BATCH: usize = 256;

/// The daemon core: every long-lived value lives here, constructed once at
/// startup and owned by the loop until shutdown.
pub struct Runtime<S, C, D> {
    source: S,
    watches: WatchSet,
    cache: C,
    scheduler: ScanScheduler,
    dispatcher: D,
    running: Arc<AtomicBool>,
    config_path: PathBuf,
}

impl<S, C, D> Runtime<S, C, D>
where
    S: VnodeEventSource,
    C: StructureCache,
    D: ScanDispatcher,
{
    pub fn new(
        source: S,
        watches: WatchSet,
        cache: C,
        scheduler: ScanScheduler,
        dispatcher: D,
        running: Arc<AtomicBool>,
        config_path: PathBuf,
    ) -> Self {
        Self {
            source,
            watches,
            cache,
            scheduler,
            dispatcher,
            running,
            config_path,
        }
    }

    /// Main event loop. Returns after a shutdown control event (or when the
    /// event source closes).
    pub async fn run(mut self) -> Result<()> {
        info!("event loop started");
        self.running.store(true, Ordering::SeqCst);

        while self.running.load(Ordering::SeqCst) {
            self.step().await;
        }

        info!("event loop exiting");
        Ok(())
    }

    /// One wait-handle-drain cycle.
    async fn step(&mut self) {
        let now = Instant::now();
        let timeout = self
            .scheduler
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now));
        let max_batch = self
            .watches
            .active_count()
            .clamp(MIN_EVENT_BATCH, MAX_EVENT_BATCH);

        let events = self.source.next_batch(timeout, max_batch).await;

        for event in events {
            match event {
                SourceEvent::Shutdown => {
                    info!("received exit event");
                    self.running.store(false, Ordering::SeqCst);
                }
                SourceEvent::Reload => {
                    self.reload_config();
                }
                SourceEvent::WatchError { path, message } => {
                    warn!(message = %message, "watch backend error");
                    if let Some(path) = path {
                        if let Some(index) = self.watches.index_of(&path) {
                            self.watches.remove(&mut self.source, index);
                        }
                    }
                }
                SourceEvent::Vnode { token, flags } => {
                    if flags.is_empty() {
                        continue;
                    }
                    let Some(record) = self.watches.resolve(token) else {
                        debug!(?token, "event for stale watch token, ignoring");
                        continue;
                    };
                    let path = record.path.clone();
                    let section_id = record.section_id;
                    debug!(path = %path.display(), ?flags, "change detected");
                    self.handle_vnode(&path, section_id);
                }
            }
        }

        self.scheduler
            .drain_due(&self.dispatcher, Instant::now())
            .await;
    }

    /// React to a change on a watched directory.
    ///
    /// The cache classifies the change; structural deltas adjust the watch
    /// set (removed children unwatched, the subtree rescanned for new or
    /// recreated directories). Whatever the classification, the path is
    /// enqueued; coalescing is the scheduler's job, not ours.
    fn handle_vnode(&mut self, path: &Path, section_id: i64) {
        if !is_directory(path) {
            // Deleted or replaced by a file; let the scan observe it.
            self.scheduler.enqueue(path, section_id, Instant::now());
            return;
        }

        match self.cache.refresh(path) {
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "cache refresh failed, rebuilding subtree watches"
                );
                if let Err(err) = watch_tree(
                    &mut self.watches,
                    &mut self.cache,
                    &mut self.source,
                    path,
                    section_id,
                ) {
                    warn!(path = %path.display(), error = %err, "subtree rebuild failed");
                }
            }
            Ok(outcome) if outcome.changed => {
                for gone in &outcome.removed {
                    if let Some(index) = self.watches.index_of(gone) {
                        self.watches.remove(&mut self.source, index);
                    }
                }
                let registered = scan_new_directories(
                    &mut self.watches,
                    &mut self.cache,
                    &mut self.source,
                    path,
                    section_id,
                );
                debug!(
                    path = %path.display(),
                    removed = outcome.removed.len(),
                    registered,
                    "directory structure changed"
                );
            }
            Ok(_) => {
                debug!(path = %path.display(), "file change without structural delta");
            }
        }

        self.scheduler.enqueue(path, section_id, Instant::now());
    }

    /// SIGHUP handling: reparse the config file in place. Only the debounce
    /// window applies live; connection settings and library roots need a
    /// restart.
    fn reload_config(&mut self) {
        info!(path = %self.config_path.display(), "reloading configuration");
        let reloaded = config::load_from_path(&self.config_path);

        if reloaded.scan_interval != self.scheduler.debounce() {
            info!(
                secs = reloaded.scan_interval.as_secs(),
                "applying reloaded scan_interval"
            );
            self.scheduler.set_debounce(reloaded.scan_interval);
        }
        info!("configuration reloaded (connection settings require a restart)");
    }

    /// Watch count, exposed for wiring-time sanity checks and tests.
    pub fn watch_count(&self) -> usize {
        self.watches.active_count()
    }
}

fn is_directory(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}
