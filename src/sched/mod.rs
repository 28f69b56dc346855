// src/sched/mod.rs

//! Pending-scan scheduler.
//!
//! Every filesystem event ends up here as an `enqueue`; the scheduler's job
//! is to emit the smallest possible set of scan dispatches once the burst
//! that produced the events has died down. Three rules do the coalescing:
//!
//! - an event on a path covered by a pending ancestor scan is absorbed into
//!   the ancestor (its deadline extended);
//! - an event on a path that covers pending descendant scans replaces all
//!   of them with a single entry;
//! - an event on an exactly-pending path extends that entry's deadline.
//!
//! "Ancestor" is always component-wise: `/lib/Movies` is unrelated to
//! `/lib/Movies2`. At any instant no live entry's path is a proper prefix
//! of another live entry's path, and no path appears twice.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::errors::Result;

/// Cap on simultaneously pending scans; the burst coalescing makes hitting
/// it unlikely outside pathological event storms.
pub const MAX_PENDING_SCANS: usize = 2048;

/// Boundary to the external indexing client.
///
/// Both calls block the event loop for the duration of the HTTP round
/// trip, which the debounce window makes acceptable. Abstract so tests can
/// substitute a recording fake.
#[async_trait(?Send)]
pub trait ScanDispatcher {
    /// Liveness probe against the indexer.
    async fn check_connectivity(&self) -> Result<()>;

    /// Trigger a partial scan of `path` within the given library section.
    async fn scan(&self, path: &Path, section_id: i64) -> Result<()>;
}

/// One coalesced scan request.
#[derive(Debug, Clone)]
struct PendingScan {
    path: PathBuf,
    section_id: i64,
    /// When the first event that created this entry arrived.
    first_event_time: Instant,
    /// Earliest instant at which dispatch is allowed; extended by every
    /// further event on the same or a covered path.
    scheduled_time: Instant,
    /// Cleared on dispatch; cleared entries await compaction.
    pending: bool,
}

/// Table of pending scans keyed by path, with debounce and coalescing.
///
/// All time-dependent operations take `now` explicitly so tests can drive
/// the clock.
#[derive(Debug)]
pub struct ScanScheduler {
    pending: Vec<PendingScan>,
    debounce: Duration,
    capacity: usize,
}

impl ScanScheduler {
    pub fn new(debounce: Duration) -> Self {
        Self::with_capacity(debounce, MAX_PENDING_SCANS)
    }

    pub fn with_capacity(debounce: Duration, capacity: usize) -> Self {
        Self {
            pending: Vec::new(),
            debounce,
            capacity: capacity.max(1),
        }
    }

    /// Current debounce window.
    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Replace the debounce window (config reload). Already-scheduled
    /// deadlines are left as they are.
    pub fn set_debounce(&mut self, debounce: Duration) {
        self.debounce = debounce;
    }

    /// Number of live (not yet dispatched) entries.
    pub fn pending_count(&self) -> usize {
        self.pending.iter().filter(|p| p.pending).count()
    }

    /// Record an event on `path`, coalescing per the rules above.
    pub fn enqueue(&mut self, path: &Path, section_id: i64, now: Instant) {
        let deadline = now + self.debounce;

        // Covered by a pending ancestor: extend it and absorb the event.
        if let Some(entry) = self
            .pending
            .iter_mut()
            .find(|p| p.pending && is_proper_ancestor(&p.path, path))
        {
            entry.scheduled_time = deadline;
            debug!(
                path = %path.display(),
                ancestor = %entry.path.display(),
                "event covered by pending ancestor scan"
            );
            return;
        }

        // Exact match: extend the deadline to coalesce with this event.
        if let Some(entry) = self
            .pending
            .iter_mut()
            .find(|p| p.pending && p.path == path)
        {
            entry.scheduled_time = deadline;
            debug!(path = %path.display(), "rescheduled pending scan");
            return;
        }

        // This path covers pending descendants: collapse them into one
        // entry for the ancestor.
        let mut collapsed = 0;
        for entry in self
            .pending
            .iter_mut()
            .filter(|p| p.pending && is_proper_ancestor(path, &p.path))
        {
            debug!(
                descendant = %entry.path.display(),
                path = %path.display(),
                "collapsing descendant scan into ancestor"
            );
            entry.pending = false;
            collapsed += 1;
        }
        if collapsed > 0 {
            debug!(path = %path.display(), collapsed, "scheduled consolidated scan");
        }

        // Capacity pressure: evict the entry that was due soonest.
        if self.pending_count() >= self.capacity {
            if let Some(evict) = self
                .pending
                .iter_mut()
                .filter(|p| p.pending)
                .min_by_key(|p| p.scheduled_time)
            {
                warn!(path = %evict.path.display(), "pending table full, evicting earliest scan");
                evict.pending = false;
            }
        }

        self.pending.retain(|p| p.pending);
        self.pending.push(PendingScan {
            path: path.to_path_buf(),
            section_id,
            first_event_time: now,
            scheduled_time: deadline,
            pending: true,
        });
        debug!(path = %path.display(), "scheduled scan");
    }

    /// Earliest deadline among live entries, or `None` when idle. The event
    /// loop bounds its kernel wait with this.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .iter()
            .filter(|p| p.pending)
            .map(|p| p.scheduled_time)
            .min()
    }

    /// Dispatch every entry whose deadline has passed.
    ///
    /// Order within one drain is unspecified. Each entry is dispatched,
    /// then marked not pending; the table is compacted once after the sweep
    /// so the drain stays re-entrant if a dispatch unwinds. Dispatch
    /// failures are logged and swallowed: the indexer is idempotent and the
    /// next event on the path re-enqueues.
    pub async fn drain_due<D>(&mut self, dispatcher: &D, now: Instant) -> usize
    where
        D: ScanDispatcher + ?Sized,
    {
        let mut dispatched = 0;

        for i in 0..self.pending.len() {
            if !self.pending[i].pending || self.pending[i].scheduled_time > now {
                continue;
            }

            let path = self.pending[i].path.clone();
            let section_id = self.pending[i].section_id;
            let delayed = now.duration_since(self.pending[i].first_event_time);
            info!(
                path = %path.display(),
                section_id,
                delayed_secs = delayed.as_secs(),
                "executing scan"
            );

            if let Err(err) = dispatcher.scan(&path, section_id).await {
                warn!(path = %path.display(), error = %err, "scan dispatch failed");
            }

            self.pending[i].pending = false;
            dispatched += 1;
        }

        if dispatched > 0 {
            self.pending.retain(|p| p.pending);
        }

        dispatched
    }
}

/// Component-wise proper-ancestor test.
///
/// `Path::starts_with` compares whole components, so `/lib/Movies` is not
/// an ancestor of `/lib/Movies2`.
fn is_proper_ancestor(ancestor: &Path, child: &Path) -> bool {
    child != ancestor && child.starts_with(ancestor)
}
