// src/watch/watcher.rs

//! The live watch set: one record per monitored directory.
//!
//! Records live in a slab with stable integer indices. A removed slot goes
//! onto a free list and is reclaimed by the next add; its generation counter
//! is bumped so tokens minted for the old occupant stop resolving. The
//! parallel `path → index` map serves duplicate-add detection and targeted
//! removals when the cache reports a deleted child.

use std::collections::HashMap;
use std::fs::{self, File};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::cache::StructureCache;
use crate::errors::{PlexmonError, Result};
use crate::watch::queue::PathQueue;
use crate::watch::source::{VnodeEventSource, WatchToken};

/// Hard cap on simultaneously watched directories.
pub const MAX_WATCHED_DIRS: usize = 2048;

/// Longest accepted watch path, in bytes.
pub const MAX_PATH_BYTES: usize = 1024;

/// A single monitored directory.
///
/// The open handle keeps the underlying vnode addressable for the lifetime
/// of the watch; (device, inode) captured at registration detect
/// delete-then-recreate.
#[derive(Debug)]
pub struct WatchRecord {
    pub path: PathBuf,
    pub section_id: i64,
    /// Held open for the lifetime of the watch; dropped exactly once on
    /// removal.
    _handle: File,
    device: u64,
    inode: u64,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    record: Option<WatchRecord>,
}

/// Slab of watch records with stable indices and O(1) path lookup.
#[derive(Debug)]
pub struct WatchSet {
    slots: Vec<Slot>,
    free: Vec<usize>,
    by_path: HashMap<PathBuf, usize>,
    active: usize,
    fd_ceiling: usize,
}

impl Default for WatchSet {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchSet {
    /// Construct with the fd ceiling derived from the process rlimit.
    pub fn new() -> Self {
        Self::with_fd_ceiling(fd_ceiling_from_rlimit())
    }

    pub fn with_fd_ceiling(fd_ceiling: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_path: HashMap::new(),
            active: 0,
            fd_ceiling: fd_ceiling.max(1),
        }
    }

    /// Number of live watches.
    pub fn active_count(&self) -> usize {
        self.active
    }

    /// Slab index for `path`, if it holds a live record.
    pub fn index_of(&self, path: &Path) -> Option<usize> {
        let &index = self.by_path.get(path)?;
        self.slots
            .get(index)
            .and_then(|slot| slot.record.as_ref())
            .map(|_| index)
    }

    /// Record at `index`, if live.
    pub fn record(&self, index: usize) -> Option<&WatchRecord> {
        self.slots.get(index)?.record.as_ref()
    }

    /// Resolve an event token, validating its generation.
    ///
    /// A mismatched generation means the slot was recycled after the event
    /// was queued; the event belongs to a watch that no longer exists.
    pub fn resolve(&self, token: WatchToken) -> Option<&WatchRecord> {
        let slot = self.slots.get(token.index)?;
        if slot.generation != token.generation {
            return None;
        }
        slot.record.as_ref()
    }

    /// Add `path` to the watch set.
    ///
    /// Idempotent under identity: if the path is already watched and its
    /// (device, inode) still match the on-disk directory, the existing index
    /// is returned without opening anything. A stale record (recreated
    /// directory) is pruned first. Partial failures unwind exactly: either
    /// the record is fully registered or the set is unchanged.
    pub fn add<S>(&mut self, source: &mut S, path: &Path, section_id: i64) -> Result<usize>
    where
        S: VnodeEventSource + ?Sized,
    {
        if path.as_os_str().len() >= MAX_PATH_BYTES {
            return Err(PlexmonError::PathTooLong(path.to_path_buf()));
        }

        if let Some(index) = self.index_of(path) {
            if self.identity_matches(index) {
                debug!(path = %path.display(), index, "directory already watched");
                return Ok(index);
            }
            debug!(path = %path.display(), "pruning stale watch before re-adding");
            self.remove(source, index);
        }

        if self.active >= self.fd_ceiling {
            warn!(
                path = %path.display(),
                active = self.active,
                ceiling = self.fd_ceiling,
                "watch limit reached"
            );
            return Err(PlexmonError::WatchLimit(self.active));
        }

        let handle = File::open(path)?;
        let meta = handle.metadata()?;
        if !meta.is_dir() {
            return Err(PlexmonError::NotADirectory(path.to_path_buf()));
        }

        let index = self.free.pop().unwrap_or_else(|| {
            self.slots.push(Slot::default());
            self.slots.len() - 1
        });
        let token = WatchToken {
            index,
            generation: self.slots[index].generation,
        };

        self.slots[index].record = Some(WatchRecord {
            path: path.to_path_buf(),
            section_id,
            _handle: handle,
            device: meta.dev(),
            inode: meta.ino(),
        });
        self.by_path.insert(path.to_path_buf(), index);

        if let Err(err) = source.register(path, token) {
            // Unwind: drop the record (closing the handle), release the
            // slot, and restore the map.
            self.by_path.remove(path);
            self.slots[index].record = None;
            self.free.push(index);
            return Err(err);
        }

        self.active += 1;
        debug!(path = %path.display(), index, section_id, "watching directory");
        Ok(index)
    }

    /// Remove the record at `index`: unregister from the event source,
    /// close the handle, bump the generation and recycle the slot.
    pub fn remove<S>(&mut self, source: &mut S, index: usize)
    where
        S: VnodeEventSource + ?Sized,
    {
        let Some(slot) = self.slots.get_mut(index) else {
            return;
        };
        let Some(record) = slot.record.take() else {
            return;
        };

        debug!(path = %record.path.display(), index, "removing directory from watch set");
        source.unregister(&record.path);
        self.by_path.remove(&record.path);
        slot.generation += 1;
        self.free.push(index);
        self.active -= 1;
        // `record` (and with it the directory handle) drops here.
    }

    /// True if `path` is watched and its identity still matches the disk.
    ///
    /// A record whose directory was deleted or recreated is pruned as a
    /// side effect, mirroring what the next event on it would do.
    pub fn is_watched_current<S>(&mut self, source: &mut S, path: &Path) -> bool
    where
        S: VnodeEventSource + ?Sized,
    {
        let Some(index) = self.index_of(path) else {
            return false;
        };
        if self.identity_matches(index) {
            return true;
        }
        self.remove(source, index);
        false
    }

    fn identity_matches(&self, index: usize) -> bool {
        let Some(record) = self.record(index) else {
            return false;
        };
        match fs::metadata(&record.path) {
            Ok(meta) => meta.dev() == record.device && meta.ino() == record.inode,
            Err(_) => false,
        }
    }
}

/// Soft fd ceiling: half the process limit, capped by [`MAX_WATCHED_DIRS`].
fn fd_ceiling_from_rlimit() -> usize {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit only writes into the struct we hand it.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) };
    if rc != 0 {
        return MAX_WATCHED_DIRS;
    }
    ((limit.rlim_cur / 2) as usize).min(MAX_WATCHED_DIRS).max(1)
}

/// Register `root` and every directory below it, breadth first.
///
/// Used at startup for each library location and as the fallback when a
/// cache refresh fails mid-run. The cache is consulted for children and
/// refreshed on miss; unreadable directories are skipped with a warning.
pub fn watch_tree<S, C>(
    watches: &mut WatchSet,
    cache: &mut C,
    source: &mut S,
    root: &Path,
    section_id: i64,
) -> Result<()>
where
    S: VnodeEventSource + ?Sized,
    C: StructureCache + ?Sized,
{
    let mut queue = PathQueue::new();
    queue.enqueue(root)?;

    debug!(root = %root.display(), "starting directory tree registration");

    while let Some(current) = queue.dequeue() {
        if !watches.is_watched_current(source, &current) {
            if let Err(err) = watches.add(source, &current, section_id) {
                warn!(path = %current.display(), error = %err, "failed to watch directory");
                continue;
            }
        }

        let mut children = cached_children(cache, &current);
        if children.is_none() {
            match cache.refresh(&current) {
                Ok(_) => children = cached_children(cache, &current),
                Err(err) => {
                    warn!(path = %current.display(), error = %err, "failed to read directory");
                    continue;
                }
            }
        }

        for child in children.unwrap_or_default() {
            if let Err(err) = queue.enqueue(child) {
                warn!(root = %root.display(), "tree walk aborted: path queue full");
                queue.clear();
                return Err(err);
            }
        }
    }

    Ok(())
}

/// After a structural change under `root`, register any unwatched
/// subdirectories, breadth first. Returns the number of new registrations.
///
/// Stale records encountered along the way (delete-then-recreate) are
/// pruned by the identity check and immediately re-registered against the
/// new inode. Only newly registered directories are descended into; an
/// already-watched child covers its own subtree.
pub fn scan_new_directories<S, C>(
    watches: &mut WatchSet,
    cache: &mut C,
    source: &mut S,
    root: &Path,
    section_id: i64,
) -> usize
where
    S: VnodeEventSource + ?Sized,
    C: StructureCache + ?Sized,
{
    let mut queue = PathQueue::new();
    if queue.enqueue(root).is_err() {
        return 0;
    }

    let mut registered = 0;

    while let Some(current) = queue.dequeue() {
        let Some(children) = cached_children(cache, &current) else {
            continue;
        };

        for child in children {
            if watches.is_watched_current(source, &child) {
                continue;
            }

            match watches.add(source, &child, section_id) {
                Ok(_) => {
                    registered += 1;
                    // Newly seen directory: make sure its own children are
                    // cached before descending.
                    if cache.subdirs(&child).is_none() {
                        if let Err(err) = cache.refresh(&child) {
                            warn!(path = %child.display(), error = %err, "failed to read new directory");
                            continue;
                        }
                    }
                    if queue.enqueue(&child).is_err() {
                        warn!(root = %root.display(), "subtree scan aborted: path queue full");
                        return registered;
                    }
                }
                Err(err) => {
                    warn!(path = %child.display(), error = %err, "failed to watch new directory");
                }
            }
        }
    }

    if registered > 0 {
        info!(root = %root.display(), registered, "registered new directories");
    }

    registered
}

fn cached_children<C>(cache: &C, path: &Path) -> Option<Vec<PathBuf>>
where
    C: StructureCache + ?Sized,
{
    cache
        .subdirs(path)
        .map(|set| set.iter().cloned().collect())
}
