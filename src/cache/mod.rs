// src/cache/mod.rs

//! Directory-structure cache.
//!
//! For every directory the daemon has observed, the cache remembers the set
//! of immediate subdirectories and the mtime at which that set was read.
//! `refresh` answers the one question the watcher cares about: did this
//! directory's subdirectory set change since the last observation, and if
//! so, which children appeared or disappeared. Files never enter the cache;
//! a change that touches only files reports `changed` without a delta.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::errors::Result;

/// Delta produced by [`StructureCache::refresh`].
///
/// `added` and `removed` hold absolute paths of immediate subdirectories.
/// `changed` is also set when the directory's mtime moved during the scan,
/// even if the visible set stayed equal, so the next refresh re-diffs.
#[derive(Debug, Default)]
pub struct RefreshOutcome {
    pub changed: bool,
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl RefreshOutcome {
    fn unchanged() -> Self {
        Self::default()
    }
}

/// Capability consumed by the watcher and the BFS registration walks.
///
/// Abstract so the event loop can run against an in-memory fake in tests.
pub trait StructureCache {
    /// Re-read `path` and report the subdirectory delta since the previous
    /// observation. Fails without mutating the entry when the directory
    /// cannot be read.
    fn refresh(&mut self, path: &Path) -> Result<RefreshOutcome>;

    /// Borrow the cached subdirectory set, if `path` has been validated.
    fn subdirs(&self, path: &Path) -> Option<&HashSet<PathBuf>>;
}

#[derive(Debug, Default)]
struct CachedDir {
    /// Directory mtime (whole seconds) sampled when `subdirs` was read.
    mtime: i64,
    /// Absolute paths of the immediate subdirectories.
    subdirs: HashSet<PathBuf>,
    /// True once `subdirs` reflects a completed on-disk scan.
    validated: bool,
}

/// In-memory cache of directory structures, keyed by absolute path.
///
/// Entries live for the process lifetime; a media library has few enough
/// directories that eviction is not worth its bookkeeping.
#[derive(Debug, Default)]
pub struct DirCache {
    entries: HashMap<PathBuf, CachedDir>,
}

impl DirCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl StructureCache for DirCache {
    fn refresh(&mut self, path: &Path) -> Result<RefreshOutcome> {
        let t0 = mtime_seconds(path)?;

        // Hot path: a validated entry whose mtime has not moved needs no
        // directory read at all.
        if let Some(entry) = self.entries.get(path) {
            if entry.validated && entry.mtime == t0 {
                debug!(path = %path.display(), "directory unchanged, using cached data");
                return Ok(RefreshOutcome::unchanged());
            }
        }

        // Read the directory before touching the entry, so a failed read
        // leaves the cache exactly as it was.
        let on_disk = scan_children(path)?;

        // Re-sample the mtime after the read; if it moved, a concurrent
        // mutation may have been missed, so the refresh counts as changed
        // and keeps t0 to force a re-diff next time.
        let raced = mtime_seconds(path).map(|t1| t1 != t0).unwrap_or(true);

        let entry = self.entries.entry(path.to_path_buf()).or_default();

        // Mark: snapshot the currently cached children.
        let mut unseen: HashSet<PathBuf> = entry.subdirs.clone();

        // Sweep: anything on disk that is not in the snapshot is new.
        let mut added = Vec::new();
        for child in on_disk {
            if !unseen.remove(&child) {
                entry.subdirs.insert(child.clone());
                added.push(child);
            }
        }

        // Reap: whatever is left of the snapshot has disappeared.
        let mut removed = Vec::with_capacity(unseen.len());
        for gone in unseen {
            entry.subdirs.remove(&gone);
            removed.push(gone);
        }

        entry.mtime = t0;
        entry.validated = true;

        let changed = !added.is_empty() || !removed.is_empty() || raced;
        if changed {
            debug!(
                path = %path.display(),
                added = added.len(),
                removed = removed.len(),
                raced,
                "directory structure changed"
            );
        }

        Ok(RefreshOutcome {
            changed,
            added,
            removed,
        })
    }

    fn subdirs(&self, path: &Path) -> Option<&HashSet<PathBuf>> {
        self.entries
            .get(path)
            .filter(|entry| entry.validated)
            .map(|entry| &entry.subdirs)
    }
}

/// Directory mtime in whole seconds.
fn mtime_seconds(path: &Path) -> Result<i64> {
    Ok(fs::metadata(path)?.mtime())
}

/// Collect the immediate subdirectories of `path`.
///
/// Symbolic links are skipped, not followed: a link into another tree must
/// not pull that tree into the watch set. Entries whose type cannot be read
/// from the directory stream fall back to a stat call; entries that fail
/// even that are logged and skipped.
fn scan_children(path: &Path) -> Result<Vec<PathBuf>> {
    let mut children = Vec::new();

    for entry in fs::read_dir(path)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable directory entry");
                continue;
            }
        };
        let child = entry.path();

        let is_dir = match entry.file_type() {
            Ok(file_type) if file_type.is_symlink() => false,
            Ok(file_type) => file_type.is_dir(),
            Err(_) => match fs::symlink_metadata(&child) {
                Ok(meta) => meta.file_type().is_dir(),
                Err(err) => {
                    warn!(path = %child.display(), error = %err, "failed to stat entry, skipping");
                    false
                }
            },
        };

        if is_dir {
            children.push(child);
        }
    }

    Ok(children)
}
