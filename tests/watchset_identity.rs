use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use plexmon::cache::{DirCache, StructureCache};
use plexmon::errors::{PlexmonError, Result as PlexmonResult};
use plexmon::watch::{
    scan_new_directories, watch_tree, SourceEvent, VnodeEventSource, WatchSet, WatchToken,
};
use tempfile::TempDir;

type TestResult = std::result::Result<(), Box<dyn Error>>;

/// Event source that records registrations and never delivers anything.
#[derive(Default)]
struct NullSource {
    registered: HashMap<PathBuf, WatchToken>,
}

#[async_trait(?Send)]
impl VnodeEventSource for NullSource {
    fn register(&mut self, path: &Path, token: WatchToken) -> PlexmonResult<()> {
        self.registered.insert(path.to_path_buf(), token);
        Ok(())
    }

    fn unregister(&mut self, path: &Path) {
        self.registered.remove(path);
    }

    async fn next_batch(
        &mut self,
        _timeout: Option<Duration>,
        _max_events: usize,
    ) -> Vec<SourceEvent> {
        Vec::new()
    }
}

/// Event source whose registrations always fail, for unwind testing.
struct RefusingSource;

#[async_trait(?Send)]
impl VnodeEventSource for RefusingSource {
    fn register(&mut self, _path: &Path, _token: WatchToken) -> PlexmonResult<()> {
        Err(PlexmonError::Config("registration refused".into()))
    }

    fn unregister(&mut self, _path: &Path) {}

    async fn next_batch(
        &mut self,
        _timeout: Option<Duration>,
        _max_events: usize,
    ) -> Vec<SourceEvent> {
        Vec::new()
    }
}

#[test]
fn add_is_idempotent_while_identity_is_preserved() -> TestResult {
    let tmp = TempDir::new()?;
    let mut source = NullSource::default();
    let mut watches = WatchSet::new();

    let first = watches.add(&mut source, tmp.path(), 1)?;
    let second = watches.add(&mut source, tmp.path(), 1)?;

    assert_eq!(first, second);
    assert_eq!(watches.active_count(), 1);
    assert_eq!(source.registered.len(), 1);

    Ok(())
}

#[test]
fn recreated_directory_is_pruned_and_gets_a_fresh_token() -> TestResult {
    let tmp = TempDir::new()?;
    let dir = tmp.path().join("X");
    fs::create_dir(&dir)?;

    let mut source = NullSource::default();
    let mut watches = WatchSet::new();

    let index = watches.add(&mut source, &dir, 1)?;
    let old_token = source.registered[&dir];

    // Delete and recreate: same path, new inode.
    fs::remove_dir(&dir)?;
    fs::create_dir(&dir)?;

    let new_index = watches.add(&mut source, &dir, 1)?;
    let new_token = source.registered[&dir];

    // The slot is recycled, but the old token no longer resolves.
    assert_eq!(index, new_index);
    assert_eq!(watches.active_count(), 1);
    assert_ne!(old_token, new_token);
    assert!(watches.resolve(old_token).is_none());
    assert_eq!(
        watches.resolve(new_token).map(|r| r.path.as_path()),
        Some(dir.as_path())
    );

    Ok(())
}

#[test]
fn removed_slot_is_reused_with_a_bumped_generation() -> TestResult {
    let tmp = TempDir::new()?;
    let a = tmp.path().join("a");
    let b = tmp.path().join("b");
    fs::create_dir(&a)?;
    fs::create_dir(&b)?;

    let mut source = NullSource::default();
    let mut watches = WatchSet::new();

    let index_a = watches.add(&mut source, &a, 1)?;
    let token_a = source.registered[&a];
    watches.remove(&mut source, index_a);
    assert_eq!(watches.active_count(), 0);

    let index_b = watches.add(&mut source, &b, 1)?;
    let token_b = source.registered[&b];

    // The freed slot is claimed by the next add; the stale token is dead.
    assert_eq!(index_a, index_b);
    assert!(watches.resolve(token_a).is_none());
    assert_eq!(
        watches.resolve(token_b).map(|r| r.path.as_path()),
        Some(b.as_path())
    );

    Ok(())
}

#[test]
fn fd_ceiling_is_enforced_at_add() -> TestResult {
    let tmp = TempDir::new()?;
    let a = tmp.path().join("a");
    let b = tmp.path().join("b");
    fs::create_dir(&a)?;
    fs::create_dir(&b)?;

    let mut source = NullSource::default();
    let mut watches = WatchSet::with_fd_ceiling(1);

    watches.add(&mut source, &a, 1)?;
    let result = watches.add(&mut source, &b, 1);

    assert!(matches!(result, Err(PlexmonError::WatchLimit(1))));
    assert_eq!(watches.active_count(), 1);

    Ok(())
}

#[test]
fn over_long_paths_are_rejected() -> TestResult {
    let mut source = NullSource::default();
    let mut watches = WatchSet::new();

    let long = PathBuf::from(format!("/{}", "x".repeat(2048)));
    let result = watches.add(&mut source, &long, 1);

    assert!(matches!(result, Err(PlexmonError::PathTooLong(_))));
    assert_eq!(watches.active_count(), 0);

    Ok(())
}

#[test]
fn failed_registration_unwinds_completely() -> TestResult {
    let tmp = TempDir::new()?;
    let mut refusing = RefusingSource;
    let mut watches = WatchSet::new();

    assert!(watches.add(&mut refusing, tmp.path(), 1).is_err());
    assert_eq!(watches.active_count(), 0);
    assert!(watches.index_of(tmp.path()).is_none());

    // The set is still usable afterwards.
    let mut source = NullSource::default();
    watches.add(&mut source, tmp.path(), 1)?;
    assert_eq!(watches.active_count(), 1);

    Ok(())
}

#[test]
fn watch_tree_registers_the_whole_tree_breadth_first() -> TestResult {
    let tmp = TempDir::new()?;
    let root = tmp.path().join("lib");
    fs::create_dir_all(root.join("Movies/A"))?;
    fs::create_dir_all(root.join("TV/Show/Season 1"))?;
    fs::write(root.join("Movies/film.mkv"), b"")?;

    let mut source = NullSource::default();
    let mut watches = WatchSet::new();
    let mut cache = DirCache::new();

    watch_tree(&mut watches, &mut cache, &mut source, &root, 7)?;

    for expected in [
        root.clone(),
        root.join("Movies"),
        root.join("Movies/A"),
        root.join("TV"),
        root.join("TV/Show"),
        root.join("TV/Show/Season 1"),
    ] {
        assert!(
            watches.index_of(&expected).is_some(),
            "missing watch for {expected:?}"
        );
    }
    assert_eq!(watches.active_count(), 6);

    Ok(())
}

#[test]
fn scan_new_directories_registers_only_unwatched_children() -> TestResult {
    let tmp = TempDir::new()?;
    let root = tmp.path().join("lib");
    fs::create_dir_all(root.join("Existing"))?;

    let mut source = NullSource::default();
    let mut watches = WatchSet::new();
    let mut cache = DirCache::new();
    watch_tree(&mut watches, &mut cache, &mut source, &root, 1)?;
    assert_eq!(watches.active_count(), 2);

    // A new child appears and the cache picks it up on refresh. The sleep
    // crosses the whole-second mtime boundary the cache compares at.
    std::thread::sleep(Duration::from_millis(1100));
    fs::create_dir(root.join("NewShow"))?;
    cache.refresh(&root)?;

    let registered = scan_new_directories(&mut watches, &mut cache, &mut source, &root, 1);

    assert_eq!(registered, 1);
    assert!(watches.index_of(&root.join("NewShow")).is_some());
    assert_eq!(watches.active_count(), 3);

    Ok(())
}
