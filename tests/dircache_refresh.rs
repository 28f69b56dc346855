use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::thread::sleep;
use std::time::Duration;

use plexmon::cache::{DirCache, StructureCache};
use tempfile::TempDir;

type TestResult = std::result::Result<(), Box<dyn Error>>;

/// The cache compares whole-second mtimes; mutations inside the same second
/// as the previous refresh are only caught by the next mtime tick.
fn cross_mtime_boundary() {
    sleep(Duration::from_millis(1100));
}

#[test]
fn first_refresh_reports_every_subdirectory_as_added() -> TestResult {
    let tmp = TempDir::new()?;
    fs::create_dir(tmp.path().join("Movies"))?;
    fs::create_dir(tmp.path().join("TV"))?;
    fs::write(tmp.path().join("notes.txt"), "not a directory")?;

    let mut cache = DirCache::new();
    let outcome = cache.refresh(tmp.path())?;

    assert!(outcome.changed);
    let mut added = outcome.added.clone();
    added.sort();
    assert_eq!(
        added,
        vec![tmp.path().join("Movies"), tmp.path().join("TV")]
    );
    assert!(outcome.removed.is_empty());

    Ok(())
}

#[test]
fn refresh_is_idempotent_without_filesystem_changes() -> TestResult {
    let tmp = TempDir::new()?;
    fs::create_dir(tmp.path().join("Movies"))?;

    let mut cache = DirCache::new();
    cache.refresh(tmp.path())?;
    let before: Vec<PathBuf> = {
        let mut v: Vec<_> = cache.subdirs(tmp.path()).unwrap().iter().cloned().collect();
        v.sort();
        v
    };

    let outcome = cache.refresh(tmp.path())?;
    assert!(!outcome.changed);
    assert!(outcome.added.is_empty());
    assert!(outcome.removed.is_empty());

    let after: Vec<PathBuf> = {
        let mut v: Vec<_> = cache.subdirs(tmp.path()).unwrap().iter().cloned().collect();
        v.sort();
        v
    };
    assert_eq!(before, after);

    Ok(())
}

#[test]
fn detects_added_and_removed_subdirectories() -> TestResult {
    let tmp = TempDir::new()?;
    fs::create_dir(tmp.path().join("Old"))?;

    let mut cache = DirCache::new();
    cache.refresh(tmp.path())?;

    cross_mtime_boundary();
    fs::remove_dir(tmp.path().join("Old"))?;
    fs::create_dir(tmp.path().join("NewShow"))?;

    let outcome = cache.refresh(tmp.path())?;
    assert!(outcome.changed);
    assert_eq!(outcome.added, vec![tmp.path().join("NewShow")]);
    assert_eq!(outcome.removed, vec![tmp.path().join("Old")]);

    let subdirs = cache.subdirs(tmp.path()).unwrap();
    assert!(subdirs.contains(&tmp.path().join("NewShow")));
    assert!(!subdirs.contains(&tmp.path().join("Old")));

    Ok(())
}

#[test]
fn symlinks_are_skipped_not_followed() -> TestResult {
    let tmp = TempDir::new()?;
    let elsewhere = TempDir::new()?;
    fs::create_dir(tmp.path().join("Movies"))?;
    std::os::unix::fs::symlink(elsewhere.path(), tmp.path().join("link"))?;

    let mut cache = DirCache::new();
    let outcome = cache.refresh(tmp.path())?;

    assert_eq!(outcome.added, vec![tmp.path().join("Movies")]);
    let subdirs = cache.subdirs(tmp.path()).unwrap();
    assert!(!subdirs.contains(&tmp.path().join("link")));

    Ok(())
}

#[test]
fn files_never_enter_the_subdirectory_set() -> TestResult {
    let tmp = TempDir::new()?;
    fs::write(tmp.path().join("movie.mkv"), b"")?;
    fs::write(tmp.path().join("cover.jpg"), b"")?;

    let mut cache = DirCache::new();
    let outcome = cache.refresh(tmp.path())?;

    // A directory holding only files validates with an empty set; the
    // refresh itself still counts as the first observation.
    assert!(outcome.added.is_empty());
    assert!(cache.subdirs(tmp.path()).unwrap().is_empty());

    Ok(())
}

#[test]
fn failed_refresh_leaves_the_entry_untouched() -> TestResult {
    let tmp = TempDir::new()?;
    let root = tmp.path().join("lib");
    fs::create_dir(&root)?;
    fs::create_dir(root.join("Movies"))?;

    let mut cache = DirCache::new();
    cache.refresh(&root)?;

    fs::remove_dir_all(&root)?;

    assert!(cache.refresh(&root).is_err());
    // The last validated observation is still served.
    let subdirs = cache.subdirs(&root).unwrap();
    assert!(subdirs.contains(&root.join("Movies")));

    Ok(())
}

#[test]
fn unknown_path_has_no_cached_subdirs() -> TestResult {
    let cache = DirCache::new();
    assert!(cache.subdirs(std::path::Path::new("/no/such/path")).is_none());
    Ok(())
}
