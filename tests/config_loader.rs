use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use plexmon::config::{self, Config, LogLevel};
use tempfile::TempDir;

type TestResult = std::result::Result<(), Box<dyn Error>>;

fn write_config(contents: &str) -> std::io::Result<(TempDir, PathBuf)> {
    let tmp = TempDir::new()?;
    let path = tmp.path().join("plexmon.conf");
    fs::write(&path, contents)?;
    Ok((tmp, path))
}

#[test]
fn missing_file_yields_defaults() -> TestResult {
    let loaded = config::load_from_path("/no/such/plexmon.conf");
    let defaults = Config::default();

    assert_eq!(loaded.plex_url, defaults.plex_url);
    assert_eq!(loaded.plex_token, None);
    assert_eq!(loaded.scan_interval, defaults.scan_interval);
    assert_eq!(loaded.startup_timeout, defaults.startup_timeout);
    assert_eq!(loaded.log_level, LogLevel::Info);
    assert_eq!(loaded.log_file, defaults.log_file);

    Ok(())
}

#[test]
fn full_file_is_parsed_with_comments_and_whitespace() -> TestResult {
    let (_tmp, path) = write_config(
        "# plexmon configuration\n\
         \n\
         plex_url   = http://media.local:32400/\n\
         plex_token = s3cr3t-token\n\
         scan_interval = 3\n\
         startup_timeout = 120\n\
         log_level = debug\n\
         log_file = /tmp/plexmon-test.log\n",
    )?;

    let loaded = config::load_from_path(&path);

    // Trailing slash on the URL is trimmed so endpoint joins stay clean.
    assert_eq!(loaded.plex_url, "http://media.local:32400");
    assert_eq!(loaded.plex_token.as_deref(), Some("s3cr3t-token"));
    assert_eq!(loaded.scan_interval, Duration::from_secs(3));
    assert_eq!(loaded.startup_timeout, Duration::from_secs(120));
    assert_eq!(loaded.log_level, LogLevel::Debug);
    assert_eq!(loaded.log_file, PathBuf::from("/tmp/plexmon-test.log"));

    Ok(())
}

#[test]
fn unknown_keys_are_ignored() -> TestResult {
    let (_tmp, path) = write_config(
        "plex_url = http://localhost:32400\n\
         directories = /media\n\
         frobnicate = yes\n",
    )?;

    let loaded = config::load_from_path(&path);
    assert_eq!(loaded.plex_url, "http://localhost:32400");

    Ok(())
}

#[test]
fn invalid_values_fall_back_to_defaults() -> TestResult {
    let (_tmp, path) = write_config(
        "scan_interval = often\n\
         startup_timeout = 0\n\
         log_level = shouty\n",
    )?;

    let loaded = config::load_from_path(&path);
    let defaults = Config::default();

    assert_eq!(loaded.scan_interval, defaults.scan_interval);
    assert_eq!(loaded.startup_timeout, defaults.startup_timeout);
    assert_eq!(loaded.log_level, LogLevel::Info);

    Ok(())
}

#[test]
fn empty_token_counts_as_absent() -> TestResult {
    let (_tmp, path) = write_config("plex_token =\n")?;

    let loaded = config::load_from_path(&path);
    assert_eq!(loaded.plex_token, None);

    Ok(())
}

#[test]
fn lines_without_separator_are_skipped() -> TestResult {
    let (_tmp, path) = write_config(
        "this line has no separator\n\
         plex_url = http://localhost:32400\n",
    )?;

    let loaded = config::load_from_path(&path);
    assert_eq!(loaded.plex_url, "http://localhost:32400");

    Ok(())
}
