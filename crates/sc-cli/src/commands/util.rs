//! Shared utilities for CLI commands.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;
use regex::Regex;
use sc_core::UserId;

use crate::Config;

/// Pre-compiled regex for relative time parsing.
static RELATIVE_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\s+(minute|hour|day|week)s?\s+ago$").unwrap());

/// Conservative bounds for relative time parsing (~1000 years in minutes).
const MAX_RELATIVE_MINUTES: i64 = 1000 * 365 * 24 * 60;

/// Parse a datetime string as either ISO 8601 or a time relative to `now`.
///
/// Supports:
/// - ISO 8601: "2026-01-15T10:30:00Z"
/// - Relative: "2 hours ago", "30 minutes ago", "1 day ago", "1 week ago"
pub fn parse_datetime(s: &str, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    let Some(caps) = RELATIVE_TIME_RE.captures(s) else {
        anyhow::bail!(
            "Invalid datetime: {s}. Use ISO 8601 (e.g., 2026-01-15T10:30:00Z) or relative (e.g., '2 hours ago')"
        );
    };

    let n: i64 = caps[1]
        .parse()
        .context("failed to parse number in relative time")?;

    let (max_for_unit, minutes_per_unit) = match &caps[2] {
        "minute" => (MAX_RELATIVE_MINUTES, 1),
        "hour" => (MAX_RELATIVE_MINUTES / 60, 60),
        "day" => (MAX_RELATIVE_MINUTES / (60 * 24), 60 * 24),
        "week" => (MAX_RELATIVE_MINUTES / (60 * 24 * 7), 60 * 24 * 7),
        unit => anyhow::bail!("Unknown time unit: {unit}"),
    };

    if n > max_for_unit {
        anyhow::bail!("Relative time value too large: {n} {}", &caps[2]);
    }

    Ok(now - Duration::minutes(n * minutes_per_unit))
}

/// Resolves the instant an invocation acts at.
///
/// The wall clock is read once per invocation.
pub fn resolve_now(at: Option<&str>) -> anyhow::Result<DateTime<Utc>> {
    let now = Utc::now();
    match at {
        Some(s) => parse_datetime(s, now),
        None => Ok(now),
    }
}

/// Resolves the acting worker from `--user`, falling back to the configuration.
pub fn resolve_user(flag: Option<&str>, config: &Config) -> anyhow::Result<UserId> {
    let Some(raw) = flag.or(config.user_id.as_deref()) else {
        anyhow::bail!("no user configured: pass --user or set user_id in the config file");
    };
    UserId::new(raw).context("invalid user ID")
}

/// Exclusive lock serializing shift writes against one database.
///
/// Released when dropped.
#[derive(Debug)]
pub struct DatabaseLock {
    _file: File,
}

impl DatabaseLock {
    /// Blocks until the lock next to `database_path` is held.
    pub fn acquire(database_path: &Path) -> anyhow::Result<Self> {
        let path = lock_path(database_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("failed to create database directory")?;
        }
        let file = File::create(&path)
            .with_context(|| format!("failed to create lock file {}", path.display()))?;
        file.lock_exclusive().context("failed to acquire lock")?;
        tracing::debug!(path = %path.display(), "database lock acquired");
        Ok(Self { _file: file })
    }
}

/// Returns the lock file path for a database file.
fn lock_path(database_path: &Path) -> PathBuf {
    let mut name = database_path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".lock");
    database_path.with_file_name(name)
}

/// Formats an instant as `YYYY-MM-DD HH:MM UTC`.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M UTC").to_string()
}

/// Formats the calendar date of an instant.
pub fn format_date(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d").to_string()
}

/// Formats the wall-clock time of an instant.
pub fn format_clock(dt: DateTime<Utc>) -> String {
    dt.format("%H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-15T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn parses_rfc3339_with_offset() {
        let dt = parse_datetime("2025-01-15T10:30:00+02:00", fixed_now()).unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-01-15T08:30:00+00:00");
    }

    #[test]
    fn parses_relative_times() {
        let now = fixed_now();
        assert_eq!(
            parse_datetime("30 minutes ago", now).unwrap(),
            now - Duration::minutes(30)
        );
        assert_eq!(
            parse_datetime("1 hour ago", now).unwrap(),
            now - Duration::hours(1)
        );
        assert_eq!(
            parse_datetime("2 weeks ago", now).unwrap(),
            now - Duration::weeks(2)
        );
    }

    #[test]
    fn rejects_garbage_and_huge_values() {
        let now = fixed_now();
        let err = parse_datetime("yesterday", now).unwrap_err();
        assert!(err.to_string().starts_with("Invalid datetime: yesterday"));
        let err = parse_datetime("999999999 weeks ago", now).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn resolve_now_keeps_full_precision() {
        let now = resolve_now(Some("2025-01-15T10:30:00.123456Z")).unwrap();
        assert_eq!(
            now.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
            "2025-01-15T10:30:00.123456000Z"
        );
    }

    #[test]
    fn resolve_user_prefers_flag() {
        let config = Config {
            database_path: PathBuf::from("sc.db"),
            user_id: Some("from-config".to_string()),
        };
        assert_eq!(
            resolve_user(Some("from-flag"), &config).unwrap().as_str(),
            "from-flag"
        );
        assert_eq!(resolve_user(None, &config).unwrap().as_str(), "from-config");
    }

    #[test]
    fn resolve_user_requires_some_identity() {
        let config = Config {
            database_path: PathBuf::from("sc.db"),
            user_id: None,
        };
        let err = resolve_user(None, &config).unwrap_err();
        assert!(err.to_string().starts_with("no user configured"));
        assert!(resolve_user(Some("  "), &config).is_err());
    }

    #[test]
    fn lock_file_sits_next_to_database() {
        assert_eq!(
            lock_path(Path::new("/data/siteclock.db")),
            PathBuf::from("/data/siteclock.db.lock")
        );
    }

    #[test]
    fn lock_creates_missing_directory() {
        let temp = tempfile::tempdir().unwrap();
        let db_path = temp.path().join("nested/siteclock.db");
        let lock = DatabaseLock::acquire(&db_path).unwrap();
        assert!(temp.path().join("nested/siteclock.db.lock").exists());
        drop(lock);
        DatabaseLock::acquire(&db_path).unwrap();
    }

    #[test]
    fn formats_instants_in_utc() {
        let dt = fixed_now();
        assert_eq!(format_timestamp(dt), "2025-01-15 12:00 UTC");
        assert_eq!(format_date(dt), "2025-01-15");
        assert_eq!(format_clock(dt), "12:00");
    }
}
