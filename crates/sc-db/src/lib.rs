//! Storage layer for site clocking.
//!
//! Provides persistence for sites, shifts and pauses using `rusqlite`, and
//! implements the core's [`ShiftStore`] capability set on top of it.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! A `Database` instance can be moved between threads but cannot be shared
//! across threads without external synchronization. The CLI goes further and
//! holds an exclusive file lock for the whole load/transition/persist cycle.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 format with fixed nanosecond
//! precision (e.g., `2025-01-15T09:00:00.000000000Z`), so stored instants
//! equal the in-memory ones exactly and lexicographic ordering
//! matches chronological ordering.
//!
//! ## Write guards
//!
//! Every shift write re-checks the stored state inside its SQLite
//! transaction. A write that would append a second open pause, close a pause
//! that is not open, or set an end that is already set fails with
//! [`DbError::StaleWrite`] instead of silently overwriting. A partial unique
//! index additionally limits each user to one unfinished shift.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use thiserror::Error;

use sc_core::{
    Coordinate, Pause, PauseMark, Shift, ShiftId, ShiftStore, Site, SiteId, TenantId, UserId,
    ValidationError,
};

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp for {record}: {timestamp}")]
    TimestampParse {
        record: String,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored row no longer satisfies the core's invariants.
    #[error("invalid stored data: {0}")]
    Validation(#[from] ValidationError),
    /// The referenced shift does not exist.
    #[error("shift not found: {0}")]
    UnknownShift(String),
    /// The user already has an unfinished shift.
    #[error("user {0} already has an unfinished shift")]
    ActiveShiftExists(String),
    /// The stored shift changed underneath the writer.
    #[error("stale write to shift {shift_id}: {operation} found nothing to change")]
    StaleWrite {
        shift_id: String,
        operation: &'static str,
    },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// A shift row before its pauses are attached.
struct ShiftRow {
    id: String,
    user_id: String,
    site_id: String,
    started_at: String,
    ended_at: Option<String>,
}

const SITE_COLUMNS: &str = "id, tenant_id, name, latitude, longitude, radius_m, active";
const SHIFT_COLUMNS: &str = "id, user_id, site_id, started_at, ended_at";

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sites (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                radius_m REAL NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
            );

            CREATE INDEX IF NOT EXISTS idx_sites_tenant ON sites(tenant_id);

            -- started_at/ended_at: RFC 3339, nanosecond precision
            -- ended_at NULL: the shift is still running
            CREATE TABLE IF NOT EXISTS shifts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                site_id TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                FOREIGN KEY (site_id) REFERENCES sites(id)
            );

            CREATE INDEX IF NOT EXISTS idx_shifts_user ON shifts(user_id, started_at);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_shifts_user_active
                ON shifts(user_id) WHERE ended_at IS NULL;

            -- seq: insertion order within the shift
            CREATE TABLE IF NOT EXISTS pauses (
                shift_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                PRIMARY KEY (shift_id, seq),
                FOREIGN KEY (shift_id) REFERENCES shifts(id) ON DELETE CASCADE
            );
            ",
        )?;
        Ok(())
    }

    /// Inserts a site, or replaces the stored one with the same ID.
    pub fn upsert_site(&mut self, site: &Site) -> Result<(), DbError> {
        self.conn.execute(
            "
            INSERT INTO sites (id, tenant_id, name, latitude, longitude, radius_m, active)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                name = excluded.name,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                radius_m = excluded.radius_m,
                active = excluded.active
            ",
            params![
                site.id().as_str(),
                site.tenant_id().as_str(),
                site.name(),
                site.center().latitude,
                site.center().longitude,
                site.radius_m(),
                site.is_active(),
            ],
        )?;
        tracing::debug!(site_id = %site.id(), "site stored");
        Ok(())
    }

    /// Activates or deactivates a site. Returns false if the site is unknown.
    pub fn set_site_active(&mut self, id: &SiteId, active: bool) -> Result<bool, DbError> {
        let updated = self.conn.execute(
            "UPDATE sites SET active = ? WHERE id = ?",
            params![active, id.as_str()],
        )?;
        Ok(updated > 0)
    }

    /// Lists all sites, active or not, ordered by name then ID.
    pub fn all_sites(&self) -> Result<Vec<Site>, DbError> {
        let sql = format!("SELECT {SITE_COLUMNS} FROM sites ORDER BY name ASC, id ASC");
        self.query_sites(&sql, [])
    }

    fn query_sites(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Site>, DbError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, bool>(6)?,
            ))
        })?;
        let mut sites = Vec::new();
        for row in rows {
            let (id, tenant_id, name, latitude, longitude, radius_m, active) = row?;
            let site = Site::new(
                SiteId::new(id)?,
                TenantId::new(tenant_id)?,
                name,
                Coordinate::new(latitude, longitude),
                radius_m,
            )?
            .with_active(active);
            sites.push(site);
        }
        Ok(sites)
    }

    fn query_shifts(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Shift>, DbError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok(ShiftRow {
                id: row.get(0)?,
                user_id: row.get(1)?,
                site_id: row.get(2)?,
                started_at: row.get(3)?,
                ended_at: row.get(4)?,
            })
        })?;
        let mut shifts = Vec::new();
        for row in rows {
            shifts.push(self.hydrate(row?)?);
        }
        Ok(shifts)
    }

    /// Attaches pauses to a shift row and re-validates it.
    fn hydrate(&self, row: ShiftRow) -> Result<Shift, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT started_at, ended_at FROM pauses WHERE shift_id = ? ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map([&row.id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, Option<String>>(1)?))
        })?;
        let mut pauses = Vec::new();
        for pause in rows {
            let (start, end) = pause?;
            let start = parse_timestamp(&start, &row.id)?;
            let pause = match end {
                Some(end) => Pause::closed(start, parse_timestamp(&end, &row.id)?)?,
                None => Pause::open(start),
            };
            pauses.push(pause);
        }

        let started_at = parse_timestamp(&row.started_at, &row.id)?;
        let ended_at = row
            .ended_at
            .as_deref()
            .map(|ts| parse_timestamp(ts, &row.id))
            .transpose()?;
        Ok(Shift::restore(
            ShiftId::new(row.id)?,
            UserId::new(row.user_id)?,
            SiteId::new(row.site_id)?,
            started_at,
            ended_at,
            pauses,
        )?)
    }
}

/// Stored lifecycle of a shift as seen inside a write transaction.
enum StoredShift {
    Missing,
    Running,
    Ended,
}

fn stored_shift(tx: &Transaction<'_>, shift_id: &str) -> Result<StoredShift, DbError> {
    let ended_at: Option<Option<String>> = tx
        .query_row(
            "SELECT ended_at FROM shifts WHERE id = ?",
            [shift_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(match ended_at {
        None => StoredShift::Missing,
        Some(None) => StoredShift::Running,
        Some(Some(_)) => StoredShift::Ended,
    })
}

/// Fails unless the shift exists and has not ended.
fn require_running(
    tx: &Transaction<'_>,
    shift_id: &str,
    operation: &'static str,
) -> Result<(), DbError> {
    match stored_shift(tx, shift_id)? {
        StoredShift::Running => Ok(()),
        StoredShift::Missing => Err(DbError::UnknownShift(shift_id.to_string())),
        StoredShift::Ended => Err(DbError::StaleWrite {
            shift_id: shift_id.to_string(),
            operation,
        }),
    }
}

impl ShiftStore for Database {
    type Error = DbError;

    fn list_sites(&self) -> Result<Vec<Site>, Self::Error> {
        let sql = format!(
            "SELECT {SITE_COLUMNS} FROM sites WHERE active = 1 ORDER BY name ASC, id ASC"
        );
        self.query_sites(&sql, [])
    }

    fn site(&self, id: &SiteId) -> Result<Option<Site>, Self::Error> {
        let sql = format!("SELECT {SITE_COLUMNS} FROM sites WHERE id = ?");
        Ok(self.query_sites(&sql, [id.as_str()])?.into_iter().next())
    }

    fn create_shift(&mut self, shift: &Shift) -> Result<(), Self::Error> {
        let tx = self.conn.transaction()?;
        let active_exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM shifts WHERE user_id = ? AND ended_at IS NULL)",
            [shift.user_id().as_str()],
            |row| row.get(0),
        )?;
        if active_exists && shift.is_active() {
            return Err(DbError::ActiveShiftExists(shift.user_id().to_string()));
        }
        tx.execute(
            "INSERT INTO shifts (id, user_id, site_id, started_at, ended_at) VALUES (?, ?, ?, ?, ?)",
            params![
                shift.id().as_str(),
                shift.user_id().as_str(),
                shift.site_id().as_str(),
                format_timestamp(shift.started_at()),
                shift.ended_at().map(format_timestamp),
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO pauses (shift_id, seq, started_at, ended_at) VALUES (?, ?, ?, ?)",
            )?;
            for (seq, pause) in shift.pauses().iter().enumerate() {
                stmt.execute(params![
                    shift.id().as_str(),
                    i64::try_from(seq).unwrap_or(i64::MAX),
                    format_timestamp(pause.start()),
                    pause.end().map(format_timestamp),
                ])?;
            }
        }
        tx.commit()?;
        tracing::info!(shift_id = %shift.id(), "shift created");
        Ok(())
    }

    fn record_pause(&mut self, shift_id: &ShiftId, mark: PauseMark) -> Result<(), Self::Error> {
        let id = shift_id.as_str();
        let tx = self.conn.transaction()?;
        match mark {
            PauseMark::Started(at) => {
                require_running(&tx, id, "pause")?;
                let open_exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM pauses WHERE shift_id = ? AND ended_at IS NULL)",
                    [id],
                    |row| row.get(0),
                )?;
                if open_exists {
                    return Err(DbError::StaleWrite {
                        shift_id: id.to_string(),
                        operation: "pause",
                    });
                }
                tx.execute(
                    "
                    INSERT INTO pauses (shift_id, seq, started_at)
                    SELECT ?1, COALESCE(MAX(seq) + 1, 0), ?2 FROM pauses WHERE shift_id = ?1
                    ",
                    params![id, format_timestamp(at)],
                )?;
            }
            PauseMark::Ended(at) => {
                require_running(&tx, id, "resume")?;
                let closed = tx.execute(
                    "UPDATE pauses SET ended_at = ? WHERE shift_id = ? AND ended_at IS NULL",
                    params![format_timestamp(at), id],
                )?;
                if closed == 0 {
                    return Err(DbError::StaleWrite {
                        shift_id: id.to_string(),
                        operation: "resume",
                    });
                }
            }
        }
        tx.commit()?;
        tracing::debug!(shift_id = %shift_id, ?mark, "pause recorded");
        Ok(())
    }

    fn finalize_shift(
        &mut self,
        shift_id: &ShiftId,
        ended_at: DateTime<Utc>,
    ) -> Result<(), Self::Error> {
        let id = shift_id.as_str();
        let ended_at = format_timestamp(ended_at);
        let tx = self.conn.transaction()?;
        require_running(&tx, id, "end")?;
        tx.execute(
            "UPDATE pauses SET ended_at = ? WHERE shift_id = ? AND ended_at IS NULL",
            params![ended_at, id],
        )?;
        let updated = tx.execute(
            "UPDATE shifts SET ended_at = ? WHERE id = ? AND ended_at IS NULL",
            params![ended_at, id],
        )?;
        if updated == 0 {
            return Err(DbError::StaleWrite {
                shift_id: id.to_string(),
                operation: "end",
            });
        }
        tx.commit()?;
        tracing::debug!(shift_id = %shift_id, %ended_at, "shift finalized");
        Ok(())
    }

    fn shift(&self, id: &ShiftId) -> Result<Option<Shift>, Self::Error> {
        let sql = format!("SELECT {SHIFT_COLUMNS} FROM shifts WHERE id = ?");
        Ok(self.query_shifts(&sql, [id.as_str()])?.into_iter().next())
    }

    fn active_shift(&self, user_id: &UserId) -> Result<Option<Shift>, Self::Error> {
        let sql = format!(
            "SELECT {SHIFT_COLUMNS} FROM shifts
             WHERE user_id = ? AND ended_at IS NULL
             ORDER BY started_at DESC LIMIT 1"
        );
        Ok(self
            .query_shifts(&sql, [user_id.as_str()])?
            .into_iter()
            .next())
    }

    fn list_shifts(&self, user_id: &UserId) -> Result<Vec<Shift>, Self::Error> {
        let sql = format!(
            "SELECT {SHIFT_COLUMNS} FROM shifts
             WHERE user_id = ?
             ORDER BY started_at ASC, id ASC"
        );
        self.query_shifts(&sql, [user_id.as_str()])
    }
}

fn parse_timestamp(timestamp: &str, record: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            record: record.to_string(),
            timestamp: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}
