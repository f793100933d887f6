//! SQLite activity log: WAL-mode database for structured event storage and querying.
//!
//! Kept in its own database file so a locked or corrupted activity log never
//! blocks the finding ledger.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, params};

use crate::core::errors::{Result, SwdError};

/// SQLite activity log with WAL mode and prepared-statement patterns.
pub struct ActivityLog {
    conn: Connection,
    path: PathBuf,
}

impl ActivityLog {
    /// Open (or create) the database at `path`, applying schema and PRAGMAs.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| SwdError::io(parent, source))?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        apply_pragmas(&conn)?;
        apply_schema(&conn)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a row into `activity_log`.
    pub fn log_activity(&self, row: &ActivityRow) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO activity_log (
                timestamp, event_type, severity, path, finding_id, byte_offset,
                size_bytes, content_address, duration_ms, success, error_code,
                error_message, details
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
            )?
            .execute(params![
                row.timestamp,
                row.event_type,
                row.severity,
                row.path,
                row.finding_id,
                row.byte_offset,
                row.size_bytes,
                row.content_address,
                row.duration_ms,
                row.success,
                row.error_code,
                row.error_message,
                row.details,
            ])?;
        Ok(())
    }

    /// Query recent activity entries, newest first.
    pub fn recent_activity(&self, limit: u32) -> Result<Vec<ActivityRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT timestamp, event_type, severity, path, finding_id, byte_offset,
                    size_bytes, content_address, duration_ms, success, error_code,
                    error_message, details
             FROM activity_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(ActivityRow {
                    timestamp: row.get(0)?,
                    event_type: row.get(1)?,
                    severity: row.get(2)?,
                    path: row.get(3)?,
                    finding_id: row.get(4)?,
                    byte_offset: row.get(5)?,
                    size_bytes: row.get(6)?,
                    content_address: row.get(7)?,
                    duration_ms: row.get(8)?,
                    success: row.get(9)?,
                    error_code: row.get(10)?,
                    error_message: row.get(11)?,
                    details: row.get(12)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Count events of a type recorded at or after `since` (RFC 3339).
    pub fn count_events_since(&self, event_type: &str, since: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM activity_log WHERE event_type = ?1 AND timestamp >= ?2",
            params![event_type, since],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Check that WAL mode is active (for diagnostics).
    pub fn is_wal_mode(&self) -> bool {
        self.conn
            .query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
            .map(|mode| mode.eq_ignore_ascii_case("wal"))
            .unwrap_or(false)
    }
}

// ──────────────────── row types ────────────────────

/// Row for the `activity_log` table.
#[derive(Debug, Clone, Default)]
pub struct ActivityRow {
    pub timestamp: String,
    pub event_type: String,
    pub severity: String,
    pub path: Option<String>,
    pub finding_id: Option<i64>,
    pub byte_offset: Option<i64>,
    pub size_bytes: Option<i64>,
    pub content_address: Option<String>,
    pub duration_ms: Option<i64>,
    pub success: i32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub details: Option<String>,
}

// ──────────────────── schema & pragmas ────────────────────

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -8000;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[SWD-SQLITE] WARNING: requested WAL mode but got '{mode}'");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS activity_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            path TEXT,
            finding_id INTEGER,
            byte_offset INTEGER,
            size_bytes INTEGER,
            content_address TEXT,
            duration_ms INTEGER,
            success INTEGER NOT NULL DEFAULT 1,
            error_code TEXT,
            error_message TEXT,
            details TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_activity_timestamp ON activity_log(timestamp);
        CREATE INDEX IF NOT EXISTS idx_activity_type_time ON activity_log(event_type, timestamp);",
    )?;
    Ok(())
}

// ──────────────────── tests ────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (tempfile::TempDir, ActivityLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = ActivityLog::open(&dir.path().join("activity.sqlite3")).unwrap();
        (dir, log)
    }

    fn row(event_type: &str, timestamp: &str) -> ActivityRow {
        ActivityRow {
            timestamp: timestamp.to_string(),
            event_type: event_type.to_string(),
            severity: "info".to_string(),
            success: 1,
            ..ActivityRow::default()
        }
    }

    #[test]
    fn schema_created_and_wal_active() {
        let (_dir, log) = temp_db();
        assert!(log.is_wal_mode());
    }

    #[test]
    fn insert_and_query_activity() {
        let (_dir, log) = temp_db();
        let entry = ActivityRow {
            path: Some("/t/a.bin".to_string()),
            finding_id: Some(3),
            content_address: Some("ab".repeat(32)),
            ..row("file_quarantine", "2026-10-19T12:00:00.000Z")
        };
        log.log_activity(&entry).unwrap();

        let results = log.recent_activity(10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].event_type, "file_quarantine");
        assert_eq!(results[0].finding_id, Some(3));
        assert_eq!(results[0].content_address.as_deref(), Some("ab".repeat(32).as_str()));
    }

    #[test]
    fn counts_filter_by_type_and_time() {
        let (_dir, log) = temp_db();
        log.log_activity(&row("file_delete", "2026-10-18T00:00:00.000Z"))
            .unwrap();
        for i in 0..4 {
            log.log_activity(&row("file_delete", &format!("2026-10-19T0{i}:00:00.000Z")))
                .unwrap();
        }
        log.log_activity(&row("file_heal", "2026-10-19T05:00:00.000Z"))
            .unwrap();

        assert_eq!(
            log.count_events_since("file_delete", "2026-10-19T00:00:00.000Z")
                .unwrap(),
            4
        );
        assert_eq!(
            log.count_events_since("file_heal", "2026-01-01T00:00:00.000Z")
                .unwrap(),
            1
        );
    }

    #[test]
    fn idempotent_schema_creation() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("idempotent.sqlite3");
        let _ = ActivityLog::open(&db_path).unwrap();
        let log = ActivityLog::open(&db_path).unwrap();
        assert!(log.is_wal_mode());
        assert_eq!(log.path(), db_path.as_path());
    }
}
