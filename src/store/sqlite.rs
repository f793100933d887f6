//! SQLite record store: WAL-mode database holding signatures, findings and
//! quarantine records.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use rusqlite::{Connection, ErrorCode, OpenFlags, OptionalExtension, params};

use super::{
    Finding, FindingId, FindingStatus, QuarantineRecord, Signature, StatusCounts, Store,
};
use crate::core::errors::{Result, SwdError};

/// Store backed by a single SQLite database file.
pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteStore {
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

    /// Path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check that WAL mode is active (for diagnostics).
    pub fn is_wal_mode(&self) -> bool {
        self.conn
            .query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
            .map(|mode| mode.eq_ignore_ascii_case("wal"))
            .unwrap_or(false)
    }

    fn query_findings(&self, sql: &str, param: i64) -> Result<Vec<Finding>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt
            .query_map(params![param], FindingRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(FindingRow::into_finding).collect()
    }
}

// ──────────────────── row decoding ────────────────────

const FINDING_COLUMNS: &str = "id, path, byte_offset, signature, status";

/// Raw `findings` row before status and offset validation.
struct FindingRow {
    id: i64,
    path: String,
    offset: i64,
    signature: Vec<u8>,
    status: i64,
}

impl FindingRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            path: row.get(1)?,
            offset: row.get(2)?,
            signature: row.get(3)?,
            status: row.get(4)?,
        })
    }

    fn into_finding(self) -> Result<Finding> {
        let status = FindingStatus::from_code(self.status).ok_or(SwdError::InvalidStatus {
            finding_id: self.id,
            code: self.status,
        })?;
        let offset = u64::try_from(self.offset).map_err(|_| SwdError::Sql {
            context: "findings.byte_offset",
            details: format!("negative offset {} for finding {}", self.offset, self.id),
        })?;
        Ok(Finding {
            id: FindingId(self.id),
            path: PathBuf::from(self.path),
            offset,
            signature: self.signature,
            status,
        })
    }
}

fn offset_to_sql(offset: u64) -> Result<i64> {
    i64::try_from(offset).map_err(|_| SwdError::Sql {
        context: "findings.byte_offset",
        details: format!("offset {offset} exceeds the storable range"),
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _) if inner.code == ErrorCode::ConstraintViolation
    )
}

// ──────────────────── Store impl ────────────────────

impl Store for SqliteStore {
    fn insert_signature(&self, bytes: &[u8]) -> Result<bool> {
        if bytes.is_empty() {
            return Err(SwdError::InvalidSignature {
                details: "signature must contain at least one byte".to_string(),
            });
        }
        let changed = self
            .conn
            .prepare_cached("INSERT OR IGNORE INTO signatures (signature) VALUES (?1)")?
            .execute(params![bytes])?;
        Ok(changed == 1)
    }

    fn signatures(&self) -> Result<Vec<Signature>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id, signature FROM signatures ORDER BY id ASC")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Signature {
                    id: row.get(0)?,
                    bytes: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn insert_finding_if_absent(
        &self,
        path: &str,
        offset: u64,
        signature: &[u8],
    ) -> Result<Option<FindingId>> {
        let changed = self
            .conn
            .prepare_cached(
                "INSERT OR IGNORE INTO findings (path, byte_offset, signature, status)
                 VALUES (?1, ?2, ?3, 0)",
            )?
            .execute(params![path, offset_to_sql(offset)?, signature])?;
        if changed == 0 {
            return Ok(None);
        }
        Ok(Some(FindingId(self.conn.last_insert_rowid())))
    }

    fn finding(&self, id: FindingId) -> Result<Option<Finding>> {
        let row = self
            .conn
            .prepare_cached(&format!(
                "SELECT {FINDING_COLUMNS} FROM findings WHERE id = ?1"
            ))?
            .query_row(params![id.0], FindingRow::from_row)
            .optional()?;
        row.map(FindingRow::into_finding).transpose()
    }

    fn finding_by_path(&self, path: &str) -> Result<Option<Finding>> {
        let row = self
            .conn
            .prepare_cached(&format!(
                "SELECT {FINDING_COLUMNS} FROM findings WHERE path = ?1"
            ))?
            .query_row(params![path], FindingRow::from_row)
            .optional()?;
        row.map(FindingRow::into_finding).transpose()
    }

    fn findings_by_status(&self, status: FindingStatus) -> Result<Vec<Finding>> {
        self.query_findings(
            &format!("SELECT {FINDING_COLUMNS} FROM findings WHERE status = ?1 ORDER BY id ASC"),
            status.code(),
        )
    }

    fn update_status(&self, id: FindingId, status: FindingStatus) -> Result<bool> {
        let changed = self
            .conn
            .prepare_cached("UPDATE findings SET status = ?1 WHERE id = ?2")?
            .execute(params![status.code(), id.0])?;
        Ok(changed == 1)
    }

    fn delete_finding(&self, id: FindingId) -> Result<bool> {
        let changed = self
            .conn
            .prepare_cached("DELETE FROM findings WHERE id = ?1")?
            .execute(params![id.0])?;
        Ok(changed == 1)
    }

    fn status_counts(&self) -> Result<StatusCounts> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT status, COUNT(*) FROM findings GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut counts = StatusCounts::default();
        for (code, count) in rows {
            let status = FindingStatus::from_code(code).ok_or(SwdError::InvalidStatus {
                finding_id: -1,
                code,
            })?;
            counts.set(status, u64::try_from(count).unwrap_or(0));
        }
        Ok(counts)
    }

    fn insert_quarantine_record(&self, record: &QuarantineRecord) -> Result<()> {
        let result = self
            .conn
            .prepare_cached("INSERT INTO quarantine (path, address) VALUES (?1, ?2)")?
            .execute(params![record.original_path, record.content_address]);
        match result {
            Ok(_) => Ok(()),
            Err(err) if is_constraint_violation(&err) => Err(SwdError::DuplicateRecord {
                entity: "quarantine",
                key: record.content_address.clone(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    fn quarantine_record(&self, content_address: &str) -> Result<Option<QuarantineRecord>> {
        let record = self
            .conn
            .prepare_cached("SELECT path, address FROM quarantine WHERE address = ?1")?
            .query_row(params![content_address], |row| {
                Ok(QuarantineRecord {
                    original_path: row.get(0)?,
                    content_address: row.get(1)?,
                })
            })
            .optional()?;
        Ok(record)
    }

    fn quarantine_records(&self) -> Result<Vec<QuarantineRecord>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT path, address FROM quarantine ORDER BY id ASC")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(QuarantineRecord {
                    original_path: row.get(0)?,
                    content_address: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// ──────────────────── schema & pragmas ────────────────────

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[SWD-STORE] WARNING: requested WAL mode but got '{mode}'");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS signatures (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            signature BLOB NOT NULL UNIQUE CHECK (length(signature) > 0)
        );

        CREATE TABLE IF NOT EXISTS findings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            byte_offset INTEGER NOT NULL,
            signature BLOB NOT NULL,
            status INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS quarantine (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            address TEXT NOT NULL UNIQUE
        );

        CREATE INDEX IF NOT EXISTS idx_findings_status ON findings(status);",
    )?;
    Ok(())
}

// ──────────────────── tests ────────────────────
