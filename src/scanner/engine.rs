//! Scan pipeline: walker -> matcher -> ledger.
//!
//! Every file is fully processed (read, matched, recorded) before the next one
//! is opened. Per-file and per-directory failures are collected into the
//! report and never abort the walk.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::config::Config;
use crate::core::errors::{Result, SwdError};
use crate::core::paths::path_as_utf8;
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle, emit};
use crate::scanner::ledger::FindingLedger;
use crate::scanner::matcher::{MatcherConfig, SignatureMatcher};
use crate::scanner::walker::{FileWalker, WalkerConfig};
use crate::store::{FindingId, Store};

// ──────────────────── report types ────────────────────

/// A finding newly written by this scan.
#[derive(Debug, Clone, Serialize)]
pub struct RecordedFinding {
    pub id: FindingId,
    pub path: PathBuf,
    pub offset: u64,
    pub signature_len: usize,
}

/// A single per-item failure during a scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanError {
    pub path: PathBuf,
    pub error: String,
    pub error_code: String,
    pub recoverable: bool,
}

/// Summary after one scan completes.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub root: PathBuf,
    pub signatures: usize,
    pub files_scanned: usize,
    pub findings: Vec<RecordedFinding>,
    /// Matches in paths that already had a finding.
    pub already_recorded: usize,
    pub errors: Vec<ScanError>,
    #[serde(serialize_with = "serialize_duration_ms")]
    pub duration: Duration,
}

#[allow(clippy::cast_possible_truncation)]
fn serialize_duration_ms<S: serde::Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

// ──────────────────── engine ────────────────────

/// Runs the walker and matcher over one root and records matches in the ledger.
pub struct ScanEngine {
    walker: WalkerConfig,
    matcher: MatcherConfig,
    logger: Option<ActivityLoggerHandle>,
}

impl ScanEngine {
    pub fn new(
        walker: WalkerConfig,
        matcher: MatcherConfig,
        logger: Option<ActivityLoggerHandle>,
    ) -> Self {
        Self {
            walker,
            matcher,
            logger,
        }
    }

    /// Build from configuration. The quarantine directory is always excluded.
    pub fn from_config(config: &Config, logger: Option<ActivityLoggerHandle>) -> Self {
        Self::new(
            WalkerConfig::from_scanner(&config.scanner, &[config.quarantine.dir.clone()]),
            MatcherConfig::from_scanner(&config.scanner),
            logger,
        )
    }

    /// Scan `root`. Fails only when the signature set cannot be loaded.
    pub fn scan<S: Store + ?Sized>(&self, store: &S, root: &Path) -> Result<ScanReport> {
        let start = Instant::now();
        let signatures = store.signatures()?;
        let matcher = SignatureMatcher::new(&signatures);
        let ledger = FindingLedger::new(store, self.logger.clone());

        let root_label = root.to_string_lossy().into_owned();
        emit(
            self.logger.as_ref(),
            ActivityEvent::ScanStarted {
                root: root_label.clone(),
                signatures: signatures.len(),
            },
        );

        let mut report = ScanReport {
            root: root.to_path_buf(),
            signatures: signatures.len(),
            files_scanned: 0,
            findings: Vec::new(),
            already_recorded: 0,
            errors: Vec::new(),
            duration: Duration::ZERO,
        };

        for item in FileWalker::new(root, self.walker.clone()) {
            let path = match item {
                Ok(path) => path,
                Err(err) => {
                    let path = error_path(&err).unwrap_or_else(|| root.to_path_buf());
                    self.record_error(&mut report, path, &err);
                    continue;
                }
            };
            report.files_scanned += 1;

            if let Err(err) = self.scan_one(&matcher, &ledger, &path, &mut report) {
                self.record_error(&mut report, path, &err);
            }
        }

        report.duration = start.elapsed();
        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = report.duration.as_millis() as u64;
        emit(
            self.logger.as_ref(),
            ActivityEvent::ScanCompleted {
                root: root_label,
                files_scanned: report.files_scanned,
                findings_recorded: report.findings.len(),
                errors: report.errors.len(),
                duration_ms,
            },
        );
        Ok(report)
    }

    fn scan_one<S: Store + ?Sized>(
        &self,
        matcher: &SignatureMatcher<'_>,
        ledger: &FindingLedger<'_, S>,
        path: &Path,
        report: &mut ScanReport,
    ) -> Result<()> {
        // Checked before reading so an unrecordable path costs no IO.
        path_as_utf8(path)?;

        let Some(hit) = matcher.scan_file(path, &self.matcher)? else {
            return Ok(());
        };
        match ledger.record(path, hit.offset, &hit.signature.bytes)? {
            Some(id) => report.findings.push(RecordedFinding {
                id,
                path: path.to_path_buf(),
                offset: hit.offset,
                signature_len: hit.signature.len(),
            }),
            None => report.already_recorded += 1,
        }
        Ok(())
    }

    fn record_error(&self, report: &mut ScanReport, path: PathBuf, err: &SwdError) {
        emit(
            self.logger.as_ref(),
            ActivityEvent::ScanItemFailed {
                path: path.to_string_lossy().into_owned(),
                error_code: err.code().to_string(),
                error_message: err.to_string(),
            },
        );
        report.errors.push(ScanError {
            path,
            error: err.to_string(),
            error_code: err.code().to_string(),
            recoverable: err.is_retryable(),
        });
    }
}

fn error_path(err: &SwdError) -> Option<PathBuf> {
    match err {
        SwdError::Io { path, .. }
        | SwdError::PermissionDenied { path }
        | SwdError::NonUtf8Path { path }
        | SwdError::Allocation { path, .. }
        | SwdError::DepthLimit { path, .. } => Some(path.clone()),
        _ => None,
    }
}

// ──────────────────── tests ────────────────────

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::store::FindingStatus;
    use crate::store::sqlite::SqliteStore;

    fn engine() -> ScanEngine {
        ScanEngine::new(
            WalkerConfig {
                max_depth: None,
                follow_symlinks: false,
                cross_devices: true,
                excluded_paths: Vec::new(),
            },
            MatcherConfig {
                buffer_limit_bytes: 1 << 20,
                window_bytes: 4096,
            },
            None,
        )
    }

    fn setup() -> (tempfile::TempDir, SqliteStore, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("db/warden.sqlite3")).unwrap();
        let root = dir.path().join("tree");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        (dir, store, root)
    }

    #[test]
    fn records_one_finding_per_infected_file() {
        let (_dir, store, root) = setup();
        store.insert_signature(b"EVIL").unwrap();
        store.insert_signature(b"BAD").unwrap();
        std::fs::write(root.join("clean.txt"), b"nothing here").unwrap();
        std::fs::write(root.join("a.bin"), b"..BAD..EVIL..").unwrap();
        std::fs::write(root.join("sub/b.bin"), b"BADBAD").unwrap();

        let report = engine().scan(&store, &root).unwrap();
        assert_eq!(report.files_scanned, 3);
        assert_eq!(report.findings.len(), 2);
        assert!(report.errors.is_empty());

        let found = store
            .findings_by_status(FindingStatus::Undetermined)
            .unwrap();
        let a = found
            .iter()
            .find(|f| f.path.ends_with("a.bin"))
            .unwrap();
        assert_eq!(a.signature, b"EVIL");
        assert_eq!(a.offset, 7);
        let b = found
            .iter()
            .find(|f| f.path.ends_with("sub/b.bin"))
            .unwrap();
        assert_eq!(b.signature, b"BAD");
        assert_eq!(b.offset, 0);
    }

    #[test]
    fn rescan_neither_duplicates_nor_updates() {
        let (_dir, store, root) = setup();
        store.insert_signature(b"EVIL").unwrap();
        std::fs::write(root.join("a.bin"), b"EVIL").unwrap();

        let first = engine().scan(&store, &root).unwrap();
        let id = first.findings[0].id;
        store.update_status(id, FindingStatus::Allow).unwrap();

        std::fs::write(root.join("a.bin"), b"....EVIL").unwrap();
        let second = engine().scan(&store, &root).unwrap();
        assert!(second.findings.is_empty());
        assert_eq!(second.already_recorded, 1);

        let kept = store.finding(id).unwrap().unwrap();
        assert_eq!(kept.offset, 0);
        assert_eq!(kept.status, FindingStatus::Allow);
        assert_eq!(store.status_counts().unwrap().total(), 1);
    }

    #[test]
    fn missing_root_reported_not_fatal() {
        let (_dir, store, root) = setup();
        let report = engine().scan(&store, &root.join("absent")).unwrap();
        assert_eq!(report.files_scanned, 0);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].error_code, "SWD-3002");
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_path_reported_and_skipped() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let (_dir, store, root) = setup();
        store.insert_signature(b"EVIL").unwrap();
        let bad = root.join(OsStr::from_bytes(b"bad\xff.bin"));
        if std::fs::write(&bad, b"EVIL").is_err() {
            // Filesystem refuses non-UTF-8 names.
            return;
        }
        std::fs::write(root.join("good.bin"), b"EVIL").unwrap();

        let report = engine().scan(&store, &root).unwrap();
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].error_code, "SWD-1103");
    }
}
