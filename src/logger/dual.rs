//! Dual-write coordinator: writes to both SQLite and JSONL with graceful degradation.
//!
//! Architecture: a dedicated logger thread owns the `ActivityLog` and `JsonlWriter`.
//! Scanner and remediation code send `ActivityEvent`s via a bounded crossbeam
//! channel. Non-blocking `try_send()` means a slow disk never stalls a scan.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::config::Config;
use crate::core::errors::{Result, SwdError};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};
#[cfg(feature = "sqlite")]
use crate::logger::sqlite::{ActivityLog, ActivityRow};

/// Default bounded channel capacity for log events.
const CHANNEL_CAPACITY: usize = 1024;

// ──────────────────── public event type ────────────────────

/// Events that can be logged through the dual-write coordinator.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    ScanStarted {
        root: String,
        signatures: usize,
    },
    FindingRecorded {
        finding_id: i64,
        path: String,
        offset: u64,
        signature_len: usize,
    },
    ScanItemFailed {
        path: String,
        error_code: String,
        error_message: String,
    },
    ScanCompleted {
        root: String,
        files_scanned: usize,
        findings_recorded: usize,
        errors: usize,
        duration_ms: u64,
    },
    StatusChanged {
        finding_id: i64,
        from: String,
        to: String,
    },
    FileDeleted {
        finding_id: i64,
        path: String,
    },
    FileHealed {
        finding_id: i64,
        path: String,
        offset: u64,
        excised_bytes: u64,
    },
    FileQuarantined {
        finding_id: i64,
        path: String,
        content_address: String,
    },
    RemediationFailed {
        finding_id: i64,
        action: String,
        path: String,
        error_code: String,
        error_message: String,
    },
    RemediationCompleted {
        deleted: usize,
        healed: usize,
        quarantined: usize,
        failed: usize,
        dry_run: bool,
        duration_ms: u64,
    },
    /// The ledger and the filesystem disagree (e.g. a finding vanished mid-run).
    LedgerInconsistency {
        finding_id: i64,
        details: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel to request graceful shutdown of the logger thread.
    Shutdown,
}

// ──────────────────── public handle ────────────────────

/// Thread-safe, cheaply-cloneable handle for sending log events.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Send an event to the logger thread. Non-blocking.
    ///
    /// If the channel is full the event is dropped and the dropped-events counter
    /// is incremented.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of events dropped due to channel back-pressure.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Request graceful shutdown. Blocks until the sentinel is queued.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

/// Send `event` through `logger` when one is attached.
pub fn emit(logger: Option<&ActivityLoggerHandle>, event: ActivityEvent) {
    if let Some(logger) = logger {
        logger.send(event);
    }
}

// ──────────────────── configuration ────────────────────

/// Options for building the dual-write logger.
pub struct DualLoggerConfig {
    /// Path to the SQLite activity database. `None` disables SQLite.
    pub sqlite_path: Option<PathBuf>,
    /// JSONL writer config (always active).
    pub jsonl_config: JsonlConfig,
    pub channel_capacity: usize,
}

impl DualLoggerConfig {
    /// Build from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            sqlite_path: Some(config.paths.activity_db.clone()),
            jsonl_config: JsonlConfig::from_config(config),
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

// ──────────────────── spawn ────────────────────

/// Spawn the logger thread and return a handle.
///
/// The logger thread runs until `handle.shutdown()` is called or all senders
/// are dropped.
pub fn spawn_logger(
    config: DualLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("swd-logger".to_string())
        .spawn(move || {
            logger_thread_main(rx, config.sqlite_path, config.jsonl_config, dropped_clone);
        })
        .map_err(|e| SwdError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

// ──────────────────── logger thread ────────────────────

#[allow(clippy::needless_pass_by_value)]
fn logger_thread_main(
    rx: Receiver<ActivityEvent>,
    sqlite_path: Option<PathBuf>,
    jsonl_config: JsonlConfig,
    dropped: Arc<AtomicU64>,
) {
    #[cfg(feature = "sqlite")]
    let mut sqlite = sqlite_path.and_then(|p| match ActivityLog::open(&p) {
        Ok(db) => Some(db),
        Err(e) => {
            eprintln!("[SWD-DUAL] failed to open SQLite at {}: {e}", p.display());
            None
        }
    });
    #[cfg(not(feature = "sqlite"))]
    let _ = sqlite_path;

    let mut jsonl = JsonlWriter::open(jsonl_config);
    #[cfg(feature = "sqlite")]
    let mut sqlite_failures: u32 = 0;

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }

        let entry = event_to_log_entry(&event);
        jsonl.write_entry(&entry);

        #[cfg(feature = "sqlite")]
        {
            if let Some(db) = &sqlite {
                if db.log_activity(&entry_to_activity_row(&entry)).is_ok() {
                    sqlite_failures = 0;
                } else {
                    sqlite_failures += 1;
                    if sqlite_failures >= 3 {
                        eprintln!(
                            "[SWD-DUAL] SQLite write failed {sqlite_failures} times, disabling"
                        );
                        sqlite = None;
                    }
                }
            }
        }
    }

    jsonl.flush();
    jsonl.fsync();
}

// ──────────────────── event conversion ────────────────────

fn failure_entry(event: EventType, code: &str, message: &str) -> LogEntry {
    let mut e = LogEntry::new(event, Severity::Warning);
    e.ok = Some(false);
    e.error_code = Some(code.to_string());
    e.error_message = Some(message.to_string());
    e
}

#[allow(clippy::too_many_lines)]
fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::ScanStarted { root, signatures } => {
            let mut e = LogEntry::new(EventType::ScanStart, Severity::Info);
            e.path = Some(root.clone());
            e.details = Some(format!("signatures={signatures}"));
            e
        }
        ActivityEvent::FindingRecorded {
            finding_id,
            path,
            offset,
            signature_len,
        } => {
            let mut e = LogEntry::new(EventType::FindingRecord, Severity::Warning);
            e.finding_id = Some(*finding_id);
            e.path = Some(path.clone());
            e.offset = Some(*offset);
            e.size = Some(*signature_len as u64);
            e
        }
        ActivityEvent::ScanItemFailed {
            path,
            error_code,
            error_message,
        } => {
            let mut e = failure_entry(EventType::ScanItemError, error_code, error_message);
            e.path = Some(path.clone());
            e
        }
        ActivityEvent::ScanCompleted {
            root,
            files_scanned,
            findings_recorded,
            errors,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::ScanComplete, Severity::Info);
            e.path = Some(root.clone());
            e.duration_ms = Some(*duration_ms);
            e.details = Some(format!(
                "files_scanned={files_scanned} findings={findings_recorded} errors={errors}"
            ));
            e.ok = Some(*errors == 0);
            e
        }
        ActivityEvent::StatusChanged {
            finding_id,
            from,
            to,
        } => {
            let mut e = LogEntry::new(EventType::StatusChange, Severity::Info);
            e.finding_id = Some(*finding_id);
            e.details = Some(format!("{from}->{to}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::FileDeleted { finding_id, path } => {
            let mut e = LogEntry::new(EventType::FileDelete, Severity::Info);
            e.finding_id = Some(*finding_id);
            e.path = Some(path.clone());
            e.ok = Some(true);
            e
        }
        ActivityEvent::FileHealed {
            finding_id,
            path,
            offset,
            excised_bytes,
        } => {
            let mut e = LogEntry::new(EventType::FileHeal, Severity::Info);
            e.finding_id = Some(*finding_id);
            e.path = Some(path.clone());
            e.offset = Some(*offset);
            e.size = Some(*excised_bytes);
            e.ok = Some(true);
            e
        }
        ActivityEvent::FileQuarantined {
            finding_id,
            path,
            content_address,
        } => {
            let mut e = LogEntry::new(EventType::FileQuarantine, Severity::Info);
            e.finding_id = Some(*finding_id);
            e.path = Some(path.clone());
            e.content_address = Some(content_address.clone());
            e.ok = Some(true);
            e
        }
        ActivityEvent::RemediationFailed {
            finding_id,
            action,
            path,
            error_code,
            error_message,
        } => {
            let mut e = failure_entry(EventType::RemediationError, error_code, error_message);
            e.finding_id = Some(*finding_id);
            e.path = Some(path.clone());
            e.details = Some(format!("action={action}"));
            e
        }
        ActivityEvent::RemediationCompleted {
            deleted,
            healed,
            quarantined,
            failed,
            dry_run,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::RemediationComplete, Severity::Info);
            e.duration_ms = Some(*duration_ms);
            e.details = Some(format!(
                "deleted={deleted} healed={healed} quarantined={quarantined} failed={failed} dry_run={dry_run}"
            ));
            e.ok = Some(*failed == 0);
            e
        }
        ActivityEvent::LedgerInconsistency {
            finding_id,
            details,
        } => {
            let mut e = LogEntry::new(EventType::LedgerInconsistency, Severity::Warning);
            e.finding_id = Some(*finding_id);
            e.details = Some(details.clone());
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = failure_entry(EventType::Error, code, message);
            e.severity = Severity::Critical;
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::LoggerStop, Severity::Info),
    }
}

#[cfg(feature = "sqlite")]
#[allow(clippy::cast_possible_wrap)]
fn entry_to_activity_row(entry: &LogEntry) -> ActivityRow {
    ActivityRow {
        timestamp: entry.ts.clone(),
        event_type: entry.event.as_str().to_string(),
        severity: entry.severity.as_str().to_string(),
        path: entry.path.clone(),
        finding_id: entry.finding_id,
        byte_offset: entry.offset.map(|v| v as i64),
        size_bytes: entry.size.map(|v| v as i64),
        content_address: entry.content_address.clone(),
        duration_ms: entry.duration_ms.map(|v| v as i64),
        success: i32::from(entry.ok.unwrap_or(true)),
        error_code: entry.error_code.clone(),
        error_message: entry.error_message.clone(),
        details: entry.details.clone(),
    }
}

// ──────────────────── tests ────────────────────
