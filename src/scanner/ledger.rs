//! Finding ledger: the system of record between scan and remediation.

#![allow(missing_docs)]

use std::path::Path;

use crate::core::errors::{Result, SwdError};
use crate::core::paths::path_as_utf8;
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle, emit};
use crate::store::{Finding, FindingId, FindingStatus, StatusCounts, Store};

/// Ledger operations over a borrowed store.
pub struct FindingLedger<'a, S: Store + ?Sized> {
    store: &'a S,
    logger: Option<ActivityLoggerHandle>,
}

impl<'a, S: Store + ?Sized> FindingLedger<'a, S> {
    pub fn new(store: &'a S, logger: Option<ActivityLoggerHandle>) -> Self {
        Self { store, logger }
    }

    /// Insert-if-absent by path.
    ///
    /// Returns the new identity, or `None` when the path already has a finding;
    /// the existing record and its status are left untouched.
    pub fn record(&self, path: &Path, offset: u64, signature: &[u8]) -> Result<Option<FindingId>> {
        let key = path_as_utf8(path)?;
        let inserted = self.store.insert_finding_if_absent(key, offset, signature)?;
        if let Some(id) = inserted {
            emit(
                self.logger.as_ref(),
                ActivityEvent::FindingRecorded {
                    finding_id: id.0,
                    path: key.to_string(),
                    offset,
                    signature_len: signature.len(),
                },
            );
        }
        Ok(inserted)
    }

    /// Set the status of one finding. Any status may follow any other.
    pub fn set_status(&self, id: FindingId, status: FindingStatus) -> Result<()> {
        let current = self
            .store
            .finding(id)?
            .ok_or_else(|| SwdError::finding_not_found(id.0))?;
        if !self.store.update_status(id, status)? {
            return Err(SwdError::finding_not_found(id.0));
        }
        emit(
            self.logger.as_ref(),
            ActivityEvent::StatusChanged {
                finding_id: id.0,
                from: current.status.to_string(),
                to: status.to_string(),
            },
        );
        Ok(())
    }

    /// Fresh query of all findings with `status`. Each call re-reads the store.
    pub fn list_by_status(&self, status: FindingStatus) -> Result<Vec<Finding>> {
        self.store.findings_by_status(status)
    }

    pub fn find(&self, id: FindingId) -> Result<Option<Finding>> {
        self.store.finding(id)
    }

    /// Remove a finding after successful remediation.
    ///
    /// A finding that is already gone is logged and otherwise ignored.
    /// Returns whether a row was removed.
    pub fn remove(&self, id: FindingId) -> Result<bool> {
        let removed = self.store.delete_finding(id)?;
        if !removed {
            eprintln!("[SWD-LEDGER] finding {id} already removed");
            emit(
                self.logger.as_ref(),
                ActivityEvent::LedgerInconsistency {
                    finding_id: id.0,
                    details: "finding already removed".to_string(),
                },
            );
        }
        Ok(removed)
    }

    pub fn status_counts(&self) -> Result<StatusCounts> {
        self.store.status_counts()
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteStore;

    fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("warden.sqlite3")).unwrap();
        (dir, store)
    }

    #[test]
    fn rerecording_a_path_keeps_the_original() {
        let (_dir, store) = temp_store();
        let ledger = FindingLedger::new(&store, None);

        let id = ledger
            .record(Path::new("/t/a.bin"), 10, b"sig")
            .unwrap()
            .unwrap();
        ledger.set_status(id, FindingStatus::Allow).unwrap();

        assert!(
            ledger
                .record(Path::new("/t/a.bin"), 99, b"other")
                .unwrap()
                .is_none()
        );
        let kept = ledger.find(id).unwrap().unwrap();
        assert_eq!(kept.offset, 10);
        assert_eq!(kept.signature, b"sig");
        assert_eq!(kept.status, FindingStatus::Allow);
        assert_eq!(ledger.status_counts().unwrap().total(), 1);
    }

    #[test]
    fn set_status_unknown_id_is_not_found() {
        let (_dir, store) = temp_store();
        let ledger = FindingLedger::new(&store, None);
        let err = ledger
            .set_status(FindingId(404), FindingStatus::Delete)
            .unwrap_err();
        assert_eq!(err.code(), "SWD-2001");
    }

    #[test]
    fn any_status_may_follow_any_other() {
        let (_dir, store) = temp_store();
        let ledger = FindingLedger::new(&store, None);
        let id = ledger.record(Path::new("/t/a"), 0, b"x").unwrap().unwrap();
        for status in [
            FindingStatus::Allow,
            FindingStatus::Heal,
            FindingStatus::Undetermined,
            FindingStatus::Quarantine,
        ] {
            ledger.set_status(id, status).unwrap();
            assert_eq!(ledger.find(id).unwrap().unwrap().status, status);
        }
    }

    #[test]
    fn list_by_status_requeries_each_call() {
        let (_dir, store) = temp_store();
        let ledger = FindingLedger::new(&store, None);
        let a = ledger.record(Path::new("/t/a"), 0, b"x").unwrap().unwrap();
        ledger.set_status(a, FindingStatus::Delete).unwrap();
        assert_eq!(ledger.list_by_status(FindingStatus::Delete).unwrap().len(), 1);

        let b = ledger.record(Path::new("/t/b"), 0, b"x").unwrap().unwrap();
        ledger.set_status(b, FindingStatus::Delete).unwrap();
        assert_eq!(ledger.list_by_status(FindingStatus::Delete).unwrap().len(), 2);
    }

    #[test]
    fn remove_twice_is_non_fatal() {
        let (_dir, store) = temp_store();
        let ledger = FindingLedger::new(&store, None);
        let id = ledger.record(Path::new("/t/a"), 0, b"x").unwrap().unwrap();
        assert!(ledger.remove(id).unwrap());
        assert!(!ledger.remove(id).unwrap());
    }
}
