//! End-to-end scan → triage → remediation scenarios against a real store and
//! real files.

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};

use signature_warden::core::errors::{Result, SwdError};
use signature_warden::prelude::*;
use tempfile::TempDir;

fn config_for(dir: &Path) -> Config {
    let mut config = Config::default();
    config.scanner.excluded_paths.clear();
    config.quarantine.dir = dir.join("vault");
    config
}

fn open_warden(dir: &TempDir) -> Warden<SqliteStore> {
    let store = SqliteStore::open(&dir.path().join("db").join("warden.sqlite3")).unwrap();
    Warden::new(store, config_for(dir.path()), None)
}

fn tree(dir: &TempDir) -> PathBuf {
    let tree = dir.path().join("tree");
    fs::create_dir_all(&tree).unwrap();
    tree
}

fn only_finding<S: Store>(warden: &Warden<S>) -> Finding {
    let mut all = warden.list_all_findings().unwrap();
    assert_eq!(all.len(), 1, "expected exactly one finding: {all:?}");
    all.remove(0)
}

// ──────────────────── scanning ────────────────────

#[test]
fn first_signature_in_store_order_wins() {
    let dir = tempfile::tempdir().unwrap();
    let warden = open_warden(&dir);
    warden.add_signature(b"BBBB").unwrap();
    warden.add_signature(b"AAAA").unwrap();
    let file = tree(&dir).join("mixed.bin");
    fs::write(&file, b"AAAA....BBBB....BBBB").unwrap();

    warden.scan(&tree(&dir)).unwrap();

    let finding = only_finding(&warden);
    assert_eq!(finding.path, file);
    assert_eq!(finding.signature, b"BBBB");
    assert_eq!(finding.offset, 8);
    assert_eq!(finding.status, FindingStatus::Undetermined);
}

#[test]
fn rescan_keeps_existing_finding_and_status() {
    let dir = tempfile::tempdir().unwrap();
    let warden = open_warden(&dir);
    warden.add_signature(b"EVIL").unwrap();
    let file = tree(&dir).join("a.bin");
    fs::write(&file, b"EVIL").unwrap();

    let first = warden.scan(&tree(&dir)).unwrap();
    let id = first.findings[0].id;
    warden.set_status(id, FindingStatus::Allow).unwrap();

    // Signature moves; the recorded finding stays authoritative.
    fs::write(&file, b"....EVIL").unwrap();
    let second = warden.scan(&tree(&dir)).unwrap();
    assert!(second.findings.is_empty());
    assert_eq!(second.already_recorded, 1);

    let finding = only_finding(&warden);
    assert_eq!(finding.id, id);
    assert_eq!(finding.offset, 0);
    assert_eq!(finding.status, FindingStatus::Allow);
}

#[test]
fn windowed_matching_agrees_with_buffered() {
    let dir = tempfile::tempdir().unwrap();
    let mut content = vec![0u8; 20_000];
    content[9_998..10_004].copy_from_slice(b"NEEDLE");
    let file = tree(&dir).join("big.bin");
    fs::write(&file, &content).unwrap();

    let mut offsets = Vec::new();
    for buffer_limit in [1_000_000, 1_024] {
        let mut config = config_for(dir.path());
        config.scanner.buffer_limit_bytes = buffer_limit;
        config.scanner.window_bytes = 4096;
        let db = dir.path().join(format!("db-{buffer_limit}.sqlite3"));
        let warden = Warden::new(SqliteStore::open(&db).unwrap(), config, None);
        warden.add_signature(b"NEEDLE").unwrap();
        warden.scan(&file).unwrap();
        offsets.push(only_finding(&warden).offset);
    }
    assert_eq!(offsets, vec![9_998, 9_998]);
}

#[test]
fn default_config_reaches_deeply_nested_file() {
    let dir = tempfile::tempdir().unwrap();
    let warden = open_warden(&dir);
    warden.add_signature(b"EVIL").unwrap();
    let mut deep = tree(&dir);
    for level in 0..70 {
        deep.push(format!("d{level}"));
    }
    fs::create_dir_all(&deep).unwrap();
    fs::write(deep.join("deep.bin"), b"..EVIL..").unwrap();

    let report = warden.scan(&tree(&dir)).unwrap();
    assert_eq!(report.findings.len(), 1);
    assert!(report.errors.is_empty());
    assert!(only_finding(&warden).path.ends_with("deep.bin"));
}

#[test]
fn configured_depth_cutoff_reported_as_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(dir.path());
    config.scanner.max_depth = Some(2);
    let store = SqliteStore::open(&dir.path().join("db").join("warden.sqlite3")).unwrap();
    let warden = Warden::new(store, config, None);
    warden.add_signature(b"EVIL").unwrap();
    let deep = tree(&dir).join("a/b/c");
    fs::create_dir_all(&deep).unwrap();
    fs::write(deep.join("deep.bin"), b"EVIL").unwrap();

    let report = warden.scan(&tree(&dir)).unwrap();
    assert!(report.findings.is_empty());
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].error_code, "SWD-3005");
    assert!(report.errors[0].path.ends_with("a/b/c"));
}

#[cfg(unix)]
#[test]
fn vault_behind_symlink_is_not_scanned() {
    let dir = tempfile::tempdir().unwrap();
    let real = dir.path().join("real");
    fs::create_dir_all(real.join("Quarantine")).unwrap();
    std::os::unix::fs::symlink(&real, dir.path().join("link")).unwrap();
    fs::write(real.join("Quarantine").join("abc"), b"EVIL").unwrap();

    let mut config = config_for(dir.path());
    config.quarantine.dir = dir.path().join("link").join("Quarantine");
    let store = SqliteStore::open(&dir.path().join("db").join("warden.sqlite3")).unwrap();
    let warden = Warden::new(store, config, None);
    warden.add_signature(b"EVIL").unwrap();

    let report = warden.scan(&dir.path().join("link")).unwrap();
    assert!(report.findings.is_empty(), "{:?}", report.findings);
    assert!(warden.list_all_findings().unwrap().is_empty());

    // Files beside the vault are still scanned.
    fs::write(real.join("a.bin"), b"EVIL").unwrap();
    let report = warden.scan(&dir.path().join("link")).unwrap();
    assert_eq!(report.findings.len(), 1);
}

// ──────────────────── heal ────────────────────

#[test]
fn heal_scenario_200_bytes_with_16_byte_signature() {
    let dir = tempfile::tempdir().unwrap();
    let warden = open_warden(&dir);
    let signature: Vec<u8> = (0xF0..=0xFF).collect();
    warden.add_signature(&signature).unwrap();

    let mut original = vec![b'a'; 100];
    original.extend_from_slice(&signature);
    original.extend((0..84u8).map(|i| b'0' + i % 10));
    assert_eq!(original.len(), 200);
    let file = tree(&dir).join("t").join("a.bin");
    fs::create_dir_all(file.parent().unwrap()).unwrap();
    fs::write(&file, &original).unwrap();

    warden.scan(&tree(&dir)).unwrap();
    let finding = only_finding(&warden);
    assert_eq!(finding.offset, 100);
    warden.set_status(finding.id, FindingStatus::Heal).unwrap();

    let report = warden.run_remediation().unwrap();
    assert_eq!(report.healed, 1);
    assert!(report.errors.is_empty());

    let healed = fs::read(&file).unwrap();
    assert_eq!(healed.len(), 184);
    assert_eq!(&healed[..100], &original[..100]);
    assert_eq!(&healed[100..184], &original[116..200]);
    assert!(warden.list_all_findings().unwrap().is_empty());
}

#[test]
fn heal_trailing_match_truncates_to_offset() {
    let dir = tempfile::tempdir().unwrap();
    let warden = open_warden(&dir);
    warden.add_signature(b"TAIL").unwrap();
    let file = tree(&dir).join("trailing.bin");
    fs::write(&file, b"keep-me-TAIL").unwrap();

    warden.scan(&tree(&dir)).unwrap();
    let finding = only_finding(&warden);
    warden.set_status(finding.id, FindingStatus::Heal).unwrap();
    warden.run_remediation().unwrap();

    assert_eq!(fs::read(&file).unwrap(), b"keep-me-");
}

#[test]
fn heal_refuses_changed_file_and_keeps_finding() {
    let dir = tempfile::tempdir().unwrap();
    let warden = open_warden(&dir);
    warden.add_signature(b"EVIL").unwrap();
    let file = tree(&dir).join("changed.bin");
    fs::write(&file, b"xxEVILxx").unwrap();

    warden.scan(&tree(&dir)).unwrap();
    let finding = only_finding(&warden);
    warden.set_status(finding.id, FindingStatus::Heal).unwrap();
    fs::write(&file, b"xxGOODxx").unwrap();

    let report = warden.run_remediation().unwrap();
    assert_eq!(report.healed, 0);
    assert_eq!(report.errors[0].error_code, "SWD-2003");
    assert_eq!(fs::read(&file).unwrap(), b"xxGOODxx");
    assert_eq!(only_finding(&warden).status, FindingStatus::Heal);
}

// ──────────────────── delete ────────────────────

#[test]
fn delete_is_idempotent_at_ledger_level() {
    let dir = tempfile::tempdir().unwrap();
    let warden = open_warden(&dir);
    warden.add_signature(b"EVIL").unwrap();
    let file = tree(&dir).join("doomed.bin");
    fs::write(&file, b"EVIL").unwrap();

    warden.scan(&tree(&dir)).unwrap();
    let finding = only_finding(&warden);
    warden.set_status(finding.id, FindingStatus::Delete).unwrap();

    let first = warden.run_remediation().unwrap();
    assert_eq!(first.deleted, 1);
    assert!(!file.exists());

    let second = warden.run_remediation().unwrap();
    assert_eq!(second.deleted, 0);
    assert!(second.errors.is_empty());
}

#[test]
fn allow_and_undetermined_are_left_alone() {
    let dir = tempfile::tempdir().unwrap();
    let warden = open_warden(&dir);
    warden.add_signature(b"EVIL").unwrap();
    let allowed = tree(&dir).join("allowed.bin");
    let pending = tree(&dir).join("pending.bin");
    fs::write(&allowed, b"EVIL").unwrap();
    fs::write(&pending, b"EVIL").unwrap();

    warden.scan(&tree(&dir)).unwrap();
    let allowed_id = warden
        .list_findings(FindingStatus::Undetermined)
        .unwrap()
        .into_iter()
        .find(|f| f.path == allowed)
        .unwrap()
        .id;
    warden.set_status(allowed_id, FindingStatus::Allow).unwrap();

    let report = warden.run_remediation().unwrap();
    assert!(report.outcomes.is_empty());
    assert!(allowed.exists() && pending.exists());
    let counts = warden.status_counts().unwrap();
    assert_eq!((counts.allow, counts.undetermined), (1, 1));
}

// ──────────────────── quarantine ────────────────────

#[test]
fn quarantine_names_vault_file_by_path_digest() {
    let dir = tempfile::tempdir().unwrap();
    let warden = open_warden(&dir);
    warden.add_signature(b"EVIL").unwrap();
    let file = tree(&dir).join("q.bin");
    fs::write(&file, b"abcEVIL").unwrap();

    warden.scan(&tree(&dir)).unwrap();
    let finding = only_finding(&warden);
    warden.set_status(finding.id, FindingStatus::Quarantine).unwrap();
    let report = warden.run_remediation().unwrap();
    assert_eq!(report.quarantined, 1);

    let address = content_address(file.to_str().unwrap());
    let stored = fs::read(dir.path().join("vault").join(&address)).unwrap();
    let mut expected = b"abcEVIL".to_vec();
    xor_in_place(&mut expected, warden.config().quarantine.xor_key);
    assert_eq!(stored, expected);
    assert!(!file.exists());

    let records = warden.list_quarantine().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].content_address, address);
    assert_eq!(records[0].original_path, file.to_str().unwrap());
    assert!(warden.list_all_findings().unwrap().is_empty());
}

#[test]
fn digest_collision_reports_duplicate_and_keeps_finding() {
    let dir = tempfile::tempdir().unwrap();
    let warden = open_warden(&dir);
    warden.add_signature(b"EVIL").unwrap();
    let file = tree(&dir).join("second.bin");
    fs::write(&file, b"EVIL").unwrap();

    // A distinct path already holds this file's content address.
    warden
        .store()
        .insert_quarantine_record(&QuarantineRecord {
            original_path: "/elsewhere/first.bin".to_string(),
            content_address: content_address(file.to_str().unwrap()),
        })
        .unwrap();

    warden.scan(&tree(&dir)).unwrap();
    let finding = only_finding(&warden);
    warden.set_status(finding.id, FindingStatus::Quarantine).unwrap();

    let report = warden.run_remediation().unwrap();
    assert_eq!(report.quarantined, 0);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].error_code, "SWD-2002");
    assert_eq!(fs::read(&file).unwrap(), b"EVIL");
    assert_eq!(only_finding(&warden).status, FindingStatus::Quarantine);
}

/// A store whose quarantine inserts or finding deletes fail while the
/// matching flag is set.
struct FlakyStore {
    inner: SqliteStore,
    fail_quarantine: Cell<bool>,
    fail_delete: Cell<bool>,
}

impl FlakyStore {
    fn open(dir: &TempDir) -> Self {
        Self {
            inner: SqliteStore::open(&dir.path().join("warden.sqlite3")).unwrap(),
            fail_quarantine: Cell::new(false),
            fail_delete: Cell::new(false),
        }
    }
}

impl Store for FlakyStore {
    fn insert_signature(&self, bytes: &[u8]) -> Result<bool> {
        self.inner.insert_signature(bytes)
    }
    fn signatures(&self) -> Result<Vec<Signature>> {
        self.inner.signatures()
    }
    fn insert_finding_if_absent(
        &self,
        path: &str,
        offset: u64,
        signature: &[u8],
    ) -> Result<Option<FindingId>> {
        self.inner.insert_finding_if_absent(path, offset, signature)
    }
    fn finding(&self, id: FindingId) -> Result<Option<Finding>> {
        self.inner.finding(id)
    }
    fn finding_by_path(&self, path: &str) -> Result<Option<Finding>> {
        self.inner.finding_by_path(path)
    }
    fn findings_by_status(&self, status: FindingStatus) -> Result<Vec<Finding>> {
        self.inner.findings_by_status(status)
    }
    fn update_status(&self, id: FindingId, status: FindingStatus) -> Result<bool> {
        self.inner.update_status(id, status)
    }
    fn delete_finding(&self, id: FindingId) -> Result<bool> {
        if self.fail_delete.get() {
            return Err(SwdError::Sql {
                context: "delete_finding",
                details: "database is locked".to_string(),
            });
        }
        self.inner.delete_finding(id)
    }
    fn status_counts(&self) -> Result<StatusCounts> {
        self.inner.status_counts()
    }
    fn insert_quarantine_record(&self, record: &QuarantineRecord) -> Result<()> {
        if self.fail_quarantine.get() {
            return Err(SwdError::Sql {
                context: "insert_quarantine_record",
                details: "disk I/O error".to_string(),
            });
        }
        self.inner.insert_quarantine_record(record)
    }
    fn quarantine_record(&self, content_address: &str) -> Result<Option<QuarantineRecord>> {
        self.inner.quarantine_record(content_address)
    }
    fn quarantine_records(&self) -> Result<Vec<QuarantineRecord>> {
        self.inner.quarantine_records()
    }
}

#[test]
fn failed_record_insert_restores_original_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = FlakyStore::open(&dir);
    store.fail_quarantine.set(true);
    let warden = Warden::new(store, config_for(dir.path()), None);
    warden.add_signature(b"EVIL").unwrap();
    let file = tree(&dir).join("victim.bin");
    fs::write(&file, b"0123EVIL4567").unwrap();

    warden.scan(&tree(&dir)).unwrap();
    let finding = only_finding(&warden);
    warden.set_status(finding.id, FindingStatus::Quarantine).unwrap();

    let report = warden.run_remediation().unwrap();
    assert_eq!(report.quarantined, 0);
    assert_eq!(report.errors[0].error_code, "SWD-2102");
    assert_eq!(fs::read(&file).unwrap(), b"0123EVIL4567");
    let address = content_address(file.to_str().unwrap());
    assert!(!dir.path().join("vault").join(address).exists());
    assert_eq!(only_finding(&warden).status, FindingStatus::Quarantine);

    // Retry succeeds once the store recovers.
    warden.store().fail_quarantine.set(false);
    let retry = warden.run_remediation().unwrap();
    assert_eq!(retry.quarantined, 1);
    assert!(!file.exists());
}

#[test]
fn finished_action_with_failed_removal_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let store = FlakyStore::open(&dir);
    store.fail_delete.set(true);
    let warden = Warden::new(store, config_for(dir.path()), None);
    warden.add_signature(b"EVIL").unwrap();
    let file = tree(&dir).join("gone.bin");
    fs::write(&file, b"EVIL").unwrap();

    warden.scan(&tree(&dir)).unwrap();
    let finding = only_finding(&warden);
    warden.set_status(finding.id, FindingStatus::Delete).unwrap();

    let report = warden.run_remediation().unwrap();
    assert_eq!(report.deleted, 0);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].error_code, "SWD-2102");
    assert!(!file.exists());

    // The row is parked as allow so the next pass does not fail on it again.
    assert_eq!(only_finding(&warden).status, FindingStatus::Allow);
    let again = warden.run_remediation().unwrap();
    assert!(again.errors.is_empty());
    assert_eq!(again.deleted, 0);
}
