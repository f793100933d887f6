//! The `Warden`: one store, one configuration, one optional activity logger,
//! and every operator-facing operation on top of them.

#![allow(missing_docs)]

use std::path::Path;

use crate::core::config::Config;
use crate::core::errors::{Result, SwdError};
use crate::core::paths::resolve_absolute_path;
use crate::logger::dual::ActivityLoggerHandle;
use crate::remediation::engine::{RemediationEngine, RemediationReport};
use crate::remediation::quarantine::QuarantineVault;
use crate::scanner::engine::{ScanEngine, ScanReport};
use crate::scanner::ledger::FindingLedger;
use crate::store::{
    Finding, FindingId, FindingStatus, QuarantineRecord, Signature, StatusCounts, Store,
};

/// Facade over the scan and remediation pipeline.
pub struct Warden<S: Store> {
    store: S,
    config: Config,
    logger: Option<ActivityLoggerHandle>,
}

impl<S: Store> Warden<S> {
    pub fn new(store: S, config: Config, logger: Option<ActivityLoggerHandle>) -> Self {
        Self {
            store,
            config,
            logger,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn ledger(&self) -> FindingLedger<'_, S> {
        FindingLedger::new(&self.store, self.logger.clone())
    }

    /// Walk `root` and record new findings. Relative roots are resolved first.
    pub fn scan(&self, root: &Path) -> Result<ScanReport> {
        let root = resolve_absolute_path(root);
        ScanEngine::from_config(&self.config, self.logger.clone()).scan(&self.store, &root)
    }

    /// Scan every configured root, in order.
    pub fn scan_configured_roots(&self) -> Result<Vec<ScanReport>> {
        self.config
            .scanner
            .root_paths
            .iter()
            .map(|root| self.scan(root))
            .collect()
    }

    /// Run Delete, Heal and Quarantine over the current ledger.
    pub fn run_remediation(&self) -> Result<RemediationReport> {
        RemediationEngine::from_config(&self.config, self.logger.clone()).run(&self.store)
    }

    pub fn set_status(&self, id: FindingId, status: FindingStatus) -> Result<()> {
        self.ledger().set_status(id, status)
    }

    pub fn list_findings(&self, status: FindingStatus) -> Result<Vec<Finding>> {
        self.ledger().list_by_status(status)
    }

    /// Every finding, grouped by status in code order.
    pub fn list_all_findings(&self) -> Result<Vec<Finding>> {
        let mut all = Vec::new();
        for status in FindingStatus::ALL {
            all.extend(self.list_findings(status)?);
        }
        Ok(all)
    }

    pub fn find_finding(&self, id: FindingId) -> Result<Finding> {
        self.ledger()
            .find(id)?
            .ok_or_else(|| SwdError::finding_not_found(id.0))
    }

    pub fn status_counts(&self) -> Result<StatusCounts> {
        self.ledger().status_counts()
    }

    /// Add a signature. Returns `false` when identical bytes already exist.
    pub fn add_signature(&self, bytes: &[u8]) -> Result<bool> {
        self.store.insert_signature(bytes)
    }

    pub fn list_signatures(&self) -> Result<Vec<Signature>> {
        self.store.signatures()
    }

    pub fn list_quarantine(&self) -> Result<Vec<QuarantineRecord>> {
        self.store.quarantine_records()
    }

    /// Recover the original bytes of a quarantined file.
    pub fn reveal_quarantined(&self, address: &str) -> Result<Vec<u8>> {
        if self.store.quarantine_record(address)?.is_none() {
            return Err(SwdError::NotFound {
                entity: "quarantine record",
                key: address.to_string(),
            });
        }
        QuarantineVault::from_config(&self.config.quarantine).reveal(address)
    }
}
