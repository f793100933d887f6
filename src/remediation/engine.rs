//! Remediation run: Delete, then Heal, then Quarantine.
//!
//! Each phase re-queries the ledger for its status when it starts. A finding
//! is removed only after its action succeeded; a failure leaves it in place
//! for the next run and is recorded in the report.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::config::Config;
use crate::core::errors::{Result, SwdError};
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle, emit};
use crate::remediation::delete::delete_file;
use crate::remediation::heal::heal_file;
use crate::remediation::quarantine::QuarantineVault;
use crate::scanner::ledger::FindingLedger;
use crate::store::{Finding, FindingId, FindingStatus, Store};

// ──────────────────── actions ────────────────────

/// The three destructive actions, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationAction {
    Delete,
    Heal,
    Quarantine,
}

impl RemediationAction {
    pub const RUN_ORDER: [Self; 3] = [Self::Delete, Self::Heal, Self::Quarantine];

    /// The ledger status this action consumes.
    pub const fn status(self) -> FindingStatus {
        match self {
            Self::Delete => FindingStatus::Delete,
            Self::Heal => FindingStatus::Heal,
            Self::Quarantine => FindingStatus::Quarantine,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Heal => "heal",
            Self::Quarantine => "quarantine",
        }
    }
}

// ──────────────────── report types ────────────────────

/// One finding acted on (or, in dry-run mode, one that would be).
#[derive(Debug, Clone, Serialize)]
pub struct RemediationOutcome {
    pub finding_id: FindingId,
    pub path: PathBuf,
    pub action: RemediationAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_address: Option<String>,
}

/// A single remediation failure record.
#[derive(Debug, Clone, Serialize)]
pub struct RemediationError {
    pub finding_id: FindingId,
    pub path: PathBuf,
    pub action: RemediationAction,
    pub error: String,
    pub error_code: String,
    pub recoverable: bool,
}

/// Summary after a remediation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RemediationReport {
    pub deleted: usize,
    pub healed: usize,
    pub quarantined: usize,
    pub outcomes: Vec<RemediationOutcome>,
    pub errors: Vec<RemediationError>,
    pub dry_run: bool,
    #[serde(skip)]
    pub duration: Duration,
}

impl RemediationReport {
    pub fn failed(&self) -> usize {
        self.errors.len()
    }

    fn count(&mut self, action: RemediationAction) {
        match action {
            RemediationAction::Delete => self.deleted += 1,
            RemediationAction::Heal => self.healed += 1,
            RemediationAction::Quarantine => self.quarantined += 1,
        }
    }
}

// ──────────────────── engine ────────────────────

pub struct RemediationEngine {
    vault: QuarantineVault,
    dry_run: bool,
    verify_before_heal: bool,
    logger: Option<ActivityLoggerHandle>,
}

impl RemediationEngine {
    pub fn new(
        vault: QuarantineVault,
        dry_run: bool,
        verify_before_heal: bool,
        logger: Option<ActivityLoggerHandle>,
    ) -> Self {
        Self {
            vault,
            dry_run,
            verify_before_heal,
            logger,
        }
    }

    pub fn from_config(config: &Config, logger: Option<ActivityLoggerHandle>) -> Self {
        Self::new(
            QuarantineVault::from_config(&config.quarantine),
            config.remediation.dry_run,
            config.remediation.verify_before_heal,
            logger,
        )
    }

    pub fn vault(&self) -> &QuarantineVault {
        &self.vault
    }

    /// Run all three phases. Fails only when the ledger cannot be queried.
    pub fn run<S: Store + ?Sized>(&self, store: &S) -> Result<RemediationReport> {
        let start = Instant::now();
        let ledger = FindingLedger::new(store, self.logger.clone());
        let mut report = RemediationReport {
            dry_run: self.dry_run,
            ..RemediationReport::default()
        };

        for action in RemediationAction::RUN_ORDER {
            for finding in ledger.list_by_status(action.status())? {
                if self.dry_run {
                    report.count(action);
                    report.outcomes.push(RemediationOutcome {
                        finding_id: finding.id,
                        path: finding.path.clone(),
                        action,
                        content_address: None,
                    });
                    continue;
                }
                self.remediate_one(store, &ledger, action, &finding, &mut report);
            }
        }

        report.duration = start.elapsed();
        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = report.duration.as_millis() as u64;
        emit(
            self.logger.as_ref(),
            ActivityEvent::RemediationCompleted {
                deleted: report.deleted,
                healed: report.healed,
                quarantined: report.quarantined,
                failed: report.failed(),
                dry_run: self.dry_run,
                duration_ms,
            },
        );
        Ok(report)
    }

    fn remediate_one<S: Store + ?Sized>(
        &self,
        store: &S,
        ledger: &FindingLedger<'_, S>,
        action: RemediationAction,
        finding: &Finding,
        report: &mut RemediationReport,
    ) {
        let applied = match action {
            RemediationAction::Delete => delete_file(&finding.path).map(|()| None),
            RemediationAction::Heal => heal_file(
                &finding.path,
                finding.offset,
                &finding.signature,
                self.verify_before_heal,
            )
            .map(|_| None),
            RemediationAction::Quarantine => self
                .vault
                .quarantine(store, &finding.path)
                .map(|record| Some(record.content_address)),
        };

        let content_address = match applied {
            Ok(address) => address,
            Err(err) => {
                self.record_failure(report, action, finding, &err);
                return;
            }
        };

        // The file side is done; a ledger failure now is an inconsistency, not a retry.
        // Park the row as allow so later passes do not repeat a finished action.
        if let Err(err) = ledger.remove(finding.id) {
            let parked = match ledger.set_status(finding.id, FindingStatus::Allow) {
                Ok(()) => "finding parked as allow".to_string(),
                Err(park_err) => {
                    eprintln!(
                        "[SWD-REMEDIATE] finding {} could not be parked: {park_err}",
                        finding.id
                    );
                    format!("parking as allow failed: {park_err}")
                }
            };
            emit(
                self.logger.as_ref(),
                ActivityEvent::LedgerInconsistency {
                    finding_id: finding.id.0,
                    details: format!(
                        "{} succeeded but finding removal failed: {err}; {parked}",
                        action.label()
                    ),
                },
            );
            self.record_failure(report, action, finding, &err);
            return;
        }

        self.log_success(action, finding, content_address.as_deref());
        report.count(action);
        report.outcomes.push(RemediationOutcome {
            finding_id: finding.id,
            path: finding.path.clone(),
            action,
            content_address,
        });
    }

    fn record_failure(
        &self,
        report: &mut RemediationReport,
        action: RemediationAction,
        finding: &Finding,
        err: &SwdError,
    ) {
        emit(
            self.logger.as_ref(),
            ActivityEvent::RemediationFailed {
                finding_id: finding.id.0,
                action: action.label().to_string(),
                path: finding.path.to_string_lossy().into_owned(),
                error_code: err.code().to_string(),
                error_message: err.to_string(),
            },
        );
        report.errors.push(RemediationError {
            finding_id: finding.id,
            path: finding.path.clone(),
            action,
            error: err.to_string(),
            error_code: err.code().to_string(),
            recoverable: err.is_retryable(),
        });
    }

    fn log_success(&self, action: RemediationAction, finding: &Finding, address: Option<&str>) {
        let finding_id = finding.id.0;
        let path = finding.path.to_string_lossy().into_owned();
        let event = match action {
            RemediationAction::Delete => ActivityEvent::FileDeleted { finding_id, path },
            RemediationAction::Heal => ActivityEvent::FileHealed {
                finding_id,
                path,
                offset: finding.offset,
                excised_bytes: finding.signature.len() as u64,
            },
            RemediationAction::Quarantine => ActivityEvent::FileQuarantined {
                finding_id,
                path,
                content_address: address.unwrap_or_default().to_string(),
            },
        };
        emit(self.logger.as_ref(), event);
    }
}

// ──────────────────── tests ────────────────────
