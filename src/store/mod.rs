//! Persistent record store: signatures, the finding ledger and quarantine records.
//!
//! The scanner and remediation engine only ever talk to the [`Store`] trait.
//! One store is opened per process and passed down by reference; nothing in
//! the crate holds an ambient database handle.

#![allow(missing_docs)]

#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SwdError};

// ──────────────────── records ────────────────────

/// A known malicious byte sequence (length ≥ 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub id: i64,
    pub bytes: Vec<u8>,
}

impl Signature {
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Row identity of a finding in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FindingId(pub i64);

impl fmt::Display for FindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remediation status of a finding. Persisted as the integer code 0–4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    Undetermined,
    Delete,
    Heal,
    Quarantine,
    Allow,
}

impl FindingStatus {
    pub const ALL: [Self; 5] = [
        Self::Undetermined,
        Self::Delete,
        Self::Heal,
        Self::Quarantine,
        Self::Allow,
    ];

    /// Integer code stored in the `status` column.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Undetermined => 0,
            Self::Delete => 1,
            Self::Heal => 2,
            Self::Quarantine => 3,
            Self::Allow => 4,
        }
    }

    /// Decode a stored status code; anything outside 0–4 is rejected.
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Undetermined),
            1 => Some(Self::Delete),
            2 => Some(Self::Heal),
            3 => Some(Self::Quarantine),
            4 => Some(Self::Allow),
            _ => None,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Undetermined => "undetermined",
            Self::Delete => "delete",
            Self::Heal => "heal",
            Self::Quarantine => "quarantine",
            Self::Allow => "allow",
        }
    }
}

impl fmt::Display for FindingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for FindingStatus {
    type Err = SwdError;

    /// Accepts labels, the short operator verbs (`del`, `quar`) and numeric codes.
    fn from_str(raw: &str) -> Result<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        let status = match lowered.as_str() {
            "undetermined" | "0" => Some(Self::Undetermined),
            "delete" | "del" | "1" => Some(Self::Delete),
            "heal" | "2" => Some(Self::Heal),
            "quarantine" | "quar" | "3" => Some(Self::Quarantine),
            "allow" | "4" => Some(Self::Allow),
            _ => None,
        };
        status.ok_or_else(|| SwdError::InvalidConfig {
            details: format!(
                "unknown status {raw:?}; expected one of undetermined, delete, heal, quarantine, allow"
            ),
        })
    }
}

/// One detected occurrence of a signature in one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub id: FindingId,
    pub path: PathBuf,
    pub offset: u64,
    /// The matched bytes, stored verbatim so remediation never re-resolves them.
    pub signature: Vec<u8>,
    pub status: FindingStatus,
}

impl Finding {
    /// End offset (exclusive) of the matched bytes.
    #[must_use]
    pub fn match_end(&self) -> u64 {
        self.offset + self.signature.len() as u64
    }
}

/// A file moved into quarantine, keyed by the digest of its original path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub original_path: String,
    pub content_address: String,
}

/// Ledger size per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub undetermined: u64,
    pub delete: u64,
    pub heal: u64,
    pub quarantine: u64,
    pub allow: u64,
}

impl StatusCounts {
    #[must_use]
    pub const fn get(&self, status: FindingStatus) -> u64 {
        match status {
            FindingStatus::Undetermined => self.undetermined,
            FindingStatus::Delete => self.delete,
            FindingStatus::Heal => self.heal,
            FindingStatus::Quarantine => self.quarantine,
            FindingStatus::Allow => self.allow,
        }
    }

    pub fn set(&mut self, status: FindingStatus, count: u64) {
        let slot = match status {
            FindingStatus::Undetermined => &mut self.undetermined,
            FindingStatus::Delete => &mut self.delete,
            FindingStatus::Heal => &mut self.heal,
            FindingStatus::Quarantine => &mut self.quarantine,
            FindingStatus::Allow => &mut self.allow,
        };
        *slot = count;
    }

    #[must_use]
    pub const fn total(&self) -> u64 {
        self.undetermined + self.delete + self.heal + self.quarantine + self.allow
    }
}

// ──────────────────── store interface ────────────────────

/// The record store the core depends on.
///
/// Implementations own schema bootstrapping. All methods take `&self`; callers
/// are single-threaded and perform one mutation at a time.
pub trait Store {
    /// Insert a signature unless identical bytes already exist. Returns whether it was inserted.
    fn insert_signature(&self, bytes: &[u8]) -> Result<bool>;

    /// All signatures in store iteration order (insertion order).
    fn signatures(&self) -> Result<Vec<Signature>>;

    /// Insert a finding unless the path already has one.
    ///
    /// Returns the new identity, or `None` when a finding for `path` exists.
    fn insert_finding_if_absent(
        &self,
        path: &str,
        offset: u64,
        signature: &[u8],
    ) -> Result<Option<FindingId>>;

    /// Look up one finding.
    fn finding(&self, id: FindingId) -> Result<Option<Finding>>;

    /// Look up the finding for a path.
    fn finding_by_path(&self, path: &str) -> Result<Option<Finding>>;

    /// Fresh query of all findings with `status`, ordered by identity.
    fn findings_by_status(&self, status: FindingStatus) -> Result<Vec<Finding>>;

    /// Update the status of one finding. Returns whether a row was updated.
    fn update_status(&self, id: FindingId, status: FindingStatus) -> Result<bool>;

    /// Delete one finding. Returns whether a row was deleted.
    fn delete_finding(&self, id: FindingId) -> Result<bool>;

    /// Counts per status.
    fn status_counts(&self) -> Result<StatusCounts>;

    /// Insert a quarantine record; a path or address collision is `DuplicateRecord`.
    fn insert_quarantine_record(&self, record: &QuarantineRecord) -> Result<()>;

    /// Look up a quarantine record by content address.
    fn quarantine_record(&self, content_address: &str) -> Result<Option<QuarantineRecord>>;

    /// All quarantine records, oldest first.
    fn quarantine_records(&self) -> Result<Vec<QuarantineRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_round_trip_and_reject_out_of_range() {
        for status in FindingStatus::ALL {
            assert_eq!(FindingStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(FindingStatus::from_code(5), None);
        assert_eq!(FindingStatus::from_code(-1), None);
    }

    #[test]
    fn status_parses_operator_verbs() {
        assert_eq!("del".parse::<FindingStatus>().unwrap(), FindingStatus::Delete);
        assert_eq!(
            "QUAR".parse::<FindingStatus>().unwrap(),
            FindingStatus::Quarantine
        );
        assert_eq!("2".parse::<FindingStatus>().unwrap(), FindingStatus::Heal);
        assert!("purge".parse::<FindingStatus>().is_err());
    }

    #[test]
    fn counts_accessors_agree() {
        let mut counts = StatusCounts::default();
        counts.set(FindingStatus::Heal, 3);
        counts.set(FindingStatus::Allow, 1);
        assert_eq!(counts.get(FindingStatus::Heal), 3);
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn match_end_adds_signature_length() {
        let finding = Finding {
            id: FindingId(1),
            path: PathBuf::from("/t/a.bin"),
            offset: 100,
            signature: vec![0xff; 16],
            status: FindingStatus::Heal,
        };
        assert_eq!(finding.match_end(), 116);
    }
}
