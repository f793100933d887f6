//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use signature_warden::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, SwdError};

// Store
#[cfg(feature = "sqlite")]
pub use crate::store::sqlite::SqliteStore;
pub use crate::store::{
    Finding, FindingId, FindingStatus, QuarantineRecord, Signature, StatusCounts, Store,
};

// Scanner
pub use crate::scanner::engine::{ScanEngine, ScanReport};
pub use crate::scanner::ledger::FindingLedger;
pub use crate::scanner::matcher::{MatchHit, MatcherConfig, SignatureMatcher};
pub use crate::scanner::walker::{FileWalker, WalkerConfig};

// Remediation
pub use crate::remediation::engine::{RemediationAction, RemediationEngine, RemediationReport};
pub use crate::remediation::quarantine::{QuarantineVault, content_address, xor_in_place};

// Logging
pub use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle, DualLoggerConfig, spawn_logger};

// Facade
pub use crate::warden::Warden;
