#![forbid(unsafe_code)]

//! Signature Warden (swd): local byte-signature malware scanner with a
//! persistent finding ledger and operator-driven remediation.
//!
//! Pipeline:
//! 1. **Scan**: walk a tree and record the first signature match per file
//! 2. **Triage**: the operator marks each finding delete, heal, quarantine or allow
//! 3. **Remediate**: delete files, excise matched bytes in place, or move an
//!    obfuscated copy into the quarantine vault
//!
//! # Library usage
//!
//! ```rust,no_run
//! use signature_warden::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use signature_warden::core::config::Config;
//! use signature_warden::scanner::walker::{FileWalker, WalkerConfig};
//! ```

pub mod prelude;

pub mod core;
pub mod logger;
pub mod remediation;
pub mod scanner;
pub mod store;
pub mod warden;
