//! Remediation: delete, heal and quarantine, run in that order over the ledger.

pub mod delete;
pub mod engine;
pub mod heal;
pub mod quarantine;
