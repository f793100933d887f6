//! Detection: directory walker, signature matcher, finding ledger and the scan pipeline.

pub mod engine;
pub mod ledger;
pub mod matcher;
pub mod walker;
