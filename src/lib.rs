//! Verity: a tamper-evident, hash-chained ledger for infrastructure progress
//! reports and system audit trails.
//!
//! This crate re-exports the workspace members so integration tests and
//! embedders can depend on a single package.

pub use verity_alert as alert;
pub use verity_geofence as geofence;
pub use verity_ledger as ledger;
pub use verity_types as types;
