//! Tamper-evident, hash-chained, append-only ledger.
//!
//! - [`canonical`]: the published byte encoding and SHA-256 record hash
//! - [`store`]: the SQLite entry table with its chain-link and immutability
//!   guarantees
//! - [`service`]: the append protocol, audit trail helper, and enforcing
//!   verify
//! - [`verify`]: the read-only chain verifier
//! - [`sweep`]: verification of every stream on a bounded worker pool
//! - [`filter`], [`stats`], [`export`]: audit trail queries, summaries and
//!   JSON/CSV export

pub mod canonical;
pub mod entry;
pub mod export;
pub mod filter;
pub mod query;
pub mod service;
pub mod stats;
pub mod store;
pub mod sweep;
pub mod verify;

pub use canonical::{record_hash, Percent};
pub use entry::{AppendReceipt, AuditRecord, LedgerEntry, Payload, ProgressReport, StreamKind};
pub use export::ExportFormat;
pub use filter::AuditFilter;
pub use service::LedgerService;
pub use stats::{AuditStats, Granularity, TimelineBucket};
pub use store::{ChainTail, FrozenStream, SqliteStore, StoredRow, UndecodableRow};
pub use sweep::{SweepFailure, SweepReport};
pub use verify::{
    verify_entries, verify_stream, BrokenLink, ChainVerificationResult, ChainWalk, StructuralError,
};
