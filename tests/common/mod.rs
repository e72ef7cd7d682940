//! Shared helpers for integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;
use tempfile::NamedTempFile;

use verity_alert::MemorySink;
use verity_ledger::{LedgerService, Payload, ProgressReport};
use verity_types::{ActorId, GeoPoint, StreamId, VerityConfig};

/// Create a temporary file for use as a test database.
pub fn temp_db() -> NamedTempFile {
    NamedTempFile::new().expect("should create temp file for ledger database")
}

/// A config pointing at `tmp`, adjusted by `edit`.
pub fn config_for(tmp: &NamedTempFile, edit: impl FnOnce(&mut VerityConfig)) -> VerityConfig {
    let mut config = VerityConfig::default_for(std::path::Path::new("/unused"));
    config.ledger_path = tmp.path().to_path_buf();
    edit(&mut config);
    config
}

/// Open a service on `tmp` with default settings and a recording alert sink.
pub fn open_service(tmp: &NamedTempFile) -> (LedgerService, Arc<MemorySink>) {
    open_service_with(tmp, |_| {})
}

pub fn open_service_with(
    tmp: &NamedTempFile,
    edit: impl FnOnce(&mut VerityConfig),
) -> (LedgerService, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let service = LedgerService::open(&config_for(tmp, edit))
        .expect("should open ledger service")
        .with_alerts(sink.clone());
    (service, sink)
}

pub fn stream(id: &str) -> StreamId {
    StreamId::new(id).expect("valid stream id")
}

pub fn actor(id: &str) -> ActorId {
    ActorId::new(id).expect("valid actor id")
}

pub fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid date")
}

/// A progress payload without a location.
pub fn progress(percent: &str, report_date: &str) -> Payload {
    progress_at(percent, report_date, None)
}

pub fn progress_at(percent: &str, report_date: &str, location: Option<GeoPoint>) -> Payload {
    Payload::Progress(ProgressReport {
        percent: percent.parse().expect("valid percent"),
        report_date: date(report_date),
        remarks: None,
        location,
    })
}
