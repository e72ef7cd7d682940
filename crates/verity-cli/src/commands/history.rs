//! `verity history`: list entries of one stream, newest first.

use std::path::Path;

use anyhow::Result;

use verity_ledger::{LedgerEntry, Payload};
use verity_types::StreamId;

use crate::commands::{truncate, Session, DATETIME_FULL_FMT};
use crate::Format;

pub fn run(
    config_path: &Path,
    stream: &str,
    limit: usize,
    offset: usize,
    format: Format,
) -> Result<()> {
    let stream = StreamId::new(stream)?;
    let session = Session::open(config_path)?;
    let outcome = session
        .service
        .store()
        .history(&stream, limit, offset)
        .and_then(|entries| Ok((entries, session.service.store().count(&stream)?)));
    session.finish();
    let (entries, total) = outcome?;

    if format == Format::Json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No entries in {stream}.");
        return Ok(());
    }

    println!(
        "{:<20} {:<16} {:<24} {:<18} HASH",
        "CREATED AT", "ACTOR", "SUMMARY", "PREV"
    );
    println!("{}", "-".repeat(100));
    for entry in &entries {
        println!(
            "{:<20} {:<16} {:<24} {:<18} {}",
            entry.created_at.format(DATETIME_FULL_FMT),
            truncate(entry.actor_id.as_str(), 15),
            truncate(&summarize(entry), 23),
            entry
                .prev_hash
                .as_deref()
                .map(|h| truncate(h, 16))
                .unwrap_or_else(|| "(genesis)".into()),
            entry.record_hash,
        );
    }
    println!();
    println!("{} of {} entries shown.", entries.len(), total);
    Ok(())
}

fn summarize(entry: &LedgerEntry) -> String {
    match &entry.payload {
        Payload::Progress(report) => format!("{}% on {}", report.percent, report.report_date),
        Payload::Audit(record) => format!("{} {}", record.action, record.entity_type),
    }
}
