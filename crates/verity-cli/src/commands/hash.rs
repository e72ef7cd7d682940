//! `verity hash`: compute record hashes without touching a ledger.
//!
//! Useful for checking an independent implementation of the canonical
//! encoding against this one.

use anyhow::Result;

use verity_ledger::{canonical, AuditRecord, Payload, Percent, ProgressReport};
use verity_types::{ActorId, StreamId};

use crate::commands::append::parse_date;

pub fn progress(
    stream: &str,
    actor: &str,
    percent: &str,
    date: &str,
    prev_hash: Option<&str>,
    show_encoding: bool,
) -> Result<()> {
    let stream = StreamId::new(stream)?;
    let actor = ActorId::new(actor)?;
    let percent: Percent = percent.parse()?;
    let payload = Payload::Progress(ProgressReport {
        percent,
        report_date: parse_date(date)?,
        remarks: None,
        location: None,
    });
    print_hash(&stream, &actor, &payload, prev_hash, show_encoding);
    Ok(())
}

pub fn audit(
    actor: &str,
    action: &str,
    entity_type: &str,
    entity_id: &str,
    prev_hash: Option<&str>,
    show_encoding: bool,
) -> Result<()> {
    let actor = ActorId::new(actor)?;
    let payload = Payload::Audit(AuditRecord {
        action: action.to_string(),
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        details: serde_json::Value::Null,
        location: None,
    });
    print_hash(&StreamId::audit(), &actor, &payload, prev_hash, show_encoding);
    Ok(())
}

fn print_hash(
    stream: &StreamId,
    actor: &ActorId,
    payload: &Payload,
    prev_hash: Option<&str>,
    show_encoding: bool,
) {
    let encoded = canonical::encode(stream, actor, payload, prev_hash);
    if show_encoding {
        println!("{encoded}");
    }
    println!("{}", canonical::hash(encoded.as_bytes()));
}
