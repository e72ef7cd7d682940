//! `verity append-progress` and `verity append-audit`.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;

use verity_geofence::Zone;
use verity_ledger::{AppendReceipt, Payload, Percent, ProgressReport};
use verity_types::{ActorId, GeoPoint, StreamId};

use crate::commands::Session;

/// Raw arguments of `append-progress`.
pub struct ProgressArgs {
    pub stream: String,
    pub actor: String,
    pub percent: String,
    pub date: String,
    pub remarks: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl ProgressArgs {
    fn into_payload(self) -> Result<(StreamId, ActorId, Payload)> {
        let stream = StreamId::new(self.stream)?;
        let actor = ActorId::new(self.actor)?;
        let percent: Percent = self.percent.parse()?;
        let report_date = parse_date(&self.date)?;
        let location = match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
            _ => None,
        };
        let payload = Payload::Progress(ProgressReport {
            percent,
            report_date,
            remarks: self.remarks,
            location,
        });
        Ok((stream, actor, payload))
    }
}

pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("invalid date {raw:?}, expected YYYY-MM-DD"))
}

pub fn progress(config_path: &Path, args: ProgressArgs) -> Result<()> {
    let (stream, actor, payload) = args.into_payload()?;
    let session = Session::open(config_path)?;
    let outcome = session.service.append(&stream, payload, &actor);
    session.finish();

    print_receipt(&outcome?);
    Ok(())
}

pub fn audit(
    config_path: &Path,
    actor: &str,
    action: &str,
    entity_type: &str,
    entity_id: &str,
    details: Option<&str>,
) -> Result<()> {
    let actor = ActorId::new(actor)?;
    let details = match details {
        Some(raw) => serde_json::from_str(raw).context("--details must be valid JSON")?,
        None => serde_json::Value::Null,
    };

    let session = Session::open(config_path)?;
    let outcome = session
        .service
        .record_audit(&actor, action, entity_type, entity_id, details);
    session.finish();

    print_receipt(&outcome?);
    Ok(())
}

fn print_receipt(receipt: &AppendReceipt) {
    println!("Appended to {}", receipt.stream_id);
    println!("  Entry ID:    {}", receipt.entry_id);
    println!("  Record hash: {}", receipt.record_hash);
    println!(
        "  Prev hash:   {}",
        receipt.prev_hash.as_deref().unwrap_or("(genesis)")
    );
    println!("  Created at:  {}", receipt.created_at.to_rfc3339());
    if let Some(audit_id) = &receipt.audit_entry_id {
        println!("  Audit entry: {audit_id}");
    }
    if let Some(admission) = &receipt.admission {
        let zone = match admission.zone {
            Zone::Inside => "inside",
            Zone::InsideWithTolerance => "inside tolerance",
            Zone::Outside => "outside (flagged)",
        };
        match &admission.rule_id {
            Some(rule) => println!(
                "  Geofence:    {zone}, rule {rule}, {:.1} m from boundary",
                admission.distance_m
            ),
            None => println!("  Geofence:    no boundary rule applies"),
        }
    }
}
