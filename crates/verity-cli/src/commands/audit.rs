//! `verity audit`: search, summarize and export the audit trail.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};

use verity_ledger::{AuditFilter, ExportFormat, Granularity, Payload};

use crate::commands::{truncate, Session, DATETIME_FULL_FMT};
use crate::Format;

/// Filter options shared by every audit subcommand.
#[derive(Debug, Default, Clone, clap::Args)]
pub struct FilterArgs {
    #[arg(long)]
    pub actor: Option<String>,

    #[arg(long)]
    pub action: Option<String>,

    #[arg(long)]
    pub entity_type: Option<String>,

    #[arg(long)]
    pub entity_id: Option<String>,

    /// Substring of the action or entity type
    #[arg(long)]
    pub search: Option<String>,

    /// First day included (YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<String>,

    /// Last day included (YYYY-MM-DD)
    #[arg(long)]
    pub to: Option<String>,
}

fn parse_day(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("invalid date {raw:?}, expected YYYY-MM-DD"))
}

impl FilterArgs {
    pub fn into_filter(self, limit: Option<usize>, offset: Option<usize>) -> Result<AuditFilter> {
        let bound = |raw: Option<&str>, h: u32, m: u32, s: u32, micro: u32| -> Result<Option<DateTime<Utc>>> {
            let Some(raw) = raw else {
                return Ok(None);
            };
            let at = parse_day(raw)?
                .and_hms_micro_opt(h, m, s, micro)
                .context("invalid time of day")?;
            Ok(Some(DateTime::<Utc>::from_naive_utc_and_offset(at, Utc)))
        };
        let from = bound(self.from.as_deref(), 0, 0, 0, 0)?;
        let to = bound(self.to.as_deref(), 23, 59, 59, 999_999)?;
        Ok(AuditFilter {
            from,
            to,
            actor_id: self.actor,
            action: self.action,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            search: self.search,
            limit,
            offset,
        })
    }
}

pub fn log(
    config_path: &Path,
    args: FilterArgs,
    limit: usize,
    offset: usize,
    format: Format,
) -> Result<()> {
    let filter = args.into_filter(Some(limit), Some(offset))?;
    let session = Session::open(config_path)?;
    let outcome = session.service.store().audit_log(&filter);
    session.finish();
    let entries = outcome?;

    if format == Format::Json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No audit records match.");
        return Ok(());
    }

    println!(
        "{:<20} {:<16} {:<20} {:<14} ENTITY ID",
        "CREATED AT", "ACTOR", "ACTION", "ENTITY"
    );
    println!("{}", "-".repeat(100));
    for entry in &entries {
        let Payload::Audit(record) = &entry.payload else {
            continue;
        };
        println!(
            "{:<20} {:<16} {:<20} {:<14} {}",
            entry.created_at.format(DATETIME_FULL_FMT),
            truncate(entry.actor_id.as_str(), 15),
            truncate(&record.action, 19),
            truncate(&record.entity_type, 13),
            record.entity_id,
        );
    }
    println!();
    println!("{} records shown.", entries.len());
    Ok(())
}

pub fn stats(config_path: &Path, args: FilterArgs, format: Format) -> Result<()> {
    let filter = args.into_filter(None, None)?;
    let session = Session::open(config_path)?;
    let outcome = session.service.store().audit_stats(&filter);
    session.finish();
    let stats = outcome?;

    if format == Format::Json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Audit records: {}", stats.total_entries);
    if let (Some(first), Some(last)) = (&stats.earliest_entry, &stats.latest_entry) {
        println!("Range:         {first} .. {last}");
    }
    println!();
    println!("{:<30} COUNT", "ACTION");
    for (action, count) in &stats.entries_by_action {
        println!("{:<30} {count}", truncate(action, 29));
    }
    println!();
    println!("{:<30} COUNT", "ACTOR");
    for (actor, count) in &stats.entries_by_actor {
        println!("{:<30} {count}", truncate(actor, 29));
    }
    Ok(())
}

pub fn timeline(
    config_path: &Path,
    args: FilterArgs,
    granularity: Granularity,
    format: Format,
) -> Result<()> {
    let filter = args.into_filter(None, None)?;
    let session = Session::open(config_path)?;
    let outcome = session.service.store().audit_timeline(&filter, granularity);
    session.finish();
    let buckets = outcome?;

    if format == Format::Json {
        println!("{}", serde_json::to_string_pretty(&buckets)?);
        return Ok(());
    }
    println!("{:<20} COUNT", granularity.as_str().to_uppercase());
    for bucket in &buckets {
        println!("{:<20} {}", bucket.bucket, bucket.count);
    }
    Ok(())
}

pub fn export(
    config_path: &Path,
    args: FilterArgs,
    format: ExportFormat,
    output: Option<&Path>,
) -> Result<()> {
    let filter = args.into_filter(None, None)?;
    let session = Session::open(config_path)?;
    let outcome = session.service.store().export_audit(&filter, format);
    session.finish();
    let rendered = outcome?;

    match output {
        Some(path) => {
            std::fs::write(path, &rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Audit trail exported to {} ({format}).", path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(())
}
