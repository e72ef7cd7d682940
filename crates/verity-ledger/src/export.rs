//! Audit trail export for offline review.
//!
//! - **JSON**: one array of record objects
//! - **CSV**: a header row, then one row per record
//!
//! Control characters are stripped from every text field. Records are
//! exported newest first, at most [`EXPORT_LIMIT`] per call.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use verity_types::VerityError;

use crate::entry::{LedgerEntry, Payload};
use crate::filter::AuditFilter;
use crate::store::{format_timestamp, SqliteStore};

/// Most records a single export returns.
pub const EXPORT_LIMIT: usize = 10_000;

const CSV_HEADER: &str =
    "entry_id,actor_id,action,entity_type,entity_id,details,prev_hash,record_hash,created_at";

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        })
    }
}

impl FromStr for ExportFormat {
    type Err = VerityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(VerityError::Validation(format!(
                "unknown export format {other:?}, expected json or csv"
            ))),
        }
    }
}

#[derive(Serialize)]
struct ExportRecord<'a> {
    entry_id: String,
    actor_id: &'a str,
    action: &'a str,
    entity_type: &'a str,
    entity_id: &'a str,
    details: &'a serde_json::Value,
    prev_hash: Option<&'a str>,
    record_hash: &'a str,
    created_at: String,
}

impl<'a> ExportRecord<'a> {
    fn from_entry(entry: &'a LedgerEntry) -> Option<Self> {
        let Payload::Audit(record) = &entry.payload else {
            return None;
        };
        Some(Self {
            entry_id: entry.entry_id.to_string(),
            actor_id: entry.actor_id.as_str(),
            action: &record.action,
            entity_type: &record.entity_type,
            entity_id: &record.entity_id,
            details: &record.details,
            prev_hash: entry.prev_hash.as_deref(),
            record_hash: &entry.record_hash,
            created_at: format_timestamp(&entry.created_at),
        })
    }

    fn csv_row(&self) -> String {
        let details = if self.details.is_null() {
            String::new()
        } else {
            self.details.to_string()
        };
        [
            self.entry_id.as_str(),
            self.actor_id,
            self.action,
            self.entity_type,
            self.entity_id,
            details.as_str(),
            self.prev_hash.unwrap_or(""),
            self.record_hash,
            self.created_at.as_str(),
        ]
        .iter()
        .map(|field| csv_field(field))
        .collect::<Vec<_>>()
        .join(",")
    }
}

/// Quote a CSV field when it holds a delimiter or a quote.
///
/// Control characters, including line breaks, are stripped.
fn csv_field(s: &str) -> String {
    let clean: String = s.chars().filter(|c| !c.is_control()).collect();
    if clean.contains(|c: char| c == ',' || c == '"') {
        format!("\"{}\"", clean.replace('"', "\"\""))
    } else {
        clean
    }
}

/// Remove control characters from string values anywhere in `value`.
fn sanitize_json(value: &serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::String(s) => Value::String(s.chars().filter(|c| !c.is_control()).collect()),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_json).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.chars().filter(|c| !c.is_control()).collect(), sanitize_json(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Render `entries` in `format`. Non-audit entries are skipped.
pub fn render(entries: &[LedgerEntry], format: ExportFormat) -> Result<String, VerityError> {
    let records: Vec<ExportRecord<'_>> = entries.iter().filter_map(ExportRecord::from_entry).collect();
    match format {
        ExportFormat::Json => {
            let value = serde_json::to_value(&records)
                .map_err(|e| VerityError::fatal(format!("failed to serialize export: {e}")))?;
            serde_json::to_string_pretty(&sanitize_json(&value))
                .map_err(|e| VerityError::fatal(format!("failed to serialize export: {e}")))
        }
        ExportFormat::Csv => {
            let mut output = String::from(CSV_HEADER);
            output.push('\n');
            for record in &records {
                output.push_str(&record.csv_row());
                output.push('\n');
            }
            Ok(output)
        }
    }
}

impl SqliteStore {
    /// Export audit records matching `filter`, newest first.
    ///
    /// The filter's limit applies when set, capped at [`EXPORT_LIMIT`].
    pub fn export_audit(
        &self,
        filter: &AuditFilter,
        format: ExportFormat,
    ) -> Result<String, VerityError> {
        let limit = filter.limit.unwrap_or(EXPORT_LIMIT).clamp(1, EXPORT_LIMIT);
        let entries = self.audit_page(filter, limit)?;
        render(&entries, format)
    }
}
