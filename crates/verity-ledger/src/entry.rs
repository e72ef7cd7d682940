//! Ledger payloads and committed entries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use verity_geofence::Classification;
use verity_types::{ActorId, EntryId, GeoPoint, StreamId, VerityError};

use crate::canonical::{self, Percent};

/// Which payload type a stream carries. A stream never mixes kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Progress,
    Audit,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Progress => "progress",
            StreamKind::Audit => "audit",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamKind {
    type Err = VerityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "progress" => Ok(StreamKind::Progress),
            "audit" => Ok(StreamKind::Audit),
            other => Err(VerityError::Validation(format!("unknown stream kind {other:?}"))),
        }
    }
}

/// A progress report on a project stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub percent: Percent,
    pub report_date: NaiveDate,
    /// Stored, not hashed.
    #[serde(default)]
    pub remarks: Option<String>,
    /// Capture location. Stored, not hashed.
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

/// One audit-trail record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    /// Free-form detail document. Stored, not hashed.
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

/// Domain content of an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Progress(ProgressReport),
    Audit(AuditRecord),
}

impl Payload {
    pub fn kind(&self) -> StreamKind {
        match self {
            Payload::Progress(_) => StreamKind::Progress,
            Payload::Audit(_) => StreamKind::Audit,
        }
    }

    pub fn location(&self) -> Option<GeoPoint> {
        match self {
            Payload::Progress(r) => r.location,
            Payload::Audit(r) => r.location,
        }
    }

    /// Report date, for payloads bound by the one-entry-per-date rule.
    pub fn report_date(&self) -> Option<NaiveDate> {
        match self {
            Payload::Progress(r) => Some(r.report_date),
            Payload::Audit(_) => None,
        }
    }

    /// Shape and range checks that need no store access.
    pub fn validate(&self, today: NaiveDate) -> Result<(), VerityError> {
        match self {
            Payload::Progress(r) => {
                if !r.percent.is_within_bounds() {
                    return Err(VerityError::Validation(format!(
                        "percent {} outside [0, 100]",
                        r.percent
                    )));
                }
                if r.report_date > today {
                    return Err(VerityError::Validation(format!(
                        "report_date {} is in the future",
                        r.report_date
                    )));
                }
            }
            Payload::Audit(r) => {
                for (name, value) in [
                    ("action", &r.action),
                    ("entity_type", &r.entity_type),
                    ("entity_id", &r.entity_id),
                ] {
                    if value.is_empty() {
                        return Err(VerityError::Validation(format!("{name} must not be empty")));
                    }
                }
            }
        }
        if let Some(point) = self.location() {
            point.validate()?;
        }
        Ok(())
    }
}

/// A committed ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub entry_id: EntryId,
    pub stream_id: StreamId,
    pub actor_id: ActorId,
    pub payload: Payload,
    /// `None` for the genesis entry.
    pub prev_hash: Option<String>,
    pub record_hash: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_none()
    }

    /// Recompute the record hash from the stored payload and link.
    ///
    /// Compare against `record_hash` to detect tampering.
    pub fn recompute_hash(&self) -> String {
        canonical::record_hash(
            &self.stream_id,
            &self.actor_id,
            &self.payload,
            self.prev_hash.as_deref(),
        )
    }
}

/// Result of a successful append.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppendReceipt {
    pub entry_id: EntryId,
    pub stream_id: StreamId,
    pub record_hash: String,
    pub prev_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Geofence classification applied. `None` when the payload had no location.
    pub admission: Option<Classification>,
    /// The audit record committed with a progress report.
    pub audit_entry_id: Option<EntryId>,
}
