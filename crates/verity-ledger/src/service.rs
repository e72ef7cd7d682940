//! LedgerService: the append protocol and the enforcing verify.
//!
//! Appends to one stream are serialized by an in-process per-stream lock
//! and, underneath it, by the store's conditional commit. Streams never share
//! an in-process lock, though every commit still takes SQLite's single
//! database write lock for the length of its transaction. The chain tail is
//! read from the store on every attempt.
//!
//! Each progress report is committed together with a `LOG_PROGRESS` record on
//! the audit stream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{SubsecRound, Utc};
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, error, info, warn};

use verity_alert::{Alert, AlertSink, NullSink};
use verity_geofence::{classify, Classification, NoRules, RuleSource, StaticRules, Zone};
use verity_types::{
    ActorId, AlertKind, AppendConfig, EntryId, GeofencePolicy, Severity, StreamId, VerifyConfig,
    VerityConfig, VerityError,
};

use crate::canonical;
use crate::entry::{AppendReceipt, AuditRecord, LedgerEntry, Payload, StreamKind};
use crate::store::{duplicate_date, ChainTail, SqliteStore};
use crate::verify::{verify_stream, ChainVerificationResult};

/// Audit action recorded alongside every committed progress report.
pub const LOG_PROGRESS_ACTION: &str = "LOG_PROGRESS";

/// Entity type of the `LOG_PROGRESS` audit records.
pub const PROGRESS_ENTITY_TYPE: &str = "progress_log";

/// Lazily created lock per stream. Holds no chain state.
///
/// An entry lives only while some append holds its handle, so the map is
/// bounded by the number of streams being appended to at once.
#[derive(Default)]
struct StreamLocks {
    locks: Mutex<HashMap<StreamId, Arc<Mutex<()>>>>,
}

impl StreamLocks {
    fn handle(&self, stream: &StreamId) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(stream.clone())
            .or_default()
            .clone()
    }

    /// Give back a handle from [`handle`](Self::handle), evicting the lock
    /// once no other append holds it.
    fn release(&self, stream: &StreamId, handle: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock();
        drop(handle);
        if locks.get(stream).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(stream);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

/// The ledger core: append, audit, and verify over one store.
pub struct LedgerService {
    store: SqliteStore,
    rules: Arc<dyn RuleSource>,
    alerts: Arc<dyn AlertSink>,
    append: AppendConfig,
    geofence_policy: GeofencePolicy,
    verify: VerifyConfig,
    locks: StreamLocks,
}

impl LedgerService {
    /// Build a service over an opened store, with no geofence rules and no
    /// alert delivery.
    pub fn new(store: SqliteStore, config: &VerityConfig) -> Self {
        Self {
            store,
            rules: Arc::new(NoRules),
            alerts: Arc::new(NullSink),
            append: config.append.clone(),
            geofence_policy: config.geofence.policy,
            verify: config.verify.clone(),
            locks: StreamLocks::default(),
        }
    }

    /// Open the store named by `config` and load its geofence rule file, if
    /// one is configured.
    pub fn open(config: &VerityConfig) -> Result<Self, VerityError> {
        config.validate()?;
        let store = SqliteStore::open(
            &config.ledger_path,
            Duration::from_millis(config.append.lock_timeout_ms),
        )?;
        let mut service = Self::new(store, config);
        if let Some(path) = &config.geofence.rules_path {
            service.rules = Arc::new(StaticRules::load(path)?);
        }
        Ok(service)
    }

    pub fn with_rules(mut self, rules: Arc<dyn RuleSource>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// Append `payload` to `stream_id` on behalf of an already-authorized actor.
    pub fn append(
        &self,
        stream_id: &StreamId,
        payload: Payload,
        actor_id: &ActorId,
    ) -> Result<AppendReceipt, VerityError> {
        payload.validate(Utc::now().date_naive())?;
        if *stream_id == StreamId::audit() && payload.kind() != StreamKind::Audit {
            return Err(VerityError::Validation(format!(
                "stream {stream_id} only accepts audit records"
            )));
        }
        if let Some(date) = payload.report_date() {
            let taken =
                self.with_retry(stream_id, || self.store.has_report_date(stream_id, date))?;
            if taken {
                return Err(duplicate_date(stream_id, Some(date)));
            }
        }

        let admission = self.admit(stream_id, &payload)?;
        let (entry, audit_entry) =
            self.with_retry(stream_id, || self.try_commit(stream_id, &payload, actor_id))?;

        info!(
            stream_id = %entry.stream_id,
            entry_id = %entry.entry_id,
            record_hash = %entry.record_hash,
            audit_entry_id = ?audit_entry.as_ref().map(|a| a.entry_id),
            "ledger entry committed"
        );

        if let Some(classification) = &admission {
            self.raise_admission_alert(&entry, classification);
        }

        Ok(AppendReceipt {
            entry_id: entry.entry_id,
            stream_id: entry.stream_id,
            record_hash: entry.record_hash,
            prev_hash: entry.prev_hash,
            created_at: entry.created_at,
            admission,
            audit_entry_id: audit_entry.map(|a| a.entry_id),
        })
    }

    /// Append a record to the global audit trail.
    pub fn record_audit(
        &self,
        actor_id: &ActorId,
        action: &str,
        entity_type: &str,
        entity_id: &str,
        details: serde_json::Value,
    ) -> Result<AppendReceipt, VerityError> {
        let payload = Payload::Audit(AuditRecord {
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            details,
            location: None,
        });
        self.append(&StreamId::audit(), payload, actor_id)
    }

    /// Classify the payload's location, rejecting it under the enforce policy
    /// when it lies beyond every tolerance band.
    fn admit(
        &self,
        stream_id: &StreamId,
        payload: &Payload,
    ) -> Result<Option<Classification>, VerityError> {
        let Some(point) = payload.location() else {
            return Ok(None);
        };
        let rules = self.rules.active_rules(stream_id)?;
        let classification = classify(point, &rules);

        if classification.zone == Zone::Outside && self.geofence_policy == GeofencePolicy::Enforce {
            warn!(
                stream_id = %stream_id,
                rule_id = ?classification.rule_id,
                distance_m = classification.distance_m,
                tolerance_m = classification.tolerance_m,
                "append rejected by geofence"
            );
            return Err(VerityError::GeofenceViolation {
                distance_m: classification.distance_m,
                tolerance_m: classification.tolerance_m,
                rule_id: classification.rule_id,
            });
        }
        Ok(Some(classification))
    }

    fn raise_admission_alert(&self, entry: &LedgerEntry, classification: &Classification) {
        let (kind, severity, message) = match classification.zone {
            Zone::Inside => return,
            Zone::InsideWithTolerance => (
                AlertKind::GeofenceTolerance,
                Severity::Warning,
                format!(
                    "entry admitted {:.1} m outside its boundary (tolerance {:.1} m)",
                    classification.distance_m, classification.tolerance_m
                ),
            ),
            Zone::Outside => (
                AlertKind::GeofenceOverride,
                Severity::Critical,
                format!(
                    "entry admitted {:.1} m outside its boundary, beyond tolerance {:.1} m",
                    classification.distance_m, classification.tolerance_m
                ),
            ),
        };

        self.alerts.notify(
            Alert::new(kind, severity, entry.stream_id.clone(), message)
                .with_entry(entry.entry_id)
                .with_metadata(json!({
                    "zone": classification.zone,
                    "rule_id": classification.rule_id,
                    "distance_m": classification.distance_m,
                    "tolerance_m": classification.tolerance_m,
                })),
        );
    }

    /// Run `op` under the append retry policy.
    ///
    /// Retryable errors are retried with exponential backoff up to
    /// `append.max_attempts`. A conflict that outlasts them reports how many
    /// attempts were made; any other error is returned as it stands.
    fn with_retry<T>(
        &self,
        stream_id: &StreamId,
        mut op: impl FnMut() -> Result<T, VerityError>,
    ) -> Result<T, VerityError> {
        let max_attempts = self.append.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let backoff = self.backoff(attempt);
                    debug!(
                        stream_id = %stream_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "append contended, retrying"
                    );
                    std::thread::sleep(backoff);
                }
                Err(VerityError::ConcurrencyConflict { stream, .. }) => {
                    warn!(stream_id = %stream_id, attempts = attempt, "append gave up on contention");
                    return Err(VerityError::ConcurrencyConflict {
                        stream,
                        attempts: attempt,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Exponential backoff before attempt `attempt + 1`.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << (attempt.saturating_sub(1)).min(16);
        Duration::from_millis(self.append.backoff_base_ms.saturating_mul(factor))
    }

    /// One commit attempt under the stream's in-process lock. Progress reports
    /// come back with their audit record.
    fn try_commit(
        &self,
        stream_id: &StreamId,
        payload: &Payload,
        actor_id: &ActorId,
    ) -> Result<(LedgerEntry, Option<LedgerEntry>), VerityError> {
        let lock = self.locks.handle(stream_id);
        let outcome = match lock.try_lock_for(Duration::from_millis(self.append.lock_timeout_ms)) {
            Some(_section) => self.commit_locked(stream_id, payload, actor_id),
            None => Err(VerityError::ConcurrencyConflict {
                stream: stream_id.to_string(),
                attempts: 1,
            }),
        };
        self.locks.release(stream_id, lock);
        outcome
    }

    fn commit_locked(
        &self,
        stream_id: &StreamId,
        payload: &Payload,
        actor_id: &ActorId,
    ) -> Result<(LedgerEntry, Option<LedgerEntry>), VerityError> {
        let build = |tail: Option<&ChainTail>| build_entry(stream_id, payload, actor_id, tail);
        match payload.kind() {
            StreamKind::Progress => {
                let (entry, record) = self.store.append_with_trail(stream_id, build, |entry, tail| {
                    build_entry(&StreamId::audit(), &progress_trail(entry)?, actor_id, tail)
                })?;
                Ok((entry, Some(record)))
            }
            StreamKind::Audit => Ok((self.store.append_with(stream_id, build)?, None)),
        }
    }

    /// Verify `stream_id` and apply the corruption policy to the result.
    ///
    /// An invalid chain raises a `ChainCorruption` alert and, when
    /// `verify.freeze_on_corruption` is set, closes the stream to appends.
    /// Nothing is ever repaired.
    pub fn verify(&self, stream_id: &StreamId) -> Result<ChainVerificationResult, VerityError> {
        let result = verify_stream(&self.store, stream_id, self.verify.page_size)?;
        if result.valid {
            debug!(stream_id = %stream_id, entries = result.total_entries, "chain verified");
            return Ok(result);
        }

        let summary = result.summary();
        error!(stream_id = %stream_id, summary = %summary, "chain corruption detected");

        let first_bad = result
            .broken_links
            .first()
            .and_then(|link| link.entry_id.parse::<EntryId>().ok());
        let mut alert = Alert::new(
            AlertKind::ChainCorruption,
            Severity::Critical,
            stream_id.clone(),
            summary.clone(),
        )
        .with_metadata(json!({
            "total_entries": result.total_entries,
            "broken_links": result.broken_links.len(),
            "structural_errors": result.structural_errors.len(),
        }));
        if let Some(entry_id) = first_bad {
            alert = alert.with_entry(entry_id);
        }
        self.alerts.notify(alert);

        if self.verify.freeze_on_corruption {
            self.store.freeze(stream_id, &summary)?;
        }
        Ok(result)
    }

    /// Reopen a stream closed by the corruption policy.
    pub fn unfreeze(&self, stream_id: &StreamId) -> Result<bool, VerityError> {
        self.store.unfreeze(stream_id)
    }

    pub fn sweep_workers(&self) -> usize {
        self.verify.sweep_workers
    }
}

/// The `LOG_PROGRESS` audit payload describing a staged progress entry.
fn progress_trail(entry: &LedgerEntry) -> Result<Payload, VerityError> {
    let Payload::Progress(report) = &entry.payload else {
        return Err(VerityError::Validation(format!(
            "entry {} is not a progress report",
            entry.entry_id
        )));
    };
    Ok(Payload::Audit(AuditRecord {
        action: LOG_PROGRESS_ACTION.to_string(),
        entity_type: PROGRESS_ENTITY_TYPE.to_string(),
        entity_id: entry.entry_id.to_string(),
        details: json!({
            "stream_id": entry.stream_id,
            "reported_percent": report.percent.to_string(),
            "report_date": report.report_date.to_string(),
            "prev_hash": entry.prev_hash,
            "record_hash": entry.record_hash,
        }),
        location: None,
    }))
}

/// Build the entry that extends `tail`. Runs inside the append section.
fn build_entry(
    stream_id: &StreamId,
    payload: &Payload,
    actor_id: &ActorId,
    tail: Option<&ChainTail>,
) -> Result<LedgerEntry, VerityError> {
    if let Some(tail) = tail {
        if tail.kind != payload.kind() {
            return Err(VerityError::Validation(format!(
                "stream {stream_id} holds {} entries, not {}",
                tail.kind,
                payload.kind()
            )));
        }
    }

    let prev_hash = tail.map(|t| t.record_hash.clone());
    let now = Utc::now().trunc_subsecs(6);
    let created_at = match tail {
        Some(t) if t.created_at > now => t.created_at,
        _ => now,
    };

    Ok(LedgerEntry {
        entry_id: EntryId::new_v4(),
        stream_id: stream_id.clone(),
        actor_id: actor_id.clone(),
        payload: payload.clone(),
        record_hash: canonical::record_hash(stream_id, actor_id, payload, prev_hash.as_deref()),
        prev_hash,
        created_at,
    })
}
