//! Alerting for ledger anomalies.
//!
//! The ledger service reports geofence tolerance admissions and verifier
//! findings through the [`AlertSink`] trait and never waits on delivery.
//! This crate provides:
//!
//! - [`Alert`]: the signal carried from the ledger to the sink
//! - [`matcher`]: determines whether an alert matches a rule's filters
//! - [`payload`]: constructs the JSON webhook payload
//! - [`dispatcher`]: the background dispatch loop with per-rule cooldowns
//! - [`log`]: records alert dispatch history in SQLite

pub mod dispatcher;
pub mod log;
pub mod matcher;
pub mod payload;

use std::sync::mpsc::{SyncSender, TrySendError};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use verity_types::{AlertKind, EntryId, Severity, StreamId};

/// A signal raised by the ledger core.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub alert_id: Uuid,
    pub kind: AlertKind,
    pub severity: Severity,
    pub stream_id: StreamId,
    /// Entry that triggered the alert, when there is one.
    pub entry_id: Option<EntryId>,
    pub raised_at: DateTime<Utc>,
    pub message: String,
    /// Kind-specific structured detail (distances, finding counts, ...).
    pub metadata: serde_json::Value,
}

impl Alert {
    pub fn new(
        kind: AlertKind,
        severity: Severity,
        stream_id: StreamId,
        message: impl Into<String>,
    ) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            kind,
            severity,
            stream_id,
            entry_id: None,
            raised_at: Utc::now(),
            message: message.into(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_entry(mut self, entry_id: EntryId) -> Self {
        self.entry_id = Some(entry_id);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Fire-and-forget notification interface.
///
/// Implementations must not block the caller; delivery and retry are the
/// sink's own concern.
pub trait AlertSink: Send + Sync {
    fn notify(&self, alert: Alert);
}

/// Discards every alert.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl AlertSink for NullSink {
    fn notify(&self, _alert: Alert) {}
}

/// Keeps alerts in memory. Intended for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySink {
    alerts: Mutex<Vec<Alert>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every alert received so far.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    /// Number of alerts of the given kind.
    pub fn count(&self, kind: AlertKind) -> usize {
        self.alerts.lock().iter().filter(|a| a.kind == kind).count()
    }
}

impl AlertSink for MemorySink {
    fn notify(&self, alert: Alert) {
        self.alerts.lock().push(alert);
    }
}

/// Forwards alerts to a bounded channel drained by the dispatcher thread.
///
/// When the channel is full the alert is dropped with a warning so an append
/// never waits on alert delivery.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: SyncSender<Alert>,
}

impl ChannelSink {
    pub fn new(tx: SyncSender<Alert>) -> Self {
        Self { tx }
    }
}

impl AlertSink for ChannelSink {
    fn notify(&self, alert: Alert) {
        match self.tx.try_send(alert) {
            Ok(()) => {}
            Err(TrySendError::Full(alert)) => {
                warn!(alert_id = %alert.alert_id, kind = alert.kind.as_str(), "alert channel full, dropping alert");
            }
            Err(TrySendError::Disconnected(alert)) => {
                warn!(alert_id = %alert.alert_id, kind = alert.kind.as_str(), "alert dispatcher gone, dropping alert");
            }
        }
    }
}
