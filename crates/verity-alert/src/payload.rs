//! Webhook JSON payload construction.
//!
//! Builds the JSON body POSTed to webhook URLs when an alert rule fires.
//! The payload is self-describing (includes a version field) and includes
//! a pre-formatted `text` field for direct use in chat messages.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::Alert;

/// Top-level webhook payload sent to alert endpoints.
#[derive(Debug, Serialize)]
pub struct WebhookPayload {
    /// Payload schema version (currently "1").
    pub version: &'static str,
    /// Whether this is a test/connectivity-check payload.
    pub test: bool,
    pub dispatch: DispatchInfo,
    pub alert: AlertInfo,
    /// Pre-formatted human-readable summary.
    pub text: String,
}

/// Metadata about this particular dispatch.
#[derive(Debug, Serialize)]
pub struct DispatchInfo {
    /// Unique ID for this dispatch attempt.
    pub id: String,
    pub rule_name: String,
    pub fired_at: DateTime<Utc>,
}

/// The alert being delivered.
#[derive(Debug, Serialize)]
pub struct AlertInfo {
    pub alert_id: String,
    pub kind: &'static str,
    pub severity: &'static str,
    pub stream_id: String,
    pub entry_id: Option<String>,
    pub raised_at: DateTime<Utc>,
    pub message: String,
    pub metadata: serde_json::Value,
}

/// Build a webhook payload for a matched alert.
pub fn build_payload(rule_name: &str, alert: &Alert, test: bool) -> WebhookPayload {
    let text = format!(
        "[{severity}] {kind} on {stream}: {message} (rule: {rule_name})",
        severity = alert.severity.as_str().to_uppercase(),
        kind = alert.kind.as_str(),
        stream = alert.stream_id,
        message = alert.message,
    );

    WebhookPayload {
        version: "1",
        test,
        dispatch: DispatchInfo {
            id: Uuid::new_v4().to_string(),
            rule_name: rule_name.to_string(),
            fired_at: Utc::now(),
        },
        alert: AlertInfo {
            alert_id: alert.alert_id.to_string(),
            kind: alert.kind.as_str(),
            severity: alert.severity.as_str(),
            stream_id: alert.stream_id.to_string(),
            entry_id: alert.entry_id.map(|e| e.to_string()),
            raised_at: alert.raised_at,
            message: alert.message.clone(),
            metadata: alert.metadata.clone(),
        },
        text,
    }
}
