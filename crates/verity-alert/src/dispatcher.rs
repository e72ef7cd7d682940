//! Background alert evaluation and dispatch loop.
//!
//! The dispatcher runs on a dedicated `std::thread` with its own
//! single-threaded tokio runtime. It consumes [`Alert`]s from an
//! `std::sync::mpsc::Receiver`, evaluates them against configured alert rules,
//! enforces per-rule cooldowns, and dispatches webhooks via `reqwest`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, error, info, warn};
use verity_types::{AlertKind, AlertRule, Severity, StreamId, VerityError};

use crate::log::{self as alert_log, DispatchRecord};
use crate::{matcher, payload, Alert, ChannelSink};

const USER_AGENT: &str = concat!("verity-alert/", env!("CARGO_PKG_VERSION"));
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the alert dispatcher.
pub struct DispatcherConfig {
    /// Alert rules to evaluate against every alert.
    pub rules: Vec<AlertRule>,
    /// Path to the SQLite database holding the alert_log table.
    pub db_path: PathBuf,
}

/// Start the dispatcher on its own thread and return the sink that feeds it.
///
/// The thread exits once every clone of the returned sink has been dropped.
pub fn spawn(
    config: DispatcherConfig,
    capacity: usize,
) -> Result<(ChannelSink, JoinHandle<()>), VerityError> {
    let (tx, rx) = mpsc::sync_channel(capacity);
    let handle = std::thread::Builder::new()
        .name("verity-alert".into())
        .spawn(move || run(config, rx))
        .map_err(|e| VerityError::ConfigError(format!("failed to spawn alert dispatcher: {e}")))?;
    Ok((ChannelSink::new(tx), handle))
}

/// Run the alert dispatcher loop on the current thread.
///
/// This function blocks until the `receiver` channel is disconnected (i.e.,
/// when all senders are dropped). It creates its own tokio runtime for async
/// HTTP calls.
pub fn run(config: DispatcherConfig, receiver: Receiver<Alert>) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to create tokio runtime for alert dispatcher: {e}");
            return;
        }
    };

    rt.block_on(async {
        run_loop(config, receiver).await;
    });
}

/// Cooldowns are tracked per rule and stream, so a noisy stream does not
/// silence the same rule for every other stream.
type CooldownKey = (String, StreamId);

fn in_cooldown(
    cooldowns: &HashMap<CooldownKey, Instant>,
    key: &CooldownKey,
    cooldown: Duration,
) -> bool {
    cooldowns
        .get(key)
        .is_some_and(|last_fire| last_fire.elapsed() < cooldown)
}

async fn run_loop(config: DispatcherConfig, receiver: Receiver<Alert>) {
    let log_conn = match Connection::open(&config.db_path) {
        Ok(conn) => conn,
        Err(e) => {
            error!(path = %config.db_path.display(), "failed to open alert log database: {e}");
            return;
        }
    };

    if let Err(e) = alert_log::init_table(&log_conn) {
        error!("failed to initialize alert_log table: {e}");
        return;
    }

    let client = match reqwest::Client::builder().timeout(HTTP_TIMEOUT).build() {
        Ok(c) => c,
        Err(e) => {
            error!("failed to build HTTP client (TLS init?): {e}");
            return;
        }
    };

    let mut cooldowns: HashMap<CooldownKey, Instant> = HashMap::new();

    info!(rules = config.rules.len(), "alert dispatcher started");

    while let Ok(alert) = receiver.recv() {
        for rule in &config.rules {
            if !matcher::matches(rule, &alert) {
                continue;
            }

            let key = (rule.name.clone(), alert.stream_id.clone());
            if in_cooldown(&cooldowns, &key, Duration::from_secs(rule.cooldown_secs)) {
                debug!(rule = %rule.name, stream = %alert.stream_id, "alert rule in cooldown, skipping");
                continue;
            }

            let payload = payload::build_payload(&rule.name, &alert, false);
            let result = client
                .post(&rule.webhook_url)
                .header("Content-Type", "application/json")
                .header("User-Agent", USER_AGENT)
                .json(&payload)
                .send()
                .await;

            // Cooldown starts on every attempt so a broken endpoint is not hammered.
            cooldowns.insert(key, Instant::now());

            let (status_code, success, err_msg) = match result {
                Ok(resp) => {
                    let status = resp.status().as_u16() as i32;
                    if resp.status().is_success() {
                        info!(rule = %rule.name, alert_id = %alert.alert_id, status, "alert dispatched");
                        (Some(status), true, None)
                    } else {
                        warn!(rule = %rule.name, alert_id = %alert.alert_id, status, "alert webhook returned non-success");
                        (Some(status), false, Some(format!("HTTP {status}")))
                    }
                }
                Err(e) => {
                    error!(rule = %rule.name, alert_id = %alert.alert_id, "alert webhook failed: {e}");
                    (None, false, Some(e.to_string()))
                }
            };

            let alert_id = alert.alert_id.to_string();
            let entry_id = alert.entry_id.map(|e| e.to_string());
            let record = DispatchRecord {
                dispatch_id: &payload.dispatch.id,
                alert_id: &alert_id,
                rule_name: &rule.name,
                kind: alert.kind.as_str(),
                stream_id: alert.stream_id.as_str(),
                entry_id: entry_id.as_deref(),
                fired_at: Utc::now(),
                webhook_url: &rule.webhook_url,
                status_code,
                success,
                error: err_msg.as_deref(),
            };
            if let Err(db_err) = alert_log::record_dispatch(&log_conn, &record) {
                error!("failed to record alert dispatch to database: {db_err}");
            }
        }
    }

    info!("alert dispatcher shutting down (channel closed)");
}

/// Send a test webhook to verify connectivity for a specific rule.
///
/// Returns the HTTP status code on success.
pub async fn send_test_webhook(rule: &AlertRule) -> Result<u16, String> {
    let stream = StreamId::new("verity-test").map_err(|e| e.to_string())?;
    let test_alert = Alert::new(
        AlertKind::ChainCorruption,
        Severity::Info,
        stream,
        "test alert -- verifying webhook connectivity",
    );
    let payload = payload::build_payload(&rule.name, &test_alert, true);

    let client = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| format!("failed to build HTTP client: {e}"))?;

    let resp = client
        .post(&rule.webhook_url)
        .header("Content-Type", "application/json")
        .header("User-Agent", USER_AGENT)
        .json(&payload)
        .send()
        .await
        .map_err(|e| format!("webhook request failed: {e}"))?;

    let status = resp.status().as_u16();
    if resp.status().is_success() {
        Ok(status)
    } else {
        Err(format!("webhook returned HTTP {status}"))
    }
}
