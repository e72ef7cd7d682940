//! Alert dispatch history recording in SQLite.
//!
//! The `alert_log` table records every webhook dispatch attempt, including
//! whether it succeeded and the HTTP status code. It lives in the ledger
//! database file but is not part of any chain, and is queryable via
//! `verity alerts`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

/// SQL to create the alert_log table.
pub const CREATE_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS alert_log (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        dispatch_id TEXT NOT NULL,
        alert_id    TEXT NOT NULL,
        rule_name   TEXT NOT NULL,
        kind        TEXT NOT NULL,
        stream_id   TEXT NOT NULL,
        entry_id    TEXT,
        fired_at    TEXT NOT NULL,
        webhook_url TEXT NOT NULL,
        status_code INTEGER,
        success     INTEGER NOT NULL DEFAULT 0,
        error       TEXT
    );
";

/// A single alert dispatch record from the log.
#[derive(Debug, Clone)]
pub struct AlertLogEntry {
    pub id: i64,
    pub dispatch_id: String,
    pub alert_id: String,
    pub rule_name: String,
    pub kind: String,
    pub stream_id: String,
    /// Ledger entry that triggered the alert, if any.
    pub entry_id: Option<String>,
    pub fired_at: DateTime<Utc>,
    pub webhook_url: String,
    /// HTTP status code from the webhook response, if one was received.
    pub status_code: Option<i32>,
    pub success: bool,
    pub error: Option<String>,
}

/// One dispatch attempt, as written to the log.
#[derive(Debug, Clone)]
pub struct DispatchRecord<'a> {
    pub dispatch_id: &'a str,
    pub alert_id: &'a str,
    pub rule_name: &'a str,
    pub kind: &'a str,
    pub stream_id: &'a str,
    pub entry_id: Option<&'a str>,
    pub fired_at: DateTime<Utc>,
    pub webhook_url: &'a str,
    pub status_code: Option<i32>,
    pub success: bool,
    pub error: Option<&'a str>,
}

/// Initialize the alert_log table in the given connection.
pub fn init_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(CREATE_TABLE_SQL)
}

/// Record an alert dispatch in the log.
pub fn record_dispatch(conn: &Connection, record: &DispatchRecord<'_>) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO alert_log (dispatch_id, alert_id, rule_name, kind, stream_id, entry_id,
                                fired_at, webhook_url, status_code, success, error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            record.dispatch_id,
            record.alert_id,
            record.rule_name,
            record.kind,
            record.stream_id,
            record.entry_id,
            record.fired_at.to_rfc3339(),
            record.webhook_url,
            record.status_code,
            record.success as i32,
            record.error,
        ],
    )?;
    Ok(())
}

/// Query the most recent N alert log entries, ordered newest first.
pub fn recent_entries(conn: &Connection, limit: u32) -> rusqlite::Result<Vec<AlertLogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, dispatch_id, alert_id, rule_name, kind, stream_id, entry_id,
                fired_at, webhook_url, status_code, success, error
         FROM alert_log
         ORDER BY id DESC
         LIMIT ?1",
    )?;

    let rows = stmt.query_map(params![limit], |row| {
        let fired_at_str: String = row.get(7)?;
        let fired_at = DateTime::parse_from_rfc3339(&fired_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
            })?;

        Ok(AlertLogEntry {
            id: row.get(0)?,
            dispatch_id: row.get(1)?,
            alert_id: row.get(2)?,
            rule_name: row.get(3)?,
            kind: row.get(4)?,
            stream_id: row.get(5)?,
            entry_id: row.get(6)?,
            fired_at,
            webhook_url: row.get(8)?,
            status_code: row.get(9)?,
            success: row.get::<_, i32>(10)? != 0,
            error: row.get(11)?,
        })
    })?;

    rows.collect()
}
