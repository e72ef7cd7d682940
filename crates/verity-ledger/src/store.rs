//! SqliteStore: the durable append-only entry table.
//!
//! The store issues only INSERT and SELECT against `ledger_entries`. The
//! schema carries triggers that abort any UPDATE or DELETE on committed rows,
//! and a unique index on `(stream_id, prev_hash)` so a writer holding a stale
//! tail can never commit, whichever process it runs in.
//!
//! Appends run in `BEGIN IMMEDIATE` transactions, which SQLite serializes
//! across the whole database file. Streams do not contend in process, but
//! concurrent commits to different streams still queue on the one write lock.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info, warn};

use verity_types::{ActorId, EntryId, GeoPoint, StreamId, VerityError};

use crate::canonical::Percent;
use crate::entry::{AuditRecord, LedgerEntry, Payload, ProgressReport, StreamKind};

const CHAIN_LINK_INDEX: &str = "idx_ledger_chain_link";
const APPEND_ONLY_MESSAGE: &str = "ledger_entries is append-only";
const MAX_IDLE_CONNECTIONS: usize = 8;

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS ledger_entries (
        seq                INTEGER PRIMARY KEY AUTOINCREMENT,
        entry_id           TEXT NOT NULL UNIQUE,
        stream_id          TEXT NOT NULL,
        kind               TEXT NOT NULL,
        actor_id           TEXT NOT NULL,
        percent_hundredths INTEGER,
        report_date        TEXT,
        remarks            TEXT,
        action             TEXT,
        entity_type        TEXT,
        entity_id          TEXT,
        details            TEXT,
        lat                REAL,
        lon                REAL,
        prev_hash          TEXT,
        record_hash        TEXT NOT NULL,
        created_at         TEXT NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_ledger_chain_link
        ON ledger_entries(stream_id, ifnull(prev_hash, ''));
    CREATE UNIQUE INDEX IF NOT EXISTS idx_ledger_report_date
        ON ledger_entries(stream_id, report_date) WHERE report_date IS NOT NULL;
    CREATE INDEX IF NOT EXISTS idx_ledger_stream_seq ON ledger_entries(stream_id, seq);
    CREATE INDEX IF NOT EXISTS idx_ledger_audit_entity
        ON ledger_entries(entity_type, entity_id) WHERE kind = 'audit';

    CREATE TRIGGER IF NOT EXISTS ledger_entries_no_update
        BEFORE UPDATE ON ledger_entries
        BEGIN SELECT RAISE(ABORT, 'ledger_entries is append-only'); END;
    CREATE TRIGGER IF NOT EXISTS ledger_entries_no_delete
        BEFORE DELETE ON ledger_entries
        BEGIN SELECT RAISE(ABORT, 'ledger_entries is append-only'); END;

    CREATE TABLE IF NOT EXISTS frozen_streams (
        stream_id TEXT PRIMARY KEY,
        frozen_at TEXT NOT NULL,
        reason    TEXT NOT NULL
    );
";

/// Columns selected for every entry read, in the order `decode_row` expects.
pub(crate) const ENTRY_COLUMNS: &str = "seq, entry_id, stream_id, kind, actor_id, \
    percent_hundredths, report_date, remarks, action, entity_type, entity_id, details, \
    lat, lon, prev_hash, record_hash, created_at";

/// The most recently committed entry of a stream, as seen inside the append
/// section.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainTail {
    pub record_hash: String,
    pub created_at: DateTime<Utc>,
    pub kind: StreamKind,
}

/// A stored row whose payload could not be decoded.
///
/// The chain columns are still available so linkage can be checked around it.
#[derive(Debug, Clone, PartialEq)]
pub struct UndecodableRow {
    pub entry_id: String,
    pub prev_hash: Option<String>,
    pub record_hash: String,
    pub created_at: Option<DateTime<Utc>>,
    pub reason: String,
}

/// One row read back from the store.
pub type StoredRow = Result<LedgerEntry, UndecodableRow>;

/// A stream closed to appends by the corruption policy.
#[derive(Debug, Clone, PartialEq)]
pub struct FrozenStream {
    pub stream_id: String,
    pub frozen_at: String,
    pub reason: String,
}

/// Format a timestamp the way it is stored: RFC 3339, UTC, microseconds.
pub(crate) fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid created_at {raw:?}: {e}"))
}

/// Map a rusqlite error to the shared taxonomy.
pub(crate) fn map_sqlite_error(context: &str, e: rusqlite::Error) -> VerityError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            VerityError::transient(format!("{context}: {e}"))
        }
        rusqlite::Error::SqliteFailure(err, Some(msg))
            if err.code == ErrorCode::ConstraintViolation && msg.contains(APPEND_ONLY_MESSAGE) =>
        {
            VerityError::fatal(format!("{context}: {APPEND_ONLY_MESSAGE}"))
        }
        _ => VerityError::fatal(format!("{context}: {e}")),
    }
}

/// Map an insert failure, recognising the chain-link and report-date indexes.
fn map_insert_error(e: rusqlite::Error, entry: &LedgerEntry) -> VerityError {
    if let rusqlite::Error::SqliteFailure(err, Some(msg)) = &e {
        if err.code == ErrorCode::ConstraintViolation {
            if msg.contains(CHAIN_LINK_INDEX) {
                return VerityError::ConcurrencyConflict {
                    stream: entry.stream_id.to_string(),
                    attempts: 1,
                };
            }
            if msg.contains("report_date") {
                return duplicate_date(&entry.stream_id, entry.payload.report_date());
            }
        }
    }
    map_sqlite_error("failed to insert entry", e)
}

pub(crate) fn duplicate_date(stream: &StreamId, date: Option<NaiveDate>) -> VerityError {
    match date {
        Some(date) => VerityError::Validation(format!(
            "stream {stream} already has a report for {date}"
        )),
        None => VerityError::Validation(format!("stream {stream} already has a report for that date")),
    }
}

fn open_connection(path: &Path, busy_timeout: Duration) -> Result<Connection, VerityError> {
    let conn = Connection::open(path)
        .map_err(|e| map_sqlite_error("failed to open database", e))?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| map_sqlite_error("failed to set WAL mode", e))?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(|e| map_sqlite_error("failed to set synchronous mode", e))?;
    conn.busy_timeout(busy_timeout)
        .map_err(|e| map_sqlite_error("failed to set busy timeout", e))?;
    Ok(conn)
}

/// Decode the payload columns of `row`. Errors are reported as text so the
/// row can still take part in link checks.
fn decode_entry(row: &Row<'_>) -> Result<LedgerEntry, String> {
    fn col<T: rusqlite::types::FromSql>(row: &Row<'_>, name: &str) -> Result<T, String> {
        row.get(name).map_err(|e| format!("column {name}: {e}"))
    }
    fn required(value: Option<String>, name: &str) -> Result<String, String> {
        value.ok_or_else(|| format!("column {name} is null"))
    }

    let entry_id: String = col(row, "entry_id")?;
    let entry_id: EntryId = entry_id.parse().map_err(|e: VerityError| e.to_string())?;
    let stream_id = StreamId::new(col::<String>(row, "stream_id")?).map_err(|e| e.to_string())?;
    let actor_id = ActorId::new(col::<String>(row, "actor_id")?).map_err(|e| e.to_string())?;
    let kind: StreamKind = col::<String>(row, "kind")?
        .parse()
        .map_err(|e: VerityError| e.to_string())?;

    let location = match (col::<Option<f64>>(row, "lat")?, col::<Option<f64>>(row, "lon")?) {
        (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
        (None, None) => None,
        _ => return Err("location has only one coordinate".into()),
    };

    let payload = match kind {
        StreamKind::Progress => {
            let hundredths: Option<i64> = col(row, "percent_hundredths")?;
            let percent = Percent::from_hundredths(
                hundredths.ok_or_else(|| "column percent_hundredths is null".to_string())?,
            );
            let raw_date = required(col(row, "report_date")?, "report_date")?;
            let report_date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d")
                .map_err(|e| format!("invalid report_date {raw_date:?}: {e}"))?;
            Payload::Progress(ProgressReport {
                percent,
                report_date,
                remarks: col(row, "remarks")?,
                location,
            })
        }
        StreamKind::Audit => {
            let details = match col::<Option<String>>(row, "details")? {
                Some(raw) => serde_json::from_str(&raw).map_err(|e| format!("invalid details: {e}"))?,
                None => serde_json::Value::Null,
            };
            Payload::Audit(AuditRecord {
                action: required(col(row, "action")?, "action")?,
                entity_type: required(col(row, "entity_type")?, "entity_type")?,
                entity_id: required(col(row, "entity_id")?, "entity_id")?,
                details,
                location,
            })
        }
    };

    Ok(LedgerEntry {
        entry_id,
        stream_id,
        actor_id,
        payload,
        prev_hash: col(row, "prev_hash")?,
        record_hash: col(row, "record_hash")?,
        created_at: parse_timestamp(&col::<String>(row, "created_at")?)?,
    })
}

/// Decode one row selected with [`ENTRY_COLUMNS`].
///
/// Only the chain columns are required to read; a failure there is a store
/// error rather than an undecodable entry.
pub(crate) fn decode_row(row: &Row<'_>) -> rusqlite::Result<StoredRow> {
    let entry_id: String = row.get("entry_id")?;
    let prev_hash: Option<String> = row.get("prev_hash")?;
    let record_hash: String = row.get("record_hash")?;
    let created_at: String = row.get("created_at")?;

    Ok(decode_entry(row).map_err(|reason| UndecodableRow {
        entry_id,
        prev_hash,
        record_hash,
        created_at: parse_timestamp(&created_at).ok(),
        reason,
    }))
}

fn read_tail(conn: &Connection, stream: &StreamId) -> Result<Option<ChainTail>, VerityError> {
    let row = conn
        .query_row(
            "SELECT record_hash, created_at, kind FROM ledger_entries
             WHERE stream_id = ?1 ORDER BY seq DESC LIMIT 1",
            params![stream.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()
        .map_err(|e| map_sqlite_error("failed to read chain tail", e))?;

    let Some((record_hash, created_at, kind)) = row else {
        return Ok(None);
    };
    let corrupt = |detail: String| VerityError::ChainCorruption {
        stream: stream.to_string(),
        detail: format!("tail entry unreadable: {detail}"),
    };
    Ok(Some(ChainTail {
        record_hash,
        created_at: parse_timestamp(&created_at).map_err(corrupt)?,
        kind: kind.parse().map_err(|e: VerityError| corrupt(e.to_string()))?,
    }))
}

fn report_date_taken(
    conn: &Connection,
    stream: &StreamId,
    date: NaiveDate,
) -> Result<bool, VerityError> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM ledger_entries WHERE stream_id = ?1 AND report_date = ?2)",
        params![stream.as_str(), date.format("%Y-%m-%d").to_string()],
        |row| row.get(0),
    )
    .map_err(|e| map_sqlite_error("failed to check report date", e))
}

fn frozen_reason(conn: &Connection, stream: &StreamId) -> Result<Option<String>, VerityError> {
    conn.query_row(
        "SELECT reason FROM frozen_streams WHERE stream_id = ?1",
        params![stream.as_str()],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| map_sqlite_error("failed to read freeze marker", e))
}

/// Check, build, and insert one entry inside an open write transaction.
fn stage_entry<F>(conn: &Connection, stream: &StreamId, build: F) -> Result<LedgerEntry, VerityError>
where
    F: FnOnce(Option<&ChainTail>) -> Result<LedgerEntry, VerityError>,
{
    if let Some(reason) = frozen_reason(conn, stream)? {
        return Err(VerityError::ChainCorruption {
            stream: stream.to_string(),
            detail: format!("stream is frozen: {reason}"),
        });
    }

    let tail = read_tail(conn, stream)?;
    let entry = build(tail.as_ref())?;
    if entry.stream_id != *stream {
        return Err(VerityError::Validation(format!(
            "entry for {} staged on stream {stream}",
            entry.stream_id
        )));
    }

    if let Some(date) = entry.payload.report_date() {
        if report_date_taken(conn, stream, date)? {
            return Err(duplicate_date(stream, Some(date)));
        }
    }

    insert_entry(conn, &entry)?;
    Ok(entry)
}

fn insert_entry(conn: &Connection, entry: &LedgerEntry) -> Result<(), VerityError> {
    let location = entry.payload.location();
    let (percent, report_date, remarks, action, entity_type, entity_id, details) =
        match &entry.payload {
            Payload::Progress(r) => (
                Some(r.percent.hundredths()),
                Some(r.report_date.format("%Y-%m-%d").to_string()),
                r.remarks.clone(),
                None,
                None,
                None,
                None,
            ),
            Payload::Audit(r) => (
                None,
                None,
                None,
                Some(r.action.as_str()),
                Some(r.entity_type.as_str()),
                Some(r.entity_id.as_str()),
                if r.details.is_null() {
                    None
                } else {
                    Some(r.details.to_string())
                },
            ),
        };

    conn.execute(
        "INSERT INTO ledger_entries (entry_id, stream_id, kind, actor_id, percent_hundredths,
            report_date, remarks, action, entity_type, entity_id, details, lat, lon,
            prev_hash, record_hash, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            entry.entry_id.to_string(),
            entry.stream_id.as_str(),
            entry.payload.kind().as_str(),
            entry.actor_id.as_str(),
            percent,
            report_date,
            remarks,
            action,
            entity_type,
            entity_id,
            details,
            location.map(|p| p.lat),
            location.map(|p| p.lon),
            entry.prev_hash,
            entry.record_hash,
            format_timestamp(&entry.created_at),
        ],
    )
    .map_err(|e| map_insert_error(e, entry))?;
    Ok(())
}

/// An append-only, hash-chained entry store backed by SQLite.
///
/// Connections are pooled and opened on demand. The store needs a file path;
/// an in-memory database would give every pooled connection its own copy.
pub struct SqliteStore {
    path: PathBuf,
    busy_timeout: Duration,
    idle: Mutex<Vec<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the ledger at the given path.
    ///
    /// Enables WAL mode and creates the entry table, its indexes, the
    /// append-only triggers, and the freeze table if they do not exist.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, VerityError> {
        let conn = open_connection(path, busy_timeout)?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| map_sqlite_error("failed to create schema", e))?;

        info!(path = %path.display(), "ledger store opened");

        Ok(Self {
            path: path.to_path_buf(),
            busy_timeout,
            idle: Mutex::new(vec![conn]),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` on a pooled connection, returning it to the pool afterwards.
    pub(crate) fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, VerityError>,
    ) -> Result<T, VerityError> {
        let pooled = self.idle.lock().pop();
        let mut conn = match pooled {
            Some(conn) => conn,
            None => {
                debug!(path = %self.path.display(), "opening additional ledger connection");
                open_connection(&self.path, self.busy_timeout)?
            }
        };

        let result = f(&mut conn);

        let mut idle = self.idle.lock();
        if idle.len() < MAX_IDLE_CONNECTIONS {
            idle.push(conn);
        }
        result
    }

    /// Commit one entry atomically at the tail of `stream`.
    ///
    /// Inside a single write transaction this checks the freeze marker, reads
    /// the tail, lets `build` produce the entry linked to it, re-checks the
    /// report date, and inserts. A stale link surfaces as
    /// `ConcurrencyConflict`.
    pub fn append_with<F>(&self, stream: &StreamId, build: F) -> Result<LedgerEntry, VerityError>
    where
        F: FnOnce(Option<&ChainTail>) -> Result<LedgerEntry, VerityError>,
    {
        self.with_connection(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| map_sqlite_error("failed to begin append", e))?;
            let entry = stage_entry(&tx, stream, build)?;
            tx.commit()
                .map_err(|e| map_sqlite_error("failed to commit append", e))?;
            Ok(entry)
        })
    }

    /// Commit an entry on `stream` together with its companion record on the
    /// audit stream, in one transaction.
    ///
    /// `trail` receives the staged entry and the audit stream's tail. Either
    /// both rows commit or neither does; a frozen audit stream blocks the
    /// append.
    pub fn append_with_trail<F, T>(
        &self,
        stream: &StreamId,
        build: F,
        trail: T,
    ) -> Result<(LedgerEntry, LedgerEntry), VerityError>
    where
        F: FnOnce(Option<&ChainTail>) -> Result<LedgerEntry, VerityError>,
        T: FnOnce(&LedgerEntry, Option<&ChainTail>) -> Result<LedgerEntry, VerityError>,
    {
        let audit = StreamId::audit();
        if *stream == audit {
            return Err(VerityError::Validation(format!(
                "stream {stream} cannot carry its own trail"
            )));
        }
        self.with_connection(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| map_sqlite_error("failed to begin append", e))?;
            let entry = stage_entry(&tx, stream, build)?;
            let record = stage_entry(&tx, &audit, |tail| trail(&entry, tail))?;
            tx.commit()
                .map_err(|e| map_sqlite_error("failed to commit append", e))?;
            Ok((entry, record))
        })
    }

    /// Whether `stream` already holds an entry for `date`. Used as a fast
    /// pre-check outside the append section.
    pub fn has_report_date(&self, stream: &StreamId, date: NaiveDate) -> Result<bool, VerityError> {
        self.with_connection(|conn| report_date_taken(conn, stream, date))
    }

    /// Read every row of `stream` in commit order from one snapshot.
    ///
    /// Rows are fetched `page_size` at a time inside a single read
    /// transaction, so concurrent appends are either wholly visible or not at
    /// all. Returns the number of rows visited.
    pub fn scan_stream<F>(
        &self,
        stream: &StreamId,
        page_size: usize,
        mut visit: F,
    ) -> Result<usize, VerityError>
    where
        F: FnMut(StoredRow),
    {
        let page_size = page_size.max(1);
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| map_sqlite_error("failed to begin snapshot read", e))?;
            let mut total = 0usize;
            {
                let mut stmt = tx
                    .prepare(&format!(
                        "SELECT {ENTRY_COLUMNS} FROM ledger_entries
                         WHERE stream_id = ?1 AND seq > ?2
                         ORDER BY seq ASC LIMIT ?3"
                    ))
                    .map_err(|e| map_sqlite_error("failed to prepare scan", e))?;

                let mut last_seq = 0i64;
                loop {
                    let mut rows = stmt
                        .query(params![stream.as_str(), last_seq, page_size as i64])
                        .map_err(|e| map_sqlite_error("failed to scan entries", e))?;
                    let mut fetched = 0usize;
                    while let Some(row) = rows
                        .next()
                        .map_err(|e| map_sqlite_error("failed to read entry", e))?
                    {
                        last_seq = row
                            .get("seq")
                            .map_err(|e| map_sqlite_error("failed to read entry", e))?;
                        visit(decode_row(row).map_err(|e| map_sqlite_error("failed to read entry", e))?);
                        fetched += 1;
                    }
                    total += fetched;
                    if fetched < page_size {
                        break;
                    }
                }
            }
            tx.commit()
                .map_err(|e| map_sqlite_error("failed to end snapshot read", e))?;
            Ok(total)
        })
    }

    /// Close `stream` to appends. Returns false if it was already frozen.
    pub fn freeze(&self, stream: &StreamId, reason: &str) -> Result<bool, VerityError> {
        let changed = self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO frozen_streams (stream_id, frozen_at, reason) VALUES (?1, ?2, ?3)
                 ON CONFLICT(stream_id) DO NOTHING",
                params![stream.as_str(), format_timestamp(&Utc::now()), reason],
            )
            .map_err(|e| map_sqlite_error("failed to record freeze", e))
        })?;
        if changed > 0 {
            warn!(stream_id = %stream, reason, "stream frozen");
        }
        Ok(changed > 0)
    }

    /// Reopen a frozen stream. Returns false if it was not frozen.
    pub fn unfreeze(&self, stream: &StreamId) -> Result<bool, VerityError> {
        let changed = self.with_connection(|conn| {
            conn.execute(
                "DELETE FROM frozen_streams WHERE stream_id = ?1",
                params![stream.as_str()],
            )
            .map_err(|e| map_sqlite_error("failed to clear freeze", e))
        })?;
        if changed > 0 {
            info!(stream_id = %stream, "stream unfrozen");
        }
        Ok(changed > 0)
    }

    /// Reason `stream` is frozen, or `None` when it accepts appends.
    pub fn frozen_reason(&self, stream: &StreamId) -> Result<Option<String>, VerityError> {
        self.with_connection(|conn| frozen_reason(conn, stream))
    }

    /// Every frozen stream, oldest freeze first.
    pub fn frozen_streams(&self) -> Result<Vec<FrozenStream>, VerityError> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT stream_id, frozen_at, reason FROM frozen_streams ORDER BY frozen_at")
                .map_err(|e| map_sqlite_error("failed to prepare query", e))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(FrozenStream {
                        stream_id: row.get(0)?,
                        frozen_at: row.get(1)?,
                        reason: row.get(2)?,
                    })
                })
                .map_err(|e| map_sqlite_error("failed to query freeze markers", e))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| map_sqlite_error("failed to read freeze marker", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    use crate::canonical;

    fn test_store() -> (NamedTempFile, SqliteStore) {
        let tmp = NamedTempFile::new().expect("failed to create temp file");
        let store = SqliteStore::open(tmp.path(), Duration::from_millis(250)).unwrap();
        (tmp, store)
    }

    fn stream() -> StreamId {
        StreamId::new("project-a").unwrap()
    }

    fn entry_on(tail: Option<&ChainTail>, percent: &str, date: &str) -> LedgerEntry {
        let payload = Payload::Progress(ProgressReport {
            percent: percent.parse().unwrap(),
            report_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            remarks: Some("site visit".into()),
            location: Some(GeoPoint::new(7.2, 124.2)),
        });
        let actor = ActorId::new("user-1").unwrap();
        let prev_hash = tail.map(|t| t.record_hash.clone());
        let record_hash = canonical::record_hash(&stream(), &actor, &payload, prev_hash.as_deref());
        LedgerEntry {
            entry_id: EntryId::new_v4(),
            stream_id: stream(),
            actor_id: actor,
            payload,
            prev_hash,
            record_hash,
            created_at: Utc::now(),
        }
    }

    fn collect(store: &SqliteStore) -> Vec<StoredRow> {
        let mut rows = Vec::new();
        store.scan_stream(&stream(), 2, |row| rows.push(row)).unwrap();
        rows
    }

    #[test]
    fn append_links_to_tail() {
        let (_tmp, store) = test_store();
        let first = store
            .append_with(&stream(), |tail| Ok(entry_on(tail, "10", "2026-01-01")))
            .unwrap();
        let second = store
            .append_with(&stream(), |tail| Ok(entry_on(tail, "25", "2026-01-02")))
            .unwrap();

        assert!(first.is_genesis());
        assert_eq!(second.prev_hash.as_deref(), Some(first.record_hash.as_str()));
    }

    #[test]
    fn scan_pages_in_commit_order() {
        let (_tmp, store) = test_store();
        for day in 1..=5 {
            store
                .append_with(&stream(), |tail| {
                    Ok(entry_on(tail, "10", &format!("2026-01-{day:02}")))
                })
                .unwrap();
        }
        let rows = collect(&store);
        assert_eq!(rows.len(), 5);
        let dates: Vec<_> = rows
            .iter()
            .map(|r| r.as_ref().unwrap().payload.report_date().unwrap().to_string())
            .collect();
        assert_eq!(dates[0], "2026-01-01");
        assert_eq!(dates[4], "2026-01-05");
    }

    #[test]
    fn stored_entry_roundtrips() {
        let (_tmp, store) = test_store();
        let committed = store
            .append_with(&stream(), |tail| Ok(entry_on(tail, "45.5", "2026-03-15")))
            .unwrap();
        let rows = collect(&store);
        let read = rows[0].as_ref().unwrap();
        assert_eq!(read.entry_id, committed.entry_id);
        assert_eq!(read.payload, committed.payload);
        assert_eq!(read.recompute_hash(), read.record_hash);
    }

    #[test]
    fn stale_link_is_a_conflict() {
        let (_tmp, store) = test_store();
        store
            .append_with(&stream(), |tail| Ok(entry_on(tail, "10", "2026-01-01")))
            .unwrap();
        // Pretend the writer saw an empty stream.
        let err = store
            .append_with(&stream(), |_| Ok(entry_on(None, "20", "2026-01-02")))
            .unwrap_err();
        assert!(matches!(err, VerityError::ConcurrencyConflict { .. }));
        assert!(err.is_retryable());
        assert_eq!(collect(&store).len(), 1);
    }

    #[test]
    fn duplicate_date_rejected() {
        let (_tmp, store) = test_store();
        store
            .append_with(&stream(), |tail| Ok(entry_on(tail, "10", "2026-01-01")))
            .unwrap();
        let err = store
            .append_with(&stream(), |tail| Ok(entry_on(tail, "20", "2026-01-01")))
            .unwrap_err();
        assert!(matches!(err, VerityError::Validation(_)));
        assert!(store
            .has_report_date(&stream(), NaiveDate::from_ymd_opt(2026, 1, 1).unwrap())
            .unwrap());
    }

    #[test]
    fn triggers_reject_mutation() {
        let (tmp, store) = test_store();
        store
            .append_with(&stream(), |tail| Ok(entry_on(tail, "10", "2026-01-01")))
            .unwrap();

        let conn = Connection::open(tmp.path()).unwrap();
        let update = conn
            .execute("UPDATE ledger_entries SET percent_hundredths = 9900", [])
            .unwrap_err();
        assert!(map_sqlite_error("update", update).to_string().contains("append-only"));
        assert!(conn.execute("DELETE FROM ledger_entries", []).is_err());
        assert_eq!(collect(&store).len(), 1);
    }

    #[test]
    fn frozen_stream_rejects_appends() {
        let (_tmp, store) = test_store();
        assert!(store.freeze(&stream(), "broken link at 0").unwrap());
        assert!(!store.freeze(&stream(), "again").unwrap());
        assert_eq!(store.frozen_reason(&stream()).unwrap().as_deref(), Some("broken link at 0"));

        let err = store
            .append_with(&stream(), |tail| Ok(entry_on(tail, "10", "2026-01-01")))
            .unwrap_err();
        assert!(matches!(err, VerityError::ChainCorruption { .. }));

        assert!(store.unfreeze(&stream()).unwrap());
        assert!(store.frozen_streams().unwrap().is_empty());
        store
            .append_with(&stream(), |tail| Ok(entry_on(tail, "10", "2026-01-01")))
            .unwrap();
    }

    fn audit_on(tail: Option<&ChainTail>, entity_id: &str) -> LedgerEntry {
        let payload = Payload::Audit(AuditRecord {
            action: "LOG_PROGRESS".into(),
            entity_type: "progress_log".into(),
            entity_id: entity_id.into(),
            details: serde_json::Value::Null,
            location: None,
        });
        let actor = ActorId::new("user-1").unwrap();
        let prev_hash = tail.map(|t| t.record_hash.clone());
        let record_hash =
            canonical::record_hash(&StreamId::audit(), &actor, &payload, prev_hash.as_deref());
        LedgerEntry {
            entry_id: EntryId::new_v4(),
            stream_id: StreamId::audit(),
            actor_id: actor,
            payload,
            prev_hash,
            record_hash,
            created_at: Utc::now(),
        }
    }

    fn audit_rows(store: &SqliteStore) -> usize {
        store.scan_stream(&StreamId::audit(), 10, |_| {}).unwrap()
    }

    #[test]
    fn trail_commits_with_its_entry() {
        let (_tmp, store) = test_store();
        let (entry, record) = store
            .append_with_trail(
                &stream(),
                |tail| Ok(entry_on(tail, "10", "2026-01-01")),
                |staged, tail| Ok(audit_on(tail, &staged.entry_id.to_string())),
            )
            .unwrap();
        assert!(record.is_genesis());
        assert_eq!(
            record.payload,
            audit_on(None, &entry.entry_id.to_string()).payload
        );
        assert_eq!(collect(&store).len(), 1);
        assert_eq!(audit_rows(&store), 1);
    }

    #[test]
    fn failed_trail_rolls_back_entry() {
        let (_tmp, store) = test_store();
        let err = store
            .append_with_trail(
                &stream(),
                |tail| Ok(entry_on(tail, "10", "2026-01-01")),
                |_, _| Err(VerityError::fatal("audit unavailable")),
            )
            .unwrap_err();
        assert!(matches!(err, VerityError::Persistence { transient: false, .. }));
        assert!(collect(&store).is_empty());

        store.freeze(&StreamId::audit(), "broken link at 3").unwrap();
        let blocked = store.append_with_trail(
            &stream(),
            |tail| Ok(entry_on(tail, "10", "2026-01-01")),
            |staged, tail| Ok(audit_on(tail, &staged.entry_id.to_string())),
        );
        assert!(matches!(blocked, Err(VerityError::ChainCorruption { ref stream, .. }) if stream == "audit"));
        assert!(collect(&store).is_empty());
        assert_eq!(audit_rows(&store), 0);
    }

    #[test]
    fn entry_must_match_its_stream() {
        let (_tmp, store) = test_store();
        let err = store
            .append_with(&StreamId::new("project-b").unwrap(), |tail| {
                Ok(entry_on(tail, "10", "2026-01-01"))
            })
            .unwrap_err();
        assert!(matches!(err, VerityError::Validation(_)));
    }

    #[test]
    fn build_error_rolls_back() {
        let (_tmp, store) = test_store();
        let err = store
            .append_with(&stream(), |_| Err(VerityError::Validation("nope".into())))
            .unwrap_err();
        assert!(matches!(err, VerityError::Validation(_)));
        assert!(collect(&store).is_empty());
    }

    #[test]
    fn timestamps_keep_microseconds() {
        let at = DateTime::parse_from_rfc3339("2026-01-01T08:30:00.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        let text = format_timestamp(&at);
        assert_eq!(text, "2026-01-01T08:30:00.123456Z");
        assert_eq!(parse_timestamp(&text).unwrap(), at);
    }
}
