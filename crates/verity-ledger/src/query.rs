//! Read-side queries over committed entries.

use rusqlite::{params, Connection, Params};

use verity_types::{StreamId, VerityError};

use crate::entry::LedgerEntry;
use crate::filter::AuditFilter;
use crate::store::{decode_row, map_sqlite_error, SqliteStore, ENTRY_COLUMNS};

/// Run an entry query. An undecodable row is reported as corruption.
fn query_entries<P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    context: &str,
) -> Result<Vec<LedgerEntry>, VerityError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| map_sqlite_error(&format!("{context} prepare failed"), e))?;
    let rows = stmt
        .query_map(params, decode_row)
        .map_err(|e| map_sqlite_error(&format!("{context} failed"), e))?;

    let mut entries = Vec::new();
    for row in rows {
        let row = row.map_err(|e| map_sqlite_error(&format!("{context} read failed"), e))?;
        match row {
            Ok(entry) => entries.push(entry),
            Err(bad) => {
                return Err(VerityError::ChainCorruption {
                    stream: context.to_string(),
                    detail: format!("entry {} is undecodable: {}", bad.entry_id, bad.reason),
                })
            }
        }
    }
    Ok(entries)
}

impl SqliteStore {
    /// The most recently committed entry of `stream`.
    pub fn latest(&self, stream: &StreamId) -> Result<Option<LedgerEntry>, VerityError> {
        let mut entries = self.history(stream, 1, 0)?;
        Ok(entries.pop())
    }

    /// Entries of `stream`, most recent first.
    pub fn history(
        &self,
        stream: &StreamId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>, VerityError> {
        self.with_connection(|conn| {
            query_entries(
                conn,
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE stream_id = ?1
                     ORDER BY seq DESC LIMIT ?2 OFFSET ?3"
                ),
                params![stream.as_str(), limit as i64, offset as i64],
                stream.as_str(),
            )
        })
    }

    /// Number of entries committed to `stream`.
    pub fn count(&self, stream: &StreamId) -> Result<usize, VerityError> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM ledger_entries WHERE stream_id = ?1",
                params![stream.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .map(|c| c as usize)
            .map_err(|e| map_sqlite_error("count failed", e))
        })
    }

    /// Every stream with at least one entry, sorted by name.
    pub fn streams(&self) -> Result<Vec<StreamId>, VerityError> {
        let names: Vec<String> = self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT DISTINCT stream_id FROM ledger_entries ORDER BY stream_id")
                .map_err(|e| map_sqlite_error("streams prepare failed", e))?;
            let rows = stmt
                .query_map([], |row| row.get(0))
                .map_err(|e| map_sqlite_error("streams failed", e))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| map_sqlite_error("streams read failed", e))
        })?;

        names
            .into_iter()
            .map(|name| {
                StreamId::new(name).map_err(|e| VerityError::fatal(format!("stored stream id: {e}")))
            })
            .collect()
    }

    /// Audit records about one entity, oldest first.
    pub fn audit_by_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<LedgerEntry>, VerityError> {
        self.with_connection(|conn| {
            query_entries(
                conn,
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM ledger_entries
                     WHERE kind = 'audit' AND entity_type = ?1 AND entity_id = ?2
                     ORDER BY seq ASC"
                ),
                params![entity_type, entity_id],
                "audit",
            )
        })
    }

    /// One page of audit records matching `filter`, newest first.
    pub fn audit_log(&self, filter: &AuditFilter) -> Result<Vec<LedgerEntry>, VerityError> {
        self.audit_page(filter, filter.effective_limit())
    }

    /// Matching audit records, newest first, at most `limit` of them.
    pub(crate) fn audit_page(
        &self,
        filter: &AuditFilter,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, VerityError> {
        let fragment = filter.to_sql();
        let idx = fragment.next_index;
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE {}
             ORDER BY seq DESC LIMIT ?{idx} OFFSET ?{}",
            fragment.where_clause,
            idx + 1
        );
        let (limit, offset) = (limit as i64, filter.effective_offset() as i64);
        let mut params = fragment.param_refs();
        params.push(&limit);
        params.push(&offset);

        self.with_connection(|conn| query_entries(conn, &sql, params.as_slice(), "audit"))
    }
}
