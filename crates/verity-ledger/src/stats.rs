//! Aggregate statistics over the audit trail.
//!
//! Counts by action and by actor, the covered time range, and a bucketed
//! activity timeline. Every figure honours the same [`AuditFilter`] as
//! [`SqliteStore::audit_log`], apart from its page bounds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use verity_types::VerityError;

use crate::filter::AuditFilter;
use crate::store::{map_sqlite_error, SqliteStore};

/// Actors listed in [`AuditStats::entries_by_actor`].
pub const TOP_ACTORS: usize = 50;

/// Summary of the audit records matching a filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditStats {
    pub total_entries: usize,
    /// Record count per action, most frequent first.
    pub entries_by_action: Vec<(String, usize)>,
    /// Record count per actor, most active first, at most [`TOP_ACTORS`].
    pub entries_by_actor: Vec<(String, usize)>,
    pub earliest_entry: Option<String>,
    pub latest_entry: Option<String>,
}

/// Width of one timeline bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    #[default]
    Day,
    /// Weeks start on Monday.
    Week,
    Month,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
        }
    }

    /// SQL expression naming the bucket a stored `created_at` falls in.
    fn bucket_sql(&self) -> &'static str {
        match self {
            Granularity::Hour => "substr(created_at, 1, 13) || ':00'",
            Granularity::Day => "substr(created_at, 1, 10)",
            Granularity::Week => "date(substr(created_at, 1, 10), 'weekday 0', '-6 days')",
            Granularity::Month => "substr(created_at, 1, 7)",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = VerityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" => Ok(Granularity::Hour),
            "day" => Ok(Granularity::Day),
            "week" => Ok(Granularity::Week),
            "month" => Ok(Granularity::Month),
            other => Err(VerityError::Validation(format!(
                "unknown granularity {other:?}, expected hour, day, week or month"
            ))),
        }
    }
}

/// Audit records committed within one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineBucket {
    /// Bucket start: `YYYY-MM-DDTHH:00`, `YYYY-MM-DD` (day or week) or `YYYY-MM`.
    pub bucket: String,
    pub count: usize,
}

impl SqliteStore {
    /// Compute summary statistics for audit records matching `filter`.
    pub fn audit_stats(&self, filter: &AuditFilter) -> Result<AuditStats, VerityError> {
        let entries_by_action = self.count_grouped_by("action", filter, None)?;
        let entries_by_actor = self.count_grouped_by("actor_id", filter, Some(TOP_ACTORS))?;
        let (total_entries, earliest_entry, latest_entry) = self.audit_range(filter)?;

        Ok(AuditStats {
            total_entries,
            entries_by_action,
            entries_by_actor,
            earliest_entry,
            latest_entry,
        })
    }

    /// Record counts per bucket, oldest bucket first. Empty buckets are omitted.
    pub fn audit_timeline(
        &self,
        filter: &AuditFilter,
        granularity: Granularity,
    ) -> Result<Vec<TimelineBucket>, VerityError> {
        let bucket = granularity.bucket_sql();
        let rows = self.grouped(
            &format!("{bucket} AS bucket"),
            "bucket",
            "bucket ASC",
            filter,
            None,
        )?;
        Ok(rows
            .into_iter()
            .map(|(bucket, count)| TimelineBucket { bucket, count })
            .collect())
    }

    /// Count matching records grouped by `column`, largest group first.
    fn count_grouped_by(
        &self,
        column: &'static str,
        filter: &AuditFilter,
        limit: Option<usize>,
    ) -> Result<Vec<(String, usize)>, VerityError> {
        self.grouped(column, column, &format!("COUNT(*) DESC, {column} ASC"), filter, limit)
    }

    fn grouped(
        &self,
        select: &str,
        group_by: &str,
        order_by: &str,
        filter: &AuditFilter,
        limit: Option<usize>,
    ) -> Result<Vec<(String, usize)>, VerityError> {
        let fragment = filter.to_sql();
        let mut sql = format!(
            "SELECT {select}, COUNT(*) FROM ledger_entries WHERE {}
             GROUP BY {group_by} ORDER BY {order_by}",
            fragment.where_clause
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        let params = fragment.param_refs();

        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| map_sqlite_error("audit stats prepare failed", e))?;
            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
                })
                .map_err(|e| map_sqlite_error("audit stats failed", e))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| map_sqlite_error("audit stats read failed", e))
        })
    }

    /// Count plus earliest and latest `created_at` of matching records.
    fn audit_range(
        &self,
        filter: &AuditFilter,
    ) -> Result<(usize, Option<String>, Option<String>), VerityError> {
        let fragment = filter.to_sql();
        let sql = format!(
            "SELECT COUNT(*), MIN(created_at), MAX(created_at) FROM ledger_entries WHERE {}",
            fragment.where_clause
        );
        let params = fragment.param_refs();

        self.with_connection(|conn| {
            conn.query_row(&sql, params.as_slice(), |row| {
                Ok((row.get::<_, i64>(0)? as usize, row.get(1)?, row.get(2)?))
            })
            .map_err(|e| map_sqlite_error("audit range failed", e))
        })
    }
}
