//! Composable filter for audit trail queries.
//!
//! Every condition is AND-combined and the result is always scoped to audit
//! records. `None` fields are ignored.

use chrono::{DateTime, Utc};

use crate::store::format_timestamp;

/// Page size when a filter sets no limit.
pub const DEFAULT_LIMIT: usize = 100;

/// Largest page a single filtered query returns.
pub const MAX_LIMIT: usize = 1_000;

/// A composable filter over the audit stream.
///
/// `AuditFilter::default()` matches every audit record.
#[derive(Debug, Default, Clone)]
pub struct AuditFilter {
    /// Only records committed at or after this time.
    pub from: Option<DateTime<Utc>>,
    /// Only records committed at or before this time.
    pub to: Option<DateTime<Utc>>,
    pub actor_id: Option<String>,
    pub action: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    /// Case-insensitive substring of the action or the entity type.
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// A built WHERE clause with its positional parameters.
pub(crate) struct SqlFragment {
    /// Conditions without the `WHERE` keyword. Never empty.
    pub where_clause: String,
    pub params: Vec<Box<dyn rusqlite::types::ToSql>>,
    /// Index of the next free `?N` placeholder.
    pub next_index: usize,
}

impl SqlFragment {
    pub(crate) fn param_refs(&self) -> Vec<&dyn rusqlite::types::ToSql> {
        self.params.iter().map(|p| p.as_ref()).collect()
    }
}

impl AuditFilter {
    /// The page size this filter asks for, clamped to [`MAX_LIMIT`].
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn effective_offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }

    /// Build the WHERE clause for this filter.
    ///
    /// Parameters use `?N` placeholders starting from 1. Timestamps are
    /// compared in their stored text form, which sorts chronologically.
    pub(crate) fn to_sql(&self) -> SqlFragment {
        let mut conditions: Vec<String> = vec!["kind = 'audit'".to_string()];
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut idx = 1usize;

        if let Some(ref from) = self.from {
            conditions.push(format!("created_at >= ?{idx}"));
            params.push(Box::new(format_timestamp(from)));
            idx += 1;
        }

        if let Some(ref to) = self.to {
            conditions.push(format!("created_at <= ?{idx}"));
            params.push(Box::new(format_timestamp(to)));
            idx += 1;
        }

        let exact = [
            ("actor_id", &self.actor_id),
            ("action", &self.action),
            ("entity_type", &self.entity_type),
            ("entity_id", &self.entity_id),
        ];
        for (column, value) in exact {
            if let Some(value) = value {
                conditions.push(format!("{column} = ?{idx}"));
                params.push(Box::new(value.clone()));
                idx += 1;
            }
        }

        if let Some(ref search) = self.search {
            conditions.push(format!(
                "(action LIKE '%' || ?{idx} || '%' OR entity_type LIKE '%' || ?{idx} || '%')"
            ));
            params.push(Box::new(search.clone()));
            idx += 1;
        }

        SqlFragment {
            where_clause: conditions.join(" AND "),
            params,
            next_index: idx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn empty_filter_matches_every_audit_record() {
        let sql = AuditFilter::default().to_sql();
        assert_eq!(sql.where_clause, "kind = 'audit'");
        assert!(sql.params.is_empty());
        assert_eq!(sql.next_index, 1);
    }

    #[test]
    fn combined_filters() {
        let filter = AuditFilter {
            actor_id: Some("user-1".into()),
            entity_type: Some("project".into()),
            search: Some("create".into()),
            ..Default::default()
        };
        let sql = filter.to_sql();
        assert!(sql.where_clause.contains("actor_id = ?1"));
        assert!(sql.where_clause.contains("entity_type = ?2"));
        assert!(sql.where_clause.contains("action LIKE '%' || ?3 || '%' OR entity_type LIKE '%' || ?3"));
        assert_eq!(sql.params.len(), 3);
        assert_eq!(sql.next_index, 4);
    }

    #[test]
    fn time_range_filter() {
        let filter = AuditFilter {
            from: Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()),
            to: Some(Utc.with_ymd_and_hms(2026, 1, 31, 23, 59, 59).unwrap()),
            ..Default::default()
        };
        let sql = filter.to_sql();
        assert!(sql.where_clause.contains("created_at >= ?1"));
        assert!(sql.where_clause.contains("created_at <= ?2"));
        assert_eq!(sql.param_refs().len(), 2);
    }

    #[test]
    fn limit_is_defaulted_and_clamped() {
        assert_eq!(AuditFilter::default().effective_limit(), DEFAULT_LIMIT);
        let huge = AuditFilter {
            limit: Some(50_000),
            offset: Some(40),
            ..Default::default()
        };
        assert_eq!(huge.effective_limit(), MAX_LIMIT);
        assert_eq!(huge.effective_offset(), 40);
        let zero = AuditFilter {
            limit: Some(0),
            ..Default::default()
        };
        assert_eq!(zero.effective_limit(), 1);
    }
}
