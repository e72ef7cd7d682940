//! Chain verification.
//!
//! [`ChainWalk`] consumes stored rows in commit order and checks every
//! invariant of a committed chain. Hash mismatches are reported as broken
//! links at the offending position. Linkage, genesis, fork, and timestamp
//! problems are reported separately as structural errors. A payload
//! rewritten without recomputing its stored hash therefore shows up as one
//! broken link; the next entry still links to the stored hash and passes.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use verity_types::{StreamId, VerityError};

use crate::store::{SqliteStore, StoredRow};

/// Stored hash disagrees with the hash recomputed from the stored payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokenLink {
    pub entry_id: String,
    pub position: usize,
    /// Recomputed from the stored payload and link.
    pub expected_hash: String,
    /// As stored.
    pub actual_hash: String,
}

/// A violation of chain shape rather than of a single entry's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuralError {
    /// The first entry in commit order is not a genesis entry.
    MissingGenesis,
    MultipleGenesis {
        positions: Vec<usize>,
    },
    /// Several entries share one `prev_hash`.
    Fork {
        prev_hash: String,
        entry_ids: Vec<String>,
        positions: Vec<usize>,
    },
    /// `prev_hash` does not equal the stored hash of the preceding entry.
    LinkMismatch {
        position: usize,
        entry_id: String,
        expected_prev_hash: String,
        actual_prev_hash: String,
    },
    /// `created_at` is earlier than the preceding entry's.
    TimestampRegression {
        position: usize,
        entry_id: String,
    },
    UndecodableEntry {
        position: usize,
        entry_id: String,
        reason: String,
    },
}

/// Outcome of verifying one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainVerificationResult {
    pub stream_id: StreamId,
    pub total_entries: usize,
    pub valid: bool,
    pub broken_links: Vec<BrokenLink>,
    pub structural_errors: Vec<StructuralError>,
}

impl ChainVerificationResult {
    /// One-line description used in logs, alerts, and the freeze marker.
    pub fn summary(&self) -> String {
        if self.valid {
            format!("{} entries, chain intact", self.total_entries)
        } else {
            format!(
                "{} entries, {} broken link(s), {} structural error(s)",
                self.total_entries,
                self.broken_links.len(),
                self.structural_errors.len()
            )
        }
    }
}

/// Incremental verifier over rows in commit order.
///
/// Memory grows only with the set of `prev_hash` values, which fork
/// detection needs.
pub struct ChainWalk {
    stream_id: StreamId,
    position: usize,
    prev_record_hash: Option<String>,
    prev_created_at: Option<DateTime<Utc>>,
    genesis_positions: Vec<usize>,
    first_is_genesis: bool,
    seen_links: HashMap<String, (usize, String)>,
    forks: BTreeMap<String, (Vec<usize>, Vec<String>)>,
    broken_links: Vec<BrokenLink>,
    structural_errors: Vec<StructuralError>,
}

impl ChainWalk {
    pub fn new(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            position: 0,
            prev_record_hash: None,
            prev_created_at: None,
            genesis_positions: Vec::new(),
            first_is_genesis: false,
            seen_links: HashMap::new(),
            forks: BTreeMap::new(),
            broken_links: Vec::new(),
            structural_errors: Vec::new(),
        }
    }

    /// Check the next row.
    pub fn push(&mut self, row: StoredRow) {
        let position = self.position;
        self.position += 1;

        let (entry_id, prev_hash, record_hash, created_at) = match row {
            Ok(entry) => {
                let recomputed = entry.recompute_hash();
                if recomputed != entry.record_hash {
                    self.broken_links.push(BrokenLink {
                        entry_id: entry.entry_id.to_string(),
                        position,
                        expected_hash: recomputed,
                        actual_hash: entry.record_hash.clone(),
                    });
                }
                (
                    entry.entry_id.to_string(),
                    entry.prev_hash,
                    entry.record_hash,
                    Some(entry.created_at),
                )
            }
            Err(bad) => {
                self.structural_errors.push(StructuralError::UndecodableEntry {
                    position,
                    entry_id: bad.entry_id.clone(),
                    reason: bad.reason,
                });
                (bad.entry_id, bad.prev_hash, bad.record_hash, bad.created_at)
            }
        };

        match &prev_hash {
            None => {
                self.genesis_positions.push(position);
                if position == 0 {
                    self.first_is_genesis = true;
                }
            }
            Some(link) => self.track_link(link, position, &entry_id),
        }

        if let Some(expected) = &self.prev_record_hash {
            let actual = prev_hash.as_deref().unwrap_or("");
            if actual != expected {
                self.structural_errors.push(StructuralError::LinkMismatch {
                    position,
                    entry_id: entry_id.clone(),
                    expected_prev_hash: expected.clone(),
                    actual_prev_hash: actual.to_string(),
                });
            }
        }

        if let Some(at) = created_at {
            if let Some(prev) = self.prev_created_at {
                if at < prev {
                    self.structural_errors.push(StructuralError::TimestampRegression {
                        position,
                        entry_id,
                    });
                }
            }
            self.prev_created_at = Some(at);
        }

        self.prev_record_hash = Some(record_hash);
    }

    fn track_link(&mut self, link: &str, position: usize, entry_id: &str) {
        if let Some((first_pos, first_id)) = self.seen_links.get(link) {
            let fork = self
                .forks
                .entry(link.to_string())
                .or_insert_with(|| (vec![*first_pos], vec![first_id.clone()]));
            fork.0.push(position);
            fork.1.push(entry_id.to_string());
        } else {
            self.seen_links
                .insert(link.to_string(), (position, entry_id.to_string()));
        }
    }

    /// Finish the walk and build the result.
    pub fn finish(mut self) -> ChainVerificationResult {
        let total_entries = self.position;
        let mut shape = Vec::new();

        if total_entries > 0 && !self.first_is_genesis {
            shape.push(StructuralError::MissingGenesis);
        }
        if self.genesis_positions.len() > 1 {
            shape.push(StructuralError::MultipleGenesis {
                positions: self.genesis_positions,
            });
        }
        for (prev_hash, (positions, entry_ids)) in self.forks {
            shape.push(StructuralError::Fork {
                prev_hash,
                entry_ids,
                positions,
            });
        }
        shape.append(&mut self.structural_errors);

        ChainVerificationResult {
            stream_id: self.stream_id,
            total_entries,
            valid: self.broken_links.is_empty() && shape.is_empty(),
            broken_links: self.broken_links,
            structural_errors: shape,
        }
    }
}

/// Verify rows given in commit order.
pub fn verify_entries<I>(stream_id: StreamId, rows: I) -> ChainVerificationResult
where
    I: IntoIterator<Item = StoredRow>,
{
    let mut walk = ChainWalk::new(stream_id);
    for row in rows {
        walk.push(row);
    }
    walk.finish()
}

/// Verify a stored stream from one snapshot, fetching `page_size` rows at a
/// time. Read-only.
pub fn verify_stream(
    store: &SqliteStore,
    stream_id: &StreamId,
    page_size: usize,
) -> Result<ChainVerificationResult, VerityError> {
    let mut walk = ChainWalk::new(stream_id.clone());
    store.scan_stream(stream_id, page_size, |row| walk.push(row))?;
    Ok(walk.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, TimeZone};
    use verity_types::{ActorId, EntryId};

    use crate::canonical::{self, Percent};
    use crate::entry::{LedgerEntry, Payload, ProgressReport};
    use crate::store::UndecodableRow;

    fn stream() -> StreamId {
        StreamId::new("project-a").unwrap()
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap()
    }

    fn entry(day: u32, percent: i64, prev_hash: Option<&str>) -> LedgerEntry {
        let actor = ActorId::new("user-1").unwrap();
        let payload = Payload::Progress(ProgressReport {
            percent: Percent::from_hundredths(percent),
            report_date: NaiveDate::from_ymd_opt(2026, 1, day).unwrap(),
            remarks: None,
            location: None,
        });
        LedgerEntry {
            entry_id: EntryId::new_v4(),
            stream_id: stream(),
            record_hash: canonical::record_hash(&stream(), &actor, &payload, prev_hash),
            actor_id: actor,
            payload,
            prev_hash: prev_hash.map(str::to_string),
            created_at: start() + Duration::minutes(i64::from(day)),
        }
    }

    fn chain(n: u32) -> Vec<LedgerEntry> {
        let mut out: Vec<LedgerEntry> = Vec::new();
        for day in 1..=n {
            let prev = out.last().map(|e| e.record_hash.clone());
            out.push(entry(day, i64::from(day) * 100, prev.as_deref()));
        }
        out
    }

    fn verify(entries: Vec<LedgerEntry>) -> ChainVerificationResult {
        verify_entries(stream(), entries.into_iter().map(Ok))
    }

    #[test]
    fn empty_stream_is_valid() {
        let result = verify(vec![]);
        assert!(result.valid);
        assert_eq!(result.total_entries, 0);
    }

    #[test]
    fn intact_chain_is_valid() {
        let result = verify(chain(5));
        assert!(result.valid, "{result:?}");
        assert_eq!(result.total_entries, 5);
        assert_eq!(result.summary(), "5 entries, chain intact");
    }

    #[test]
    fn tampered_payload_breaks_only_its_own_position() {
        let mut entries = chain(3);
        entries[0].payload = match &entries[0].payload {
            Payload::Progress(r) => Payload::Progress(ProgressReport {
                percent: Percent::from_hundredths(9_900),
                ..r.clone()
            }),
            other => other.clone(),
        };
        let stored_h1 = entries[0].record_hash.clone();

        let result = verify(entries);
        assert!(!result.valid);
        assert_eq!(result.broken_links.len(), 1);
        assert_eq!(result.broken_links[0].position, 0);
        assert_eq!(result.broken_links[0].actual_hash, stored_h1);
        assert_ne!(result.broken_links[0].expected_hash, stored_h1);
        // Entry 1 still links to the stored hash of entry 0.
        assert!(result.structural_errors.is_empty());
    }

    #[test]
    fn rewritten_link_is_a_structural_error() {
        let mut entries = chain(3);
        let forged = "f".repeat(64);
        entries[2] = entry(3, 300, Some(&forged));

        let result = verify(entries);
        assert!(result.broken_links.is_empty());
        assert!(matches!(
            &result.structural_errors[..],
            [StructuralError::LinkMismatch { position: 2, .. }]
        ));
    }

    #[test]
    fn fork_is_reported_distinctly() {
        let mut entries = chain(2);
        let h1 = entries[0].record_hash.clone();
        entries.push(entry(3, 300, Some(&h1)));

        let result = verify(entries);
        assert!(!result.valid);
        assert!(result.broken_links.is_empty());
        let fork = result
            .structural_errors
            .iter()
            .find_map(|e| match e {
                StructuralError::Fork { prev_hash, positions, entry_ids } => {
                    Some((prev_hash.clone(), positions.clone(), entry_ids.len()))
                }
                _ => None,
            })
            .expect("fork reported");
        assert_eq!(fork, (h1, vec![1, 2], 2));
    }

    #[test]
    fn genesis_rules() {
        let mut two_genesis = chain(2);
        two_genesis.push(entry(3, 300, None));
        let result = verify(two_genesis);
        assert!(result
            .structural_errors
            .contains(&StructuralError::MultipleGenesis { positions: vec![0, 2] }));

        let headless = vec![entry(1, 100, Some(&"a".repeat(64)))];
        let result = verify(headless);
        assert_eq!(result.structural_errors, vec![StructuralError::MissingGenesis]);
    }

    #[test]
    fn timestamp_regression_detected() {
        let mut entries = chain(3);
        entries[2].created_at = start();
        let result = verify(entries);
        assert!(matches!(
            &result.structural_errors[..],
            [StructuralError::TimestampRegression { position: 2, .. }]
        ));
    }

    #[test]
    fn undecodable_row_keeps_linkage() {
        let entries = chain(3);
        let bad = UndecodableRow {
            entry_id: entries[1].entry_id.to_string(),
            prev_hash: entries[1].prev_hash.clone(),
            record_hash: entries[1].record_hash.clone(),
            created_at: Some(entries[1].created_at),
            reason: "invalid report_date \"2026-13-01\"".into(),
        };
        let rows: Vec<StoredRow> = vec![Ok(entries[0].clone()), Err(bad), Ok(entries[2].clone())];

        let result = verify_entries(stream(), rows);
        assert!(!result.valid);
        assert!(result.broken_links.is_empty());
        assert!(matches!(
            &result.structural_errors[..],
            [StructuralError::UndecodableEntry { position: 1, .. }]
        ));
    }

    #[test]
    fn result_serializes_for_reports() {
        let mut entries = chain(2);
        entries.push(entry(3, 300, None));
        let json = serde_json::to_value(verify(entries)).unwrap();
        assert_eq!(json["stream_id"], "project-a");
        assert_eq!(json["valid"], false);
        assert_eq!(json["structural_errors"][0]["kind"], "multiple_genesis");
    }

    #[test]
    fn verification_is_repeatable() {
        let entries = chain(4);
        assert_eq!(verify(entries.clone()), verify(entries));
    }
}
