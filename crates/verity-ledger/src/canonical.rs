//! Canonical encoding and hashing of ledger payloads.
//!
//! The encoding is a single JSON object with byte-wise sorted keys, no
//! whitespace, and every value rendered as a JSON string. `prev_hash` is
//! always present and is the empty string for a genesis entry. The record
//! hash is the lowercase hex SHA-256 of the UTF-8 encoding.
//!
//! Offline clients reproduce these bytes independently, so nothing here may
//! depend on a serializer's defaults.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use verity_types::{ActorId, StreamId, VerityError};

use crate::entry::{AuditRecord, Payload, ProgressReport};

/// A percentage with exactly two decimals, held as integer hundredths.
///
/// Parsing rounds extra decimals half away from zero. Range checks belong to
/// payload validation, so out-of-range values can be represented and reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Percent(i64);

impl Percent {
    pub const ZERO: Percent = Percent(0);
    pub const HUNDRED: Percent = Percent(10_000);

    pub fn from_hundredths(hundredths: i64) -> Self {
        Self(hundredths)
    }

    pub fn hundredths(&self) -> i64 {
        self.0
    }

    /// Convert a float through its shortest round-trip decimal form, so
    /// `45.555` rounds to `45.56` as written rather than as stored in binary.
    pub fn from_f64(value: f64) -> Result<Self, VerityError> {
        if !value.is_finite() {
            return Err(VerityError::Validation(format!(
                "percent {value} is not a finite number"
            )));
        }
        format!("{value}").parse()
    }

    pub fn is_within_bounds(&self) -> bool {
        (Self::ZERO..=Self::HUNDRED).contains(self)
    }
}

impl FromStr for Percent {
    type Err = VerityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VerityError::Validation(format!("invalid percent {s:?}"));

        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) if !f.is_empty() => (i, f),
            Some(_) => return Err(invalid()),
            None => (digits, ""),
        };
        if int_part.is_empty()
            || !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        let whole: i64 = int_part.parse().map_err(|_| invalid())?;
        let frac = frac_part.as_bytes();
        let digit = |i: usize| frac.get(i).map_or(0, |b| i64::from(b - b'0'));
        let mut hundredths = whole
            .checked_mul(100)
            .and_then(|h| h.checked_add(digit(0) * 10 + digit(1)))
            .ok_or_else(invalid)?;
        if digit(2) >= 5 {
            hundredths = hundredths.checked_add(1).ok_or_else(invalid)?;
        }

        Ok(Self(if negative { -hundredths } else { hundredths }))
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Serialize for Percent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Percent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(f64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s.parse(),
            Raw::Number(n) => Percent::from_f64(n),
        }
        .map_err(serde::de::Error::custom)
    }
}

/// Append `value` to `out` as a JSON string literal.
fn push_json_string(out: &mut String, value: &str) {
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Encode string fields as a canonical JSON object.
///
/// Keys are sorted byte-wise. Duplicate keys are the caller's bug and are
/// emitted as given.
pub fn encode_fields(fields: &[(&str, &str)]) -> String {
    let mut sorted: Vec<&(&str, &str)> = fields.iter().collect();
    sorted.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    let mut out = String::with_capacity(128);
    out.push('{');
    for (i, (key, value)) in sorted.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_json_string(&mut out, key);
        out.push(':');
        push_json_string(&mut out, value);
    }
    out.push('}');
    out
}

/// Canonical encoding of a progress report.
pub fn encode_progress(
    stream_id: &StreamId,
    actor_id: &ActorId,
    report: &ProgressReport,
    prev_hash: Option<&str>,
) -> String {
    let percent = report.percent.to_string();
    let report_date = report.report_date.format("%Y-%m-%d").to_string();
    encode_fields(&[
        ("stream_id", stream_id.as_str()),
        ("percent", &percent),
        ("report_date", &report_date),
        ("actor_id", actor_id.as_str()),
        ("prev_hash", prev_hash.unwrap_or("")),
    ])
}

/// Canonical encoding of an audit record.
pub fn encode_audit(actor_id: &ActorId, record: &AuditRecord, prev_hash: Option<&str>) -> String {
    encode_fields(&[
        ("actor_id", actor_id.as_str()),
        ("action", &record.action),
        ("entity_type", &record.entity_type),
        ("entity_id", &record.entity_id),
        ("prev_hash", prev_hash.unwrap_or("")),
    ])
}

/// Canonical encoding of any payload.
pub fn encode(
    stream_id: &StreamId,
    actor_id: &ActorId,
    payload: &Payload,
    prev_hash: Option<&str>,
) -> String {
    match payload {
        Payload::Progress(report) => encode_progress(stream_id, actor_id, report, prev_hash),
        Payload::Audit(record) => encode_audit(actor_id, record, prev_hash),
    }
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// The record hash of a payload linked to `prev_hash`.
pub fn record_hash(
    stream_id: &StreamId,
    actor_id: &ActorId,
    payload: &Payload,
    prev_hash: Option<&str>,
) -> String {
    hash(encode(stream_id, actor_id, payload, prev_hash).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const H1: &str = "aad375621c1d7639754efbf38c285b799fe9c76ef8c29d0f4e4c664041c628ef";
    const H2: &str = "777eadbd3418e7513649cbe62e8c551cf6a4516661a6cb3b65069fda3616f2fa";

    fn report(percent: &str, date: &str) -> ProgressReport {
        ProgressReport {
            percent: percent.parse().unwrap(),
            report_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            remarks: None,
            location: None,
        }
    }

    fn audit(action: &str, entity_type: &str, entity_id: &str) -> AuditRecord {
        AuditRecord {
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            details: serde_json::Value::Null,
            location: None,
        }
    }

    fn stream() -> StreamId {
        StreamId::new("project-a").unwrap()
    }

    fn actor(id: &str) -> ActorId {
        ActorId::new(id).unwrap()
    }

    #[test]
    fn sha256_known_answer() {
        assert_eq!(
            hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn progress_genesis_vector() {
        let encoded = encode_progress(&stream(), &actor("user-1"), &report("10", "2026-01-01"), None);
        assert_eq!(
            encoded,
            r#"{"actor_id":"user-1","percent":"10.00","prev_hash":"","report_date":"2026-01-01","stream_id":"project-a"}"#
        );
        assert_eq!(hash(encoded.as_bytes()), H1);
    }

    #[test]
    fn progress_linked_vector() {
        let payload = Payload::Progress(report("25", "2026-01-02"));
        assert_eq!(record_hash(&stream(), &actor("user-1"), &payload, Some(H1)), H2);
    }

    #[test]
    fn progress_fractional_percent_vector() {
        let payload = Payload::Progress(report("45.5", "2026-03-15"));
        assert_eq!(
            record_hash(&stream(), &actor("user-1"), &payload, None),
            "60caaf47f1d72bf6a07805e4b17ac4306ec79a801895371a642c585e97a11a9d"
        );
    }

    #[test]
    fn audit_genesis_vector() {
        let encoded = encode_audit(&actor("user-1"), &audit("CREATE_PROJECT", "project", "p-1"), None);
        assert_eq!(
            encoded,
            r#"{"action":"CREATE_PROJECT","actor_id":"user-1","entity_id":"p-1","entity_type":"project","prev_hash":""}"#
        );
        assert_eq!(
            hash(encoded.as_bytes()),
            "470f73b191a91611a060aa3c2fb2052bdf37943db87f0d0aead61791f6a9ee93"
        );
    }

    #[test]
    fn escaping_vector() {
        let encoded = encode_audit(&actor("a\"b\\c\né\u{1}"), &audit("NOTE", "project", "e-1"), None);
        assert_eq!(
            encoded,
            "{\"action\":\"NOTE\",\"actor_id\":\"a\\\"b\\\\c\\né\\u0001\",\"entity_id\":\"e-1\",\"entity_type\":\"project\",\"prev_hash\":\"\"}"
        );
        assert_eq!(
            hash(encoded.as_bytes()),
            "32ef20298a1c967696aa07d0129492f041696e1cc6bf5fc0cefe6ec988b5e269"
        );
    }

    #[test]
    fn slash_and_control_escapes() {
        let mut out = String::new();
        push_json_string(&mut out, "a/b\u{8}\u{c}\t\r\u{1f}");
        assert_eq!(out, "\"a/b\\b\\f\\t\\r\\u001f\"");
    }

    #[test]
    fn unhashed_fields_do_not_change_hash() {
        let plain = Payload::Progress(report("10", "2026-01-01"));
        let mut annotated = report("10", "2026-01-01");
        annotated.remarks = Some("foundation poured".into());
        annotated.location = Some(verity_types::GeoPoint::new(7.2, 124.2));
        let annotated = Payload::Progress(annotated);
        assert_eq!(
            record_hash(&stream(), &actor("user-1"), &plain, None),
            record_hash(&stream(), &actor("user-1"), &annotated, None),
        );
    }

    #[test]
    fn percent_formatting() {
        assert_eq!("45.5".parse::<Percent>().unwrap().to_string(), "45.50");
        assert_eq!("0.5".parse::<Percent>().unwrap().to_string(), "0.50");
        assert_eq!("100".parse::<Percent>().unwrap().to_string(), "100.00");
        assert_eq!("-1.5".parse::<Percent>().unwrap().to_string(), "-1.50");
    }

    #[test]
    fn percent_rounds_half_away_from_zero() {
        assert_eq!("12.345".parse::<Percent>().unwrap().hundredths(), 1235);
        assert_eq!("12.344".parse::<Percent>().unwrap().hundredths(), 1234);
        assert_eq!("-12.345".parse::<Percent>().unwrap().hundredths(), -1235);
        assert_eq!("99.995".parse::<Percent>().unwrap().hundredths(), 10_000);
        assert_eq!(Percent::from_f64(45.555).unwrap().hundredths(), 4556);
        assert_eq!(Percent::from_f64(10.0).unwrap().to_string(), "10.00");
    }

    #[test]
    fn percent_rejects_malformed() {
        for bad in ["", ".5", "5.", "+5", "1e2", "abc", "1.2.3", " 5", "--1"] {
            assert!(bad.parse::<Percent>().is_err(), "{bad:?} should be rejected");
        }
        assert!(Percent::from_f64(f64::NAN).is_err());
    }

    #[test]
    fn percent_bounds() {
        assert!(Percent::ZERO.is_within_bounds());
        assert!(Percent::HUNDRED.is_within_bounds());
        assert!(!Percent::from_hundredths(10_001).is_within_bounds());
        assert!(!Percent::from_hundredths(-1).is_within_bounds());
    }

    #[test]
    fn percent_serde_accepts_text_and_numbers() {
        let p: Percent = serde_json::from_str("\"45.5\"").unwrap();
        assert_eq!(p.to_string(), "45.50");
        let p: Percent = serde_json::from_str("45.5").unwrap();
        assert_eq!(p.hundredths(), 4550);
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"45.50\"");
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn display_parses_back(h in -1_000_000i64..1_000_000) {
                let p = Percent::from_hundredths(h);
                prop_assert_eq!(p.to_string().parse::<Percent>().unwrap(), p);
            }

            #[test]
            fn encoding_ignores_field_order_and_is_stable(
                action in "[A-Z_]{1,12}",
                entity in "[a-z0-9-]{1,12}",
            ) {
                let record = audit(&action, "project", &entity);
                let a = encode_audit(&actor("user-1"), &record, Some("ab"));
                let b = encode_fields(&[
                    ("prev_hash", "ab"),
                    ("entity_type", "project"),
                    ("entity_id", &entity),
                    ("actor_id", "user-1"),
                    ("action", &action),
                ]);
                prop_assert_eq!(a, b);
            }
        }
    }
}
