//! Published canonical-encoding vectors, checked through the public API.
//!
//! Any independent implementation of the record hash must produce these.

use verity_ledger::{canonical, record_hash, AuditRecord, Payload, Percent, ProgressReport};
use verity_types::{ActorId, StreamId};

fn progress(percent: &str, date: &str) -> Payload {
    Payload::Progress(ProgressReport {
        percent: percent.parse().unwrap(),
        report_date: chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
        remarks: Some("ignored by the hash".into()),
        location: None,
    })
}

#[test]
fn test_progress_chain_vectors() {
    let s = StreamId::new("project-a").unwrap();
    let a = ActorId::new("user-1").unwrap();

    let h1 = record_hash(&s, &a, &progress("10", "2026-01-01"), None);
    assert_eq!(h1, "aad375621c1d7639754efbf38c285b799fe9c76ef8c29d0f4e4c664041c628ef");

    let h2 = record_hash(&s, &a, &progress("25.00", "2026-01-02"), Some(&h1));
    assert_eq!(h2, "777eadbd3418e7513649cbe62e8c551cf6a4516661a6cb3b65069fda3616f2fa");

    let half = record_hash(&s, &a, &progress("45.5", "2026-03-15"), None);
    assert_eq!(half, "60caaf47f1d72bf6a07805e4b17ac4306ec79a801895371a642c585e97a11a9d");
}

#[test]
fn test_audit_vector_ignores_stream_and_details() {
    let payload = Payload::Audit(AuditRecord {
        action: "CREATE_PROJECT".into(),
        entity_type: "project".into(),
        entity_id: "p-1".into(),
        details: serde_json::json!({"budget": 1000}),
        location: None,
    });
    let a = ActorId::new("user-1").unwrap();
    assert_eq!(
        record_hash(&StreamId::audit(), &a, &payload, None),
        "470f73b191a91611a060aa3c2fb2052bdf37943db87f0d0aead61791f6a9ee93"
    );
}

#[test]
fn test_percent_renders_two_decimals() {
    let cases = [("0", "0.00"), ("7.1", "7.10"), ("99.999", "100.00"), ("12.345", "12.35")];
    for (input, rendered) in cases {
        let p: Percent = input.parse().unwrap();
        assert_eq!(p.to_string(), rendered, "input {input}");
    }
    assert!("1e2".parse::<Percent>().is_err());
    assert!(" 5".parse::<Percent>().is_err());
}

#[test]
fn test_sha256_known_answer() {
    assert_eq!(
        canonical::hash(b"abc"),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}
