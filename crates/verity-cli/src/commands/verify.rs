//! `verity verify` and `verity sweep`.
//!
//! Both exit with status 1 when any chain fails verification.

use std::path::Path;

use anyhow::{Context, Result};

use verity_ledger::{sweep, ChainVerificationResult, StructuralError, SweepReport};
use verity_types::StreamId;

use crate::commands::Session;
use crate::Format;

pub fn run(config_path: &Path, stream: &str, format: Format) -> Result<()> {
    let stream = StreamId::new(stream)?;
    let session = Session::open(config_path)?;
    let outcome = session.service.verify(&stream);
    session.finish();
    let result = outcome.with_context(|| format!("failed to verify stream {stream}"))?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_result(&result),
    }

    if !result.valid {
        std::process::exit(1);
    }
    Ok(())
}

pub fn sweep(config_path: &Path, workers: Option<usize>, format: Format) -> Result<()> {
    let session = Session::open(config_path)?;
    let workers = workers.unwrap_or_else(|| session.service.sweep_workers());
    let outcome = sweep::run(&session.service, workers);
    session.finish();
    let report = outcome.context("verification sweep failed")?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => print_sweep(&report),
    }

    if !report.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_result(result: &ChainVerificationResult) {
    println!("Integrity Report: {}", result.stream_id);
    println!("  Total entries:  {}", result.total_entries);
    println!(
        "  Chain status:   {}",
        if result.valid { "VALID" } else { "INVALID" }
    );

    if !result.broken_links.is_empty() {
        println!("  Broken links:");
        for link in &result.broken_links {
            println!("    #{} {}", link.position, link.entry_id);
            println!("       expected {}", link.expected_hash);
            println!("       stored   {}", link.actual_hash);
        }
    }
    if !result.structural_errors.is_empty() {
        println!("  Structural errors:");
        for err in &result.structural_errors {
            println!("    {}", describe(err));
        }
    }
}

fn describe(err: &StructuralError) -> String {
    match err {
        StructuralError::MissingGenesis => "first entry is not a genesis entry".into(),
        StructuralError::MultipleGenesis { positions } => {
            format!("multiple genesis entries at positions {positions:?}")
        }
        StructuralError::Fork {
            prev_hash,
            positions,
            ..
        } => format!("fork: positions {positions:?} all link to {prev_hash}"),
        StructuralError::LinkMismatch {
            position,
            entry_id,
            expected_prev_hash,
            actual_prev_hash,
        } => format!(
            "#{position} {entry_id}: prev_hash {actual_prev_hash:?}, expected {expected_prev_hash:?}"
        ),
        StructuralError::TimestampRegression { position, entry_id } => {
            format!("#{position} {entry_id}: created_at earlier than its predecessor")
        }
        StructuralError::UndecodableEntry {
            position,
            entry_id,
            reason,
        } => format!("#{position} {entry_id}: undecodable ({reason})"),
    }
}

fn print_sweep(report: &SweepReport) {
    println!("Verification sweep");
    println!("  Streams checked: {}", report.streams_checked);
    println!("  Valid:           {}", report.valid_streams);
    println!("  Corrupted:       {}", report.corrupted.len());
    println!("  Failed:          {}", report.failures.len());
    println!("  Elapsed:         {} ms", report.elapsed_ms);

    for result in &report.corrupted {
        println!();
        print_result(result);
    }
    for failure in &report.failures {
        println!();
        println!("  {}: {}", failure.stream_id, failure.error);
    }
}
