//! Out-of-band verification sweep across every stream.
//!
//! Streams are verified on a bounded set of scoped worker threads. The sweep
//! takes no append locks; each stream is read from its own snapshot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use verity_types::{StreamId, VerityError};

use crate::service::LedgerService;
use crate::verify::ChainVerificationResult;

/// A stream the sweep could not verify at all.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepFailure {
    pub stream_id: StreamId,
    pub error: String,
}

/// Aggregated outcome of one sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepReport {
    pub streams_checked: usize,
    pub valid_streams: usize,
    /// Results for streams whose chain is not valid, sorted by stream.
    pub corrupted: Vec<ChainVerificationResult>,
    pub failures: Vec<SweepFailure>,
    pub elapsed_ms: u64,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.corrupted.is_empty() && self.failures.is_empty()
    }
}

/// Verify every stream in the store on `workers` threads.
///
/// Each stream goes through [`LedgerService::verify`], so the corruption
/// policy (alerting, freezing) applies as it would for a single verify.
pub fn run(service: &LedgerService, workers: usize) -> Result<SweepReport, VerityError> {
    let started = Instant::now();
    let streams = service.store().streams()?;
    let workers = workers.max(1).min(streams.len().max(1));
    let next = AtomicUsize::new(0);

    let outcomes: Vec<(StreamId, Result<ChainVerificationResult, VerityError>)> =
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(|| {
                        let mut done = Vec::new();
                        loop {
                            let i = next.fetch_add(1, Ordering::Relaxed);
                            let Some(stream) = streams.get(i) else {
                                break;
                            };
                            done.push((stream.clone(), service.verify(stream)));
                        }
                        done
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .map_err(|_| VerityError::fatal("sweep worker panicked"))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(|per_worker| per_worker.into_iter().flatten().collect())
        })?;

    let mut report = SweepReport {
        streams_checked: outcomes.len(),
        valid_streams: 0,
        corrupted: Vec::new(),
        failures: Vec::new(),
        elapsed_ms: 0,
    };
    for (stream_id, outcome) in outcomes {
        match outcome {
            Ok(result) if result.valid => report.valid_streams += 1,
            Ok(result) => report.corrupted.push(result),
            Err(e) => {
                warn!(stream_id = %stream_id, error = %e, "sweep could not verify stream");
                report.failures.push(SweepFailure {
                    stream_id,
                    error: e.to_string(),
                });
            }
        }
    }
    report.corrupted.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
    report.failures.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
    report.elapsed_ms = started.elapsed().as_millis() as u64;

    info!(
        streams = report.streams_checked,
        valid = report.valid_streams,
        corrupted = report.corrupted.len(),
        failed = report.failures.len(),
        elapsed_ms = report.elapsed_ms,
        "verification sweep finished"
    );
    Ok(report)
}
