//! The parallel scan sub-protocol within a Puller: a fetcher pool pulls
//! contiguous sub-ranges, a parser pool turns raw entries into `LogEntry`s,
//! and parsed entries are handed to a callback in arbitrary order. Modeled
//! on `keeper-rs`'s `for_each_concurrent` fan-out, split into two
//! bounded-concurrency stages instead of one.

use crate::cert::{CertParser, LogEntry};
use crate::error::ScanError;
use crate::log_client::CtLogClient;
use futures::stream::{self, StreamExt};
use std::future::Future;

/// Partitions `[start, end)` into contiguous sub-ranges of at most `batch_size`.
pub fn partition_window(start: u64, end: u64, batch_size: u64) -> Vec<(u64, u64)> {
    assert!(batch_size > 0, "batch_size must be positive");
    let mut ranges = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let sub_end = (cursor + batch_size).min(end);
        ranges.push((cursor, sub_end));
        cursor = sub_end;
    }
    ranges
}

/// Runs one parallel scan over `[start, end)` and emits each parsed entry to
/// `on_entry`. Returns the highest index covered by a sub-range that was
/// both fetched and fully parsed without error; on any fetcher error the
/// scan aborts and returns that index alongside the error — the highest
/// index safely published is the scan's return value.
pub async fn run_scan<C, P, F, Fut>(
    client: &C,
    parser: &P,
    log_name: &str,
    start: u64,
    end: u64,
    batch_size: u64,
    parallel_fetch: usize,
    num_match: usize,
    mut on_entry: F,
) -> (u64, Result<(), ScanError>)
where
    C: CtLogClient,
    P: CertParser,
    F: FnMut(LogEntry) -> Fut,
    Fut: Future<Output = ()>,
{
    if start >= end {
        return (start, Ok(()));
    }

    let ranges = partition_window(start, end, batch_size);

    // Stage 1: bounded-concurrency fetch of each sub-range.
    let fetch_results: Vec<Result<(u64, u64, Vec<crate::cert::RawEntry>), ScanError>> =
        stream::iter(ranges.into_iter())
            .map(|(sub_start, sub_end)| async move {
                let entries = client
                    .get_entries(sub_start, sub_end.saturating_sub(1))
                    .await
                    .map_err(ScanError::from)?;
                Ok((sub_start, sub_end, entries))
            })
            .buffered(parallel_fetch.max(1))
            .collect()
            .await;

    let mut covered_through = start;
    let mut raw_entries = Vec::new();

    for result in fetch_results {
        match result {
            Ok((_sub_start, sub_end, entries)) => {
                covered_through = sub_end;
                raw_entries.extend(entries);
            }
            Err(err) => {
                tracing::error!(log = log_name, error = %err, "scan fetcher failed; aborting scan");
                return (covered_through, Err(err));
            }
        }
    }

    // Stage 2: bounded-concurrency parse. Parsing is synchronous/CPU-bound
    // in this crate (the ASN.1 decoder is out of scope here), so the "pool"
    // is expressed as chunked parallel parsing rather than spawned OS
    // threads — there is no blocking I/O to hide behind a pool.
    let parsed: Vec<LogEntry> = stream::iter(raw_entries.into_iter())
        .map(|raw| {
            let log_name = log_name.to_string();
            async move {
                let outcome = parser.parse(&raw);
                LogEntry {
                    log_name,
                    index: raw.index,
                    leaf_type: raw.leaf_type,
                    leaf_bytes: raw.leaf_bytes,
                    chain: raw.chain,
                    outcome,
                }
            }
        })
        .buffer_unordered(num_match.max(1))
        .collect()
        .await;

    for entry in parsed {
        on_entry(entry).await;
    }

    (covered_through, Ok(()))
}
