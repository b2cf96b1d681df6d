//! The Puller: one per configured log. Probes tree size, computes the fetch
//! window, drives the parallel scan, and checkpoints on success.

use crate::cancellation::Cancellation;
use crate::cert::{CertParser, LogEntry};
use crate::log_client::CtLogClient;
use crate::scan;
use std::future::Future;
use std::time::Duration;

pub const MAX_FAILED_SCANS: u32 = 10;
pub const BACKOFF: Duration = Duration::from_secs(60);
pub const IDLE_INTERVAL: Duration = Duration::from_secs(60);
pub const SETTLE_INTERVAL: Duration = Duration::from_secs(5);

pub struct PullerConfig {
    pub name: String,
    pub batch_size: u64,
    pub parallel_fetch: usize,
    pub num_match: usize,
}

/// Computes `max_index = min(tree_size, checkpoint + batch_size * parallel_fetch)`.
pub fn fetch_window(checkpoint: u64, tree_size: u64, batch_size: u64, parallel_fetch: usize) -> u64 {
    let span = batch_size.saturating_mul(parallel_fetch as u64);
    tree_size.min(checkpoint.saturating_add(span))
}

/// Runs the Puller loop body until `cancellation` is set or the failure
/// budget is exhausted. `on_entry` is the forwarding hook into the shared
/// entry queue; `on_checkpoint` is the hook into the progress-update queue.
/// Returns once the Puller stops.
pub async fn run<C, P, E, EFut, K, KFut>(
    cfg: PullerConfig,
    client: C,
    parser: P,
    cancellation: Cancellation,
    mut checkpoint: u64,
    mut on_entry: E,
    mut on_checkpoint: K,
) where
    C: CtLogClient,
    P: CertParser,
    E: FnMut(LogEntry) -> EFut,
    EFut: Future<Output = ()>,
    K: FnMut(String, u64) -> KFut,
    KFut: Future<Output = ()>,
{
    let mut failed_scan_count: u32 = 0;

    loop {
        if cancellation.is_set() {
            tracing::info!(log = %cfg.name, "stopping");
            return;
        }

        if failed_scan_count >= MAX_FAILED_SCANS {
            tracing::error!(
                log = %cfg.name,
                failed_scan_count,
                "reached max failed scans; raising cancellation"
            );
            cancellation.set();
            continue;
        }

        tracing::info!(log = %cfg.name, "probing tree size");
        let sth = match client.get_sth().await {
            Ok(sth) => sth,
            Err(err) => {
                // STH-probe failures count toward the same failure budget as
                // scan failures, so a log whose endpoint is entirely
                // unreachable still trips the fail-fast path rather than
                // retrying forever.
                failed_scan_count += 1;
                tracing::warn!(
                    log = %cfg.name,
                    error = %err,
                    failed_scan_count,
                    "STH probe failed; backing off"
                );
                tokio::time::sleep(BACKOFF).await;
                continue;
            }
        };

        if checkpoint == sth.tree_size {
            tracing::debug!(log = %cfg.name, tree_size = sth.tree_size, "synchronized; idling");
            tokio::time::sleep(IDLE_INTERVAL).await;
            continue;
        }

        let max_index = fetch_window(checkpoint, sth.tree_size, cfg.batch_size, cfg.parallel_fetch);

        let (covered_through, result) = scan::run_scan(
            &client,
            &parser,
            &cfg.name,
            checkpoint,
            max_index,
            cfg.batch_size,
            cfg.parallel_fetch,
            cfg.num_match,
            &mut on_entry,
        )
        .await;

        if let Err(err) = result {
            tracing::error!(log = %cfg.name, error = %err, "scan failed; checkpoint not advanced");
            failed_scan_count += 1;
            tokio::time::sleep(BACKOFF).await;
            continue;
        }

        failed_scan_count = 0;
        checkpoint = covered_through;
        on_checkpoint(cfg.name.clone(), checkpoint).await;
        tracing::info!(log = %cfg.name, checkpoint, max_index, "scan complete");
        tokio::time::sleep(SETTLE_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::{Fingerprint, LeafType, ParseOutcome, RawEntry};
    use crate::log_client::test_double::StaticCtLogClient;

    struct NoopParser;
    impl CertParser for NoopParser {
        fn parse(&self, raw: &RawEntry) -> ParseOutcome {
            ParseOutcome::Parsed {
                leaf_tbs_no_ct_sha256: Fingerprint::of(&raw.leaf_bytes),
            }
        }
    }

    fn entries(n: u64) -> Vec<RawEntry> {
        (0..n)
            .map(|i| RawEntry {
                index: i,
                leaf_type: LeafType::X509,
                leaf_bytes: format!("leaf-{i}").into_bytes(),
                chain: vec![],
            })
            .collect()
    }

    #[test]
    fn fetch_window_is_bounded_by_tree_size() {
        assert_eq!(fetch_window(0, 5, 10, 4), 5);
        assert_eq!(fetch_window(0, 1000, 10, 4), 40);
        assert_eq!(fetch_window(100, 100, 10, 4), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn cold_start_pulls_entire_small_log_then_idles() {
        let client = StaticCtLogClient::new(5, entries(5));
        let cancellation = Cancellation::new();
        let cancel_clone = cancellation.clone();

        let seen_indices = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let last_checkpoint = std::sync::Arc::new(std::sync::Mutex::new(None));
        let seen_for_task = seen_indices.clone();
        let checkpoint_for_task = last_checkpoint.clone();

        let cfg = PullerConfig {
            name: "A".into(),
            batch_size: 10,
            parallel_fetch: 19,
            num_match: 2,
        };

        // Cancel the puller shortly after it would have entered its idle
        // sleep, so the test terminates without waiting out IDLE_INTERVAL.
        let handle = tokio::spawn(run(
            cfg,
            client,
            NoopParser,
            cancellation,
            0,
            move |e| {
                let seen = seen_for_task.clone();
                async move {
                    seen.lock().unwrap().push(e.index);
                }
            },
            move |name, idx| {
                let last = checkpoint_for_task.clone();
                async move {
                    *last.lock().unwrap() = Some((name, idx));
                }
            },
        ));

        tokio::time::advance(Duration::from_secs(1)).await;
        cancel_clone.set();
        tokio::time::advance(IDLE_INTERVAL + Duration::from_secs(1)).await;
        handle.await.unwrap();

        let mut indices = seen_indices.lock().unwrap().clone();
        indices.sort();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(
            last_checkpoint.lock().unwrap().clone(),
            Some(("A".to_string(), 5))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn a_single_sth_failure_backs_off_then_recovers_with_no_entries_lost() {
        let client = StaticCtLogClient::new(3, entries(3)).failing_sth(1);
        let cancellation = Cancellation::new();
        let cancel_clone = cancellation.clone();

        let seen_indices = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_for_task = seen_indices.clone();

        let cfg = PullerConfig {
            name: "A".into(),
            batch_size: 10,
            parallel_fetch: 19,
            num_match: 2,
        };

        let handle = tokio::spawn(run(
            cfg,
            client,
            NoopParser,
            cancellation,
            0,
            move |e| {
                let seen = seen_for_task.clone();
                async move {
                    seen.lock().unwrap().push(e.index);
                }
            },
            move |_, _| async move {},
        ));

        // Let the first (failing) STH probe's backoff elapse so the retry runs.
        tokio::time::advance(BACKOFF + Duration::from_secs(1)).await;
        // The retry succeeds and the scan completes; cancel before the puller
        // idles so the test doesn't wait out IDLE_INTERVAL.
        tokio::time::advance(Duration::from_secs(1)).await;
        cancel_clone.set();
        tokio::time::advance(IDLE_INTERVAL + Duration::from_secs(1)).await;
        handle.await.unwrap();

        let mut indices = seen_indices.lock().unwrap().clone();
        indices.sort();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn ten_consecutive_sth_failures_trip_the_cancellation_flag() {
        let client = StaticCtLogClient::new(3, entries(3)).failing_sth(u32::MAX);
        let cancellation = Cancellation::new();

        let cfg = PullerConfig {
            name: "A".into(),
            batch_size: 10,
            parallel_fetch: 19,
            num_match: 2,
        };

        let handle = tokio::spawn(run(
            cfg,
            client,
            NoopParser,
            cancellation.clone(),
            0,
            |_entry| async move {},
            |_name, _idx| async move {},
        ));

        for _ in 0..MAX_FAILED_SCANS {
            tokio::time::advance(BACKOFF + Duration::from_millis(1)).await;
        }
        handle.await.unwrap();

        assert!(cancellation.is_set());
    }
}
