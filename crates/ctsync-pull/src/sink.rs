//! The Sink: single consumer of the entry queue, owner of the `BatchBuffer`,
//! coordinator of the transactional seen-set / shard commit. This is the
//! core of the pipeline's crash-safety story.

use crate::cert::{Fingerprint, LogEntry};
use crate::error::SinkError;
use crate::seen_set::SeenSetStore;
use crate::shard::ShardWriter;
use std::collections::HashSet;
use std::time::{Duration, Instant};

pub const INSERT_THRESHOLD: usize = 1000;
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// In-memory staging at the Sink.
pub struct BatchBuffer {
    pending: Vec<LogEntry>,
    batch_local_seen: HashSet<Fingerprint>,
    last_flush: Instant,
}

impl Default for BatchBuffer {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            batch_local_seen: HashSet::new(),
            last_flush: Instant::now(),
        }
    }
}

impl BatchBuffer {
    fn should_flush(&self) -> bool {
        self.pending.len() >= INSERT_THRESHOLD || self.last_flush.elapsed() >= FLUSH_INTERVAL
    }

    fn clear(&mut self) {
        self.pending.clear();
        self.batch_local_seen.clear();
        self.last_flush = Instant::now();
    }
}

pub struct Sink<S: SeenSetStore> {
    seen_set: S,
    shards: ShardWriter,
    buffer: BatchBuffer,
}

impl<S: SeenSetStore> Sink<S> {
    pub fn new(seen_set: S, shards: ShardWriter) -> Self {
        Self {
            seen_set,
            shards,
            buffer: BatchBuffer::default(),
        }
    }

    /// Offers one entry to the Sink. Returns whether a flush was triggered
    /// as a result.
    pub async fn offer(&mut self, entry: LogEntry) -> Result<bool, SinkError> {
        let fp = entry.fingerprint();
        if !self.buffer.batch_local_seen.insert(fp) {
            return Ok(false);
        }
        self.buffer.pending.push(entry);

        if self.buffer.should_flush() {
            self.commit_batch().await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Forces a flush regardless of the size/time trigger, used at shutdown
    /// so no buffered entries are lost on clean drain.
    pub async fn flush(&mut self) -> Result<(), SinkError> {
        if !self.buffer.pending.is_empty() {
            self.commit_batch().await?;
        }
        Ok(())
    }

    async fn commit_batch(&mut self) -> Result<(), SinkError> {
        if self.buffer.pending.is_empty() {
            return Ok(());
        }

        // Query the seen-set before taking anything out of the buffer: a
        // failure here (e.g. a dropped database connection) is not a
        // duplicate-key conflict, it's retained and reattempted on the next
        // flush rather than dropping the batch or propagating as fatal.
        let fingerprints: Vec<Fingerprint> =
            self.buffer.pending.iter().map(|e| e.fingerprint()).collect();
        let already = match self.seen_set.already_present(&fingerprints).await {
            Ok(already) => already,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    count = self.buffer.pending.len(),
                    "seen-set query failed; retaining batch for next flush"
                );
                return Ok(());
            }
        };

        let entries = std::mem::take(&mut self.buffer.pending);
        self.buffer.batch_local_seen.clear();
        self.buffer.last_flush = Instant::now();

        let new_indices: Vec<usize> = (0..entries.len())
            .filter(|i| !already.contains(&fingerprints[*i]))
            .collect();

        if new_indices.is_empty() {
            return Ok(());
        }

        self.insert_and_write(&entries, &fingerprints, &new_indices)
            .await
    }

    /// Recursive bisect-on-insert-failure. A single-entry failure is dropped
    /// silently (assumed already present); a multi-entry failure is split in
    /// half and retried independently.
    fn insert_and_write<'a>(
        &'a mut self,
        entries: &'a [LogEntry],
        fingerprints: &'a [Fingerprint],
        indices: &'a [usize],
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), SinkError>> + Send + 'a>>
    {
        Box::pin(async move {
            if indices.is_empty() {
                return Ok(());
            }

            let rows: Vec<(Fingerprint, Fingerprint)> = indices
                .iter()
                .map(|&i| (fingerprints[i], entries[i].tbs_no_ct_fingerprint()))
                .collect();

            match self.seen_set.insert_batch(&rows).await {
                Ok(inserted) => {
                    let inserted: HashSet<Fingerprint> = inserted.into_iter().collect();
                    for &i in indices {
                        if inserted.contains(&fingerprints[i]) {
                            self.shards.write_row(&entries[i])?;
                        }
                    }
                    Ok(())
                }
                Err(err) => {
                    if indices.len() == 1 {
                        tracing::warn!(
                            fingerprint = %fingerprints[indices[0]],
                            error = %err,
                            "dropping single conflicting entry after insert failure"
                        );
                        return Ok(());
                    }
                    tracing::warn!(
                        count = indices.len(),
                        error = %err,
                        "batch insert failed; bisecting"
                    );
                    let mid = indices.len() / 2;
                    let (left, right) = indices.split_at(mid);
                    self.insert_and_write(entries, fingerprints, left).await?;
                    self.insert_and_write(entries, fingerprints, right).await
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::{LeafType, ParseOutcome};
    use crate::seen_set::test_double::FakeSeenSet;

    fn entry(log: &str, index: u64, bytes: &[u8]) -> LogEntry {
        LogEntry {
            log_name: log.to_string(),
            index,
            leaf_type: LeafType::X509,
            leaf_bytes: bytes.to_vec(),
            chain: vec![b"issuer".to_vec()],
            outcome: ParseOutcome::Parsed {
                leaf_tbs_no_ct_sha256: Fingerprint::of(bytes),
            },
        }
    }

    fn sink(seen: FakeSeenSet, dir: &std::path::Path) -> Sink<FakeSeenSet> {
        Sink::new(seen, ShardWriter::new(dir.to_path_buf()))
    }

    #[tokio::test]
    async fn intra_batch_duplicate_produces_a_single_insert_and_row() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = sink(FakeSeenSet::default(), dir.path());

        let e = entry("A", 0, b"dup");
        sink.offer(e.clone()).await.unwrap();
        sink.offer(e.clone()).await.unwrap();
        sink.flush().await.unwrap();

        let prefix = e.fingerprint().shard_prefix();
        let contents = std::fs::read_to_string(dir.path().join(format!("{prefix}.csv"))).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn entry_already_in_seen_set_produces_no_shard_row() {
        let dir = tempfile::tempdir().unwrap();
        let e = entry("A", 0, b"already-seen");
        let seen = FakeSeenSet::seeded([e.fingerprint()]);
        let mut sink = sink(seen, dir.path());

        sink.offer(e.clone()).await.unwrap();
        sink.flush().await.unwrap();

        let prefix = e.fingerprint().shard_prefix();
        assert!(!dir.path().join(format!("{prefix}.csv")).exists());
    }

    #[tokio::test]
    async fn cross_log_duplicate_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = sink(FakeSeenSet::default(), dir.path());

        let a = entry("A", 0, b"shared-cert");
        let b = entry("B", 5, b"shared-cert");
        sink.offer(a.clone()).await.unwrap();
        sink.flush().await.unwrap();
        sink.offer(b).await.unwrap();
        sink.flush().await.unwrap();

        let prefix = a.fingerprint().shard_prefix();
        let contents = std::fs::read_to_string(dir.path().join(format!("{prefix}.csv"))).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn bisection_writes_only_the_non_conflicting_half() {
        let dir = tempfile::tempdir().unwrap();
        let seen = FakeSeenSet::default();
        let bad = entry("A", 1, b"conflicts");
        seen.always_fail.lock().await.insert(bad.fingerprint());
        let mut sink = sink(seen, dir.path());

        let good = entry("A", 0, b"fine");
        sink.offer(good.clone()).await.unwrap();
        sink.offer(bad.clone()).await.unwrap();
        sink.flush().await.unwrap();

        let good_prefix = good.fingerprint().shard_prefix();
        let bad_prefix = bad.fingerprint().shard_prefix();
        assert!(dir.path().join(format!("{good_prefix}.csv")).exists());
        // The failing entry's shard is either absent, or (if it happens to
        // share a prefix with `good`) present without the bad fingerprint's hex.
        if good_prefix == bad_prefix {
            let contents =
                std::fs::read_to_string(dir.path().join(format!("{bad_prefix}.csv"))).unwrap();
            assert!(!contents.contains(&bad.fingerprint().hex()));
        } else {
            assert!(!dir.path().join(format!("{bad_prefix}.csv")).exists());
        }
    }

    #[tokio::test]
    async fn transient_seen_set_query_failure_retains_batch_for_next_flush() {
        let dir = tempfile::tempdir().unwrap();
        let seen = FakeSeenSet::default().failing_query(1);
        let mut sink = sink(seen, dir.path());

        let e = entry("A", 0, b"retained-on-failure");
        sink.offer(e.clone()).await.unwrap();

        // First flush hits the failing query: no error is propagated, and
        // the entry is not lost.
        sink.flush().await.unwrap();
        let prefix = e.fingerprint().shard_prefix();
        assert!(!dir.path().join(format!("{prefix}.csv")).exists());

        // Second flush succeeds and the retained entry is written.
        sink.flush().await.unwrap();
        let contents = std::fs::read_to_string(dir.path().join(format!("{prefix}.csv"))).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn single_entry_batch_already_seen_clears_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let e = entry("A", 0, b"only-one");
        let seen = FakeSeenSet::seeded([e.fingerprint()]);
        let mut sink = sink(seen, dir.path());
        sink.offer(e).await.unwrap();
        sink.flush().await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
