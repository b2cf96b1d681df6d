//! The CT log client boundary: `GetSTH` / `GetEntries` are assumed given by
//! an external collaborator. This module defines only the trait the rest of
//! the pipeline programs against, plus a test double.

use crate::cert::RawEntry;
use crate::error::ClientError;

#[derive(Debug, Clone, Copy)]
pub struct SignedTreeHead {
    pub tree_size: u64,
}

/// A connection to a single CT log. Implementations own their own HTTP
/// client instance.
#[async_trait::async_trait]
pub trait CtLogClient: Send + Sync {
    /// Probe the log's current tree size.
    async fn get_sth(&self) -> Result<SignedTreeHead, ClientError>;

    /// Fetch entries `[start, end_inclusive]`. The CT `get-entries` endpoint
    /// this wraps is inclusive on both ends.
    async fn get_entries(
        &self,
        start: u64,
        end_inclusive: u64,
    ) -> Result<Vec<RawEntry>, ClientError>;
}

#[cfg(test)]
pub mod test_double {
    use super::*;
    use std::sync::Mutex;

    /// An in-memory `CtLogClient` backed by a fixed list of entries, for
    /// unit and scenario tests. Not a production HTTP client.
    pub struct StaticCtLogClient {
        pub tree_size: u64,
        pub entries: Vec<RawEntry>,
        /// When `Some`, `get_sth` fails this many times before succeeding.
        pub fail_sth_times: Mutex<u32>,
    }

    impl StaticCtLogClient {
        pub fn new(tree_size: u64, entries: Vec<RawEntry>) -> Self {
            Self {
                tree_size,
                entries,
                fail_sth_times: Mutex::new(0),
            }
        }

        pub fn failing_sth(mut self, times: u32) -> Self {
            self.fail_sth_times = Mutex::new(times);
            self
        }
    }

    #[async_trait::async_trait]
    impl CtLogClient for StaticCtLogClient {
        async fn get_sth(&self) -> Result<SignedTreeHead, ClientError> {
            let mut remaining = self.fail_sth_times.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ClientError::Request {
                    log: "test".into(),
                    source: anyhow::anyhow!("simulated STH failure"),
                });
            }
            Ok(SignedTreeHead {
                tree_size: self.tree_size,
            })
        }

        async fn get_entries(
            &self,
            start: u64,
            end_inclusive: u64,
        ) -> Result<Vec<RawEntry>, ClientError> {
            if start > end_inclusive {
                return Ok(Vec::new());
            }
            Ok(self
                .entries
                .iter()
                .filter(|e| e.index >= start && e.index <= end_inclusive)
                .cloned()
                .collect())
        }
    }
}
