//! CLI flags and the newline-delimited-JSON config file.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, clap::Parser)]
#[clap(author, version, about = "Mirrors CT log entries into deduplicated, sharded local storage.")]
pub struct Args {
    /// Path to the newline-delimited JSON log configuration.
    #[clap(long, default_value = "fullConfig.json")]
    pub config: PathBuf,

    /// Path to the SQLite progress store.
    #[clap(long, default_value = "ctsync-pull.db")]
    pub db: PathBuf,

    /// Tokio worker thread count; 0 lets tokio pick based on available parallelism.
    #[clap(long, default_value_t = 0)]
    pub gomaxprocs: usize,

    /// Concurrent range-fetchers per log.
    #[clap(long, default_value_t = 19)]
    pub fetchers: usize,

    /// Concurrent parse workers per log.
    #[clap(long, default_value_t = 2)]
    pub matchers: usize,

    /// Directory shard CSV files are written under.
    #[clap(long = "output-dir", default_value = "deduped-certs")]
    pub output_dir: PathBuf,

    /// PostgreSQL connection URL for the seen-set table. When unset, a DSN
    /// is derived from the runtime environment (see
    /// `supervisor::default_seen_set_url`), matching `user=ctdownloader
    /// dbname=ctdownload` with a Unix-socket host on Linux.
    #[clap(long, env = "CTSYNC_SEEN_SET_URL")]
    pub seen_set_url: Option<String>,
}

/// One line of the newline-delimited JSON config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfigLine {
    pub name: String,
    pub url: String,
    pub starting_index: i64,
    pub batch_size: i64,
}

/// Parses the newline-delimited JSON config file. Blank lines are skipped;
/// any other malformed line is a fatal startup error.
pub fn parse_config(contents: &str) -> anyhow::Result<Vec<LogConfigLine>> {
    let mut lines = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed: LogConfigLine = serde_json::from_str(line)
            .with_context(|| format!("parsing config line {}: {line}", lineno + 1))?;
        lines.push(parsed);
    }

    let mut names = std::collections::HashSet::new();
    let mut urls = std::collections::HashSet::new();
    for l in &lines {
        anyhow::ensure!(names.insert(l.name.clone()), "duplicate log name: {}", l.name);
        anyhow::ensure!(urls.insert(l.url.clone()), "duplicate log url: {}", l.url);
    }

    Ok(lines)
}
