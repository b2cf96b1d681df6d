//! Sharded CSV output: one append-only file per fingerprint-prefix. Opened
//! lazily on first write, retained for the Sink's lifetime.

use crate::cert::LogEntry;
use crate::error::SinkError;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

#[cfg(unix)]
fn open_options() -> OpenOptions {
    use std::os::unix::fs::OpenOptionsExt;
    let mut opts = OpenOptions::new();
    opts.append(true).create(true).mode(0o644);
    opts
}

#[cfg(not(unix))]
fn open_options() -> OpenOptions {
    let mut opts = OpenOptions::new();
    opts.append(true).create(true);
    opts
}

pub struct ShardWriter {
    output_dir: PathBuf,
    writers: HashMap<String, csv::Writer<std::fs::File>>,
}

impl ShardWriter {
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            writers: HashMap::new(),
        }
    }

    /// Writes one shard row for `entry`, opening `<output-dir>/<prefix>.csv`
    /// on first use for that prefix.
    pub fn write_row(&mut self, entry: &LogEntry) -> Result<(), SinkError> {
        let prefix = entry.fingerprint().shard_prefix();

        if !self.writers.contains_key(&prefix) {
            let writer = self.open_shard(&prefix)?;
            self.writers.insert(prefix.clone(), writer);
        }
        let writer = self.writers.get_mut(&prefix).expect("just inserted");

        let leaf_der_b64 = base64::encode(&entry.leaf_bytes);
        let chain_ders_b64 = entry
            .chain
            .iter()
            .map(base64::encode)
            .collect::<Vec<_>>()
            .join("|");

        writer
            .write_record(&[
                entry.fingerprint().hex(),
                entry.tbs_no_ct_fingerprint().hex(),
                leaf_der_b64,
                entry.chain_fingerprint().hex(),
                chain_ders_b64,
            ])
            .map_err(|err| SinkError::ShardWrite {
                prefix: prefix.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, err),
            })?;

        writer.flush().map_err(|source| SinkError::ShardWrite {
            prefix: prefix.clone(),
            source,
        })
    }

    fn open_shard(&self, prefix: &str) -> Result<csv::Writer<std::fs::File>, SinkError> {
        let path: &Path = &self.output_dir;
        let file_path = path.join(format!("{prefix}.csv"));
        let file = open_options()
            .open(&file_path)
            .map_err(|source| SinkError::ShardWrite {
                prefix: prefix.to_string(),
                source,
            })?;
        Ok(csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file))
    }
}
