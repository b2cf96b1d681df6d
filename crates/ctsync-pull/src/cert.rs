//! The data model shared by every stage: fingerprints, leaf/chain bytes, and
//! the opaque `LogEntry` produced by the (out-of-scope) CT client.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A 32-byte SHA-256 fingerprint, used as the canonical dedup identity for a
/// leaf certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Fingerprint(hasher.finalize().into())
    }

    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First three hex characters of this fingerprint, used to select a shard file.
    pub fn shard_prefix(&self) -> String {
        let full = self.hex();
        full[..3].to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

/// The two leaf variants a CT log entry can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafType {
    X509,
    Precertificate,
}

/// A single raw entry as handed back by `CtLogClient::get_entries`, before parsing.
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub index: u64,
    pub leaf_type: LeafType,
    /// Raw leaf DER for X.509 entries, or raw precertificate bytes for
    /// precertificate entries — the exact bytes the fingerprint is taken over.
    pub leaf_bytes: Vec<u8>,
    pub chain: Vec<Vec<u8>>,
}

/// The outcome of parsing a `RawEntry`'s leaf and chain.
///
/// `Unparseable` still carries a fingerprint over the raw bytes so a
/// certificate the parser cannot decode still participates in dedup instead
/// of being silently dropped and re-fetched forever.
#[derive(Debug, Clone)]
pub enum ParseOutcome {
    Parsed {
        leaf_tbs_no_ct_sha256: Fingerprint,
    },
    Unparseable {
        error: String,
    },
}

/// A fully parsed, log-indexed entry ready for the Sink.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub log_name: String,
    pub index: u64,
    pub leaf_type: LeafType,
    pub leaf_bytes: Vec<u8>,
    pub chain: Vec<Vec<u8>>,
    pub outcome: ParseOutcome,
}

impl LogEntry {
    /// The fingerprint used for dedup: SHA-256 of the raw leaf bytes.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.leaf_bytes)
    }

    /// `tbs_no_ct_sha256` column value: the parser's normalized fingerprint
    /// when parsing succeeded, or the leaf fingerprint again as a fallback
    /// for unparseable entries (there is no TBS-without-CT-extension to
    /// compute without a successful parse).
    pub fn tbs_no_ct_fingerprint(&self) -> Fingerprint {
        match &self.outcome {
            ParseOutcome::Parsed {
                leaf_tbs_no_ct_sha256,
            } => *leaf_tbs_no_ct_sha256,
            ParseOutcome::Unparseable { .. } => self.fingerprint(),
        }
    }

    /// SHA-256 over the concatenation of chain DERs, as the shard row's
    /// `chain_sha256_hex` field.
    pub fn chain_fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        for der in &self.chain {
            hasher.update(der);
        }
        Fingerprint(hasher.finalize().into())
    }
}

/// Boundary trait isolating certificate parsing: ASN.1/X.509 decoding
/// happens elsewhere and is assumed given here.
pub trait CertParser: Send + Sync {
    fn parse(&self, raw: &RawEntry) -> ParseOutcome;
}
