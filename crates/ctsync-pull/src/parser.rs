//! Placeholder `CertParser`: ASN.1/X.509 parsing is out of scope here.
//! `PassthroughParser` fingerprints the raw leaf bytes directly instead of
//! extracting the TBSCertificate-without-the-CT-poison-extension the real
//! `tbs_no_ct_sha256` column is meant to hold; a production deployment
//! replaces this with a real X.509 decoder.

use crate::cert::{CertParser, Fingerprint, ParseOutcome, RawEntry};

pub struct PassthroughParser;

impl CertParser for PassthroughParser {
    fn parse(&self, raw: &RawEntry) -> ParseOutcome {
        ParseOutcome::Parsed {
            leaf_tbs_no_ct_sha256: Fingerprint::of(&raw.leaf_bytes),
        }
    }
}
