//! Output hashing for the provenance triple.
//!
//! Every intercepted call records SHA-256 digests of the clean output,
//! the spoofed output, and the deterministic stimulus that produced it,
//! so offline analysis can prove spoofing happened and measure drift
//! without shipping raw page content.

use serde::Serialize;
use sha2::{Digest, Sha256};

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn sha256_hex_str(s: &str) -> String {
    sha256_hex(s.as_bytes())
}

/// CSV rendering of the first 100 bytes of a buffer; the content
/// fragment mixed into pixel-seed derivation. Kept small on purpose —
/// the full buffer hash lives in the clean/spoofed digests.
pub fn content_snippet(bytes: &[u8]) -> String {
    let take = bytes.len().min(100);
    let mut out = String::with_capacity(take * 4);
    for (i, b) in bytes[..take].iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&b.to_string());
    }
    out
}

/// The clean/spoofed/stimulus digest triple attached to telemetry
/// events. `spoofed == clean` whenever no seed was active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashTriple {
    pub clean: String,
    pub spoofed: String,
    pub stimulus: String,
}

impl HashTriple {
    /// Triple for a pass-through call: nothing was changed.
    pub fn clean_only(clean: String, stimulus: String) -> Self {
        HashTriple {
            spoofed: clean.clone(),
            clean,
            stimulus,
        }
    }

    pub fn lied(&self) -> bool {
        self.clean != self.spoofed
    }
}
