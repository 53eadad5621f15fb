use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Version of the extraction logic. Bumping it invalidates every cached
/// bundle without touching the cache directory.
pub const PARSER_VERSION: &str = "semantic-parser/1.0";

/// Cache key: hex SHA-256 over the document's content hash, the parser
/// version and the schema version. Nothing else goes in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(content_hash: &str, parser_version: &str, schema_version: u32) -> Self {
        let mut hasher = Sha256::new();
        // Length-prefixed so ("ab", "c") and ("a", "bc") differ
        for part in [content_hash.as_bytes(), parser_version.as_bytes()] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        hasher.update(schema_version.to_le_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Accept a fingerprint read back from a file name.
    pub fn parse(s: &str) -> Option<Self> {
        (s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)))
            .then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
