use chrono::{DateTime, Utc};
use extract::StructuredEntityBundle;
use ingest::{DocumentFormat, RawDocument};
use serde::{Deserialize, Serialize};

use crate::fingerprint::{Fingerprint, PARSER_VERSION};

/// What the cached bundle was extracted from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub file_name: String,
    pub format: DocumentFormat,
    pub pages: u32,
    pub segments: usize,
    pub tables: usize,
}

impl SourceSummary {
    pub fn of(doc: &RawDocument) -> Self {
        Self {
            file_name: doc
                .source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            format: doc.format,
            pages: doc.page_count,
            segments: doc.segments.len(),
            tables: doc.tables.len(),
        }
    }
}

/// First line of an entry file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryHeader {
    pub fingerprint: Fingerprint,
    pub schema_version: u32,
    pub parser_version: String,
    pub created_at: DateTime<Utc>,
    pub completeness: f64,
    pub source: SourceSummary,
    /// Hex SHA-256 of the serialized body.
    pub body_sha256: String,
}

/// One cached parse result. Never modified once written.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub header: EntryHeader,
    pub bundle: StructuredEntityBundle,
}

impl CacheEntry {
    /// Build an entry for a freshly parsed document. The body checksum is
    /// filled in when the entry is serialized.
    pub fn new(fingerprint: Fingerprint, doc: &RawDocument, bundle: StructuredEntityBundle) -> Self {
        Self {
            header: EntryHeader {
                fingerprint,
                schema_version: bundle.schema_version,
                parser_version: PARSER_VERSION.to_string(),
                created_at: Utc::now(),
                completeness: bundle.completeness,
                source: SourceSummary::of(doc),
                body_sha256: String::new(),
            },
            bundle,
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.header.fingerprint
    }
}
