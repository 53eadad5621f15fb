use extract::ExtractError;
use ingest::LoadError;
use std::path::PathBuf;
use thiserror::Error;

use crate::cache::CacheError;

/// Failures a `parse` caller can see. Everything recoverable (retries,
/// fallback, rejected fields, damaged cache entries) is absorbed before
/// reaching this type.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Corrupt document {path:?}: {reason}")]
    CorruptDocument { path: PathBuf, reason: String },

    #[error("Understanding service unavailable and fallback extraction found nothing: {0}")]
    AiServiceUnavailable(String),

    #[error("No entities could be extracted from the document")]
    NoEntities,

    #[error("Cache failure: {0}")]
    CacheCorruption(#[from] CacheError),

    #[error("Unknown schema version {0}")]
    UnknownSchemaVersion(u32),

    #[error("{path:?} changed while it was being parsed")]
    SourceChanged { path: PathBuf },

    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Extraction failed: {0}")]
    Extraction(ExtractError),
}

impl From<LoadError> for ParseError {
    fn from(e: LoadError) -> Self {
        match e {
            LoadError::UnsupportedFormat(format) => Self::UnsupportedFormat(format),
            LoadError::CorruptDocument { path, reason } => Self::CorruptDocument { path, reason },
            LoadError::Io { path, source } => Self::Io { path, source },
        }
    }
}

impl From<ExtractError> for ParseError {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::ServiceUnavailable { .. }
            | ExtractError::ServiceExhausted { .. }
            | ExtractError::ServiceRejected(_) => Self::AiServiceUnavailable(e.to_string()),
            ExtractError::NothingExtracted { .. } => Self::NoEntities,
            other => Self::Extraction(other),
        }
    }
}
