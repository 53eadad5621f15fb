use thiserror::Error;

use crate::llm::ServiceError;

#[derive(Debug, Error)]
pub enum ExtractError {
    /// Retries against the understanding service ran out. The parser answers
    /// this by running the fallback strategy on the same chunk.
    #[error("Understanding service exhausted after {attempts} attempts: {last_error}")]
    ServiceExhausted { attempts: u32, last_error: ServiceError },

    /// The service refused the request outright; retrying cannot help.
    #[error("Understanding service rejected the request: {0}")]
    ServiceRejected(String),

    /// No strategy produced anything usable for the document.
    #[error("Understanding service unavailable and fallback found nothing ({chunks} chunks)")]
    ServiceUnavailable { chunks: usize },

    /// Every strategy ran, none found a single entity.
    #[error("No entities found in the document ({chunks} chunks)")]
    NothingExtracted { chunks: usize },

    #[error("Invalid pattern for {kind}.{field}: {source}")]
    Pattern {
        kind: String,
        field: String,
        #[source]
        source: regex::Error,
    },
}

impl ExtractError {
    /// Whether the parser should retry this chunk with the fallback strategy.
    pub fn triggers_fallback(&self) -> bool {
        matches!(self, Self::ServiceExhausted { .. } | Self::ServiceRejected(_))
    }
}

pub type ExtractResult<T> = Result<T, ExtractError>;
