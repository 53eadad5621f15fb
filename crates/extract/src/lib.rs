pub mod ai;
pub mod context;
pub mod error;
pub mod heuristic;
pub mod llm;
pub mod model;
pub mod normalizer;
pub mod parser;
pub mod patterns;
pub mod prompt;
pub mod retry;
pub mod schema;
pub mod validation;

pub use ai::AiExtractor;
pub use error::{ExtractError, ExtractResult};
pub use heuristic::HeuristicExtractor;
pub use llm::{OllamaClient, ServiceError, ServiceRequest, UnderstandingService};
pub use model::{
    EntityInstance, ExtractionStats, FieldValue, PartialEntityBundle, PopulatedField, Provenance, RejectedField,
    Strategy, StructuredEntityBundle,
};
pub use parser::{ExtractionPolicy, ParserConfig, SemanticParser};
pub use retry::{RetryConfig, RetryOutcome, RetryPolicy};
pub use schema::{Cardinality, EntityKindSpec, EntitySchema, FieldSpec, FieldType, SchemaRegistry, VocabularyTerm};
pub use validation::{ValidationResult, check_value, validate};

use async_trait::async_trait;
use ingest::Chunk;

/// A way of turning one chunk into entities.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    fn strategy(&self) -> Strategy;

    /// Extract what this strategy can find in one chunk. Field-level
    /// problems are recorded on the bundle, not returned as errors.
    async fn extract(&self, chunk: &Chunk, schema: &EntitySchema) -> ExtractResult<PartialEntityBundle>;
}
