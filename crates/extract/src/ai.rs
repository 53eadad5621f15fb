use async_trait::async_trait;
use ingest::chunk::estimate_tokens;
use ingest::{Chunk, Chunker, ChunkerConfig};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::error::{ExtractError, ExtractResult};
use crate::llm::{ServiceError, ServiceRequest, UnderstandingService};
use crate::model::{EntityInstance, PartialEntityBundle, Provenance, RejectedField, Strategy};
use crate::normalizer::{coerce, is_absent};
use crate::prompt::{build_extraction_prompt, build_retry_prompt};
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::schema::{EntityKindSpec, EntitySchema};
use crate::validation::admit;
use crate::EntityExtractor;

/// Tokens reserved for the fixed prompt text around the chunk.
pub const PROMPT_OVERHEAD_TOKENS: usize = 250;

const MAX_ECHOED_OUTPUT_CHARS: usize = 2_000;

/// Extraction through the external understanding service.
pub struct AiExtractor {
    service: Arc<dyn UnderstandingService>,
    policy: RetryPolicy,
}

impl AiExtractor {
    pub fn new(service: Arc<dyn UnderstandingService>, policy: RetryPolicy) -> Self {
        Self { service, policy }
    }

    /// Chunk text budget left once the schema and instructions are in the prompt.
    pub fn input_budget(&self, schema_description: &str) -> usize {
        self.service
            .max_input_tokens()
            .saturating_sub(estimate_tokens(schema_description) + PROMPT_OVERHEAD_TOKENS)
    }

    /// Split a chunk the service cannot take in one call. Sub-chunks keep
    /// the parent's index so provenance still points at the parent.
    fn fit_to_service(&self, chunk: &Chunk, budget: usize) -> Vec<Chunk> {
        if chunk.estimated_tokens() <= budget {
            return vec![chunk.clone()];
        }

        let chunker = Chunker::new(ChunkerConfig { max_tokens: budget });
        let mut parts = chunker.chunk_parts(&chunk.segments, &chunk.tables);
        for part in &mut parts {
            part.index = chunk.index;
        }
        debug!(
            chunk = chunk.index,
            tokens = chunk.estimated_tokens(),
            budget = budget,
            parts = parts.len(),
            "Chunk re-split for the understanding service"
        );
        parts
    }

    async fn call(&self, chunk: &Chunk, schema_description: &str) -> ExtractResult<Map<String, Value>> {
        let prompt = build_extraction_prompt(chunk, schema_description);
        let last_invalid: Mutex<Option<String>> = Mutex::new(None);
        let service = &self.service;
        let prompt = &prompt;
        let last_invalid = &last_invalid;

        let outcome = self
            .policy
            .run("understand_chunk", move |attempt| async move {
                let previous = last_invalid.lock().ok().and_then(|mut slot| slot.take());
                let prompt = match previous {
                    Some(bad) if attempt > 1 => build_retry_prompt(prompt, &bad),
                    _ => prompt.clone(),
                };
                let request = ServiceRequest {
                    chunk: chunk.index,
                    prompt,
                };

                let raw = service.understand(&request).await?;
                parse_response(&raw).inspect_err(|_| {
                    if let Ok(mut slot) = last_invalid.lock() {
                        *slot = Some(raw.chars().take(MAX_ECHOED_OUTPUT_CHARS).collect());
                    }
                })
            })
            .await;

        match outcome {
            RetryOutcome::Succeeded { value, .. } => Ok(value),
            RetryOutcome::Exhausted { last_error, attempts } => {
                Err(ExtractError::ServiceExhausted { attempts, last_error })
            }
            RetryOutcome::Aborted { error, .. } => match error {
                ServiceError::Rejected(reason) => Err(ExtractError::ServiceRejected(reason)),
                other => Err(ExtractError::ServiceRejected(other.to_string())),
            },
        }
    }
}

#[async_trait]
impl EntityExtractor for AiExtractor {
    fn strategy(&self) -> Strategy {
        Strategy::Ai
    }

    async fn extract(&self, chunk: &Chunk, schema: &EntitySchema) -> ExtractResult<PartialEntityBundle> {
        let schema_description = schema.describe().to_string();
        let budget = self.input_budget(&schema_description);
        let mut merged = PartialEntityBundle::new();

        for part in self.fit_to_service(chunk, budget) {
            let entities = self.call(&part, &schema_description).await?;
            let provenance = Provenance::for_chunk(Strategy::Ai, &part);
            merged.merge(bundle_from_response(entities, schema, &provenance), schema);
        }

        info!(
            chunk = chunk.index,
            service = self.service.name(),
            fields = merged.populated_field_count(),
            "AI extraction complete"
        );
        Ok(merged)
    }
}

/// Pull the JSON object out of a service answer. Tolerates markdown fences
/// and chatter around the object; anything else is `Malformed`.
pub fn parse_response(raw: &str) -> Result<Map<String, Value>, ServiceError> {
    let start = raw.find('{');
    let end = raw.rfind('}');
    let body = match (start, end) {
        (Some(s), Some(e)) if s < e => &raw[s..=e],
        _ => return Err(ServiceError::Malformed("no JSON object in response".to_string())),
    };

    let value: Value =
        serde_json::from_str(body).map_err(|e| ServiceError::Malformed(format!("invalid JSON: {e}")))?;

    match value {
        Value::Object(mut root) => match root.remove("entities") {
            Some(Value::Object(entities)) => Ok(entities),
            Some(_) => Err(ServiceError::Malformed("`entities` is not an object".to_string())),
            None => Ok(root),
        },
        _ => Err(ServiceError::Malformed("response is not a JSON object".to_string())),
    }
}

/// Turn the parsed answer into a bundle. Unknown kinds are ignored; unknown
/// or invalid fields are recorded as rejections and never stored.
pub fn bundle_from_response(
    entities: Map<String, Value>,
    schema: &EntitySchema,
    provenance: &Provenance,
) -> PartialEntityBundle {
    let mut bundle = PartialEntityBundle::new();

    for (kind_name, value) in entities {
        let Some(kind) = schema.kind(&kind_name) else {
            debug!(kind = %kind_name, "Ignoring entity kind not in schema");
            continue;
        };
        let objects = match value {
            Value::Object(object) => vec![object],
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(object) => Some(object),
                    _ => None,
                })
                .collect(),
            _ => continue,
        };

        for object in objects {
            bundle.add(kind, instance_from_object(object, kind, provenance));
        }
    }

    bundle
}

fn instance_from_object(object: Map<String, Value>, kind: &EntityKindSpec, provenance: &Provenance) -> EntityInstance {
    let mut instance = EntityInstance::new();

    for (name, raw) in object {
        let Some(field) = kind.field(&name) else {
            instance.reject(RejectedField {
                field: name,
                reason: format!("not a field of {}", kind.name),
                provenance: provenance.clone(),
            });
            continue;
        };
        if is_absent(&raw) {
            continue;
        }
        admit(&mut instance, field, coerce(field, &raw), provenance);
    }

    instance
}
