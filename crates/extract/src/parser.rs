use futures::stream::{self, StreamExt};
use ingest::{Chunk, Chunker, ChunkerConfig, RawDocument};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ExtractError, ExtractResult};
use crate::heuristic::HeuristicExtractor;
use crate::model::{ExtractionStats, PartialEntityBundle, StructuredEntityBundle};
use crate::schema::EntitySchema;
use crate::EntityExtractor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionPolicy {
    /// Understanding service first; local heuristics for chunks where it fails.
    AiWithFallback,
    HeuristicOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserConfig {
    pub chunking: ChunkerConfig,
    /// Chunks in flight against the understanding service at once.
    pub max_concurrent_calls: usize,
    pub policy: ExtractionPolicy,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkerConfig::default(),
            max_concurrent_calls: 4,
            policy: ExtractionPolicy::AiWithFallback,
        }
    }
}

/// What happened to one chunk.
struct ChunkResult {
    bundle: PartialEntityBundle,
    primary_used: bool,
    primary_failed: bool,
}

/// Drives extraction over a whole document: chunk, extract per chunk with
/// bounded parallelism, merge in chunk order, score.
pub struct SemanticParser {
    primary: Option<Arc<dyn EntityExtractor>>,
    fallback: Arc<dyn EntityExtractor>,
    chunker: Chunker,
    config: ParserConfig,
}

impl SemanticParser {
    pub fn new(primary: Arc<dyn EntityExtractor>, fallback: Arc<dyn EntityExtractor>, config: ParserConfig) -> Self {
        Self {
            primary: Some(primary),
            fallback,
            chunker: Chunker::new(config.chunking.clone()),
            config,
        }
    }

    pub fn heuristic_only(config: ParserConfig) -> Self {
        Self {
            primary: None,
            fallback: Arc::new(HeuristicExtractor::new()),
            chunker: Chunker::new(config.chunking.clone()),
            config: ParserConfig {
                policy: ExtractionPolicy::HeuristicOnly,
                ..config
            },
        }
    }

    pub fn policy(&self) -> ExtractionPolicy {
        self.config.policy
    }

    fn active_primary(&self) -> Option<&Arc<dyn EntityExtractor>> {
        match self.config.policy {
            ExtractionPolicy::AiWithFallback => self.primary.as_ref(),
            ExtractionPolicy::HeuristicOnly => None,
        }
    }

    async fn process_chunk(&self, chunk: &Chunk, schema: &EntitySchema) -> ExtractResult<ChunkResult> {
        let Some(primary) = self.active_primary() else {
            let bundle = self.fallback.extract(chunk, schema).await?;
            return Ok(ChunkResult {
                bundle,
                primary_used: false,
                primary_failed: false,
            });
        };

        match primary.extract(chunk, schema).await {
            Ok(bundle) => Ok(ChunkResult {
                bundle,
                primary_used: true,
                primary_failed: false,
            }),
            Err(e) if e.triggers_fallback() => {
                warn!(
                    chunk = chunk.index,
                    strategy = primary.strategy().as_str(),
                    fallback = self.fallback.strategy().as_str(),
                    error = %e,
                    "Primary extraction failed, falling back"
                );
                let bundle = self.fallback.extract(chunk, schema).await?;
                Ok(ChunkResult {
                    bundle,
                    primary_used: true,
                    primary_failed: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Extract a structured bundle from a loaded document.
    ///
    /// Chunk results are merged strictly in chunk order, so the outcome does
    /// not depend on which call finished first.
    pub async fn parse(
        &self,
        doc: &RawDocument,
        schema: &EntitySchema,
    ) -> ExtractResult<(StructuredEntityBundle, f64)> {
        // Step 1: chunk
        let chunks = self.chunker.chunk_document(doc);

        // Step 2: extract with bounded parallelism, results in chunk order
        // Futures are built up front so the returned future stays `Send`
        let pending: Vec<_> = chunks
            .iter()
            .map(|chunk| self.process_chunk(chunk, schema))
            .collect();
        let results: Vec<ExtractResult<ChunkResult>> = stream::iter(pending)
            .buffered(self.config.max_concurrent_calls.max(1))
            .collect()
            .await;

        // Step 3: ordered merge
        let mut merged = PartialEntityBundle::new();
        let mut stats = ExtractionStats {
            chunks: chunks.len(),
            ..ExtractionStats::default()
        };
        let mut primary_failures = 0;

        for result in results {
            let result = result?;
            if result.primary_failed {
                primary_failures += 1;
                stats.fallback_chunks += 1;
            } else if result.primary_used {
                stats.ai_chunks += 1;
            }
            merged.merge(result.bundle, schema);
        }

        if merged.is_empty() {
            if !chunks.is_empty() && primary_failures == chunks.len() {
                return Err(ExtractError::ServiceUnavailable { chunks: chunks.len() });
            }
            return Err(ExtractError::NothingExtracted { chunks: chunks.len() });
        }

        // Step 4: finalize and score
        let bundle = StructuredEntityBundle::from_partial(merged, schema, stats);
        let completeness = bundle.completeness;

        info!(
            source = %doc.source.display(),
            chunks = bundle.stats.chunks,
            ai_chunks = bundle.stats.ai_chunks,
            fallback_chunks = bundle.stats.fallback_chunks,
            rejected_fields = bundle.stats.rejected_fields,
            completeness = completeness,
            "Document parsed"
        );

        Ok((bundle, completeness))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ServiceError;
    use crate::model::{EntityInstance, FieldValue, PopulatedField, Provenance, Strategy};
    use async_trait::async_trait;
    use ingest::{DocumentFormat, SegmentKind, TextSegment};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn document(paragraphs: &[&str]) -> RawDocument {
        RawDocument {
            source: PathBuf::from("report.pdf"),
            content_hash: "abc".into(),
            format: DocumentFormat::Pdf,
            page_count: 1,
            segments: paragraphs
                .iter()
                .enumerate()
                .map(|(i, text)| TextSegment {
                    index: i,
                    page: 1,
                    paragraph: i,
                    kind: SegmentKind::Heading,
                    text: text.to_string(),
                })
                .collect(),
            tables: vec![],
        }
    }

    fn small_chunks() -> ParserConfig {
        ParserConfig {
            chunking: ChunkerConfig { max_tokens: 16 },
            ..ParserConfig::default()
        }
    }

    /// Names the device after the chunk, slower for earlier chunks.
    struct SlowNamer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EntityExtractor for SlowNamer {
        fn strategy(&self) -> Strategy {
            Strategy::Ai
        }

        async fn extract(&self, chunk: &Chunk, schema: &EntitySchema) -> ExtractResult<PartialEntityBundle> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100 * (10 - chunk.index as u64))).await;
            let mut instance = EntityInstance::new();
            instance.set_if_empty(
                "device_name",
                PopulatedField {
                    value: FieldValue::Text(format!("device {}", chunk.index)),
                    provenance: Provenance::for_chunk(Strategy::Ai, chunk),
                },
            );
            let mut bundle = PartialEntityBundle::new();
            bundle.add(schema.kind("DeviceContext").unwrap(), instance);
            Ok(bundle)
        }
    }

    /// Answers every chunk with an empty bundle.
    struct Empty;

    #[async_trait]
    impl EntityExtractor for Empty {
        fn strategy(&self) -> Strategy {
            Strategy::Ai
        }

        async fn extract(&self, _chunk: &Chunk, _schema: &EntitySchema) -> ExtractResult<PartialEntityBundle> {
            Ok(PartialEntityBundle::new())
        }
    }

    struct Down;

    #[async_trait]
    impl EntityExtractor for Down {
        fn strategy(&self) -> Strategy {
            Strategy::Ai
        }

        async fn extract(&self, _chunk: &Chunk, _schema: &EntitySchema) -> ExtractResult<PartialEntityBundle> {
            Err(ExtractError::ServiceExhausted {
                attempts: 3,
                last_error: ServiceError::Unavailable("down".into()),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn merge_follows_chunk_order_not_completion_order() {
        let doc = document(&[
            "Device one section with enough words to fill a chunk",
            "Device two section with enough words to fill a chunk",
            "Device three section with enough words to fill a chunk",
        ]);
        let primary = Arc::new(SlowNamer {
            calls: AtomicUsize::new(0),
        });
        let parser = SemanticParser::new(primary.clone(), Arc::new(HeuristicExtractor::new()), small_chunks());

        let (bundle, _) = parser.parse(&doc, &EntitySchema::builtin_v1()).await.unwrap();

        assert_eq!(primary.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            bundle.first_value("DeviceContext", "device_name"),
            Some(&FieldValue::Text("device 0".into()))
        );
        assert_eq!(bundle.stats.chunks, 3);
        assert_eq!(bundle.stats.ai_chunks, 3);
    }

    #[tokio::test]
    async fn falls_back_to_heuristics_per_chunk() {
        let doc = document(&["Device Name: Acme Stent\nManufacturer: Acme Medical"]);
        let parser = SemanticParser::new(Arc::new(Down), Arc::new(HeuristicExtractor::new()), ParserConfig::default());

        let (bundle, completeness) = parser.parse(&doc, &EntitySchema::builtin_v1()).await.unwrap();

        assert_eq!(bundle.stats.fallback_chunks, 1);
        assert_eq!(bundle.stats.ai_chunks, 0);
        let device = &bundle.instances("DeviceContext")[0];
        assert_eq!(device.fields["device_name"].provenance.strategy, Strategy::Heuristic);
        assert_eq!(completeness, 2.0 / 10.0);
    }

    #[tokio::test]
    async fn nothing_from_any_strategy_is_unavailable() {
        let doc = document(&["Nothing of interest in this paragraph."]);
        let parser = SemanticParser::new(Arc::new(Down), Arc::new(HeuristicExtractor::new()), ParserConfig::default());

        let err = parser.parse(&doc, &EntitySchema::builtin_v1()).await.unwrap_err();
        assert!(matches!(err, ExtractError::ServiceUnavailable { chunks: 1 }));
    }

    #[tokio::test]
    async fn heuristic_only_never_calls_primary() {
        let doc = document(&["Manufacturer: Acme Medical"]);
        let primary = Arc::new(SlowNamer {
            calls: AtomicUsize::new(0),
        });
        let parser = SemanticParser::new(
            primary.clone(),
            Arc::new(HeuristicExtractor::new()),
            ParserConfig {
                policy: ExtractionPolicy::HeuristicOnly,
                ..ParserConfig::default()
            },
        );

        let (bundle, _) = parser.parse(&doc, &EntitySchema::builtin_v1()).await.unwrap();

        assert_eq!(primary.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            bundle.first_value("DeviceContext", "manufacturer"),
            Some(&FieldValue::Text("Acme Medical".into()))
        );
    }

    #[tokio::test]
    async fn empty_result_is_an_error_under_any_policy() {
        let doc = document(&["Nothing of interest in this paragraph."]);
        let parser = SemanticParser::heuristic_only(ParserConfig::default());

        let err = parser.parse(&doc, &EntitySchema::builtin_v1()).await.unwrap_err();
        assert!(matches!(err, ExtractError::NothingExtracted { chunks: 1 }), "{err:?}");

        // The primary answers, but with nothing
        let parser = SemanticParser::new(Arc::new(Empty), Arc::new(HeuristicExtractor::new()), ParserConfig::default());
        let err = parser.parse(&doc, &EntitySchema::builtin_v1()).await.unwrap_err();
        assert!(matches!(err, ExtractError::NothingExtracted { chunks: 1 }), "{err:?}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn parse_future_can_be_spawned() {
        let parser = Arc::new(SemanticParser::heuristic_only(ParserConfig::default()));
        let doc = document(&["Manufacturer: Acme Medical"]);
        let schema = EntitySchema::builtin_v1();

        let handle = tokio::spawn({
            let parser = parser.clone();
            async move { parser.parse(&doc, &schema).await.map(|(bundle, _)| bundle) }
        });
        let bundle = handle.await.unwrap().unwrap();
        assert_eq!(
            bundle.first_value("DeviceContext", "manufacturer"),
            Some(&FieldValue::Text("Acme Medical".into()))
        );
    }
}
