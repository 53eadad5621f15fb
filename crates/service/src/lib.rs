pub mod cache;
pub mod config;
pub mod entry;
pub mod error;
pub mod fingerprint;
pub mod lock;
pub mod maintenance;
pub mod metrics;
pub mod persist;

pub use cache::{CacheError, CacheStats, CacheStatus, CacheStore};
pub use config::AppConfig;
pub use entry::{CacheEntry, EntryHeader, SourceSummary};
pub use error::ParseError;
pub use fingerprint::{Fingerprint, PARSER_VERSION};
pub use metrics::{Metrics, MetricsSnapshot};

use chrono::{DateTime, Utc};
use extract::{
    AiExtractor, EntitySchema, HeuristicExtractor, OllamaClient, RetryPolicy, SchemaRegistry, SemanticParser,
    StructuredEntityBundle, UnderstandingService,
};
use ingest::{DocumentFormat, FileReader};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::metrics::TimedOperation;

/// Where a parse result came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceMeta {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub format: DocumentFormat,
    pub pages: u32,
    pub segments: usize,
    pub tables: usize,
    pub cache_status: CacheStatus,
    pub schema_version: u32,
    pub parser_version: String,
    /// When the cached bundle was first computed.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseOutcome {
    pub bundle: StructuredEntityBundle,
    pub completeness: f64,
    pub meta: SourceMeta,
}

/// Entry point for report generators: document path in, cached structured
/// entities out.
pub struct ParseService {
    cache: Arc<CacheStore>,
    parser: Arc<SemanticParser>,
    schemas: SchemaRegistry,
    metrics: Arc<Metrics>,
}

impl ParseService {
    pub fn new(cache: Arc<CacheStore>, parser: Arc<SemanticParser>, schemas: SchemaRegistry) -> Self {
        let metrics = cache.metrics().clone();
        Self {
            cache,
            parser,
            schemas,
            metrics,
        }
    }

    /// Service backed by the configured HTTP understanding service.
    pub fn from_config(config: &AppConfig, cache: Arc<CacheStore>) -> Self {
        let client = OllamaClient::new(
            config.service.base_url.clone(),
            config.service.model.clone(),
            config.service.max_input_tokens,
        );
        info!(url = %config.service.base_url, model = client.model(), "Using understanding service");
        Self::with_service(Arc::new(client), config, cache)
    }

    pub fn with_service(service: Arc<dyn UnderstandingService>, config: &AppConfig, cache: Arc<CacheStore>) -> Self {
        let policy = RetryPolicy::from_config(&config.retry)
            .with_call_timeout(Duration::from_secs(config.concurrency.request_timeout_secs));
        let parser = SemanticParser::new(
            Arc::new(AiExtractor::new(service, policy)),
            Arc::new(HeuristicExtractor::new()),
            config.parser_config(),
        );
        Self::new(cache, Arc::new(parser), SchemaRegistry::builtin())
    }

    #[must_use]
    pub fn with_schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = schemas;
        self
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub async fn parse(&self, path: &Path, schema_version: u32) -> Result<ParseOutcome, ParseError> {
        let timer = TimedOperation::start();
        let result = self.parse_inner(path, schema_version).await;
        self.metrics.record_request(result.is_ok(), timer.elapsed());

        match &result {
            Ok(outcome) => info!(
                path = %path.display(),
                fingerprint = %outcome.meta.fingerprint,
                cache = ?outcome.meta.cache_status,
                completeness = outcome.completeness,
                elapsed_ms = timer.elapsed().as_millis() as u64,
                "Parse complete"
            ),
            Err(e) => warn!(path = %path.display(), error = %e, "Parse failed"),
        }
        result
    }

    async fn parse_inner(&self, path: &Path, schema_version: u32) -> Result<ParseOutcome, ParseError> {
        // Step 1: resolve schema and reject unsupported files before hashing
        let schema = self
            .schemas
            .get(schema_version)
            .ok_or(ParseError::UnknownSchemaVersion(schema_version))?;
        FileReader::detect_format(path).await?;

        // Step 2: fingerprint
        let content_hash = ingest::content_hash(path).await?;
        let fp = Fingerprint::compute(&content_hash, PARSER_VERSION, schema.version);

        // Step 3: cache lookup or computation
        let (entry, status) = self
            .cache
            .get_or_compute(&fp, || self.compute(path, &content_hash, &fp, &schema))
            .await?;

        let header = &entry.header;
        Ok(ParseOutcome {
            bundle: entry.bundle.clone(),
            completeness: entry.bundle.completeness,
            meta: SourceMeta {
                path: path.to_path_buf(),
                fingerprint: fp.clone(),
                format: header.source.format,
                pages: header.source.pages,
                segments: header.source.segments,
                tables: header.source.tables,
                cache_status: status,
                schema_version: header.schema_version,
                parser_version: header.parser_version.clone(),
                created_at: header.created_at,
            },
        })
    }

    async fn compute(
        &self,
        path: &Path,
        content_hash: &str,
        fp: &Fingerprint,
        schema: &EntitySchema,
    ) -> Result<CacheEntry, ParseError> {
        let doc = FileReader::load(path).await?;
        if doc.content_hash != content_hash {
            return Err(ParseError::SourceChanged {
                path: path.to_path_buf(),
            });
        }

        let (bundle, _) = self.parser.parse(&doc, schema).await?;
        Ok(CacheEntry::new(fp.clone(), &doc, bundle))
    }
}
