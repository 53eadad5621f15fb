use anyhow::{Context, Result};
use extract::{ExtractionPolicy, ParserConfig, RetryConfig};
use ingest::ChunkerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub chunking: ChunkerConfig,
    pub service: ServiceConfig,
    pub policy: ExtractionPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    /// Age after which another process's fingerprint lock is considered abandoned.
    pub lock_stale_secs: u64,
    pub lock_poll_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_concurrent_calls: usize,
    pub request_timeout_secs: u64,
}

/// Understanding service endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub base_url: String,
    pub model: String,
    pub max_input_tokens: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            retry: RetryConfig::default(),
            chunking: ChunkerConfig::default(),
            service: ServiceConfig::default(),
            policy: ExtractionPolicy::AiWithFallback,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".docparse-cache"),
            lock_stale_secs: 600,
            lock_poll_ms: 50,
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 3,
            request_timeout_secs: 60,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            max_input_tokens: 6000,
        }
    }
}

impl AppConfig {
    /// Defaults, then the JSON file if given, then `DOCPARSE_*` variables.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = lookup("DOCPARSE_CACHE_DIR") {
            self.cache.dir = PathBuf::from(dir);
        }
        if let Some(v) = lookup("DOCPARSE_LOCK_STALE_SECS") {
            self.cache.lock_stale_secs = v.parse().context("DOCPARSE_LOCK_STALE_SECS must be a number")?;
        }
        if let Some(v) = lookup("DOCPARSE_MAX_CONCURRENT_CALLS") {
            self.concurrency.max_concurrent_calls =
                v.parse().context("DOCPARSE_MAX_CONCURRENT_CALLS must be a number")?;
        }
        if let Some(v) = lookup("DOCPARSE_REQUEST_TIMEOUT_SECS") {
            self.concurrency.request_timeout_secs =
                v.parse().context("DOCPARSE_REQUEST_TIMEOUT_SECS must be a number")?;
        }
        if let Some(v) = lookup("DOCPARSE_MAX_ATTEMPTS") {
            self.retry.max_attempts = v.parse().context("DOCPARSE_MAX_ATTEMPTS must be a number")?;
        }
        if let Some(url) = lookup("DOCPARSE_SERVICE_URL") {
            self.service.base_url = url;
        }
        if let Some(model) = lookup("DOCPARSE_MODEL") {
            self.service.model = model;
        }
        if let Some(v) = lookup("DOCPARSE_POLICY") {
            self.policy = match v.to_lowercase().as_str() {
                "ai" | "ai_with_fallback" => ExtractionPolicy::AiWithFallback,
                "heuristic" | "heuristic_only" => ExtractionPolicy::HeuristicOnly,
                other => anyhow::bail!("DOCPARSE_POLICY must be `ai` or `heuristic`, got `{other}`"),
            };
        }
        Ok(())
    }

    pub fn parser_config(&self) -> ParserConfig {
        ParserConfig {
            chunking: self.chunking.clone(),
            max_concurrent_calls: self.concurrency.max_concurrent_calls,
            policy: self.policy,
        }
    }
}
