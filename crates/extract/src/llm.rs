use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Typed failures of the understanding service.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("request rejected: {0}")]
    Rejected(String),
}

impl ServiceError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// One chunk's worth of work for the understanding service.
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    pub chunk: usize,
    pub prompt: String,
}

/// Request/response boundary to the external understanding service. The
/// response is the raw text the service produced; parsing it against the
/// schema is the caller's job.
#[async_trait]
pub trait UnderstandingService: Send + Sync {
    fn name(&self) -> &str;

    /// Largest prompt, in estimated tokens, the service accepts.
    fn max_input_tokens(&self) -> usize;

    async fn understand(&self, request: &ServiceRequest) -> Result<String, ServiceError>;
}

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    max_input_tokens: usize,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str, // "json" for structured output
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String, max_input_tokens: usize) -> Self {
        Self {
            base_url,
            model,
            max_input_tokens,
            client: reqwest::Client::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new(
            "http://localhost:11434".to_string(),
            "llama3".to_string(),
            6000,
        )
    }
}

#[async_trait]
impl UnderstandingService for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }

    async fn understand(&self, request: &ServiceRequest) -> Result<String, ServiceError> {
        let url = format!("{}/api/generate", self.base_url);

        let body = OllamaRequest {
            model: &self.model,
            prompt: &request.prompt,
            stream: false,
            format: "json", // Force JSON output
            options: OllamaOptions { temperature: 0.0 },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ServiceError::RateLimited { retry_after });
        }
        if status.is_server_error() {
            return Err(ServiceError::Unavailable(format!("{} returned {status}", self.name())));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ServiceError::Rejected(format!("{status}: {}", detail.trim())));
        }

        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Malformed(format!("unreadable response envelope: {e}")))?;

        Ok(parsed.response)
    }
}

fn classify_transport_error(e: reqwest::Error) -> ServiceError {
    if e.is_timeout() {
        ServiceError::Timeout(Duration::ZERO)
    } else {
        ServiceError::Unavailable(e.to_string())
    }
}
