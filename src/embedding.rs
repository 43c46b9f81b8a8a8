//! Embedding boundary.
//!
//! The engine reaches the embedding model only through [`Embedder`]: one text
//! in, one fixed-dimension vector out. The Ollama implementation calls a
//! local instance's `/api/embed` endpoint and retries transient failures
//! through the shared backoff utility; any other failure is fatal to that
//! single chunk, never to the pipeline.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::EmbeddingConfig;
use crate::error::SyncError;
use crate::retry::{retry, RetryPolicy};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"nomic-embed-text"`).
    fn model_name(&self) -> &str;

    /// Embed one text into a fixed-dimension vector. Retried calls observe
    /// `cancel` so backoffs do not outlive a cancelled sync.
    async fn embed(&self, cancel: &CancellationToken, text: &str) -> Result<Vec<f32>, SyncError>;
}

/// Embedder backed by a local Ollama instance's `POST /api/embed`.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    policy: RetryPolicy,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            model,
            policy: RetryPolicy {
                initial: Duration::from_secs(1),
                max_delay: Duration::from_secs(32),
                max_retries: config.max_retries,
            },
        })
    }

    async fn call_once(&self, text: &str) -> Result<Vec<f32>, SyncError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let resp = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(SyncError::http(
                Some(status.as_u16()),
                format!("Ollama API error: {}", body_text),
            ));
        }

        let json: serde_json::Value = resp.json().await?;
        parse_embed_response(&json)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, cancel: &CancellationToken, text: &str) -> Result<Vec<f32>, SyncError> {
        retry(self.policy, cancel, "embed", || self.call_once(text)).await
    }
}

/// Extract the first embedding from an Ollama `/api/embed` response.
fn parse_embed_response(json: &serde_json::Value) -> Result<Vec<f32>, SyncError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| SyncError::Embedding("missing embeddings array in response".into()))?;

    let first = embeddings
        .first()
        .and_then(|e| e.as_array())
        .ok_or_else(|| SyncError::Embedding("empty embeddings array in response".into()))?;

    Ok(first
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

/// No-op embedder used when embeddings are not configured; always errors.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn embed(&self, _cancel: &CancellationToken, _text: &str) -> Result<Vec<f32>, SyncError> {
        Err(SyncError::Embedding("embedding provider is disabled".into()))
    }
}

/// Create the configured [`Embedder`].
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<std::sync::Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(std::sync::Arc::new(DisabledEmbedder)),
        "ollama" => Ok(std::sync::Arc::new(OllamaEmbedder::new(config)?)),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}
