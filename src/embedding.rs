//! Embedding provider abstraction and implementations.
//!
//! The [`EmbeddingProvider`] trait turns text into a fixed-dimension vector
//! tagged with a model identifier. Vectors from different models live in
//! incompatible spaces, so everything downstream (index writes and searches)
//! carries the model tag and filters on it.
//!
//! Three implementations:
//! - [`OpenAiProvider`] — `POST /v1/embeddings`; requires `OPENAI_API_KEY`.
//! - [`VoyageProvider`] — the VoyageAI endpoint, different dimensionality;
//!   requires `VOYAGE_API_KEY`.
//! - [`DisabledProvider`] — always errors; used when embeddings are not
//!   configured.
//!
//! A missing API key is a configuration error raised at construction, not at
//! call time. Transient HTTP failures (429, 5xx, network) are retried beneath
//! this interface through the shared backoff policy.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::{EmbeddingConfig, RetryConfig};
use crate::retry::{self, RetryClass};

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text. Fails on provider errors or when the text
    /// exceeds the provider's token limit.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Model identifier (e.g. `"text-embedding-3-small"`). Pure, no I/O.
    fn model_name(&self) -> &str;

    /// Vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
}

/// Embed a text, halving it once if the provider rejects it for length.
/// Oversized inputs should not happen with conservative chunking, but report
/// bodies occasionally contain unsplittable runs.
pub async fn embed_with_fallback(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    match provider.embed(text).await {
        Ok(vec) => Ok(vec),
        Err(err) if err.to_string().contains("maximum context length") => {
            eprintln!("Warning: text too long for embedding, retrying with first half");
            let half = &text[..floor_char_boundary(text, text.len() / 2)];
            provider.embed(half).await
        }
        Err(err) => Err(err),
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Create the provider named in the configuration.
///
/// Errors on unknown provider names and on missing credentials or missing
/// model/dims settings — all construction-time failures.
pub fn create_provider(
    config: &EmbeddingConfig,
    retry: RetryConfig,
) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAiProvider::new(config, retry)?)),
        "voyage" => Ok(Box::new(VoyageProvider::new(config, retry)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled Provider ============

/// A no-op provider that always errors. Lets every command that does not
/// touch vectors run without credentials.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("Embedding provider is disabled")
    }
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
}

// ============ OpenAI Provider ============

pub struct OpenAiProvider {
    model: String,
    dims: usize,
    api_key: String,
    client: reqwest::Client,
    retry: RetryConfig,
}

impl OpenAiProvider {
    pub fn new(config: &EmbeddingConfig, retry: RetryConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            api_key,
            client,
            retry,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "encoding_format": "float",
        });

        retry::with_backoff(&self.retry, || {
            let body = body.clone();
            async move {
                let resp = self
                    .client
                    .post("https://api.openai.com/v1/embeddings")
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| (RetryClass::Transient, anyhow::Error::from(e)))?;

                let status = resp.status();
                if status.is_success() {
                    let json: serde_json::Value = resp
                        .json()
                        .await
                        .map_err(|e| (RetryClass::Permanent, anyhow::Error::from(e)))?;
                    return parse_embedding_response(&json)
                        .map_err(|e| (RetryClass::Permanent, e));
                }

                let text = resp.text().await.unwrap_or_default();
                let class = if status.as_u16() == 429 || status.is_server_error() {
                    RetryClass::Transient
                } else {
                    RetryClass::Permanent
                };
                Err((class, anyhow!("OpenAI API error {}: {}", status, text)))
            }
        })
        .await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

// ============ Voyage Provider ============

pub struct VoyageProvider {
    model: String,
    dims: usize,
    api_key: String,
    client: reqwest::Client,
    retry: RetryConfig,
}

impl VoyageProvider {
    pub fn new(config: &EmbeddingConfig, retry: RetryConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for Voyage provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for Voyage provider"))?;
        let api_key = std::env::var("VOYAGE_API_KEY")
            .map_err(|_| anyhow!("VOYAGE_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            api_key,
            client,
            retry,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for VoyageProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        retry::with_backoff(&self.retry, || {
            let body = body.clone();
            async move {
                let resp = self
                    .client
                    .post("https://api.voyageai.com/v1/embeddings")
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| (RetryClass::Transient, anyhow::Error::from(e)))?;

                let status = resp.status();
                if status.is_success() {
                    let json: serde_json::Value = resp
                        .json()
                        .await
                        .map_err(|e| (RetryClass::Permanent, anyhow::Error::from(e)))?;
                    return parse_embedding_response(&json)
                        .map_err(|e| (RetryClass::Permanent, e));
                }

                let text = resp.text().await.unwrap_or_default();
                let class = if status.as_u16() == 429 || status.is_server_error() {
                    RetryClass::Transient
                } else {
                    RetryClass::Permanent
                };
                Err((class, anyhow!("Voyage API error {}: {}", status, text)))
            }
        })
        .await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

/// Extract `data[0].embedding` from an embeddings API response. Both
/// providers use the same response envelope.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|a| a.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid embeddings response: missing data[0].embedding"))?;

    Ok(embedding
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

// ============ Vector codecs ============

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; higher is more similar. Returns `0.0`
/// for empty or mismatched-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
