use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Character budget per chunk before the buffer is flushed.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Number of trailing words carried over into the next chunk.
    #[serde(default = "default_overlap_words")]
    pub overlap_words: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap_words: default_overlap_words(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_overlap_words() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Exclusive similarity threshold for evidence searches.
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    /// Stricter threshold used when gathering classification evidence.
    #[serde(default = "default_classification_min_score")]
    pub classification_min_score: f32,
    /// Internal oversampling limit before dedup shrinks the set.
    #[serde(default = "default_oversample_limit")]
    pub oversample_limit: i64,
    /// Maximum incident candidates retained after dedup.
    #[serde(default = "default_candidate_cap")]
    pub candidate_cap: usize,
    /// Number of report texts attached per evidence incident.
    #[serde(default = "default_report_text_depth")]
    pub report_text_depth: usize,
    /// Batch size for report-to-incident join lookups.
    #[serde(default = "default_join_batch_size")]
    pub join_batch_size: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            classification_min_score: default_classification_min_score(),
            oversample_limit: default_oversample_limit(),
            candidate_cap: default_candidate_cap(),
            report_text_depth: default_report_text_depth(),
            join_batch_size: default_join_batch_size(),
        }
    }
}

fn default_min_score() -> f32 {
    0.3
}
fn default_classification_min_score() -> f32 {
    0.5
}
fn default_oversample_limit() -> i64 {
    1000
}
fn default_candidate_cap() -> usize {
    10
}
fn default_report_text_depth() -> usize {
    1
}
fn default_join_batch_size() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"openai"`, `"voyage"`, or `"disabled"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Concurrency ceiling for embedding calls during indexing.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            timeout_secs: default_timeout_secs(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_concurrency() -> usize {
    5
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// Chat model used for classification generation.
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    /// Concurrency ceiling for per-attribute generation calls.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_generation_model(),
            timeout_secs: default_generation_timeout_secs(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_generation_model() -> String {
    "gpt-4o".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    120
}

/// Backoff policy applied beneath the embedding and generation clients.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    5000
}
fn default_jitter() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7433".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }

    if !(-1.0..=1.0).contains(&config.retrieval.min_score)
        || !(-1.0..=1.0).contains(&config.retrieval.classification_min_score)
    {
        anyhow::bail!("retrieval thresholds must be in [-1.0, 1.0]");
    }

    if config.retrieval.candidate_cap == 0 {
        anyhow::bail!("retrieval.candidate_cap must be >= 1");
    }

    if config.retrieval.join_batch_size == 0 {
        anyhow::bail!("retrieval.join_batch_size must be >= 1");
    }

    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "voyage" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or voyage.",
            other
        ),
    }

    if config.retry.max_attempts == 0 {
        anyhow::bail!("retry.max_attempts must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let f = write_config("[db]\npath = \"/tmp/aic.sqlite\"\n");
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.chunking.chunk_size, 500);
        assert_eq!(cfg.chunking.overlap_words, 5);
        assert_eq!(cfg.retrieval.oversample_limit, 1000);
        assert_eq!(cfg.retrieval.join_batch_size, 10);
        assert_eq!(cfg.embedding.provider, "disabled");
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.initial_delay_ms, 1000);
        assert_eq!(cfg.retry.max_delay_ms, 5000);
    }

    #[test]
    fn test_enabled_provider_requires_model_and_dims() {
        let f = write_config(
            "[db]\npath = \"/tmp/aic.sqlite\"\n\n[embedding]\nprovider = \"openai\"\n",
        );
        let err = load_config(f.path()).unwrap_err().to_string();
        assert!(err.contains("embedding.model"), "got: {}", err);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let f = write_config(
            "[db]\npath = \"/tmp/aic.sqlite\"\n\n[embedding]\nprovider = \"bedrock\"\nmodel = \"m\"\ndims = 4\n",
        );
        let err = load_config(f.path()).unwrap_err().to_string();
        assert!(err.contains("Unknown embedding provider"), "got: {}", err);
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let f = write_config("[db]\npath = \"/tmp/aic.sqlite\"\n\n[retrieval]\nmin_score = 2.0\n");
        assert!(load_config(f.path()).is_err());
    }
}
