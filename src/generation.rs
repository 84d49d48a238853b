//! Text generation collaborator for taxonomy classification.
//!
//! Kept behind a trait so classification logic can be tested with a
//! scripted generator. Output is non-deterministic across calls with
//! identical input; callers parse defensively.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::{GenerationConfig, RetryConfig};
use crate::retry::{self, RetryClass};

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for the prompt. Fails on network or quota
    /// errors after the retry budget is exhausted.
    async fn generate(&self, prompt: &str) -> Result<String>;

    fn model_name(&self) -> &str;
}

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    retry: RetryConfig,
}

impl OpenAiGenerator {
    /// A missing key is a configuration error raised here, not at call time.
    pub fn new(config: &GenerationConfig, retry: RetryConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY must be set for text generation")?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            retry,
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
        });

        retry::with_backoff(&self.retry, || {
            let body = body.clone();
            async move {
                let response = self
                    .client
                    .post(OPENAI_CHAT_URL)
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| (RetryClass::Transient, anyhow::Error::from(e)))?;

                let status = response.status();
                if status.as_u16() == 429 || status.is_server_error() {
                    return Err((
                        RetryClass::Transient,
                        anyhow!("Chat API error {}", status),
                    ));
                }
                if !status.is_success() {
                    let detail = response.text().await.unwrap_or_default();
                    return Err((
                        RetryClass::Permanent,
                        anyhow!("Chat API error {}: {}", status, detail),
                    ));
                }

                let parsed: ChatResponse = response
                    .json()
                    .await
                    .map_err(|e| (RetryClass::Permanent, anyhow::Error::from(e)))?;

                match parsed.choices.into_iter().next() {
                    Some(choice) => Ok(choice.message.content),
                    None => Err((
                        RetryClass::Permanent,
                        anyhow!("Chat response contained no choices"),
                    )),
                }
            }
        })
        .await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

pub fn create_generator(
    config: &GenerationConfig,
    retry: RetryConfig,
) -> Result<Box<dyn TextGenerator>> {
    if config.model.is_empty() {
        bail!("generation.model must not be empty");
    }
    Ok(Box::new(OpenAiGenerator::new(config, retry)?))
}
