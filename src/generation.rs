//! Language model generation.
//!
//! The engine only needs one capability from a model: turn a prompt into
//! text. [`OllamaGenerator`] calls a local Ollama `/api/generate` with
//! streaming disabled; [`DisabledGenerator`] always fails, which makes the
//! chat engine fall back to returning the retrieved context.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use thiserror::Error;

use crate::config::GenerationConfig;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GenerateError {
    #[error("generation is disabled")]
    Disabled,

    #[error("generation timed out after {0} ms")]
    Timeout(u64),

    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

/// Prompt-to-text capability.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, GenerateError>;
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, GenerateError> {
        Err(GenerateError::Disabled)
    }
}

/// Completions from a local Ollama instance.
pub struct OllamaGenerator {
    client: reqwest::Client,
    model: String,
    timeout: Duration,
    url: String,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        Ok(Self {
            client,
            model: config.model.clone(),
            timeout,
            url: url.trim_end_matches('/').to_string(),
        })
    }

    /// Names of the models installed in Ollama (`GET /api/tags`).
    pub async fn list_models(&self) -> Result<Vec<String>, GenerateError> {
        let resp = self
            .client
            .get(format!("{}/api/tags", self.url))
            .send()
            .await
            .map_err(|e| GenerateError::Unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(GenerateError::Unavailable(format!(
                "Ollama API error {}",
                resp.status()
            )));
        }
        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| GenerateError::InvalidResponse(e.to_string()))?;
        Ok(json
            .get("models")
            .and_then(|m| m.as_array())
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });

        let resp = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerateError::Timeout(self.timeout.as_millis() as u64)
                } else {
                    GenerateError::Unavailable(format!(
                        "Ollama connection error (is Ollama running at {}?): {}",
                        self.url, e
                    ))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(GenerateError::Unavailable(format!(
                "Ollama API error {}: {}",
                status, text
            )));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| GenerateError::InvalidResponse(e.to_string()))?;
        json.get("response")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| GenerateError::InvalidResponse("missing response field".into()))
    }
}

/// Bound a generation call by `limit`.
pub async fn generate_with_timeout(
    generator: &dyn Generator,
    prompt: &str,
    limit: Duration,
) -> Result<String, GenerateError> {
    match tokio::time::timeout(limit, generator.generate(prompt)).await {
        Ok(res) => res,
        Err(_) => Err(GenerateError::Timeout(limit.as_millis() as u64)),
    }
}

pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
