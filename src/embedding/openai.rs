//! OpenAI-compatible remote embedder.
//!
//! Sends `POST {base_url}/embeddings` with `{model, input, dimensions}` and
//! bearer auth. Transient failures are retried with exponential backoff:
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - Network errors → retry
//! - HTTP 4xx (other than 429) → fail immediately
//!
//! Backoff is 1s, 2s, 4s, ... capped at 32s, for at most `max_retries`
//! retries. Both the request and the backoff sleep race the cancellation
//! token.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{check_batch, l2_normalize, EmbeddingProvider};
use crate::config::EmbeddingConfig;
use crate::error::{RecallError, Result};

pub struct OpenAiProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
}

impl fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("dims", &self.dims)
            .field("api_key", &"[redacted]")
            .finish()
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDataItem>,
}

#[derive(Deserialize)]
struct EmbedDataItem {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

impl OpenAiProvider {
    /// Resolve the credential and build the HTTP client.
    ///
    /// # Errors
    ///
    /// [`RecallError::Config`] when neither `embedding.api_key` nor the
    /// environment variable named by `embedding.api_key_env` holds a key.
    pub fn new(model: &str, dims: usize, config: &EmbeddingConfig) -> Result<Self> {
        let api_key = resolve_api_key(config)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RecallError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            api_key,
            model: model.to_string(),
            dims,
            batch_size: config.remote_batch_size.max(1),
            max_retries: config.max_retries,
        })
    }

    async fn send_once(&self, texts: &[String]) -> Attempt {
        let body = EmbedRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dims,
        };

        let response = match self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return Attempt::Retry(format!("request failed: {}", e)),
        };

        let status = response.status();
        if status.is_success() {
            return match response.json::<EmbedResponse>().await {
                Ok(parsed) => Attempt::Done(self.vectors_from(parsed, texts.len())),
                Err(e) => Attempt::Done(Err(RecallError::Provider(format!(
                    "invalid embeddings response: {}",
                    e
                )))),
            };
        }

        let body_text = response.text().await.unwrap_or_default();
        let message = format!("embeddings API error {}: {}", status, body_text.trim());
        if status.as_u16() == 429 || status.is_server_error() {
            Attempt::Retry(message)
        } else {
            Attempt::Done(Err(RecallError::Provider(message)))
        }
    }

    fn vectors_from(&self, parsed: EmbedResponse, expected: usize) -> Result<Vec<Vec<f32>>> {
        let mut data = parsed.data;
        if data.iter().all(|d| d.index.is_some()) {
            data.sort_by_key(|d| d.index);
        }
        let mut vectors: Vec<Vec<f32>> = data.into_iter().map(|d| d.embedding).collect();
        check_batch(&vectors, expected, self.dims)?;
        for v in vectors.iter_mut() {
            l2_normalize(v);
        }
        Ok(vectors)
    }
}

enum Attempt {
    Done(Result<Vec<Vec<f32>>>),
    Retry(String),
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut last_err = String::from("embedding failed after retries");

        for attempt in 0..=self.max_retries {
            if cancel.is_cancelled() {
                return Err(RecallError::Canceled);
            }
            if attempt > 0 {
                let delay = backoff_delay(attempt);
                tracing::warn!(attempt, delay_secs = delay.as_secs(), error = %last_err, "retrying embeddings request");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RecallError::Canceled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(RecallError::Canceled),
                outcome = self.send_once(texts) => outcome,
            };

            match outcome {
                Attempt::Done(result) => return result,
                Attempt::Retry(message) => last_err = message,
            }
        }

        Err(RecallError::Provider(last_err))
    }
}

fn resolve_api_key(config: &EmbeddingConfig) -> Result<String> {
    if let Some(key) = config.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
        return Ok(key.to_string());
    }
    match std::env::var(&config.api_key_env) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(RecallError::Config(format!(
            "openai provider needs an API key: set embedding.api_key or {}",
            config.api_key_env
        ))),
    }
}

/// 1s, 2s, 4s, ... capped at 32s.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt.saturating_sub(1)).min(5))
}
