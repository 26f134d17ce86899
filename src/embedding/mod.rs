//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and its concrete implementations:
//! - **[`LocalProvider`]** — offline, deterministic feature-hashing embedder.
//!   Similarity reflects token overlap, not meaning. The default.
//! - **[`OpenAiProvider`]** — calls an OpenAI-compatible `/embeddings`
//!   endpoint with batching, retry and backoff.
//!
//! Also provides the vector helpers shared by the builder and search:
//! - [`l2_normalize`] — scale a vector to unit length in place
//! - [`cosine_similarity`] — similarity between two vectors
//!
//! # Provider Selection
//!
//! Providers are selected by [`ProviderKind`], parsed from the provider name
//! in the build configuration:
//!
//! ```rust
//! use notes_recall::config::EmbeddingConfig;
//! use notes_recall::embedding::{create_provider, ProviderKind};
//!
//! let provider = create_provider(ProviderKind::Local, "hash-v1", 64, &EmbeddingConfig::default()).unwrap();
//! assert_eq!(provider.name(), "local");
//! assert_eq!(provider.dims(), 64);
//! ```
//!
//! # Cancellation
//!
//! Every call receives a [`CancellationToken`]. Providers check it before
//! doing any work; the remote provider also races it against the in-flight
//! request and any retry backoff.

mod local;
mod openai;

pub use local::{LocalProvider, LOCAL_MODEL};
pub use openai::OpenAiProvider;

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

use crate::config::{BuildConfig, EmbeddingConfig};
use crate::error::{RecallError, Result};

/// Which embedding backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Local,
    OpenAi,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Local => "local",
            ProviderKind::OpenAi => "openai",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Local => LOCAL_MODEL,
            ProviderKind::OpenAi => "text-embedding-3-small",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = RecallError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(ProviderKind::Local),
            "openai" => Ok(ProviderKind::OpenAi),
            other => Err(RecallError::Config(format!(
                "unknown embedding provider: '{}'. Must be local or openai.",
                other
            ))),
        }
    }
}

/// Trait for embedding providers.
///
/// `embed_batch` returns one L2-normalized vector of length [`dims`] per
/// input text, in input order.
///
/// [`dims`]: EmbeddingProvider::dims
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider tag recorded in the index (e.g. `"local"`).
    fn name(&self) -> &str;
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality.
    fn dims(&self) -> usize;
    /// How many texts the caller should send per call.
    fn batch_size(&self) -> usize;
    /// Embed a batch of texts.
    async fn embed_batch(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>>;
}

/// Instantiate a provider.
///
/// # Errors
///
/// [`RecallError::Config`] for an unknown local model or a missing remote
/// credential. No network traffic happens here.
pub fn create_provider(
    kind: ProviderKind,
    model: &str,
    dims: usize,
    config: &EmbeddingConfig,
) -> Result<Box<dyn EmbeddingProvider>> {
    if dims == 0 {
        return Err(RecallError::Config("embedding dimension must be > 0".into()));
    }
    match kind {
        ProviderKind::Local => Ok(Box::new(LocalProvider::new(
            model,
            dims,
            config.local_batch_size,
        )?)),
        ProviderKind::OpenAi => Ok(Box::new(OpenAiProvider::new(model, dims, config)?)),
    }
}

/// Instantiate the provider described by a build configuration.
pub fn provider_for_build(
    build: &BuildConfig,
    config: &EmbeddingConfig,
) -> Result<Box<dyn EmbeddingProvider>> {
    create_provider(build.provider_kind()?, &build.model_name()?, build.dim, config)
}

/// Embed a single query text.
pub async fn embed_query(
    provider: &dyn EmbeddingProvider,
    text: &str,
    cancel: &CancellationToken,
) -> Result<Vec<f32>> {
    provider
        .embed_batch(&[text.to_string()], cancel)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| RecallError::Provider("empty embedding response".into()))
}

/// Verify a provider response: one vector per input, all of length `dims`.
pub fn check_batch(vectors: &[Vec<f32>], expected: usize, dims: usize) -> Result<()> {
    if vectors.len() != expected {
        return Err(RecallError::Provider(format!(
            "provider returned {} vectors for {} inputs",
            vectors.len(),
            expected
        )));
    }
    if let Some(first) = vectors.first() {
        if vectors.iter().any(|v| v.len() != first.len()) {
            return Err(RecallError::Provider(
                "provider returned vectors of inconsistent dimension".into(),
            ));
        }
        if first.len() != dims {
            return Err(RecallError::Provider(format!(
                "provider returned {}-dimensional vectors, expected {}",
                first.len(),
                dims
            )));
        }
    }
    Ok(())
}

/// Scale `v` to unit length. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    if norm > f64::EPSILON {
        for x in v.iter_mut() {
            *x = (*x as f64 / norm) as f32;
        }
    }
}

/// Compute cosine similarity between two vectors, accumulated in `f64`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a zero
/// vector on either side.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f64::EPSILON {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}
