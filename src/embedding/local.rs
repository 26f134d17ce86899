//! Offline feature-hashing embedder.
//!
//! Text is lowercased and split on non-alphanumeric characters; each token
//! is hashed (first 8 bytes of its SHA-256) into one of `dims` buckets and
//! adds `1.0` to that bucket. The result is L2-normalized. Output depends
//! only on the input text and `dims`, so vectors are reproducible across
//! machines and runs.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use super::{l2_normalize, EmbeddingProvider};
use crate::error::{RecallError, Result};

/// The only model the local provider implements.
pub const LOCAL_MODEL: &str = "hash-v1";

const TOKEN_WEIGHT: f32 = 1.0;

#[derive(Debug, Clone)]
pub struct LocalProvider {
    dims: usize,
    batch_size: usize,
}

impl LocalProvider {
    pub fn new(model: &str, dims: usize, batch_size: usize) -> Result<Self> {
        if model != LOCAL_MODEL {
            return Err(RecallError::Config(format!(
                "unknown local embedding model: '{}'. Supported models: {}",
                model, LOCAL_MODEL
            )));
        }
        Ok(Self {
            dims,
            batch_size: batch_size.max(1),
        })
    }

    /// Embed one text.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in tokenize(text) {
            v[bucket(&token, self.dims)] += TOKEN_WEIGHT;
        }
        l2_normalize(&mut v);
        v
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }
    fn model_name(&self) -> &str {
        LOCAL_MODEL
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
        if cancel.is_cancelled() {
            return Err(RecallError::Canceled);
        }
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn bucket(token: &str, dims: usize) -> usize {
    let digest = Sha256::digest(token.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(head) % dims as u64) as usize
}
