// Embeddings module
// Text -> unit-length vector providers: the Ollama client and a local hashing embedder

pub mod hashing;
pub mod ollama;

use anyhow::Result;
use std::sync::Arc;

use crate::config::{Config, EmbeddingBackend};

pub use hashing::HashEmbedder;
pub use ollama::OllamaClient;

/// Maps text to a fixed-length, L2-normalized vector.
///
/// Implementations must be deterministic for a fixed model and must accept empty
/// input, returning a zero vector of [`EmbeddingProvider::dimension`] length.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;
}

impl<T: EmbeddingProvider + ?Sized> EmbeddingProvider for Arc<T> {
    #[inline]
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        (**self).embed(text)
    }

    #[inline]
    fn dimension(&self) -> usize {
        (**self).dimension()
    }
}

/// Scale a vector to unit length in place. Zero vectors are left untouched.
#[inline]
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Build the embedder selected in the configuration
#[inline]
pub fn provider_from_config(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match config.embedding.backend {
        EmbeddingBackend::Ollama => Arc::new(OllamaClient::new(config)?),
        EmbeddingBackend::Hashing => Arc::new(HashEmbedder::new(
            config.ollama.embedding_dimension as usize,
        )),
    };
    Ok(provider)
}
