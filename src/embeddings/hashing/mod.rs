#[cfg(test)]
mod tests;

use anyhow::Result;

use super::{EmbeddingProvider, normalize};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;
const MIN_DIMENSION: usize = 8;

/// Bag-of-words embedder that hashes lowercase tokens into a fixed number of buckets.
///
/// It carries no semantics beyond shared vocabulary, which makes it useful for
/// offline runs and for tests that need stable, reproducible vectors.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(MIN_DIMENSION),
        }
    }

    fn bucket(&self, token: &str) -> usize {
        let hash = token.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
        });
        (hash % self.dimension as u64) as usize
    }
}

impl Default for HashEmbedder {
    #[inline]
    fn default() -> Self {
        Self::new(crate::config::settings::DEFAULT_EMBEDDING_DIMENSION as usize)
    }
}

impl EmbeddingProvider for HashEmbedder {
    #[inline]
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];

        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            vector[self.bucket(token)] += 1.0;
        }

        normalize(&mut vector);
        Ok(vector)
    }

    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }
}
