//! Mock embedder for tests and offline use.
//!
//! Produces deterministic hashed bag-of-words vectors: texts that share
//! words land close to each other, so retrieval behaves sensibly without
//! loading a model or calling a provider.
//!
//! Words are bucketed with 64-bit FNV-1a, which is fixed by definition, so
//! vectors written to a store by one build match queries from another.
use super::{Embedder, EmbedderError};

/// A mock embedder that produces deterministic vectors from word hashes.
pub struct MockEmbedder {
    pub dimensions: usize,
}

impl MockEmbedder {
    /// Create a new `MockEmbedder` with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self { dimensions: 384 }
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

fn bucket(token: &str, dimensions: usize) -> usize {
    (fnv1a(token.as_bytes()) % dimensions as u64) as usize
}

impl Embedder for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut embedding = vec![0.0f32; self.dimensions];
        if self.dimensions == 0 {
            return Ok(embedding);
        }

        let mut any = false;
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            embedding[bucket(&word.to_lowercase(), self.dimensions)] += 1.0;
            any = true;
        }

        // No words at all (punctuation only): fall back to the whole text
        if !any {
            embedding[bucket(text, self.dimensions)] = 1.0;
        }

        // L2 normalize
        let norm_sq: f32 = embedding.iter().map(|v| v * v).sum();
        if norm_sq > 0.0 {
            let inv = 1.0 / norm_sq.sqrt();
            for v in &mut embedding {
                *v *= inv;
            }
        }

        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
