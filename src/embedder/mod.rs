//! Embedder trait and shared types for text embedding.
//!
//! The same embedder (and model) must serve ingestion and query time,
//! otherwise similarity scores between stored and query vectors are
//! meaningless.
pub mod mock;
pub mod openai;

use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;

use crate::config::{EmbeddingConfig, EmbeddingProvider};

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("embedding request failed: {0}")]
    RequestFailed(String),

    #[error("embedding provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("expected {expected} dimensions, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl EmbedderError {
    /// Errors that another attempt with the same input cannot fix: client
    /// errors other than rate limiting, and vectors of the wrong width.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        match self {
            EmbedderError::Provider { status, .. } => (400..500).contains(status) && *status != 429,
            EmbedderError::DimensionMismatch { .. } => true,
            EmbedderError::RequestFailed(_) | EmbedderError::InvalidResponse(_) => false,
        }
    }
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`. Calls may block on network I/O; async callers go through
/// [`crate::blocking::run_with_timeout`].
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed multiple text strings into vectors, in input order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;
}

/// Build the embedder selected by configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider {
        EmbeddingProvider::Mock => Ok(Arc::new(mock::MockEmbedder::new(config.dimensions))),
        EmbeddingProvider::Openai => Ok(Arc::new(openai::OpenAiEmbedder::new(config)?)),
    }
}
