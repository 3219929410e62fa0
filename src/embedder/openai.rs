//! OpenAI-compatible embeddings client.
//!
//! Calls `POST {api_base}/embeddings` with a blocking `reqwest` client.
//! Retries are not done here: the ingestion pipeline owns the bounded
//! retry policy, and query-time failures degrade per configuration.
use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Embedder, EmbedderError};
use crate::config::EmbeddingConfig;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    endpoint: String,
    model: String,
    api_key: String,
    dimensions: usize,
    timeout: Duration,
}

impl OpenAiEmbedder {
    /// Create a new embedder from configuration.
    ///
    /// Fails if the API key environment variable named by
    /// `api_key_env` is not set.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.is_empty() => key,
            _ => bail!("{} environment variable not set", config.api_key_env),
        };

        Ok(Self {
            endpoint: format!("{}/embeddings", config.api_base.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            dimensions: config.dimensions,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    fn request(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| EmbedderError::RequestFailed(e.to_string()))?;

        debug!("Embedding {} texts with {}", texts.len(), self.model);

        let response = client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .map_err(|e| EmbedderError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(EmbedderError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .map_err(|e| EmbedderError::InvalidResponse(e.to_string()))?;
        collect_embeddings(parsed, texts.len(), self.dimensions)
    }
}

/// Order vectors by their `index` field and check count and width.
fn collect_embeddings(
    mut parsed: EmbeddingResponse,
    expected_count: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, EmbedderError> {
    if parsed.data.len() != expected_count {
        return Err(EmbedderError::InvalidResponse(format!(
            "expected {expected_count} embeddings, got {}",
            parsed.data.len()
        )));
    }

    parsed.data.sort_by_key(|d| d.index);

    let mut vectors = Vec::with_capacity(parsed.data.len());
    for item in parsed.data {
        if item.embedding.len() != dimensions {
            return Err(EmbedderError::DimensionMismatch {
                expected: dimensions,
                actual: item.embedding.len(),
            });
        }
        vectors.push(item.embedding);
    }
    Ok(vectors)
}

impl Embedder for OpenAiEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        self.request(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| EmbedderError::InvalidResponse("empty embedding response".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
