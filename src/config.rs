//! Configuration module for chatrag.
//!
//! Handles loading, validating, and providing default configuration values.
//! The resulting `Config` is handed to the ingestion pipeline and the
//! answerer at construction time; nothing below reads the environment
//! except provider constructors resolving their API key once.
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::loader::DocumentFormat;

// ── Default value functions ──────────────────────────────────────────

fn default_db_path() -> String {
    "./chatrag.db".to_string()
}

fn default_upload_dir() -> String {
    "./uploads".to_string()
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_search_top_k() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    200
}

fn default_embedding_provider() -> EmbeddingProvider {
    EmbeddingProvider::Openai
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimensions() -> usize {
    1536
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_batch_size() -> usize {
    128
}

fn default_embedding_timeout() -> u64 {
    30
}

fn default_generation_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_generation_timeout() -> u64 {
    60
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Directory where received uploads are written before ingestion.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default = "default_search_top_k")]
    pub search_top_k: usize,

    #[serde(default)]
    pub retrieval_fallback: RetrievalFallback,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub generation: GenerationConfig,
}

/// What the answerer does when the vector index cannot serve a query.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalFallback {
    /// Answer without retrieved context.
    #[default]
    Degrade,
    /// Surface `RetrievalUnavailable` to the caller.
    Fail,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt; doubled for each further attempt.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Deterministic local hashing embedder, no network.
    Mock,
    /// OpenAI-compatible `/embeddings` endpoint.
    Openai,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: EmbeddingProvider,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Chunks sent per embedding request during ingestion.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_model")]
    pub model: String,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            upload_dir: default_upload_dir(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            search_top_k: default_search_top_k(),
            retrieval_fallback: RetrievalFallback::default(),
            retry: RetryConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dimensions: default_dimensions(),
            api_base: default_api_base(),
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_generation_model(),
            temperature: 0.0,
            api_base: default_api_base(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"chatrag.json"`.
    /// If the file does not exist, returns a default config and optionally
    /// generates a template file.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "chatrag.json"
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            // Generate template only for the default path
            if path == "chatrag.json" {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let cfg: Config = serde_json::from_str(&data)
            .with_context(|| format!("invalid JSON in config: {path}"))?;

        info!("Loaded configuration from {path}");
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.chunk_size > 0, "chunk_size must be positive");
        anyhow::ensure!(
            self.chunk_overlap < self.chunk_size,
            "chunk_overlap must be smaller than chunk_size"
        );
        anyhow::ensure!(self.search_top_k > 0, "search_top_k must be positive");
        anyhow::ensure!(
            self.retry.max_attempts > 0,
            "retry.max_attempts must be at least 1"
        );
        anyhow::ensure!(
            self.embedding.dimensions > 0,
            "embedding.dimensions must be positive"
        );
        anyhow::ensure!(
            self.embedding.batch_size > 0,
            "embedding.batch_size must be positive"
        );
        anyhow::ensure!(
            self.embedding.timeout_secs > 0,
            "embedding.timeout_secs must be positive"
        );
        anyhow::ensure!(
            self.generation.timeout_secs > 0,
            "generation.timeout_secs must be positive"
        );
        Ok(())
    }

    #[must_use]
    pub fn upload_dir(&self) -> PathBuf {
        PathBuf::from(&self.upload_dir)
    }

    #[must_use]
    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding.timeout_secs)
    }

    #[must_use]
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation.timeout_secs)
    }
}

impl RetryConfig {
    /// Delay to wait before attempt number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u64 << (attempt - 2).min(5);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

// ── Pattern helpers ──────────────────────────────────────────────────

fn is_supported(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| DocumentFormat::from_filename(n).is_ok())
}

/// Expand CLI inputs to the files to ingest.
///
/// An existing file is taken as-is, whatever its extension. A directory is
/// walked recursively and a glob pattern (`**` allowed) is expanded; both
/// keep only files with a supported extension.
pub fn expand_inputs(inputs: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        let path = Path::new(input);
        if path.is_file() {
            files.push(path.to_path_buf());
        } else if path.is_dir() {
            files.extend(walk_dir(path)?.into_iter().filter(|p| is_supported(p)));
        } else {
            let matches =
                glob::glob(input).with_context(|| format!("invalid glob pattern: {input}"))?;
            let before = files.len();
            for entry in matches.flatten() {
                if entry.is_file() && is_supported(&entry) {
                    files.push(entry);
                }
            }
            if files.len() == before {
                warn!("No supported files match {input}");
            }
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

/// Recursive directory walk, skipping hidden entries.
fn walk_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut result = Vec::new();
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("failed to read dir: {}", dir.display()))?;
    for entry in entries.flatten() {
        let path = entry.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if hidden {
            continue;
        }
        if path.is_dir() {
            result.extend(walk_dir(&path)?);
        } else if path.is_file() {
            result.push(path);
        }
    }
    Ok(result)
}

// ── Tests ────────────────────────────────────────────────────────────
