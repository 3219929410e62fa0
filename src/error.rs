//! Caller-visible error types for ingestion and chat.
use thiserror::Error;

use crate::blocking::BlockingError;
use crate::db::StoreError;
use crate::embedder::EmbedderError;
use crate::generator::GenerationError;
use crate::loader::LoadError;

/// A failure that was retried before being surfaced.
#[derive(Error, Debug)]
pub enum TransientError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedderError),

    #[error("index write failed: {0}")]
    IndexWrite(#[from] StoreError),

    #[error("{operation} timed out after {secs}s")]
    TimedOut { operation: &'static str, secs: u64 },

    #[error("{0} worker panicked")]
    Panicked(&'static str),
}

impl TransientError {
    /// False when repeating the operation cannot succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            TransientError::Embedding(e) => !e.is_permanent(),
            TransientError::IndexWrite(StoreError::DimensionMismatch { .. }) => false,
            TransientError::IndexWrite(_) | TransientError::TimedOut { .. } | TransientError::Panicked(_) => true,
        }
    }
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Extraction(String),

    #[error("chunking failed: {0}")]
    ChunkingFailed(String),

    #[error("ingestion failed after {attempts} attempt(s): {source}")]
    IngestionFailed {
        attempts: u32,
        #[source]
        source: TransientError,
    },
}

impl IngestError {
    /// True when retries were exhausted, false for format or content problems.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, IngestError::IngestionFailed { .. })
    }
}

impl From<LoadError> for IngestError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::UnsupportedFormat(ext) => IngestError::UnsupportedFormat(ext),
            other => IngestError::Extraction(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error("session {0} not found")]
    SessionNotFound(i64),

    #[error("session {0} has no unanswered question")]
    NoPendingQuestion(i64),

    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("generation failed: {0}")]
    GenerationFailed(#[from] GenerationError),

    #[error("generation timed out after {0}s")]
    GenerationTimedOut(u64),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("background task failed: {0}")]
    Blocking(#[from] BlockingError),
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SessionNotFound(id) => ChatError::SessionNotFound(id),
            other => ChatError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::DocumentFormat;

    #[test]
    fn test_load_errors_map_to_ingest_errors() {
        let err: IngestError = LoadError::UnsupportedFormat(".exe".into()).into();
        assert!(matches!(err, IngestError::UnsupportedFormat(ref e) if e == ".exe"));
        assert!(!err.is_transient());

        let err: IngestError = LoadError::Extraction {
            format: DocumentFormat::Pdf,
            reason: "bad xref".into(),
        }
        .into();
        assert!(matches!(err, IngestError::Extraction(_)));
    }

    #[test]
    fn test_ingestion_failed_is_transient() {
        let err = IngestError::IngestionFailed {
            attempts: 3,
            source: TransientError::Embedding(EmbedderError::RequestFailed("reset".into())),
        };
        assert!(err.is_transient());
        assert!(err.to_string().contains("3 attempt"));
    }

    #[test]
    fn test_retryable_classification() {
        let err = TransientError::Embedding(EmbedderError::Provider {
            status: 400,
            body: "too many inputs".into(),
        });
        assert!(!err.is_retryable());

        let err = TransientError::IndexWrite(StoreError::DimensionMismatch {
            expected: 4,
            actual: 3,
        });
        assert!(!err.is_retryable());

        assert!(TransientError::IndexWrite(StoreError::Poisoned).is_retryable());
        assert!(
            TransientError::TimedOut {
                operation: "embedding",
                secs: 30
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_store_session_not_found_maps_to_chat_error() {
        let err: ChatError = StoreError::SessionNotFound(7).into();
        assert!(matches!(err, ChatError::SessionNotFound(7)));

        let err: ChatError = StoreError::Poisoned.into();
        assert!(matches!(err, ChatError::Store(StoreError::Poisoned)));
    }
}
