use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::blocking::{BlockingError, run_blocking, run_with_timeout};
use crate::config::{Config, RetryConfig};
use crate::db::VectorIndex;
use crate::db::models::{ChunkMetadata, IndexEntry};
use crate::embedder::{Embedder, EmbedderError};
use crate::error::{IngestError, TransientError};
use crate::indexer::chunker::{Chunk, RecursiveChunker};
use crate::loader::{self, DocumentFormat};
use crate::uploads::DocumentHandle;

/// Load → chunk → embed → index for one document at a time.
///
/// Independent documents may be ingested concurrently through a shared
/// `Indexer`; it holds no mutable state.
pub struct Indexer {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    chunker: RecursiveChunker,
    retry: RetryConfig,
    embed_timeout: Duration,
    batch_size: usize,
}

impl Indexer {
    pub fn new(config: &Config, embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            embedder,
            index,
            chunker: RecursiveChunker::new(config.chunk_size, config.chunk_overlap),
            retry: config.retry.clone(),
            embed_timeout: config.embedding_timeout(),
            batch_size: config.embedding.batch_size.max(1),
        }
    }

    /// Ingest one received document, returning the number of indexed chunks.
    pub async fn ingest(&self, doc: &DocumentHandle) -> Result<usize, IngestError> {
        // Reject unknown formats before touching the file
        DocumentFormat::from_filename(&doc.name)?;

        let bytes = tokio::fs::read(&doc.path)
            .await
            .map_err(|source| IngestError::Read {
                path: doc.path.display().to_string(),
                source,
            })?;

        let chunks = self.load_and_chunk(&doc.name, bytes).await?;
        info!("{}: {} chunks", doc.name, chunks.len());

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embed_chunks(texts).await?;

        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry {
                vector,
                text: chunk.content,
                metadata: ChunkMetadata {
                    document: doc.name.clone(),
                    uploaded_at: doc.uploaded_at,
                    position: chunk.position,
                    section: chunk.section,
                },
            })
            .collect();

        let entries = Arc::new(entries);
        let written = with_retry(&self.retry, "index write", || {
            let index = Arc::clone(&self.index);
            let entries = Arc::clone(&entries);
            async move {
                run_blocking(move || index.upsert_all(&entries))
                    .await
                    .map_err(|e| blocking_failure("index write", e))?
                    .map_err(TransientError::from)
            }
        })
        .await?;

        info!("Indexed {} ({} chunks)", doc.name, written);
        Ok(written)
    }

    async fn load_and_chunk(&self, name: &str, bytes: Vec<u8>) -> Result<Vec<Chunk>, IngestError> {
        let owned_name = name.to_string();
        let extracted = run_blocking(move || loader::load(&owned_name, &bytes))
            .await
            .map_err(|e| IngestError::Extraction(format!("{name}: {e}")))??;

        if extracted.is_blank() {
            return Err(IngestError::ChunkingFailed(format!(
                "{name}: no text extracted"
            )));
        }

        let chunks = self.chunker.chunk_document(&extracted);
        if chunks.is_empty() {
            return Err(IngestError::ChunkingFailed(format!(
                "{name}: produced no chunks"
            )));
        }
        Ok(chunks)
    }

    /// Embed all chunk texts, `batch_size` per request. Each batch gets its
    /// own timeout and retry budget.
    async fn embed_chunks(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, IngestError> {
        let total = texts.len();
        let batch_count = total.div_ceil(self.batch_size);
        let mut vectors = Vec::with_capacity(total);

        for (n, batch) in texts.chunks(self.batch_size).enumerate() {
            let batch = Arc::new(batch.to_vec());
            let embedded = self.embed_batch(batch).await?;
            vectors.extend(embedded);
            debug!("Embedded batch {}/{} ({}/{} chunks)", n + 1, batch_count, vectors.len(), total);
        }
        Ok(vectors)
    }

    async fn embed_batch(&self, texts: Arc<Vec<String>>) -> Result<Vec<Vec<f32>>, IngestError> {
        let timeout = self.embed_timeout;

        with_retry(&self.retry, "embedding", || {
            let embedder = Arc::clone(&self.embedder);
            let texts = Arc::clone(&texts);
            async move {
                run_with_timeout(timeout, move || {
                    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
                    let vectors = embedder.embed_batch(&refs)?;
                    // Every chunk must get exactly one vector
                    if vectors.len() != refs.len() {
                        return Err(EmbedderError::InvalidResponse(format!(
                            "expected {} vectors, got {}",
                            refs.len(),
                            vectors.len()
                        )));
                    }
                    Ok(vectors)
                })
                .await
                .map_err(|e| blocking_failure("embedding", e))?
                .map_err(TransientError::from)
            }
        })
        .await
    }
}

fn blocking_failure(operation: &'static str, err: BlockingError) -> TransientError {
    match err {
        BlockingError::TimedOut(limit) => TransientError::TimedOut {
            operation,
            secs: limit.as_secs(),
        },
        BlockingError::Panicked => TransientError::Panicked(operation),
    }
}

/// Run `op` up to `policy.max_attempts` times with exponential backoff.
/// Errors that cannot succeed on repetition end the loop at once.
async fn with_retry<T, F, Fut>(
    policy: &RetryConfig,
    operation: &str,
    mut op: F,
) -> Result<T, IngestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransientError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{operation} succeeded on attempt {attempt}");
                }
                return Ok(value);
            }
            Err(err) if attempt < max_attempts && err.is_retryable() => {
                warn!("{operation} attempt {attempt}/{max_attempts} failed: {err}");
                attempt += 1;
                tokio::time::sleep(policy.backoff(attempt)).await;
            }
            Err(err) => {
                warn!("{operation} failed after {attempt} attempt(s): {err}");
                return Err(IngestError::IngestionFailed {
                    attempts: attempt,
                    source: err,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::db::StoreError;
    use crate::db::models::ScoredChunk;
    use crate::embedder::mock::MockEmbedder;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DIMS: usize = 64;

    fn test_config() -> Config {
        let mut config = Config {
            chunk_size: 200,
            chunk_overlap: 40,
            ..Config::default()
        };
        config.retry.backoff_ms = 1;
        config.embedding.dimensions = DIMS;
        config
    }

    fn write_doc(dir: &tempfile::TempDir, name: &str, body: &[u8]) -> DocumentHandle {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body).unwrap();
        DocumentHandle {
            file_id: 1,
            name: name.to_string(),
            path,
            uploaded_at: chrono::Utc::now(),
        }
    }

    /// Fails the first `failures` calls, then delegates.
    struct FlakyEmbedder {
        inner: MockEmbedder,
        failures: usize,
        calls: AtomicUsize,
    }

    impl Embedder for FlakyEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(EmbedderError::RequestFailed("connection reset".into()));
            }
            self.inner.embed(text)
        }

        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(EmbedderError::RequestFailed("connection reset".into()));
            }
            self.inner.embed_batch(texts)
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions
        }
    }

    /// Records batch sizes and rejects batches over `max_inputs` like a
    /// provider with an input limit.
    struct LimitedEmbedder {
        inner: MockEmbedder,
        max_inputs: usize,
        batches: std::sync::Mutex<Vec<usize>>,
    }

    impl Embedder for LimitedEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
            self.inner.embed(text)
        }

        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
            self.batches.lock().unwrap().push(texts.len());
            if texts.len() > self.max_inputs {
                return Err(EmbedderError::Provider {
                    status: 400,
                    body: "too many inputs".into(),
                });
            }
            self.inner.embed_batch(texts)
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions
        }
    }

    struct BrokenIndex {
        attempts: AtomicUsize,
    }

    impl VectorIndex for BrokenIndex {
        fn upsert_all(&self, _entries: &[IndexEntry]) -> Result<usize, StoreError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Poisoned)
        }

        fn query(&self, _vector: &[f32], _k: usize) -> Result<Vec<ScoredChunk>, StoreError> {
            Ok(Vec::new())
        }

        fn entry_count(&self) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_ingest_text_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory(DIMS).unwrap());
        let indexer = Indexer::new(&test_config(), Arc::new(MockEmbedder::new(DIMS)), store.clone());

        let body = "Shipping takes five days.\n\nRefunds are accepted within thirty days of purchase.\n\n".repeat(5);
        let doc = write_doc(&dir, "policy.txt", body.as_bytes());

        let count = indexer.ingest(&doc).await.unwrap();
        assert!(count > 1);
        assert_eq!(store.entry_count().unwrap(), count);
        assert_eq!(store.list_documents().unwrap()[0].chunk_count, count);
    }

    #[tokio::test]
    async fn test_unsupported_format_reads_nothing() {
        let store = Arc::new(SqliteStore::open_in_memory(DIMS).unwrap());
        let indexer = Indexer::new(&test_config(), Arc::new(MockEmbedder::new(DIMS)), store.clone());
        let doc = DocumentHandle {
            file_id: 1,
            name: "archive.zip".into(),
            path: "/nonexistent/archive.zip".into(),
            uploaded_at: chrono::Utc::now(),
        };

        let err = indexer.ingest(&doc).await.unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFormat(_)));
        assert_eq!(store.entry_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_blank_document_fails_chunking() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory(DIMS).unwrap());
        let indexer = Indexer::new(&test_config(), Arc::new(MockEmbedder::new(DIMS)), store.clone());
        let doc = write_doc(&dir, "empty.md", b"  \n\n  ");

        let err = indexer.ingest(&doc).await.unwrap_err();
        assert!(matches!(err, IngestError::ChunkingFailed(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_missing_file_is_read_error() {
        let store = Arc::new(SqliteStore::open_in_memory(DIMS).unwrap());
        let indexer = Indexer::new(&test_config(), Arc::new(MockEmbedder::new(DIMS)), store);
        let doc = DocumentHandle {
            file_id: 1,
            name: "gone.txt".into(),
            path: "/nonexistent/gone.txt".into(),
            uploaded_at: chrono::Utc::now(),
        };
        assert!(matches!(indexer.ingest(&doc).await, Err(IngestError::Read { .. })));
    }

    #[tokio::test]
    async fn test_embedding_retried_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory(DIMS).unwrap());
        let embedder = Arc::new(FlakyEmbedder {
            inner: MockEmbedder::new(DIMS),
            failures: 2,
            calls: AtomicUsize::new(0),
        });
        let indexer = Indexer::new(&test_config(), embedder.clone(), store.clone());
        let doc = write_doc(&dir, "faq.txt", b"Opening hours are nine to five.");

        assert_eq!(indexer.ingest(&doc).await.unwrap(), 1);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_embedding_exhausted_leaves_index_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory(DIMS).unwrap());
        let embedder = Arc::new(FlakyEmbedder {
            inner: MockEmbedder::new(DIMS),
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        });
        let indexer = Indexer::new(&test_config(), embedder, store.clone());
        let doc = write_doc(&dir, "faq.txt", b"Opening hours are nine to five.");

        let err = indexer.ingest(&doc).await.unwrap_err();
        match err {
            IngestError::IngestionFailed { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(source, TransientError::Embedding(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.entry_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_large_document_embedded_in_batches() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory(DIMS).unwrap());
        let embedder = Arc::new(LimitedEmbedder {
            inner: MockEmbedder::new(DIMS),
            max_inputs: 8,
            batches: std::sync::Mutex::new(Vec::new()),
        });
        let mut config = test_config();
        config.embedding.batch_size = 8;
        let indexer = Indexer::new(&config, embedder.clone(), store.clone());

        let body: String = (0..60)
            .map(|i| format!("Paragraph {i} describes warehouse aisle {i} and its shelving layout in detail.\n\n"))
            .collect();
        let doc = write_doc(&dir, "inventory.txt", body.as_bytes());

        let count = indexer.ingest(&doc).await.unwrap();
        assert!(count > 8);
        assert_eq!(store.entry_count().unwrap(), count);

        let batches = embedder.batches.lock().unwrap();
        assert!(batches.iter().all(|&n| n <= 8), "batches: {batches:?}");
        assert_eq!(batches.iter().sum::<usize>(), count);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory(DIMS).unwrap());
        let embedder = Arc::new(LimitedEmbedder {
            inner: MockEmbedder::new(DIMS),
            max_inputs: 0,
            batches: std::sync::Mutex::new(Vec::new()),
        });
        let indexer = Indexer::new(&test_config(), embedder.clone(), store.clone());
        let doc = write_doc(&dir, "faq.txt", b"Opening hours are nine to five.");

        let err = indexer.ingest(&doc).await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::IngestionFailed {
                attempts: 1,
                source: TransientError::Embedding(EmbedderError::Provider { status: 400, .. }),
            }
        ));
        assert_eq!(embedder.batches.lock().unwrap().len(), 1);
        assert_eq!(store.entry_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_index_write_retried_then_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(BrokenIndex {
            attempts: AtomicUsize::new(0),
        });
        let indexer = Indexer::new(&test_config(), Arc::new(MockEmbedder::new(DIMS)), index.clone());
        let doc = write_doc(&dir, "faq.md", b"# FAQ\n\nWe ship worldwide.");

        let err = indexer.ingest(&doc).await.unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(
            err,
            IngestError::IngestionFailed {
                source: TransientError::IndexWrite(_),
                ..
            }
        ));
        assert_eq!(index.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_backoff_policy() {
        let policy = RetryConfig {
            max_attempts: 1,
            backoff_ms: 1,
        };
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_retry(&policy, "noop", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TransientError::Panicked("noop")) }
        })
        .await;
        assert!(matches!(result, Err(IngestError::IngestionFailed { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
