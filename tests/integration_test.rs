//! End-to-end integration tests for the chatrag pipeline.
//!
//! Tests the complete flow:
//!   Config → Store → Upload → Indexer → Query → Answerer → Messages
use chatrag::chat::Answerer;
use chatrag::config::{Config, EmbeddingProvider, RetrievalFallback};
use chatrag::db::models::Role;
use chatrag::db::{RecordStore, SqliteStore, VectorIndex};
use chatrag::embedder::Embedder;
use chatrag::embedder::mock::MockEmbedder;
use chatrag::error::{ChatError, IngestError};
use chatrag::generator::{Generation, GenerationError, GenerationRequest, Generator};
use chatrag::indexer::Indexer;
use chatrag::uploads::receive_upload;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

const DIMS: usize = 128;

fn test_config(upload_dir: &std::path::Path) -> Config {
    let mut config = Config {
        upload_dir: upload_dir.to_string_lossy().to_string(),
        chunk_size: 300,
        chunk_overlap: 60,
        ..Config::default()
    };
    config.embedding.provider = EmbeddingProvider::Mock;
    config.embedding.dimensions = DIMS;
    config.retry.backoff_ms = 1;
    config
}

/// Answers from the first context chunk and counts whitespace tokens.
#[derive(Default)]
struct ContextEchoGenerator {
    fail_next: AtomicBool,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl Generator for ContextEchoGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(GenerationError::Provider {
                status: 500,
                body: "upstream error".into(),
            });
        }

        let answer = match request.context.first() {
            Some(ctx) => format!("According to the documents: {ctx}"),
            None => "I don't know.".to_string(),
        };
        let prompt_words = request.question.split_whitespace().count()
            + request
                .context
                .iter()
                .map(|c| c.split_whitespace().count())
                .sum::<usize>()
            + request
                .history
                .iter()
                .map(|(q, a)| q.split_whitespace().count() + a.split_whitespace().count())
                .sum::<usize>();

        Ok(Generation {
            output_tokens: answer.split_whitespace().count() as i64,
            input_tokens: prompt_words as i64,
            answer,
        })
    }
}

fn build_docx(paragraphs: &[&str]) -> Vec<u8> {
    let mut docx = docx_rs::Docx::new();
    for p in paragraphs {
        docx = docx.add_paragraph(docx_rs::Paragraph::new().add_run(docx_rs::Run::new().add_text(*p)));
    }
    let mut buf = Cursor::new(Vec::new());
    docx.build().pack(&mut buf).unwrap();
    buf.into_inner()
}

/// Full pipeline: upload → ingest → list → query round-trip
#[tokio::test]
async fn test_full_pipeline() {
    let temp_dir = tempdir().unwrap();
    let config = test_config(&temp_dir.path().join("uploads"));
    let store = Arc::new(SqliteStore::open_in_memory(DIMS).unwrap());
    let embedder = Arc::new(MockEmbedder::new(DIMS));
    let indexer = Indexer::new(&config, embedder.clone(), store.clone());

    let long_guide = "Install the client before connecting. Configure the server address in settings. \
        Restart the application after every upgrade. "
        .repeat(8);
    let uploads = vec![
        (
            "policy.txt",
            b"Refund policy: customers may return goods within 30 days for a full refund.".to_vec(),
        ),
        ("guide.md", format!("# Quick Start\n\n{long_guide}").into_bytes()),
        (
            "handbook.docx",
            build_docx(&[
                "Employee handbook",
                "Vacation requests must be filed two weeks in advance.",
            ]),
        ),
    ];

    let mut total_chunks = 0;
    for (name, bytes) in &uploads {
        let handle = receive_upload(&store, &config.upload_dir(), name, bytes).unwrap();
        let chunks = indexer.ingest(&handle).await.unwrap();
        assert!(chunks >= 1, "{name} produced no chunks");
        total_chunks += chunks;
    }

    let docs = store.list_documents().unwrap();
    assert_eq!(docs.len(), 3);
    assert!(docs.iter().any(|d| d.name == "guide.md" && d.chunk_count > 1));
    assert_eq!(store.entry_count().unwrap(), total_chunks);
    assert_eq!(store.list_files().unwrap().len(), 3);

    // Querying with a substring of a document finds that document
    for (needle, document) in [
        ("return goods within 30 days", "policy.txt"),
        ("Vacation requests must be filed", "handbook.docx"),
        ("Configure the server address", "guide.md"),
    ] {
        let vector = embedder.embed(needle).unwrap();
        let hits = store.query(&vector, config.search_top_k).unwrap();
        assert!(
            hits.iter().any(|h| h.metadata.document == document),
            "{document} not in top-k for {needle:?}"
        );
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score, "results not sorted by score");
        }
    }
}

#[tokio::test]
async fn test_unsupported_format_is_not_indexed() {
    let temp_dir = tempdir().unwrap();
    let config = test_config(&temp_dir.path().join("uploads"));
    let store = Arc::new(SqliteStore::open_in_memory(DIMS).unwrap());
    let indexer = Indexer::new(&config, Arc::new(MockEmbedder::new(DIMS)), store.clone());

    let handle = receive_upload(&store, &config.upload_dir(), "slides.pptx", b"PK\x03\x04").unwrap();
    let err = indexer.ingest(&handle).await.unwrap_err();

    assert!(matches!(err, IngestError::UnsupportedFormat(_)));
    assert!(!err.is_transient());
    assert_eq!(store.entry_count().unwrap(), 0);
    assert!(store.list_documents().unwrap().is_empty());
}

/// Ingest a refund policy, then ask about it in a session
#[tokio::test]
async fn test_refund_policy_answer_flow() {
    let temp_dir = tempdir().unwrap();
    let config = test_config(&temp_dir.path().join("uploads"));
    let store = Arc::new(SqliteStore::open_in_memory(DIMS).unwrap());
    let embedder = Arc::new(MockEmbedder::new(DIMS));
    let generator = Arc::new(ContextEchoGenerator::default());

    let indexer = Indexer::new(&config, embedder.clone(), store.clone());
    let handle = receive_upload(
        &store,
        &config.upload_dir(),
        "terms.md",
        b"# Terms\n\nShipping is free above 50 euros.\n\nWhat is the refund policy? Refunds are issued within 14 days of a return.",
    )
    .unwrap();
    indexer.ingest(&handle).await.unwrap();

    let answerer = Answerer::new(&config, embedder, store.clone(), store.clone(), generator.clone());
    let session = answerer.create_session("alice").await.unwrap();

    let answer = answerer
        .post_question(session.id, "What is the refund policy?")
        .await
        .unwrap();
    assert!(answer.input_tokens > 0);
    assert!(answer.output_tokens > 0);
    assert!(answer.text.contains("Refunds are issued within 14 days"));

    let messages = store.list_messages(session.id).unwrap();
    assert_eq!(messages.len(), 2);
    let reply = &messages[1];
    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.content, answer.text);
    assert_eq!(reply.input_tokens, answer.input_tokens);
    assert_eq!(reply.output_tokens, answer.output_tokens);

    // Follow-up carries the first exchange as history
    answerer
        .post_question(session.id, "And how long does shipping take?")
        .await
        .unwrap();
    let requests = generator.requests.lock().unwrap();
    assert_eq!(requests[1].history.len(), 1);
    assert_eq!(requests[1].history[0].0, "What is the refund policy?");
    drop(requests);

    let usage = store.session_usage(session.id).unwrap();
    assert_eq!(usage.user_messages, 2);
    assert_eq!(usage.assistant_messages, 2);
    assert!(usage.total_tokens() > answer.input_tokens + answer.output_tokens);
}

/// A failed generation keeps the question; a retry answers it once
#[tokio::test]
async fn test_generation_failure_recovery() {
    let temp_dir = tempdir().unwrap();
    let config = test_config(&temp_dir.path().join("uploads"));
    let store = Arc::new(SqliteStore::open_in_memory(DIMS).unwrap());
    let generator = Arc::new(ContextEchoGenerator::default());
    let answerer = Answerer::new(
        &config,
        Arc::new(MockEmbedder::new(DIMS)),
        store.clone(),
        store.clone(),
        generator.clone(),
    );
    let session = answerer.create_session("bob").await.unwrap();

    answerer.post_question(session.id, "Hello?").await.unwrap();

    generator.fail_next.store(true, Ordering::SeqCst);
    let err = answerer
        .post_question(session.id, "Do you ship abroad?")
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::GenerationFailed(_)));

    let messages = store.list_messages(session.id).unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[2].role, Role::User);
    assert_eq!(messages[2].content, "Do you ship abroad?");

    answerer.retry_pending(session.id).await.unwrap();

    let messages = store.list_messages(session.id).unwrap();
    let asked = messages
        .iter()
        .filter(|m| m.role == Role::User && m.content == "Do you ship abroad?")
        .count();
    assert_eq!(asked, 1);
    assert_eq!(messages.len(), 4);

    // The retried request saw the question once, not also as a history turn
    let requests = generator.requests.lock().unwrap();
    let retried = requests.last().unwrap();
    assert_eq!(retried.question, "Do you ship abroad?");
    assert!(retried.history.iter().all(|(q, _)| q != "Do you ship abroad?"));
    assert_eq!(retried.history.len(), 1);
}

#[tokio::test]
async fn test_empty_index_fail_policy() {
    let temp_dir = tempdir().unwrap();
    let mut config = test_config(&temp_dir.path().join("uploads"));
    config.retrieval_fallback = RetrievalFallback::Fail;
    let store = Arc::new(SqliteStore::open_in_memory(DIMS).unwrap());
    let answerer = Answerer::new(
        &config,
        Arc::new(MockEmbedder::new(DIMS)),
        store.clone(),
        store.clone(),
        Arc::new(ContextEchoGenerator::default()),
    );
    let session = answerer.create_session("carol").await.unwrap();

    let err = answerer.post_question(session.id, "Anything?").await.unwrap_err();
    assert!(matches!(err, ChatError::RetrievalUnavailable(_)));
    assert_eq!(store.list_messages(session.id).unwrap().len(), 1);
}

#[test]
fn test_sessions_survive_reopen() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("chat.db");

    let session_id = {
        let store = SqliteStore::open(&db_path, DIMS).unwrap();
        let session = store.create_session("dave").unwrap();
        store
            .append_message(session.id, Role::User, "first", 0, 0)
            .unwrap();
        store
            .append_message(session.id, Role::Assistant, "reply", 12, 4)
            .unwrap();
        session.id
    };

    let store = SqliteStore::open(&db_path, DIMS).unwrap();
    let messages = store.list_messages(session_id).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].input_tokens, 12);
    assert_eq!(store.session_usage(session_id).unwrap().total_tokens(), 16);
}

/// Test config defaults and validation
#[test]
fn test_config_defaults_and_validation() {
    let config = Config::default();

    assert_eq!(config.chunk_size, 1000);
    assert_eq!(config.chunk_overlap, 200);
    assert_eq!(config.retrieval_fallback, RetrievalFallback::Degrade);
    assert!(config.validate().is_ok());

    let mut bad_config = Config::default();
    bad_config.chunk_size = 0;
    assert!(bad_config.validate().is_err());
}
