//! Retrieval-augmented answering over a chat session.
//!
//! One answer is: persist the user's question, rebuild the session history,
//! retrieve context for the question, generate, then persist the assistant
//! reply with its token usage. A failed generation leaves the question in
//! the session so [`Answerer::retry_pending`] can answer it later.
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::blocking::{BlockingError, run_blocking, run_with_timeout};
use crate::config::{Config, RetrievalFallback};
use crate::db::models::{ChatMessage, ChatSession, Role};
use crate::db::{RecordStore, StoreError, VectorIndex};
use crate::embedder::Embedder;
use crate::error::ChatError;
use crate::generator::{Generation, GenerationError, GenerationRequest, Generator};
use crate::history::ConversationHistory;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Answer {
    /// Id of the persisted assistant message.
    pub message_id: i64,
    pub text: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

pub struct Answerer {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    records: Arc<dyn RecordStore>,
    generator: Arc<dyn Generator>,
    top_k: usize,
    fallback: RetrievalFallback,
    embed_timeout: Duration,
    generation_timeout: Duration,
}

impl Answerer {
    pub fn new(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        records: Arc<dyn RecordStore>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            embedder,
            index,
            records,
            generator,
            top_k: config.search_top_k,
            fallback: config.retrieval_fallback,
            embed_timeout: config.embedding_timeout(),
            generation_timeout: config.generation_timeout(),
        }
    }

    pub async fn create_session(&self, owner: &str) -> Result<ChatSession, ChatError> {
        let owner = owner.to_string();
        let session = self.with_records(move |r| r.create_session(&owner)).await?;
        info!("Created session {} for {}", session.id, session.owner);
        Ok(session)
    }

    pub async fn list_messages(&self, session_id: i64) -> Result<Vec<ChatMessage>, ChatError> {
        self.with_records(move |r| r.list_messages(session_id)).await
    }

    /// Store `question` in the session and answer it.
    pub async fn post_question(&self, session_id: i64, question: &str) -> Result<Answer, ChatError> {
        let question = question.trim().to_string();
        if question.is_empty() {
            return Err(ChatError::EmptyQuestion);
        }

        // The question must be durable before generation starts
        self.with_records(move |r| r.append_message(session_id, Role::User, &question, 0, 0))
            .await?;

        self.answer_pending(session_id).await
    }

    /// Answer the session's trailing unanswered question without storing it again.
    pub async fn retry_pending(&self, session_id: i64) -> Result<Answer, ChatError> {
        self.answer_pending(session_id).await
    }

    async fn answer_pending(&self, session_id: i64) -> Result<Answer, ChatError> {
        let messages = self.list_messages(session_id).await?;
        let history = ConversationHistory::from_messages(&messages);
        let question = history
            .pending_question()
            .ok_or(ChatError::NoPendingQuestion(session_id))?
            .to_string();
        let turns = history.context_pairs();

        // Follow-ups are retrieved by their standalone form
        let (search_query, condense_usage) = if turns.is_empty() {
            (question.clone(), (0, 0))
        } else {
            let (q, t) = (question.clone(), turns.clone());
            let condensed = self
                .call_generator(session_id, move |g| g.condense(&q, &t))
                .await?;
            let standalone = condensed.answer.trim();
            let query = if standalone.is_empty() {
                question.clone()
            } else {
                standalone.to_string()
            };
            debug!("Session {}: standalone question {:?}", session_id, query);
            (query, (condensed.input_tokens, condensed.output_tokens))
        };

        let context = self.retrieve(&search_query).await?;
        debug!(
            "Session {}: {} context chunks, {} history turns",
            session_id,
            context.len(),
            turns.len()
        );

        let request = GenerationRequest {
            question,
            context,
            history: turns,
        };
        let mut generation = self
            .call_generator(session_id, move |g| g.generate(&request))
            .await?;
        generation.input_tokens += condense_usage.0;
        generation.output_tokens += condense_usage.1;

        let answer_text = generation.answer.clone();
        let (input_tokens, output_tokens) = (generation.input_tokens, generation.output_tokens);
        let message_id = self
            .with_records(move |r| {
                r.append_message(
                    session_id,
                    Role::Assistant,
                    &answer_text,
                    input_tokens,
                    output_tokens,
                )
            })
            .await?;

        info!(
            "Session {}: answered ({} in / {} out tokens)",
            session_id, input_tokens, output_tokens
        );
        Ok(Answer {
            message_id,
            text: generation.answer,
            input_tokens,
            output_tokens,
        })
    }

    /// Texts of the top-k chunks for `question`, or the configured fallback
    /// when the index is empty or cannot be queried.
    async fn retrieve(&self, question: &str) -> Result<Vec<String>, ChatError> {
        let index = Arc::clone(&self.index);
        match run_blocking(move || index.entry_count()).await? {
            Ok(0) => return self.retrieval_unavailable("index is empty".to_string()),
            Ok(_) => {}
            Err(e) => return self.retrieval_unavailable(e.to_string()),
        }

        let embedder = Arc::clone(&self.embedder);
        let text = question.to_string();
        let vector = match run_with_timeout(self.embed_timeout, move || embedder.embed(&text)).await {
            Ok(Ok(vector)) => vector,
            Ok(Err(e)) => return self.retrieval_unavailable(format!("query embedding failed: {e}")),
            Err(e) => return self.retrieval_unavailable(format!("query embedding {e}")),
        };

        let index = Arc::clone(&self.index);
        let top_k = self.top_k;
        match run_blocking(move || index.query(&vector, top_k)).await? {
            Ok(hits) => Ok(hits.into_iter().map(|hit| hit.text).collect()),
            Err(e) => self.retrieval_unavailable(e.to_string()),
        }
    }

    fn retrieval_unavailable(&self, reason: String) -> Result<Vec<String>, ChatError> {
        match self.fallback {
            RetrievalFallback::Degrade => {
                warn!("Retrieval unavailable ({}); answering without context", reason);
                Ok(Vec::new())
            }
            RetrievalFallback::Fail => Err(ChatError::RetrievalUnavailable(reason)),
        }
    }

    /// Run one generator call on the blocking pool under the generation timeout.
    async fn call_generator<F>(&self, session_id: i64, f: F) -> Result<Generation, ChatError>
    where
        F: FnOnce(&dyn Generator) -> Result<Generation, GenerationError> + Send + 'static,
    {
        let generator = Arc::clone(&self.generator);
        let generation = run_with_timeout(self.generation_timeout, move || f(generator.as_ref()))
            .await
            .map_err(|e| match e {
                BlockingError::TimedOut(limit) => ChatError::GenerationTimedOut(limit.as_secs()),
                BlockingError::Panicked => ChatError::GenerationFailed(
                    GenerationError::RequestFailed("generator panicked".to_string()),
                ),
            })?
            .inspect_err(|e| warn!("Session {}: generation failed: {}", session_id, e))?;
        Ok(generation)
    }

    async fn with_records<T, F>(&self, f: F) -> Result<T, ChatError>
    where
        F: FnOnce(&dyn RecordStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let records = Arc::clone(&self.records);
        Ok(run_blocking(move || f(records.as_ref())).await??)
    }
}
