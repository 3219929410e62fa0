//! Generation provider: question + retrieved context + dialogue history in,
//! answer text and token usage out. Follow-up questions are first condensed
//! into a standalone question for retrieval.
pub mod openai;
pub mod prompt;

use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;

use crate::config::GenerationConfig;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    RequestFailed(String),

    #[error("generation provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("invalid generation response: {0}")]
    InvalidResponse(String),
}

/// Everything one generation call needs.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub question: String,
    /// Retrieved chunk texts, most relevant first.
    pub context: Vec<String>,
    /// Earlier (question, answer) turns, oldest first.
    pub history: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub answer: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

/// A language model that answers grounded questions.
///
/// Calls may block on network I/O; the answerer runs them on the blocking
/// pool under a timeout.
pub trait Generator: Send + Sync {
    fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError>;

    /// Rephrase a follow-up `question` as a standalone question using the
    /// earlier turns. The rephrased text is returned as `answer`, with the
    /// usage of the call.
    ///
    /// The default returns the question unchanged at no cost.
    fn condense(
        &self,
        question: &str,
        _history: &[(String, String)],
    ) -> Result<Generation, GenerationError> {
        Ok(Generation {
            answer: question.to_string(),
            input_tokens: 0,
            output_tokens: 0,
        })
    }
}

pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    Ok(Arc::new(openai::OpenAiGenerator::new(config)?))
}

/// Stand-in used when no provider could be configured; every call fails
/// with the configuration problem so ingestion and history still work.
pub struct UnavailableGenerator {
    reason: String,
}

impl UnavailableGenerator {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Generator for UnavailableGenerator {
    fn generate(&self, _request: &GenerationRequest) -> Result<Generation, GenerationError> {
        Err(GenerationError::RequestFailed(format!(
            "generation provider not configured: {}",
            self.reason
        )))
    }
}
