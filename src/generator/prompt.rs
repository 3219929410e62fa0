//! Prompt construction for grounded chat answers

use super::GenerationRequest;

/// A role-tagged message in the chat-completions format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: &'static str,
    pub content: String,
}

impl PromptMessage {
    fn new(role: &'static str, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

const SYSTEM_INSTRUCTIONS: &str = "Use the following pieces of context to answer the user's question. \
If the context does not contain the answer, say that you don't know; don't try to make up an answer. \
Only refer to earlier parts of this conversation that appear in the messages below.";

const CONDENSE_INSTRUCTIONS: &str = "Given the following conversation and a follow up question, \
rephrase the follow up question to be a standalone question, in its original language.";

pub struct PromptBuilder;

impl PromptBuilder {
    /// Number and separate retrieved chunks
    pub fn build_context(context: &[String]) -> String {
        if context.is_empty() {
            return "(no relevant documents were found)".to_string();
        }

        let mut out = String::new();
        for (i, text) in context.iter().enumerate() {
            out.push_str(&format!("[{}]\n{}\n\n", i + 1, text.trim()));
        }
        out.trim_end().to_string()
    }

    /// System message with context, then each history turn as a user /
    /// assistant pair, then the question.
    pub fn build_messages(request: &GenerationRequest) -> Vec<PromptMessage> {
        let mut messages = Vec::with_capacity(request.history.len() * 2 + 2);
        messages.push(PromptMessage::new(
            "system",
            format!(
                "{SYSTEM_INSTRUCTIONS}\n\n----------------\n{}",
                Self::build_context(&request.context)
            ),
        ));

        for (question, answer) in &request.history {
            messages.push(PromptMessage::new("user", question.as_str()));
            // An unanswered earlier question keeps its slot with no reply
            if !answer.is_empty() {
                messages.push(PromptMessage::new("assistant", answer.as_str()));
            }
        }

        messages.push(PromptMessage::new("user", request.question.as_str()));
        messages
    }

    /// Single user message asking for a standalone version of `question`.
    pub fn build_condense_messages(question: &str, history: &[(String, String)]) -> Vec<PromptMessage> {
        let mut transcript = String::new();
        for (q, a) in history {
            transcript.push_str(&format!("\nHuman: {q}"));
            if !a.is_empty() {
                transcript.push_str(&format!("\nAssistant: {a}"));
            }
        }
        vec![PromptMessage::new(
            "user",
            format!(
                "{CONDENSE_INSTRUCTIONS}\n\nChat History:{transcript}\nFollow Up Input: {question}\nStandalone question:"
            ),
        )]
    }
}
