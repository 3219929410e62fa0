//! Conversation history reconstruction.
//!
//! Messages are folded in creation order with an "open turn" cursor: a user
//! message opens a turn, an assistant message answers the open turn and
//! closes the cursor. Assistant messages with nothing open are dropped and
//! logged. The last turn is the pending question when it has no answer.
use serde::Serialize;
use tracing::warn;

use crate::db::models::{ChatMessage, Role};

/// One (question, answer) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub question: String,
    pub answer: Option<String>,
}

impl Turn {
    fn open(question: &str) -> Self {
        Self {
            question: question.to_string(),
            answer: None,
        }
    }

    /// The pair handed to generation; an unanswered turn gives an empty answer.
    #[must_use]
    pub fn as_pair(&self) -> (String, String) {
        (
            self.question.clone(),
            self.answer.clone().unwrap_or_default(),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    pub fn from_messages(messages: &[ChatMessage]) -> Self {
        let mut turns: Vec<Turn> = Vec::new();
        // Index of the turn awaiting an answer
        let mut open: Option<usize> = None;

        for message in messages {
            match message.role {
                Role::User => {
                    if message.content.trim().is_empty() {
                        warn!(
                            session_id = message.session_id,
                            message_id = message.id,
                            "History anomaly: blank user message skipped"
                        );
                        continue;
                    }
                    turns.push(Turn::open(&message.content));
                    open = Some(turns.len() - 1);
                }
                Role::Assistant => match open.take() {
                    Some(idx) => turns[idx].answer = Some(message.content.clone()),
                    None => warn!(
                        session_id = message.session_id,
                        message_id = message.id,
                        "History anomaly: assistant message without an open question dropped"
                    ),
                },
            }
        }

        Self { turns }
    }

    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The trailing unanswered question, if any.
    #[must_use]
    pub fn pending_question(&self) -> Option<&str> {
        match self.turns.last() {
            Some(turn) if turn.answer.is_none() => Some(turn.question.as_str()),
            _ => None,
        }
    }

    /// Turns to use as dialogue context, excluding the pending question.
    #[must_use]
    pub fn context_turns(&self) -> &[Turn] {
        match self.pending_question() {
            Some(_) => &self.turns[..self.turns.len() - 1],
            None => &self.turns,
        }
    }

    /// Context turns as (question, answer) pairs.
    #[must_use]
    pub fn context_pairs(&self) -> Vec<(String, String)> {
        self.context_turns().iter().map(Turn::as_pair).collect()
    }
}
