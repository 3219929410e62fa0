use std::fmt;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(FromSqlError::Other(
                format!("unknown message role: {other}").into(),
            )),
        }
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatSession {
    pub id: i64,
    pub owner: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: i64,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

/// A received upload, before or after ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub format: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub name: String,
    pub uploaded_at: DateTime<Utc>,
    pub indexed_at: DateTime<Utc>,
    pub chunk_count: usize,
}

/// Where an indexed chunk came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkMetadata {
    pub document: String,
    pub uploaded_at: DateTime<Utc>,
    pub position: usize,
    pub section: Option<String>,
}

/// One vector plus the chunk text it represents.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// A query hit; `score` is cosine similarity, higher is closer.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub text: String,
    pub score: f64,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionUsage {
    pub session_id: i64,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

impl SessionUsage {
    #[must_use]
    pub fn total_tokens(&self) -> i64 {
        self.input_tokens + self.output_tokens
    }
}
