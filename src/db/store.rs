//! Capability traits over the database, and the shared SQLite handle that
//! implements them.
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{Db, StoreError, models::*};

/// Nearest-neighbour index over chunk embeddings.
pub trait VectorIndex: Send + Sync {
    fn upsert(&self, entry: &IndexEntry) -> Result<(), StoreError> {
        self.upsert_all(std::slice::from_ref(entry)).map(|_| ())
    }

    /// Write all entries or none of them.
    fn upsert_all(&self, entries: &[IndexEntry]) -> Result<usize, StoreError>;

    /// Top `k` entries by descending similarity.
    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, StoreError>;

    fn entry_count(&self) -> Result<usize, StoreError>;
}

/// Session and message persistence.
pub trait RecordStore: Send + Sync {
    fn create_session(&self, owner: &str) -> Result<ChatSession, StoreError>;

    fn append_message(
        &self,
        session_id: i64,
        role: Role,
        content: &str,
        input_tokens: i64,
        output_tokens: i64,
    ) -> Result<i64, StoreError>;

    /// Messages in creation order.
    fn list_messages(&self, session_id: i64) -> Result<Vec<ChatMessage>, StoreError>;
}

pub struct SqliteStore {
    db: Mutex<Db>,
}

impl SqliteStore {
    pub fn new(db: Db) -> Self {
        Self { db: Mutex::new(db) }
    }

    pub fn open<P: AsRef<Path>>(path: P, dimensions: usize) -> Result<Self, StoreError> {
        Ok(Self::new(Db::open(path, dimensions)?))
    }

    pub fn open_in_memory(dimensions: usize) -> Result<Self, StoreError> {
        Ok(Self::new(Db::open_in_memory(dimensions)?))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Db>, StoreError> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn record_file(
        &self,
        name: &str,
        path: &str,
        format: &str,
        uploaded_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<FileRecord, StoreError> {
        Ok(self.lock()?.record_file(name, path, format, uploaded_at)?)
    }

    pub fn get_file(&self, id: i64) -> Result<Option<FileRecord>, StoreError> {
        Ok(self.lock()?.get_file(id)?)
    }

    pub fn list_files(&self) -> Result<Vec<FileRecord>, StoreError> {
        Ok(self.lock()?.list_files()?)
    }

    pub fn list_documents(&self) -> Result<Vec<DocumentSummary>, StoreError> {
        Ok(self.lock()?.list_documents()?)
    }

    pub fn get_session(&self, session_id: i64) -> Result<Option<ChatSession>, StoreError> {
        Ok(self.lock()?.get_session(session_id)?)
    }

    pub fn list_sessions(&self) -> Result<Vec<ChatSession>, StoreError> {
        Ok(self.lock()?.list_sessions()?)
    }

    pub fn session_usage(&self, session_id: i64) -> Result<SessionUsage, StoreError> {
        self.lock()?.session_usage(session_id)
    }
}

impl VectorIndex for SqliteStore {
    fn upsert_all(&self, entries: &[IndexEntry]) -> Result<usize, StoreError> {
        self.lock()?.insert_entries(entries)
    }

    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, StoreError> {
        self.lock()?.search(vector, k)
    }

    fn entry_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.chunk_count()?)
    }
}

impl RecordStore for SqliteStore {
    fn create_session(&self, owner: &str) -> Result<ChatSession, StoreError> {
        Ok(self.lock()?.create_session(owner)?)
    }

    fn append_message(
        &self,
        session_id: i64,
        role: Role,
        content: &str,
        input_tokens: i64,
        output_tokens: i64,
    ) -> Result<i64, StoreError> {
        self.lock()?
            .append_message(session_id, role, content, input_tokens, output_tokens)
    }

    fn list_messages(&self, session_id: i64) -> Result<Vec<ChatMessage>, StoreError> {
        self.lock()?.list_messages(session_id)
    }
}
