use std::collections::HashMap;

use super::{Db, StoreError, models::*, serialize_vector};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Result, params};

fn map_file_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        path: row.get(2)?,
        format: row.get(3)?,
        uploaded_at: row.get(4)?,
    })
}

impl Db {
    /// Records a received upload and returns its intake row
    pub fn record_file(
        &self,
        name: &str,
        path: &str,
        format: &str,
        uploaded_at: DateTime<Utc>,
    ) -> Result<FileRecord> {
        self.conn.execute(
            "INSERT INTO files (name, path, format, uploaded_at) VALUES (?, ?, ?, ?)",
            params![name, path, format, uploaded_at],
        )?;
        Ok(FileRecord {
            id: self.conn.last_insert_rowid(),
            name: name.to_string(),
            path: path.to_string(),
            format: format.to_string(),
            uploaded_at,
        })
    }

    pub fn get_file(&self, id: i64) -> Result<Option<FileRecord>> {
        self.conn
            .query_row(
                "SELECT id, name, path, format, uploaded_at FROM files WHERE id = ?",
                params![id],
                map_file_row,
            )
            .optional()
    }

    pub fn list_files(&self) -> Result<Vec<FileRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, path, format, uploaded_at FROM files ORDER BY uploaded_at, id",
        )?;
        let rows = stmt.query_map([], map_file_row)?;
        rows.collect()
    }

    /// Returns every indexed document with its chunk count, oldest first
    pub fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT d.name, d.uploaded_at, d.indexed_at, COUNT(c.id)
            FROM documents d
            LEFT JOIN chunks c ON c.document_id = d.id
            GROUP BY d.id
            ORDER BY d.uploaded_at, d.id
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DocumentSummary {
                name: row.get(0)?,
                uploaded_at: row.get(1)?,
                indexed_at: row.get(2)?,
                chunk_count: row.get::<_, i64>(3)? as usize,
            })
        })?;
        rows.collect()
    }

    /// Writes index entries in one transaction.
    ///
    /// A chunk is keyed by (document name, upload time, position); writing
    /// the same key again replaces the earlier text and vector. The entries
    /// for a document are its full chunk set, so positions past the last
    /// one written are dropped. Nothing is committed if any write fails.
    pub fn insert_entries(&mut self, entries: &[IndexEntry]) -> std::result::Result<usize, StoreError> {
        for entry in entries {
            if entry.vector.len() != self.dimensions {
                return Err(StoreError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: entry.vector.len(),
                });
            }
        }

        let tx = self.conn.transaction()?;
        let mut last_position: HashMap<i64, usize> = HashMap::new();

        for entry in entries {
            let meta = &entry.metadata;

            let doc_id: i64 = tx.query_row(
                r#"
                INSERT INTO documents (name, uploaded_at, indexed_at)
                VALUES (?, ?, CURRENT_TIMESTAMP)
                ON CONFLICT(name, uploaded_at) DO UPDATE SET
                    indexed_at = CURRENT_TIMESTAMP
                RETURNING id
                "#,
                params![meta.document, meta.uploaded_at],
                |row| row.get(0),
            )?;

            // Virtual table has no cascade
            tx.execute(
                "DELETE FROM vec_chunks WHERE rowid IN (SELECT id FROM chunks WHERE document_id = ? AND position = ?)",
                params![doc_id, meta.position as i64],
            )?;
            tx.execute(
                "DELETE FROM chunks WHERE document_id = ? AND position = ?",
                params![doc_id, meta.position as i64],
            )?;

            tx.execute(
                "INSERT INTO chunks (document_id, position, section, content) VALUES (?, ?, ?, ?)",
                params![doc_id, meta.position as i64, meta.section, entry.text],
            )?;
            let chunk_id = tx.last_insert_rowid();

            tx.execute(
                "INSERT INTO vec_chunks (rowid, embedding) VALUES (?, ?)",
                params![chunk_id, serialize_vector(&entry.vector)],
            )?;

            let last = last_position.entry(doc_id).or_default();
            *last = (*last).max(meta.position);
        }

        for (doc_id, last) in &last_position {
            tx.execute(
                "DELETE FROM vec_chunks WHERE rowid IN (SELECT id FROM chunks WHERE document_id = ? AND position > ?)",
                params![doc_id, *last as i64],
            )?;
            tx.execute(
                "DELETE FROM chunks WHERE document_id = ? AND position > ?",
                params![doc_id, *last as i64],
            )?;
        }

        tx.commit()?;
        Ok(entries.len())
    }
}
