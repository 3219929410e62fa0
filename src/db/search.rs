use super::{Db, StoreError, models::*, serialize_vector};
use rusqlite::params;

fn map_search_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScoredChunk> {
    let distance: f64 = row.get(5)?;

    Ok(ScoredChunk {
        text: row.get(0)?,
        score: 1.0 - distance,
        metadata: ChunkMetadata {
            document: row.get(1)?,
            uploaded_at: row.get(2)?,
            position: row.get::<_, i64>(3)? as usize,
            section: row.get(4)?,
        },
    })
}

impl Db {
    /// Nearest chunks to `query_vector` by cosine distance, most similar first
    pub fn search(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>, StoreError> {
        if query_vector.len() != self.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                actual: query_vector.len(),
            });
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(
            r#"
            SELECT
                c.content,
                d.name,
                d.uploaded_at,
                c.position,
                c.section,
                vec_distance_cosine(v.embedding, ?) as distance
            FROM vec_chunks v
            JOIN chunks c ON v.rowid = c.id
            JOIN documents d ON c.document_id = d.id
            ORDER BY distance ASC, c.id ASC
            LIMIT ?
            "#,
        )?;
        let rows = stmt.query_map(
            params![serialize_vector(query_vector), top_k as i64],
            map_search_row,
        )?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn chunk_count(&self) -> rusqlite::Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}
