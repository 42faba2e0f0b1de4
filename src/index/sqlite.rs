//! SqliteEmbeddingIndex: persistent vector storage in SQLite
//!
//! Vectors are stored as little-endian f32 blobs, one row per document
//! (`doc_id` is the primary key, so re-indexing overwrites). Search is a
//! brute-force cosine scan, which is fine at the corpus sizes this engine
//! targets but grows linearly with the number of documents.
//!
//! Uses its own connection in WAL mode so readers are not blocked by the
//! occasional writer.

use super::{
    check_dimensions, cosine_similarity, rank_hits, EmbeddingIndex, EmbeddingRecord, IndexError,
    IndexHit, IndexResult, IndexedMetadata,
};
use crate::document::DocumentId;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

/// Persistent embedding index backed by a SQLite table.
pub struct SqliteEmbeddingIndex {
    conn: Mutex<Connection>,
    dimensions: usize,
}

/// Encode a vector as a little-endian f32 blob.
fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// Decode a blob written by [`vector_to_blob`].
fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn parse_timestamp(raw: &str) -> IndexResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| IndexError::Unavailable(format!("corrupt indexed_at '{}': {}", raw, e)))
}

impl SqliteEmbeddingIndex {
    /// Open or create an index at the given path.
    pub fn open(path: impl AsRef<Path>, dimensions: usize) -> IndexResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| IndexError::Unavailable(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        Self::init_connection(conn, dimensions)
    }

    /// Open an in-memory index (for tests).
    pub fn open_in_memory(dimensions: usize) -> IndexResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn, dimensions)
    }

    fn init_connection(conn: Connection, dimensions: usize) -> IndexResult<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS embeddings (
                doc_id TEXT PRIMARY KEY,
                dimensions INTEGER NOT NULL,
                vector BLOB NOT NULL,
                metadata_json TEXT NOT NULL,
                indexed_at TEXT NOT NULL
            );

            PRAGMA journal_mode = WAL;
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            dimensions,
        })
    }

    fn lock(&self) -> IndexResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| IndexError::Unavailable("sqlite index connection poisoned".to_string()))
    }
}

impl EmbeddingIndex for SqliteEmbeddingIndex {
    fn upsert(
        &self,
        doc_id: &DocumentId,
        vector: Vec<f32>,
        metadata: IndexedMetadata,
    ) -> IndexResult<()> {
        check_dimensions(self.dimensions, &vector)?;
        let metadata_json = serde_json::to_string(&metadata)?;
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO embeddings (doc_id, dimensions, vector, metadata_json, indexed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(doc_id) DO UPDATE SET
                dimensions = excluded.dimensions,
                vector = excluded.vector,
                metadata_json = excluded.metadata_json,
                indexed_at = excluded.indexed_at
            "#,
            params![
                doc_id.as_str(),
                vector.len() as i64,
                vector_to_blob(&vector),
                metadata_json,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn search(&self, query: &[f32], limit: usize) -> IndexResult<Vec<IndexHit>> {
        check_dimensions(self.dimensions, query)?;
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT doc_id, vector, metadata_json FROM embeddings")?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            let metadata_json: String = row.get(2)?;
            Ok((id, blob, metadata_json))
        })?;

        let mut hits = Vec::new();
        for row in rows {
            let (id, blob, metadata_json) = row?;
            let vector = blob_to_vector(&blob);
            if vector.len() != self.dimensions {
                warn!(
                    doc_id = %id,
                    stored = vector.len(),
                    expected = self.dimensions,
                    "skipping embedding with stale dimensionality"
                );
                continue;
            }
            hits.push(IndexHit {
                similarity: cosine_similarity(query, &vector),
                doc_id: DocumentId::from_string(id),
                metadata: serde_json::from_str(&metadata_json)?,
            });
        }

        Ok(rank_hits(hits, limit))
    }

    fn get(&self, doc_id: &DocumentId) -> IndexResult<Option<EmbeddingRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT vector, metadata_json, indexed_at FROM embeddings WHERE doc_id = ?1",
                params![doc_id.as_str()],
                |row| {
                    let blob: Vec<u8> = row.get(0)?;
                    let metadata_json: String = row.get(1)?;
                    let indexed_at: String = row.get(2)?;
                    Ok((blob, metadata_json, indexed_at))
                },
            )
            .optional()?;

        match row {
            Some((blob, metadata_json, indexed_at)) => Ok(Some(EmbeddingRecord {
                doc_id: doc_id.clone(),
                vector: blob_to_vector(&blob),
                metadata: serde_json::from_str(&metadata_json)?,
                indexed_at: parse_timestamp(&indexed_at)?,
            })),
            None => Ok(None),
        }
    }

    fn len(&self) -> IndexResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
