//! Embedding index: one vector per document, top-K cosine search
//!
//! The `EmbeddingIndex` trait is the seam between scoring and the vector
//! backend. `InMemoryEmbeddingIndex` serves tests and ephemeral use;
//! `SqliteEmbeddingIndex` persists records next to the corpus.
//!
//! Backends report an unreachable store as [`IndexError::Unavailable`];
//! callers fall back to lexical scoring rather than failing.

mod embedder;
mod memory;
mod sqlite;

pub use embedder::{Embedder, EmbeddingError, HashingEmbedder};
#[cfg(feature = "embeddings")]
pub use embedder::FastEmbedEmbedder;
pub use memory::InMemoryEmbeddingIndex;
pub use sqlite::SqliteEmbeddingIndex;

use crate::document::{Document, DocumentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use thiserror::Error;

/// Default vector dimensionality (all-MiniLM class models produce 384).
pub const DEFAULT_DIMENSIONS: usize = 384;

/// Errors raised by index backends
#[derive(Debug, Error)]
pub enum IndexError {
    /// The backend cannot be reached or is in an unusable state
    #[error("embedding index unavailable: {0}")]
    Unavailable(String),

    #[error("vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for IndexError {
    fn from(e: rusqlite::Error) -> Self {
        IndexError::Unavailable(e.to_string())
    }
}

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Metadata snapshot stored alongside a vector
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IndexedMetadata {
    #[serde(default)]
    pub topics: BTreeSet<String>,
    #[serde(default)]
    pub questions: BTreeSet<String>,
    #[serde(default)]
    pub confidence: f32,
    /// Document revision the vector was computed from
    #[serde(default)]
    pub revision: u64,
}

impl IndexedMetadata {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            topics: doc.metadata.topics.clone(),
            questions: doc.metadata.questions.clone(),
            confidence: doc.metadata.confidence,
            revision: doc.revision,
        }
    }
}

/// A stored embedding
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub doc_id: DocumentId,
    pub vector: Vec<f32>,
    pub metadata: IndexedMetadata,
    pub indexed_at: DateTime<Utc>,
}

/// One search result
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub doc_id: DocumentId,
    /// Cosine similarity in [-1, 1]
    pub similarity: f32,
    pub metadata: IndexedMetadata,
}

/// Trait for embedding index backends
///
/// Implementations must be thread-safe; `upsert` calls for different
/// documents may run concurrently and readers are not serialized against
/// writers.
pub trait EmbeddingIndex: Send + Sync {
    /// Insert or overwrite the record for `doc_id`
    fn upsert(
        &self,
        doc_id: &DocumentId,
        vector: Vec<f32>,
        metadata: IndexedMetadata,
    ) -> IndexResult<()>;

    /// Top `limit` records by cosine similarity, descending. Empty index
    /// yields an empty list.
    fn search(&self, query: &[f32], limit: usize) -> IndexResult<Vec<IndexHit>>;

    /// Fetch the record for a document
    fn get(&self, doc_id: &DocumentId) -> IndexResult<Option<EmbeddingRecord>>;

    /// Number of indexed documents
    fn len(&self) -> IndexResult<usize>;

    fn is_empty(&self) -> IndexResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Dimensionality every stored vector must have
    fn dimensions(&self) -> usize;
}

/// Cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn check_dimensions(expected: usize, vector: &[f32]) -> IndexResult<()> {
    if vector.len() != expected {
        return Err(IndexError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Descending by similarity; ties broken by document id so results are
/// stable across runs.
fn rank_hits(mut hits: Vec<IndexHit>, limit: usize) -> Vec<IndexHit> {
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });
    hits.truncate(limit);
    hits
}
