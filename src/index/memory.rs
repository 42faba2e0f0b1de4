//! In-memory embedding index

use super::{
    check_dimensions, cosine_similarity, rank_hits, EmbeddingIndex, EmbeddingRecord, IndexError,
    IndexHit, IndexResult, IndexedMetadata,
};
use crate::document::DocumentId;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory vector store.
///
/// Thread-safe via RwLock. Used by tests and by callers that rebuild the
/// index from the corpus at startup.
pub struct InMemoryEmbeddingIndex {
    records: RwLock<HashMap<DocumentId, EmbeddingRecord>>,
    dimensions: usize,
}

impl InMemoryEmbeddingIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            dimensions,
        }
    }
}

fn poisoned() -> IndexError {
    IndexError::Unavailable("in-memory index lock poisoned".to_string())
}

impl EmbeddingIndex for InMemoryEmbeddingIndex {
    fn upsert(
        &self,
        doc_id: &DocumentId,
        vector: Vec<f32>,
        metadata: IndexedMetadata,
    ) -> IndexResult<()> {
        check_dimensions(self.dimensions, &vector)?;
        let record = EmbeddingRecord {
            doc_id: doc_id.clone(),
            vector,
            metadata,
            indexed_at: Utc::now(),
        };
        self.records
            .write()
            .map_err(|_| poisoned())?
            .insert(doc_id.clone(), record);
        Ok(())
    }

    fn search(&self, query: &[f32], limit: usize) -> IndexResult<Vec<IndexHit>> {
        check_dimensions(self.dimensions, query)?;
        let records = self.records.read().map_err(|_| poisoned())?;
        let hits = records
            .values()
            .map(|record| IndexHit {
                doc_id: record.doc_id.clone(),
                similarity: cosine_similarity(query, &record.vector),
                metadata: record.metadata.clone(),
            })
            .collect();
        Ok(rank_hits(hits, limit))
    }

    fn get(&self, doc_id: &DocumentId) -> IndexResult<Option<EmbeddingRecord>> {
        Ok(self
            .records
            .read()
            .map_err(|_| poisoned())?
            .get(doc_id)
            .cloned())
    }

    fn len(&self) -> IndexResult<usize> {
        Ok(self.records.read().map_err(|_| poisoned())?.len())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(revision: u64) -> IndexedMetadata {
        IndexedMetadata {
            revision,
            ..Default::default()
        }
    }

    #[test]
    fn empty_index_searches_to_empty_list() {
        let index = InMemoryEmbeddingIndex::new(3);
        let hits = index.search(&[1.0, 0.0, 0.0], 10).unwrap();
        assert!(hits.is_empty());
        assert!(index.is_empty().unwrap());
    }

    #[test]
    fn upsert_overwrites_instead_of_duplicating() {
        let index = InMemoryEmbeddingIndex::new(3);
        let id = DocumentId::from_string("travel");
        index.upsert(&id, vec![0.9, 0.3, 0.1], meta(1)).unwrap();
        index.upsert(&id, vec![0.1, 0.2, 0.95], meta(2)).unwrap();

        assert_eq!(index.len().unwrap(), 1);
        let record = index.get(&id).unwrap().unwrap();
        assert_eq!(record.vector, vec![0.1, 0.2, 0.95]);
        assert_eq!(record.metadata.revision, 2);
    }

    #[test]
    fn search_orders_by_similarity_and_respects_limit() {
        let index = InMemoryEmbeddingIndex::new(3);
        index
            .upsert(&DocumentId::from("travel"), vec![0.9, 0.3, 0.1], meta(0))
            .unwrap();
        index
            .upsert(&DocumentId::from("journey"), vec![0.85, 0.35, 0.15], meta(0))
            .unwrap();
        index
            .upsert(&DocumentId::from("democracy"), vec![0.1, 0.2, 0.95], meta(0))
            .unwrap();

        let hits = index.search(&[0.9, 0.3, 0.1], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].doc_id.as_str(), "travel");
        assert_eq!(hits[1].doc_id.as_str(), "journey");
        assert!(hits[0].similarity >= hits[1].similarity);
    }

    #[test]
    fn rejects_wrong_dimensionality() {
        let index = InMemoryEmbeddingIndex::new(3);
        let err = index
            .upsert(&DocumentId::from("x"), vec![1.0, 0.0], meta(0))
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }
}
