//! Document corpus access and persistence
//!
//! The corpus is the collaborator that owns documents. The engine lists
//! and reads documents for scoring, reads the matched document for a
//! merge, and writes the merged result back. Writes must be atomic: a
//! reader sees either the old or the new file, never a partial one.

mod fs;

pub use fs::FsCorpus;

use crate::document::{CodecError, Document, DocumentId, DocumentMetadata};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;
use thiserror::Error;

/// Errors that can occur during corpus operations
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("Document not found: {0}")]
    NotFound(DocumentId),

    #[error("Invalid document id: {0:?}")]
    InvalidId(String),

    #[error("Document {expected} contains frontmatter for {found}")]
    IdMismatch { expected: DocumentId, found: DocumentId },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Codec(#[from] CodecError),

    #[error("Corpus unavailable: {0}")]
    Unavailable(String),
}

/// Result type for corpus operations
pub type CorpusResult<T> = Result<T, CorpusError>;

/// Listing entry: enough to score a document without loading its body.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSummary {
    pub id: DocumentId,
    pub metadata: DocumentMetadata,
    /// Backing file, for file-based corpora
    pub path: Option<PathBuf>,
    pub revision: u64,
}

impl DocumentSummary {
    pub fn of(doc: &Document, path: Option<PathBuf>) -> Self {
        Self {
            id: doc.id.clone(),
            metadata: doc.metadata.clone(),
            path,
            revision: doc.revision,
        }
    }
}

/// Trait for document stores
///
/// Implementations must be thread-safe (Send + Sync). `write` must be
/// atomic with respect to concurrent `read` calls.
pub trait DocumentCorpus: Send + Sync {
    /// All documents, ordered by id
    fn list_documents(&self) -> CorpusResult<Vec<DocumentSummary>>;

    /// Load a document in full
    fn read(&self, id: &DocumentId) -> CorpusResult<Document>;

    /// Create or replace a document atomically
    fn write(&self, doc: &Document) -> CorpusResult<()>;

    /// Check whether a document exists
    fn exists(&self, id: &DocumentId) -> CorpusResult<bool>;

    /// Delete a document. Only used to undo a creation whose commit failed.
    fn remove(&self, id: &DocumentId) -> CorpusResult<()>;
}

/// In-memory corpus (tests and embedded use)
#[derive(Default)]
pub struct InMemoryCorpus {
    documents: RwLock<BTreeMap<DocumentId, Document>>,
}

impl InMemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(docs: impl IntoIterator<Item = Document>) -> Self {
        let corpus = Self::new();
        if let Ok(mut map) = corpus.documents.write() {
            for doc in docs {
                map.insert(doc.id.clone(), doc);
            }
        }
        corpus
    }

    pub fn len(&self) -> usize {
        self.documents.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> CorpusError {
    CorpusError::Unavailable("in-memory corpus lock poisoned".to_string())
}

impl DocumentCorpus for InMemoryCorpus {
    fn list_documents(&self) -> CorpusResult<Vec<DocumentSummary>> {
        Ok(self
            .documents
            .read()
            .map_err(|_| poisoned())?
            .values()
            .map(|doc| DocumentSummary::of(doc, None))
            .collect())
    }

    fn read(&self, id: &DocumentId) -> CorpusResult<Document> {
        self.documents
            .read()
            .map_err(|_| poisoned())?
            .get(id)
            .cloned()
            .ok_or_else(|| CorpusError::NotFound(id.clone()))
    }

    fn write(&self, doc: &Document) -> CorpusResult<()> {
        self.documents
            .write()
            .map_err(|_| poisoned())?
            .insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    fn exists(&self, id: &DocumentId) -> CorpusResult<bool> {
        Ok(self.documents.read().map_err(|_| poisoned())?.contains_key(id))
    }

    fn remove(&self, id: &DocumentId) -> CorpusResult<()> {
        self.documents
            .write()
            .map_err(|_| poisoned())?
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CorpusError::NotFound(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{CandidateMetadata, Section};
    use chrono::Utc;

    fn doc(id: &str) -> Document {
        Document::new(
            DocumentId::from_string(id),
            vec![Section::new("Results", "Something.")],
            DocumentMetadata::from_candidate(&CandidateMetadata::new(0.5), Utc::now()),
        )
    }

    #[test]
    fn in_memory_read_write() {
        let corpus = InMemoryCorpus::new();
        let id = DocumentId::from_string("a");
        assert!(!corpus.exists(&id).unwrap());
        assert!(matches!(corpus.read(&id), Err(CorpusError::NotFound(_))));

        corpus.write(&doc("a")).unwrap();
        assert!(corpus.exists(&id).unwrap());
        assert_eq!(corpus.read(&id).unwrap().sections.len(), 1);

        corpus.remove(&id).unwrap();
        assert!(corpus.is_empty());
    }

    #[test]
    fn listing_is_ordered_by_id() {
        let corpus = InMemoryCorpus::with_documents([doc("b"), doc("a"), doc("c")]);
        let ids: Vec<String> = corpus
            .list_documents()
            .unwrap()
            .into_iter()
            .map(|s| s.id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
