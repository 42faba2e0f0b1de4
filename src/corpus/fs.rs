//! Directory-of-markdown corpus
//!
//! One `<id>.md` file per document, frontmatter carrying metadata and
//! revision. Writes go to a temp file in the same directory and are
//! renamed into place, so a crash mid-write leaves the previous version.

use super::{CorpusError, CorpusResult, DocumentCorpus, DocumentSummary};
use crate::document::{Document, DocumentId};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

const EXTENSION: &str = "md";

/// File-system backed corpus
pub struct FsCorpus {
    root: PathBuf,
}

impl FsCorpus {
    /// Open (creating if needed) a corpus rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> CorpusResult<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject ids that could escape the corpus directory.
    fn validate_id(id: &DocumentId) -> CorpusResult<()> {
        let s = id.as_str();
        let bad = s.is_empty()
            || s.starts_with('.')
            || s.contains(['/', '\\', '\0'])
            || s.contains("..");
        if bad {
            return Err(CorpusError::InvalidId(s.to_string()));
        }
        Ok(())
    }

    /// Path of the file backing `id`
    pub fn path_for(&self, id: &DocumentId) -> CorpusResult<PathBuf> {
        Self::validate_id(id)?;
        Ok(self.root.join(format!("{}.{}", id.as_str(), EXTENSION)))
    }

    fn load(path: &Path) -> CorpusResult<Document> {
        let content = std::fs::read_to_string(path)?;
        Ok(Document::from_markdown(&content)?)
    }
}

impl DocumentCorpus for FsCorpus {
    fn list_documents(&self) -> CorpusResult<Vec<DocumentSummary>> {
        let mut summaries = Vec::new();

        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(EXTENSION)
            {
                continue;
            }
            match Self::load(path) {
                Ok(doc) => summaries.push(DocumentSummary::of(&doc, Some(path.to_path_buf()))),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping undecodable corpus file");
                }
            }
        }

        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(summaries)
    }

    fn read(&self, id: &DocumentId) -> CorpusResult<Document> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Err(CorpusError::NotFound(id.clone()));
        }
        let doc = Self::load(&path)?;
        if &doc.id != id {
            return Err(CorpusError::IdMismatch {
                expected: id.clone(),
                found: doc.id,
            });
        }
        Ok(doc)
    }

    fn write(&self, doc: &Document) -> CorpusResult<()> {
        let path = self.path_for(&doc.id)?;
        let content = doc.to_markdown()?;

        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| CorpusError::Io(e.error))?;

        debug!(doc_id = %doc.id, revision = doc.revision, path = %path.display(), "document written");
        Ok(())
    }

    fn exists(&self, id: &DocumentId) -> CorpusResult<bool> {
        Ok(self.path_for(id)?.exists())
    }

    fn remove(&self, id: &DocumentId) -> CorpusResult<()> {
        let path = self.path_for(id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CorpusError::NotFound(id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{CandidateMetadata, DocumentMetadata, Section};
    use chrono::Utc;

    fn doc(id: &str, body: &str) -> Document {
        Document::new(
            DocumentId::from_string(id),
            vec![Section::new("Results", body)],
            DocumentMetadata::from_candidate(
                &CandidateMetadata::new(0.7).with_topics(["rust"]),
                Utc::now(),
            ),
        )
    }

    #[test]
    fn write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = FsCorpus::open(dir.path()).unwrap();
        let original = doc("borrow-checker", "Lifetimes are inferred.");

        corpus.write(&original).unwrap();
        let loaded = corpus.read(&original.id).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn overwrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = FsCorpus::open(dir.path()).unwrap();
        corpus.write(&doc("a", "first")).unwrap();
        corpus.write(&doc("a", "second")).unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        assert_eq!(
            corpus.read(&DocumentId::from("a")).unwrap().sections[0].body,
            "second"
        );
    }

    #[test]
    fn listing_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = FsCorpus::open(dir.path()).unwrap();
        corpus.write(&doc("b", "x")).unwrap();
        corpus.write(&doc("a", "y")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a document").unwrap();
        std::fs::write(dir.path().join("broken.md"), "## no frontmatter").unwrap();

        let listed = corpus.list_documents().unwrap();
        let ids: Vec<&str> = listed.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(listed[0].path.is_some());
    }

    #[test]
    fn remove_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = FsCorpus::open(dir.path()).unwrap();
        let d = doc("gone", "soon");
        corpus.write(&d).unwrap();
        corpus.remove(&d.id).unwrap();
        assert!(!corpus.exists(&d.id).unwrap());
        assert!(matches!(corpus.remove(&d.id), Err(CorpusError::NotFound(_))));
    }

    #[test]
    fn missing_document_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = FsCorpus::open(dir.path()).unwrap();
        let err = corpus.read(&DocumentId::from("ghost")).unwrap_err();
        assert!(matches!(err, CorpusError::NotFound(_)));
    }

    #[test]
    fn path_traversal_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = FsCorpus::open(dir.path()).unwrap();
        for bad in ["../escape", "a/b", "", ".hidden"] {
            let err = corpus.read(&DocumentId::from(bad)).unwrap_err();
            assert!(matches!(err, CorpusError::InvalidId(_)), "{bad} should be rejected");
        }
    }
}
