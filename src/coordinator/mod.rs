//! ConsolidationCoordinator: decide, merge and commit as one operation
//!
//! The coordinator sequences the gate, the merger, the corpus and the
//! index. Writes to a document happen only under that document's lock,
//! and a merge re-checks the document's revision under the lock before
//! committing, so a decision made against an older revision is never
//! applied to a newer one.
//!
//! Commit order is embed, write, index. An index failure restores the
//! previous document (or removes a just-created one), so a failed
//! operation leaves neither a half-written document nor a stale index
//! entry pointing at content that does not exist.

mod cancel;
mod locks;

pub use cancel::CancellationToken;
pub use locks::DocumentLocks;

use crate::audit::{AuditEntry, AuditEvent, AuditLog};
use crate::config::{ConfigurationError, ConsolidationConfig};
use crate::corpus::{CorpusError, DocumentCorpus};
use crate::document::{
    CandidateMetadata, Document, DocumentId, DocumentMetadata, DocumentStatus,
};
use crate::gate::{ConsolidationAction, ConsolidationDecision, ConsolidationGate};
use crate::index::{Embedder, EmbeddingError, EmbeddingIndex, IndexError, IndexedMetadata};
use crate::merge::{DocumentMerger, MergeReport, MergeStrategy};
use crate::similarity::SimilarityScorer;
use crate::text::truncate_chars;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors that abort a consolidation. Nothing is written when one is returned.
#[derive(Debug, Error)]
pub enum ConsolidationError {
    #[error("corpus error: {0}")]
    Corpus(#[from] CorpusError),

    #[error("document {id} changed since the decision (expected revision {expected}, found {found})")]
    ConcurrentModification {
        id: DocumentId,
        expected: u64,
        found: u64,
    },

    #[error("index update failed: {0}")]
    Index(#[from] IndexError),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("no embedder and index configured")]
    IndexingDisabled,

    #[error("cancelled before commit")]
    Cancelled,

    #[error("consolidation task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type ConsolidationResult<T> = Result<T, ConsolidationError>;

/// Result of a merge
#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub document: Document,
    pub report: MergeReport,
}

/// Result of a full consolidation
#[derive(Debug, Clone, Serialize)]
pub struct ConsolidationOutcome {
    pub decision: ConsolidationDecision,
    pub document: Document,
    /// Present for MERGE and UPDATE
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<MergeReport>,
}

/// Text embedded for a document: its rendered body, truncated like candidates.
pub fn embedding_text(doc: &Document, prefix_chars: usize) -> String {
    truncate_chars(&doc.body_text(), prefix_chars).to_string()
}

/// Everything a blocking commit needs, cheap to clone into a task
#[derive(Clone)]
struct CommitContext {
    corpus: Arc<dyn DocumentCorpus>,
    embedder: Option<Arc<dyn Embedder>>,
    index: Option<Arc<dyn EmbeddingIndex>>,
    audit: Option<Arc<dyn AuditLog>>,
    prefix_chars: usize,
}

impl CommitContext {
    fn record(&self, event: AuditEvent) {
        record(&self.audit, event);
    }

    fn embedding_for(&self, doc: &Document) -> ConsolidationResult<Option<Vec<f32>>> {
        match (&self.embedder, &self.index) {
            (Some(embedder), Some(_)) => {
                Ok(Some(embedder.embed(&embedding_text(doc, self.prefix_chars))?))
            }
            _ => Ok(None),
        }
    }

    /// Persist `document` and index it. `previous` is what to restore if
    /// indexing fails; `None` for a new document.
    fn commit(&self, previous: Option<&Document>, document: &Document) -> ConsolidationResult<()> {
        // Embed first: a model failure must not leave a written document behind
        let vector = self.embedding_for(document)?;

        self.corpus.write(document)?;

        if let (Some(index), Some(vector)) = (&self.index, vector) {
            if let Err(e) = index.upsert(&document.id, vector, IndexedMetadata::from_document(document)) {
                self.roll_back(previous, document, &e);
                return Err(e.into());
            }
        }

        info!(doc_id = %document.id, revision = document.revision, "committed");
        Ok(())
    }

    fn roll_back(&self, previous: Option<&Document>, document: &Document, cause: &IndexError) {
        let restored = match previous {
            Some(prev) => self.corpus.write(prev),
            None => self.corpus.remove(&document.id),
        };
        match restored {
            Ok(()) => warn!(doc_id = %document.id, error = %cause, "index update failed, document rolled back"),
            Err(e) => error!(
                doc_id = %document.id,
                error = %cause,
                rollback_error = %e,
                "index update failed and rollback failed"
            ),
        }
        self.record(AuditEvent::Rollback {
            doc_id: document.id.clone(),
            reason: cause.to_string(),
        });
    }

    fn reindex(&self, id: &DocumentId) -> ConsolidationResult<()> {
        let (Some(embedder), Some(index)) = (&self.embedder, &self.index) else {
            return Err(ConsolidationError::IndexingDisabled);
        };
        let doc = self.corpus.read(id)?;
        let vector = embedder.embed(&embedding_text(&doc, self.prefix_chars))?;
        index.upsert(&doc.id, vector, IndexedMetadata::from_document(&doc))?;
        debug!(doc_id = %doc.id, revision = doc.revision, "reindexed");
        Ok(())
    }
}

/// Reject an embedder whose vectors the index cannot store. An embedder
/// that is down right now is let through; scoring falls back until it returns.
fn check_dimensions(
    embedder: &dyn Embedder,
    index: &dyn EmbeddingIndex,
) -> Result<(), ConfigurationError> {
    match embedder.embed("dimension check") {
        Ok(vector) if vector.len() != index.dimensions() => Err(ConfigurationError::Invalid(format!(
            "embedder produces {} dimensions, index expects {}",
            vector.len(),
            index.dimensions()
        ))),
        Ok(_) => Ok(()),
        Err(e) => {
            warn!(error = %e, "embedder unavailable, dimensions not verified");
            Ok(())
        }
    }
}

fn record(audit: &Option<Arc<dyn AuditLog>>, event: AuditEvent) {
    if let Some(log) = audit {
        if let Err(e) = log.record(&AuditEntry::now(event)) {
            warn!(error = %e, "failed to write audit entry");
        }
    }
}

/// Entry point of the engine
pub struct ConsolidationCoordinator {
    corpus: Arc<dyn DocumentCorpus>,
    gate: Arc<ConsolidationGate>,
    merger: Arc<DocumentMerger>,
    embedder: Option<Arc<dyn Embedder>>,
    index: Option<Arc<dyn EmbeddingIndex>>,
    audit: Option<Arc<dyn AuditLog>>,
    locks: DocumentLocks,
    default_strategy: MergeStrategy,
    prefix_chars: usize,
}

impl ConsolidationCoordinator {
    /// Assemble from parts. Indexing is off until [`with_embeddings`](Self::with_embeddings).
    pub fn new(
        corpus: Arc<dyn DocumentCorpus>,
        gate: ConsolidationGate,
        merger: DocumentMerger,
    ) -> Self {
        let default_strategy = merger.config().default_strategy;
        Self {
            corpus,
            gate: Arc::new(gate),
            merger: Arc::new(merger),
            embedder: None,
            index: None,
            audit: None,
            locks: DocumentLocks::new(),
            default_strategy,
            prefix_chars: 1000,
        }
    }

    /// Build the whole stack from configuration. With `embedding` set, the
    /// scorer uses the embedding path and commits keep the index current.
    pub fn from_config(
        config: &ConsolidationConfig,
        corpus: Arc<dyn DocumentCorpus>,
        embedding: Option<(Arc<dyn Embedder>, Arc<dyn EmbeddingIndex>)>,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        if let Some((embedder, index)) = &embedding {
            check_dimensions(embedder.as_ref(), index.as_ref())?;
        }

        let mut scorer = SimilarityScorer::new(Arc::clone(&corpus), config.scoring.clone())?;
        if let Some((embedder, index)) = &embedding {
            scorer = scorer.with_embeddings(Arc::clone(embedder), Arc::clone(index));
        }
        let gate = ConsolidationGate::new(Arc::new(scorer), config.gate.clone())?;
        let merger = DocumentMerger::new(config.merge.clone())?;

        let mut coordinator =
            Self::new(corpus, gate, merger).with_prefix_chars(config.scoring.prefix_chars);
        if let Some((embedder, index)) = embedding {
            coordinator = coordinator.with_embeddings(embedder, index);
        }
        Ok(coordinator)
    }

    /// Keep the index current on every commit.
    pub fn with_embeddings(
        mut self,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn EmbeddingIndex>,
    ) -> Self {
        self.embedder = Some(embedder);
        self.index = Some(index);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_default_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    pub fn with_prefix_chars(mut self, prefix_chars: usize) -> Self {
        self.prefix_chars = prefix_chars.max(1);
        self
    }

    pub fn corpus(&self) -> &Arc<dyn DocumentCorpus> {
        &self.corpus
    }

    pub fn gate(&self) -> &ConsolidationGate {
        &self.gate
    }

    fn commit_context(&self) -> CommitContext {
        CommitContext {
            corpus: Arc::clone(&self.corpus),
            embedder: self.embedder.clone(),
            index: self.index.clone(),
            audit: self.audit.clone(),
            prefix_chars: self.prefix_chars,
        }
    }

    /// Classify a candidate. Reads only; the decision goes to the audit log.
    pub fn decide(
        &self,
        text: &str,
        metadata: &CandidateMetadata,
    ) -> ConsolidationResult<ConsolidationDecision> {
        let decision = self.gate.decide(text, metadata)?;
        record(
            &self.audit,
            AuditEvent::Decision {
                decision: decision.clone(),
            },
        );
        Ok(decision)
    }

    async fn decide_blocking(
        &self,
        text: &str,
        metadata: &CandidateMetadata,
    ) -> ConsolidationResult<ConsolidationDecision> {
        let gate = Arc::clone(&self.gate);
        let (text, metadata) = (text.to_string(), metadata.clone());
        let decision = tokio::task::spawn_blocking(move || gate.decide(&text, &metadata)).await??;
        record(
            &self.audit,
            AuditEvent::Decision {
                decision: decision.clone(),
            },
        );
        Ok(decision)
    }

    /// Persist a new document built from the candidate and index it.
    pub async fn create(
        &self,
        text: &str,
        metadata: &CandidateMetadata,
    ) -> ConsolidationResult<Document> {
        self.create_with_cancel(text, metadata, &CancellationToken::new())
            .await
    }

    async fn create_with_cancel(
        &self,
        text: &str,
        metadata: &CandidateMetadata,
        cancel: &CancellationToken,
    ) -> ConsolidationResult<Document> {
        let document = Document::from_text(
            DocumentId::new(),
            text,
            DocumentMetadata::from_candidate(metadata, Utc::now()),
        );

        let guard = self.locks.acquire(&document.id).await;
        cancel.check()?;

        let ctx = self.commit_context();
        let document = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            ctx.commit(None, &document)?;
            ctx.record(AuditEvent::Create {
                doc_id: document.id.clone(),
                revision: document.revision,
            });
            Ok::<_, ConsolidationError>(document)
        })
        .await??;

        self.locks.prune_idle();
        info!(doc_id = %document.id, sections = document.sections.len(), "document created");
        Ok(document)
    }

    /// Merge a candidate into an existing document.
    pub async fn merge(
        &self,
        existing_id: &DocumentId,
        text: &str,
        metadata: &CandidateMetadata,
        strategy: MergeStrategy,
    ) -> ConsolidationResult<MergeOutcome> {
        self.merge_locked(existing_id, None, text, metadata, strategy, &CancellationToken::new())
            .await
    }

    /// Like [`merge`](Self::merge), but only if the document is still at
    /// `expected_revision`.
    pub async fn merge_if_unchanged(
        &self,
        existing_id: &DocumentId,
        expected_revision: u64,
        text: &str,
        metadata: &CandidateMetadata,
        strategy: MergeStrategy,
    ) -> ConsolidationResult<MergeOutcome> {
        self.merge_locked(
            existing_id,
            Some(expected_revision),
            text,
            metadata,
            strategy,
            &CancellationToken::new(),
        )
        .await
    }

    async fn merge_locked(
        &self,
        existing_id: &DocumentId,
        expected_revision: Option<u64>,
        text: &str,
        metadata: &CandidateMetadata,
        strategy: MergeStrategy,
        cancel: &CancellationToken,
    ) -> ConsolidationResult<MergeOutcome> {
        let guard = self.locks.acquire(existing_id).await;
        cancel.check()?;

        let ctx = self.commit_context();
        let merger = Arc::clone(&self.merger);
        let id = existing_id.clone();
        let (text, metadata, cancel) = (text.to_string(), metadata.clone(), cancel.clone());

        let outcome = tokio::task::spawn_blocking(move || -> ConsolidationResult<MergeOutcome> {
            let _guard = guard;
            let existing = ctx.corpus.read(&id)?;
            if let Some(expected) = expected_revision {
                if existing.revision != expected {
                    return Err(ConsolidationError::ConcurrentModification {
                        id,
                        expected,
                        found: existing.revision,
                    });
                }
            }

            let (document, report) = merger.merge(&existing, &text, &metadata, strategy);
            if !report.noop {
                // Last point at which cancelling has no effect on stored state
                cancel.check()?;
                ctx.commit(Some(&existing), &document)?;
            }
            ctx.record(AuditEvent::Merge {
                doc_id: document.id.clone(),
                revision: document.revision,
                report: report.clone(),
            });
            Ok(MergeOutcome { document, report })
        })
        .await??;

        self.locks.prune_idle();
        Ok(outcome)
    }

    /// Decide, then create or merge. `strategy` defaults to the configured one.
    pub async fn consolidate(
        &self,
        text: &str,
        metadata: &CandidateMetadata,
        strategy: Option<MergeStrategy>,
    ) -> ConsolidationResult<ConsolidationOutcome> {
        self.consolidate_with_cancel(text, metadata, strategy, &CancellationToken::new())
            .await
    }

    /// [`consolidate`](Self::consolidate) with a cancellation token,
    /// honored until the commit starts.
    pub async fn consolidate_with_cancel(
        &self,
        text: &str,
        metadata: &CandidateMetadata,
        strategy: Option<MergeStrategy>,
        cancel: &CancellationToken,
    ) -> ConsolidationResult<ConsolidationOutcome> {
        cancel.check()?;
        let decision = self.decide_blocking(text, metadata).await?;
        cancel.check()?;

        match (decision.action, decision.matched.clone()) {
            (ConsolidationAction::Create, _) | (_, None) => {
                let document = self.create_with_cancel(text, metadata, cancel).await?;
                Ok(ConsolidationOutcome {
                    decision,
                    document,
                    report: None,
                })
            }
            (_, Some(id)) => {
                let strategy = strategy.unwrap_or(self.default_strategy);
                let outcome = self
                    .merge_locked(&id, decision.matched_revision, text, metadata, strategy, cancel)
                    .await?;
                Ok(ConsolidationOutcome {
                    decision,
                    document: outcome.document,
                    report: Some(outcome.report),
                })
            }
        }
    }

    /// Move a document to `Archived`. Merges never do this; an archived
    /// document stays in the corpus and can still be matched.
    pub async fn archive(&self, id: &DocumentId) -> ConsolidationResult<Document> {
        let guard = self.locks.acquire(id).await;
        let ctx = self.commit_context();
        let id = id.clone();

        let document = tokio::task::spawn_blocking(move || -> ConsolidationResult<Document> {
            let _guard = guard;
            let existing = ctx.corpus.read(&id)?;
            if existing.metadata.status == DocumentStatus::Archived {
                return Ok(existing);
            }

            let mut archived = existing.clone();
            archived.metadata.status = DocumentStatus::Archived;
            archived.metadata.updated_at = Utc::now();
            archived.revision = existing.revision + 1;
            ctx.commit(Some(&existing), &archived)?;
            ctx.record(AuditEvent::Archive {
                doc_id: archived.id.clone(),
                revision: archived.revision,
            });
            Ok(archived)
        })
        .await??;

        self.locks.prune_idle();
        info!(doc_id = %document.id, revision = document.revision, "document archived");
        Ok(document)
    }

    /// Rebuild one document's index record from the corpus.
    pub async fn reindex(&self, id: &DocumentId) -> ConsolidationResult<()> {
        let guard = self.locks.acquire(id).await;
        let ctx = self.commit_context();
        let id = id.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            ctx.reindex(&id)
        })
        .await??;
        self.locks.prune_idle();
        Ok(())
    }

    /// Rebuild the index for every document. Returns how many were indexed.
    pub async fn reindex_all(&self) -> ConsolidationResult<usize> {
        if self.embedder.is_none() || self.index.is_none() {
            return Err(ConsolidationError::IndexingDisabled);
        }
        let corpus = Arc::clone(&self.corpus);
        let summaries = tokio::task::spawn_blocking(move || corpus.list_documents()).await??;

        for summary in &summaries {
            self.reindex(&summary.id).await?;
        }
        info!(documents = summaries.len(), "index rebuilt");
        Ok(summaries.len())
    }
}
