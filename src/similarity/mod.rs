//! Hybrid similarity scoring (vector + lexical)
//!
//! Two paths produce scores on the same [0, 1] scale:
//!
//! - **Embedding path**: embed a bounded prefix of the candidate, take the
//!   index's nearest neighbours, blend vector similarity with topic and
//!   question overlap (0.6 / 0.3 / 0.1 by default).
//! - **Lexical fallback**: scan the whole corpus and blend topic overlap,
//!   word-frequency cosine and question overlap (0.4 / 0.4 / 0.2).
//!
//! The fallback is taken whenever the embedding path cannot run: no
//! embedder configured, embedder failure, index unavailable, or an empty
//! index over a non-empty corpus. It costs one document read per corpus
//! entry per call, so it scales linearly with corpus size.

use crate::config::ConfigurationError;
use crate::corpus::{CorpusError, DocumentCorpus};
use crate::document::{CandidateMetadata, Document, DocumentId};
use crate::index::{cosine_similarity, Embedder, EmbeddingError, EmbeddingIndex, IndexError};
use crate::text::{jaccard, truncate_chars, word_frequency_cosine};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

const WEIGHT_TOLERANCE: f32 = 1e-3;

/// Why the embedding path could not produce a score
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("no embedder or index configured")]
    NotConfigured,

    #[error("embedding index is empty")]
    EmptyIndex,

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("document {0} has no indexed vector")]
    NotIndexed(DocumentId),
}

/// Which path produced a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringPath {
    Embedding,
    Lexical,
}

/// Per-signal scores behind a combined score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub path: ScoringPath,
    /// Cosine similarity of embeddings, clamped to [0, 1] (embedding path)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<f32>,
    /// Word-frequency cosine (lexical path)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_cosine: Option<f32>,
    pub topic_overlap: f32,
    pub question_overlap: f32,
    pub combined: f32,
}

/// A scored corpus document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMatch {
    pub doc_id: DocumentId,
    pub score: f32,
    /// Revision of the document the score was computed against
    pub revision: u64,
    pub breakdown: ScoreBreakdown,
}

/// Weights of the embedding path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingWeights {
    pub vector: f32,
    pub topics: f32,
    pub questions: f32,
}

impl Default for EmbeddingWeights {
    fn default() -> Self {
        Self {
            vector: 0.6,
            topics: 0.3,
            questions: 0.1,
        }
    }
}

/// Weights of the lexical fallback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LexicalWeights {
    pub topics: f32,
    pub words: f32,
    pub questions: f32,
}

impl Default for LexicalWeights {
    fn default() -> Self {
        Self {
            topics: 0.4,
            words: 0.4,
            questions: 0.2,
        }
    }
}

/// Scoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Characters of candidate text sent to the embedder
    pub prefix_chars: usize,
    pub embedding: EmbeddingWeights,
    pub lexical: LexicalWeights,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            prefix_chars: 1000,
            embedding: EmbeddingWeights::default(),
            lexical: LexicalWeights::default(),
        }
    }
}

fn check_weights(name: &str, weights: &[f32]) -> Result<(), ConfigurationError> {
    if weights.iter().any(|w| !(0.0..=1.0).contains(w)) {
        return Err(ConfigurationError::Invalid(format!(
            "{} weights must each lie in [0, 1]",
            name
        )));
    }
    let sum: f32 = weights.iter().sum();
    if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(ConfigurationError::Invalid(format!(
            "{} weights must sum to 1.0 (got {:.3})",
            name, sum
        )));
    }
    Ok(())
}

impl ScoringConfig {
    /// Both weight sets must sum to 1 so every path scores on [0, 1].
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.prefix_chars == 0 {
            return Err(ConfigurationError::Invalid(
                "scoring.prefix_chars must be positive".to_string(),
            ));
        }
        let e = &self.embedding;
        check_weights("scoring.embedding", &[e.vector, e.topics, e.questions])?;
        let l = &self.lexical;
        check_weights("scoring.lexical", &[l.topics, l.words, l.questions])?;
        Ok(())
    }
}

/// Anything that can rank corpus documents against a candidate.
///
/// `SimilarityScorer` is the production implementation; the gate only
/// depends on this trait.
pub trait MatchScorer: Send + Sync {
    /// Up to `limit` matches, best first (ties by document id).
    fn rank(
        &self,
        text: &str,
        metadata: &CandidateMetadata,
        limit: usize,
    ) -> Result<Vec<ScoredMatch>, CorpusError>;
}

/// Combines vector similarity with lexical signals
pub struct SimilarityScorer {
    corpus: Arc<dyn DocumentCorpus>,
    embedder: Option<Arc<dyn Embedder>>,
    index: Option<Arc<dyn EmbeddingIndex>>,
    config: ScoringConfig,
}

impl SimilarityScorer {
    /// Create a lexical-only scorer over `corpus`.
    pub fn new(
        corpus: Arc<dyn DocumentCorpus>,
        config: ScoringConfig,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            corpus,
            embedder: None,
            index: None,
            config,
        })
    }

    /// Enable the embedding path.
    pub fn with_embeddings(
        mut self,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn EmbeddingIndex>,
    ) -> Self {
        self.embedder = Some(embedder);
        self.index = Some(index);
        self
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score one candidate against one existing document.
    pub fn score(&self, text: &str, metadata: &CandidateMetadata, existing: &Document) -> f32 {
        self.score_document(text, metadata, existing).score
    }

    /// Like [`score`](Self::score) but with the per-signal breakdown.
    pub fn score_document(
        &self,
        text: &str,
        metadata: &CandidateMetadata,
        existing: &Document,
    ) -> ScoredMatch {
        let topic_overlap = jaccard(&metadata.topics, &existing.metadata.topics);
        let question_overlap = jaccard(&metadata.questions, &existing.metadata.questions);

        let breakdown = match self.vector_similarity_to(text, &existing.id) {
            Ok(vector) => self.embedding_breakdown(vector, topic_overlap, question_overlap),
            Err(e) => {
                warn!(doc_id = %existing.id, reason = %e, "embedding score unavailable, using lexical fallback");
                let words = word_frequency_cosine(text, &existing.body_text());
                self.lexical_breakdown(words, topic_overlap, question_overlap)
            }
        };

        ScoredMatch {
            doc_id: existing.id.clone(),
            score: breakdown.combined,
            revision: existing.revision,
            breakdown,
        }
    }

    fn embedding_parts(
        &self,
    ) -> Result<(&Arc<dyn Embedder>, &Arc<dyn EmbeddingIndex>), ScoringError> {
        match (&self.embedder, &self.index) {
            (Some(embedder), Some(index)) => Ok((embedder, index)),
            _ => Err(ScoringError::NotConfigured),
        }
    }

    fn embed_candidate(&self, embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>, ScoringError> {
        let prefix = truncate_chars(text, self.config.prefix_chars);
        Ok(embedder.embed(prefix)?)
    }

    fn vector_similarity_to(&self, text: &str, doc_id: &DocumentId) -> Result<f32, ScoringError> {
        let (embedder, index) = self.embedding_parts()?;
        let record = index
            .get(doc_id)?
            .ok_or_else(|| ScoringError::NotIndexed(doc_id.clone()))?;
        let query = self.embed_candidate(embedder.as_ref(), text)?;
        Ok(cosine_similarity(&query, &record.vector))
    }

    fn embedding_breakdown(&self, vector: f32, topics: f32, questions: f32) -> ScoreBreakdown {
        let vector = vector.clamp(0.0, 1.0);
        let w = &self.config.embedding;
        ScoreBreakdown {
            path: ScoringPath::Embedding,
            vector: Some(vector),
            word_cosine: None,
            topic_overlap: topics,
            question_overlap: questions,
            combined: (w.vector * vector + w.topics * topics + w.questions * questions)
                .clamp(0.0, 1.0),
        }
    }

    fn lexical_breakdown(&self, words: f32, topics: f32, questions: f32) -> ScoreBreakdown {
        let w = &self.config.lexical;
        ScoreBreakdown {
            path: ScoringPath::Lexical,
            vector: None,
            word_cosine: Some(words),
            topic_overlap: topics,
            question_overlap: questions,
            combined: (w.topics * topics + w.words * words + w.questions * questions)
                .clamp(0.0, 1.0),
        }
    }

    fn rank_by_embedding(
        &self,
        text: &str,
        metadata: &CandidateMetadata,
        limit: usize,
    ) -> Result<Vec<ScoredMatch>, ScoringError> {
        let (embedder, index) = self.embedding_parts()?;
        if index.is_empty()? {
            return Err(ScoringError::EmptyIndex);
        }
        let query = self.embed_candidate(embedder.as_ref(), text)?;
        let hits = index.search(&query, limit)?;

        let matches = hits
            .into_iter()
            .map(|hit| {
                let topics = jaccard(&metadata.topics, &hit.metadata.topics);
                let questions = jaccard(&metadata.questions, &hit.metadata.questions);
                let breakdown = self.embedding_breakdown(hit.similarity, topics, questions);
                ScoredMatch {
                    doc_id: hit.doc_id,
                    score: breakdown.combined,
                    revision: hit.metadata.revision,
                    breakdown,
                }
            })
            .collect();

        Ok(sort_matches(matches, limit))
    }

    fn rank_lexically(
        &self,
        text: &str,
        metadata: &CandidateMetadata,
        limit: usize,
    ) -> Result<Vec<ScoredMatch>, CorpusError> {
        let summaries = self.corpus.list_documents()?;
        let mut matches = Vec::with_capacity(summaries.len());

        for summary in summaries {
            let doc = match self.corpus.read(&summary.id) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(doc_id = %summary.id, error = %e, "skipping unreadable document in lexical scan");
                    continue;
                }
            };
            let topics = jaccard(&metadata.topics, &doc.metadata.topics);
            let questions = jaccard(&metadata.questions, &doc.metadata.questions);
            let words = word_frequency_cosine(text, &doc.body_text());
            let breakdown = self.lexical_breakdown(words, topics, questions);
            matches.push(ScoredMatch {
                doc_id: doc.id,
                score: breakdown.combined,
                revision: doc.revision,
                breakdown,
            });
        }

        Ok(sort_matches(matches, limit))
    }
}

impl MatchScorer for SimilarityScorer {
    fn rank(
        &self,
        text: &str,
        metadata: &CandidateMetadata,
        limit: usize,
    ) -> Result<Vec<ScoredMatch>, CorpusError> {
        match self.rank_by_embedding(text, metadata, limit) {
            Ok(matches) => {
                debug!(candidates = matches.len(), "ranked via embedding index");
                Ok(matches)
            }
            Err(reason) => {
                warn!(%reason, "embedding path unavailable, using lexical fallback");
                self.rank_lexically(text, metadata, limit)
            }
        }
    }
}

/// Best first; equal scores ordered by document id.
pub fn sort_matches(mut matches: Vec<ScoredMatch>, limit: usize) -> Vec<ScoredMatch> {
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });
    matches.truncate(limit);
    matches
}
