//! Consolidator: Knowledge Consolidation Engine
//!
//! Decides whether incoming research content should become a new document,
//! be merged into an existing one, or refresh a near-duplicate, and performs
//! the merge without losing information.
//!
//! # Core Concepts
//!
//! - **Corpus**: markdown documents with YAML frontmatter (topics, questions,
//!   confidence, status)
//! - **Gate**: scores a candidate against the corpus and picks CREATE, MERGE
//!   or UPDATE from two thresholds
//! - **Merger**: integrates, appends or replaces content and reports
//!   metadata, structural and contradiction conflicts
//! - **Coordinator**: runs decide, merge and commit under per-document locks
//!   and keeps the embedding index in step with the corpus
//!
//! # Example
//!
//! ```
//! use consolidator::{CandidateMetadata, ConsolidationAction, ConsolidationConfig,
//!     ConsolidationCoordinator, InMemoryCorpus};
//! use std::sync::Arc;
//!
//! let corpus = Arc::new(InMemoryCorpus::new());
//! let coordinator =
//!     ConsolidationCoordinator::from_config(&ConsolidationConfig::default(), corpus, None)
//!         .unwrap();
//! let decision = coordinator
//!     .decide("## Summary\n\nCaches trade memory for latency.", &CandidateMetadata::new(0.6))
//!     .unwrap();
//! assert_eq!(decision.action, ConsolidationAction::Create);
//! ```

pub mod audit;
pub mod config;
pub mod coordinator;
pub mod corpus;
pub mod document;
pub mod gate;
pub mod index;
pub mod merge;
pub mod similarity;
mod text;

pub use audit::{AuditEntry, AuditEvent, AuditLog, JsonlAuditLog, MemoryAuditLog};
pub use config::{resolve_config_path, ConfigurationError, ConsolidationConfig, IndexConfig};
pub use coordinator::{
    CancellationToken, ConsolidationCoordinator, ConsolidationError, ConsolidationOutcome,
    ConsolidationResult, MergeOutcome,
};
pub use corpus::{CorpusError, DocumentCorpus, DocumentSummary, FsCorpus, InMemoryCorpus};
pub use document::{
    CandidateMetadata, Document, DocumentId, DocumentMetadata, DocumentStatus, Section,
};
pub use gate::{ConsolidationAction, ConsolidationDecision, ConsolidationGate, GateConfig};
pub use index::{
    Embedder, EmbeddingError, EmbeddingIndex, HashingEmbedder, InMemoryEmbeddingIndex,
    IndexError, SqliteEmbeddingIndex,
};
pub use merge::{
    Conflict, ConflictKind, DocumentMerger, MergeConfig, MergeReport, MergeStrategy, Resolution,
    ResolutionPolicy, Severity,
};
pub use similarity::{MatchScorer, ScoreBreakdown, ScoredMatch, ScoringConfig, SimilarityScorer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
