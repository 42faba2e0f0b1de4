//! ConsolidationGate: the CREATE / MERGE / UPDATE policy
//!
//! The gate ranks the corpus against a candidate and maps the best score
//! onto three bands:
//!
//! ```text
//! 0 ........ merge_threshold ........ update_threshold ........ 1
//!    CREATE             MERGE                    UPDATE
//! ```
//!
//! Boundaries belong to the stronger action. Deciding has no side effects.

use crate::config::ConfigurationError;
use crate::corpus::CorpusError;
use crate::document::{CandidateMetadata, DocumentId};
use crate::similarity::{MatchScorer, ScoreBreakdown, ScoredMatch, ScoringPath};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// What to do with a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsolidationAction {
    /// New knowledge: persist as a new document
    Create,
    /// Elaboration: merge into the matched document
    Merge,
    /// Near-duplicate: refresh the matched document
    Update,
}

impl ConsolidationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsolidationAction::Create => "CREATE",
            ConsolidationAction::Merge => "MERGE",
            ConsolidationAction::Update => "UPDATE",
        }
    }
}

impl fmt::Display for ConsolidationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two cut points of the policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub merge: f32,
    pub update: f32,
}

impl Thresholds {
    pub fn new(merge: f32, update: f32) -> Result<Self, ConfigurationError> {
        for (name, value) in [("merge_threshold", merge), ("update_threshold", update)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigurationError::Invalid(format!(
                    "{} must lie in [0, 1] (got {})",
                    name, value
                )));
            }
        }
        if merge > update {
            return Err(ConfigurationError::Thresholds { merge, update });
        }
        Ok(Self { merge, update })
    }
}

/// Map a score onto an action. Boundaries are inclusive on the stronger side.
pub fn classify(score: f32, thresholds: &Thresholds) -> ConsolidationAction {
    if score >= thresholds.update {
        ConsolidationAction::Update
    } else if score >= thresholds.merge {
        ConsolidationAction::Merge
    } else {
        ConsolidationAction::Create
    }
}

/// Gate configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub merge_threshold: f32,
    pub update_threshold: f32,
    /// How many candidates the scorer is asked for
    pub top_k: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            merge_threshold: 0.70,
            update_threshold: 0.85,
            top_k: 10,
        }
    }
}

impl GateConfig {
    pub fn thresholds(&self) -> Result<Thresholds, ConfigurationError> {
        Thresholds::new(self.merge_threshold, self.update_threshold)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.thresholds()?;
        if self.top_k == 0 {
            return Err(ConfigurationError::Invalid(
                "gate.top_k must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of the gate. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationDecision {
    pub action: ConsolidationAction,
    /// Best-matching document; set only for MERGE and UPDATE
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched: Option<DocumentId>,
    /// Revision of `matched` the score was computed against
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_revision: Option<u64>,
    /// Best score in [0, 1] (0 for an empty corpus)
    pub score: f32,
    /// Signals behind the best score; absent when nothing was scored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<ScoreBreakdown>,
    pub rationale: String,
}

impl ConsolidationDecision {
    pub fn is_create(&self) -> bool {
        self.action == ConsolidationAction::Create
    }
}

fn path_name(path: ScoringPath) -> &'static str {
    match path {
        ScoringPath::Embedding => "embedding",
        ScoringPath::Lexical => "lexical",
    }
}

fn rationale(action: ConsolidationAction, best: &ScoredMatch, t: &Thresholds) -> String {
    let head = format!(
        "best match {} scored {:.2} via {} path (merge >= {:.2}, update >= {:.2})",
        best.doc_id,
        best.score,
        path_name(best.breakdown.path),
        t.merge,
        t.update
    );
    match action {
        ConsolidationAction::Update => format!(
            "{}; at or above update threshold, refreshing {}",
            head, best.doc_id
        ),
        ConsolidationAction::Merge => format!(
            "{}; between thresholds, merging into {}",
            head, best.doc_id
        ),
        ConsolidationAction::Create => {
            format!("{}; below merge threshold, creating a new document", head)
        }
    }
}

/// Decides what to do with candidate content
pub struct ConsolidationGate {
    scorer: Arc<dyn MatchScorer>,
    thresholds: Thresholds,
    top_k: usize,
}

impl ConsolidationGate {
    /// Fails when the thresholds are out of range or inverted.
    pub fn new(scorer: Arc<dyn MatchScorer>, config: GateConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            scorer,
            thresholds: config.thresholds()?,
            top_k: config.top_k,
        })
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Classify a candidate against the current corpus.
    pub fn decide(
        &self,
        text: &str,
        metadata: &CandidateMetadata,
    ) -> Result<ConsolidationDecision, CorpusError> {
        let ranked = self.scorer.rank(text, metadata, self.top_k)?;

        let decision = match ranked.into_iter().next() {
            None => ConsolidationDecision {
                action: ConsolidationAction::Create,
                matched: None,
                matched_revision: None,
                score: 0.0,
                breakdown: None,
                rationale: format!(
                    "corpus is empty; score 0.00 is below merge threshold {:.2}, creating a new document",
                    self.thresholds.merge
                ),
            },
            Some(best) => {
                let action = classify(best.score, &self.thresholds);
                let rationale = rationale(action, &best, &self.thresholds);
                let matched = action != ConsolidationAction::Create;
                ConsolidationDecision {
                    action,
                    matched: matched.then(|| best.doc_id.clone()),
                    matched_revision: matched.then_some(best.revision),
                    score: best.score,
                    breakdown: Some(best.breakdown),
                    rationale,
                }
            }
        };

        info!(
            action = %decision.action,
            score = decision.score,
            matched = ?decision.matched,
            "consolidation decision"
        );
        Ok(decision)
    }
}
