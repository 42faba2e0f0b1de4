//! Merge reports

use super::conflict::{Conflict, ConflictKind, Resolution};
use super::MergeStrategy;
use crate::document::DocumentStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How metadata changed in a merge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataDelta {
    pub topics_added: BTreeSet<String>,
    pub questions_added: BTreeSet<String>,
    pub confidence_before: f32,
    pub confidence_after: f32,
    pub status_before: DocumentStatus,
    pub status_after: DocumentStatus,
}

impl MetadataDelta {
    pub fn is_unchanged(&self) -> bool {
        self.topics_added.is_empty()
            && self.questions_added.is_empty()
            && self.confidence_after == self.confidence_before
            && self.status_after == self.status_before
    }
}

/// An incoming line that was not written because of a conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithheldLine {
    pub section: String,
    pub line: String,
}

/// Everything a merge did, returned to the caller and written to the audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    pub strategy: MergeStrategy,
    pub conflicts: Vec<Conflict>,
    pub sections_added: Vec<String>,
    pub sections_modified: Vec<String>,
    pub metadata_delta: MetadataDelta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub withheld: Vec<WithheldLine>,
    /// The candidate contributed nothing; the document was left as is
    #[serde(default)]
    pub noop: bool,
}

impl MergeReport {
    /// True if any conflict still needs a human decision.
    pub fn has_unresolved(&self) -> bool {
        self.conflicts
            .iter()
            .any(|c| c.resolution == Resolution::Unresolved)
    }

    pub fn conflicts_of(&self, kind: ConflictKind) -> impl Iterator<Item = &Conflict> {
        self.conflicts.iter().filter(move |c| c.kind == kind)
    }

    /// Sections touched in any way, added first
    pub fn touched_sections(&self) -> Vec<&str> {
        self.sections_added
            .iter()
            .chain(self.sections_modified.iter())
            .map(String::as_str)
            .collect()
    }

    /// One-line summary for logs and the CLI
    pub fn summary(&self) -> String {
        if self.noop {
            return format!("{} merge: no new content", self.strategy);
        }
        format!(
            "{} merge: {} section(s) added, {} modified, {} conflict(s){}",
            self.strategy,
            self.sections_added.len(),
            self.sections_modified.len(),
            self.conflicts.len(),
            if self.has_unresolved() { ", unresolved" } else { "" }
        )
    }
}
