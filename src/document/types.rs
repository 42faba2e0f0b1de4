//! Document, section and metadata types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a document
///
/// Serializes as a plain string. Created documents get a UUID; callers may
/// also use semantic ids like "attention-mechanisms".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Create a new random DocumentId (UUID-based)
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a DocumentId from a string
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle status of a document.
///
/// Ordered: a merge may move a document forward along
/// `Draft -> Researched -> Validated -> Archived`, never backward.
/// Merges stop at `Validated`; archiving is a separate operation.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    #[default]
    Draft,
    Researched,
    Validated,
    Archived,
}

impl DocumentStatus {
    /// The status after observing `proposed`: whichever is further along.
    pub fn advance(self, proposed: DocumentStatus) -> DocumentStatus {
        self.max(proposed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Researched => "researched",
            DocumentStatus::Validated => "validated",
            DocumentStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "draft" => Ok(DocumentStatus::Draft),
            "researched" => Ok(DocumentStatus::Researched),
            "validated" => Ok(DocumentStatus::Validated),
            "archived" => Ok(DocumentStatus::Archived),
            other => Err(format!("unknown document status: {}", other)),
        }
    }
}

/// Normalize a topic or question for set comparison: trimmed, lowercase,
/// inner whitespace collapsed to single spaces.
pub fn normalize_term(term: &str) -> String {
    term.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

fn normalized_set<I, S>(terms: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    terms
        .into_iter()
        .map(|t| normalize_term(t.as_ref()))
        .filter(|t| !t.is_empty())
        .collect()
}

fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Metadata accompanying a freshly produced piece of research content.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CandidateMetadata {
    /// Topics the content covers (normalized)
    #[serde(default)]
    pub topics: BTreeSet<String>,
    /// Questions the content answers (normalized)
    #[serde(default)]
    pub questions: BTreeSet<String>,
    /// Confidence in [0, 1]
    #[serde(default)]
    pub confidence: f32,
    /// Status the producer believes the knowledge has reached
    #[serde(default)]
    pub status: DocumentStatus,
}

impl CandidateMetadata {
    pub fn new(confidence: f32) -> Self {
        Self {
            confidence: clamp_confidence(confidence),
            ..Default::default()
        }
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.topics = normalized_set(topics);
        self
    }

    pub fn with_questions<I, S>(mut self, questions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.questions = normalized_set(questions);
        self
    }

    pub fn with_status(mut self, status: DocumentStatus) -> Self {
        self.status = status;
        self
    }

    /// Re-normalize fields that may have been deserialized raw.
    pub fn normalized(self) -> Self {
        Self {
            topics: normalized_set(&self.topics),
            questions: normalized_set(&self.questions),
            confidence: clamp_confidence(self.confidence),
            status: self.status,
        }
    }
}

/// Metadata of a persisted document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub topics: BTreeSet<String>,
    #[serde(default)]
    pub questions: BTreeSet<String>,
    pub confidence: f32,
    #[serde(default)]
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Confidence the document had before its first REPLACE merge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_confidence: Option<f32>,
}

impl DocumentMetadata {
    /// Metadata for a brand-new document built from a candidate. New
    /// documents are drafts whatever status the candidate claims.
    pub fn from_candidate(candidate: &CandidateMetadata, now: DateTime<Utc>) -> Self {
        let candidate = candidate.clone().normalized();
        Self {
            topics: candidate.topics,
            questions: candidate.questions,
            confidence: candidate.confidence,
            status: DocumentStatus::Draft,
            created_at: now,
            updated_at: now,
            original_confidence: None,
        }
    }
}

/// A named, heading-delimited block of a document's body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Heading text without the leading `#` markers
    pub heading: String,
    /// Heading level (1-6)
    pub level: u8,
    /// Body text under the heading, without the heading line
    pub body: String,
}

impl Section {
    /// Create a level-2 section
    pub fn new(heading: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            heading: heading.into(),
            level: 2,
            body: body.into(),
        }
    }

    pub fn with_level(mut self, level: u8) -> Self {
        self.level = level.clamp(1, 6);
        self
    }

    /// Key used to match headings across documents (case-insensitive)
    pub fn key(&self) -> String {
        normalize_term(&self.heading)
    }
}

/// A persisted research document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub sections: Vec<Section>,
    pub metadata: DocumentMetadata,
    /// Bumped by every committed change; used to detect concurrent writers
    #[serde(default)]
    pub revision: u64,
}

impl Document {
    pub fn new(id: DocumentId, sections: Vec<Section>, metadata: DocumentMetadata) -> Self {
        Self {
            id,
            sections,
            metadata,
            revision: 0,
        }
    }

    /// Build a document by parsing heading-delimited text
    pub fn from_text(id: DocumentId, text: &str, metadata: DocumentMetadata) -> Self {
        Self::new(id, super::sections::parse_sections(text), metadata)
    }

    /// Find a section by heading (case-insensitive)
    pub fn section(&self, heading: &str) -> Option<&Section> {
        let key = normalize_term(heading);
        self.sections.iter().find(|s| s.key() == key)
    }

    /// Section headings in document order
    pub fn headings(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.heading.as_str()).collect()
    }

    /// The rendered body (all sections, no frontmatter)
    pub fn body_text(&self) -> String {
        super::sections::render_sections(&self.sections)
    }
}
