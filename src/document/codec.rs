//! Markdown + YAML frontmatter codec for documents
//!
//! ```text
//! ---
//! id: attention-mechanisms
//! revision: 3
//! topics: [transformers, attention]
//! confidence: 0.8
//! status: researched
//! created_at: 2026-01-02T10:00:00Z
//! updated_at: 2026-03-04T12:00:00Z
//! ---
//!
//! ## Results
//! ...
//! ```

use super::sections::parse_sections;
use super::types::{Document, DocumentId, DocumentMetadata};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors decoding a stored document
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("document has no frontmatter block")]
    MissingFrontmatter,

    #[error("frontmatter is not terminated by a closing `---` line")]
    UnterminatedFrontmatter,

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct Frontmatter {
    id: DocumentId,
    #[serde(default)]
    revision: u64,
    #[serde(flatten)]
    metadata: DocumentMetadata,
}

/// Split `---`-delimited frontmatter from the body.
fn split_frontmatter(content: &str) -> Result<(&str, &str), CodecError> {
    let trimmed = content.trim_start();
    let after_first = trimmed
        .strip_prefix("---")
        .ok_or(CodecError::MissingFrontmatter)?;
    let end_pos = after_first
        .find("\n---")
        .ok_or(CodecError::UnterminatedFrontmatter)?;

    let yaml = &after_first[..end_pos];
    let rest = &after_first[end_pos + 4..];
    // Drop the remainder of the closing delimiter line
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => "",
    };
    Ok((yaml, body))
}

impl Document {
    /// Serialize to markdown with YAML frontmatter.
    pub fn to_markdown(&self) -> Result<String, CodecError> {
        let frontmatter = Frontmatter {
            id: self.id.clone(),
            revision: self.revision,
            metadata: self.metadata.clone(),
        };
        let yaml = serde_yaml::to_string(&frontmatter)?;
        Ok(format!("---\n{}---\n\n{}", yaml, self.body_text()))
    }

    /// Parse a document previously written by [`Document::to_markdown`].
    pub fn from_markdown(content: &str) -> Result<Document, CodecError> {
        let (yaml, body) = split_frontmatter(content)?;
        let frontmatter: Frontmatter = serde_yaml::from_str(yaml)?;
        Ok(Document {
            id: frontmatter.id,
            sections: parse_sections(body),
            metadata: frontmatter.metadata,
            revision: frontmatter.revision,
        })
    }
}
