//! Document data model
//!
//! A document is an ordered list of uniquely named sections plus metadata
//! (topics, questions, confidence, status, timestamps). Documents are
//! stored as markdown with YAML frontmatter.

mod codec;
pub mod sections;
mod types;

pub use codec::CodecError;
pub use sections::{parse_sections, render_sections, SYNTHETIC_HEADING};
pub use types::{
    normalize_term, CandidateMetadata, Document, DocumentId, DocumentMetadata, DocumentStatus,
    Section,
};
