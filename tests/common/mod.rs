//! Shared fixtures for consolidation integration tests
//!
//! A `Workspace` is a throwaway data directory with an on-disk corpus,
//! a SQLite embedding index and a JSON-lines audit log, wired into a
//! coordinator the same way the CLI wires them.

#![allow(dead_code)]

use consolidator::{
    CandidateMetadata, ConsolidationConfig, ConsolidationCoordinator, DocumentCorpus, Embedder,
    EmbeddingIndex, FsCorpus, HashingEmbedder, JsonlAuditLog, SqliteEmbeddingIndex,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub const DIMS: usize = 128;

pub struct Workspace {
    pub dir: TempDir,
    pub corpus: Arc<FsCorpus>,
    pub index: Arc<SqliteEmbeddingIndex>,
    pub coordinator: ConsolidationCoordinator,
}

impl Workspace {
    pub fn new() -> Self {
        Self::with_config(ConsolidationConfig::default())
    }

    pub fn with_config(mut config: ConsolidationConfig) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        config.index.dimensions = DIMS;
        config.audit_log = Some(dir.path().join("audit.jsonl"));

        let corpus = Arc::new(FsCorpus::open(dir.path().join("corpus")).expect("open corpus"));
        let index = Arc::new(
            SqliteEmbeddingIndex::open(dir.path().join("index.db"), DIMS).expect("open index"),
        );
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(DIMS));
        let shared_index: Arc<dyn EmbeddingIndex> = index.clone();
        let audit = JsonlAuditLog::open(dir.path().join("audit.jsonl")).expect("open audit log");

        let coordinator =
            ConsolidationCoordinator::from_config(&config, corpus.clone(), Some((embedder, shared_index)))
                .expect("valid config")
                .with_audit(Arc::new(audit));

        Self {
            dir,
            corpus,
            index,
            coordinator,
        }
    }

    pub fn audit_path(&self) -> PathBuf {
        self.dir.path().join("audit.jsonl")
    }

    /// Every stored document body, concatenated.
    pub fn all_bodies(&self) -> String {
        self.corpus
            .list_documents()
            .expect("list")
            .iter()
            .map(|summary| self.corpus.read(&summary.id).expect("read").body_text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A generated research note and the lines it must never lose
pub struct Note {
    pub text: String,
    pub metadata: CandidateMetadata,
    pub lines: Vec<String>,
}

const HEADINGS: &[&str] = &["Summary", "Results", "Method", "Open Issues"];
const SUBJECTS: &[&str] = &[
    "Write-back caching",
    "Read replication",
    "Log compaction",
    "Admission filtering",
    "Consistent hashing",
];
const EFFECTS: &[&str] = &[
    "shortens tail latency",
    "lowers disk traffic",
    "raises memory pressure",
    "smooths throughput",
];
const TOPICS: &[&str] = &["caching", "storage", "replication", "latency", "hashing"];

/// A note whose lines each carry a unique tag, so no two lines are near-duplicates.
pub fn research_note(rng: &mut StdRng, serial: usize) -> Note {
    let mut lines = Vec::new();
    let mut text = String::new();

    let heading_count = rng.gen_range(1..=2);
    let headings: Vec<&str> = HEADINGS.choose_multiple(rng, heading_count).copied().collect();
    for (h, heading) in headings.iter().enumerate() {
        text.push_str(&format!("## {}\n\n", heading));
        for l in 0..rng.gen_range(1..=3) {
            let line = format!(
                "{} {} in trial n{}x{}x{}.",
                SUBJECTS.choose(rng).copied().unwrap_or("Caching"),
                EFFECTS.choose(rng).copied().unwrap_or("helps"),
                serial,
                h,
                l
            );
            text.push_str(&line);
            text.push('\n');
            lines.push(line);
        }
        text.push('\n');
    }

    let topics: Vec<&str> = TOPICS.choose_multiple(rng, 2).copied().collect();
    let metadata = CandidateMetadata::new(rng.gen_range(0.3..0.9)).with_topics(topics);
    Note {
        text,
        metadata,
        lines,
    }
}
