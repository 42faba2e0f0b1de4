//! End-to-end consolidation against an on-disk corpus and SQLite index

mod common;

use common::{research_note, Workspace};
use consolidator::{
    AuditEvent, CandidateMetadata, ConsolidationAction, ConsolidationConfig, DocumentCorpus,
    EmbeddingIndex, FsCorpus, JsonlAuditLog, MergeStrategy, ResolutionPolicy,
    SqliteEmbeddingIndex,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

const NOTE: &str = "\
## Summary

Admission filters keep one-hit wonders out of the cache.
Frequency sketches cost a few bits per key.
";

fn meta() -> CandidateMetadata {
    CandidateMetadata::new(0.6)
        .with_topics(["caching", "admission"])
        .with_questions(["how much memory does tinylfu need"])
}

#[tokio::test]
async fn ingest_writes_markdown_and_resubmission_is_a_noop() {
    let ws = Workspace::new();

    let first = ws.coordinator.consolidate(NOTE, &meta(), None).await.unwrap();
    assert_eq!(first.decision.action, ConsolidationAction::Create);

    let path = ws.corpus.path_for(&first.document.id).unwrap();
    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.starts_with("---"));
    assert!(raw.contains("Admission filters keep one-hit wonders out of the cache."));

    let second = ws.coordinator.consolidate(NOTE, &meta(), None).await.unwrap();
    assert_eq!(second.decision.action, ConsolidationAction::Update);
    assert!(second.report.unwrap().noop);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), raw);

    // A fresh handle on the same directory sees the same document
    let reopened = FsCorpus::open(ws.corpus.root()).unwrap();
    assert_eq!(reopened.read(&first.document.id).unwrap(), first.document);

    let events: Vec<_> = JsonlAuditLog::read_entries(ws.audit_path())
        .unwrap()
        .into_iter()
        .map(|e| e.event)
        .collect();
    assert!(matches!(events.first(), Some(AuditEvent::Decision { .. })));
    assert!(events.iter().any(|e| matches!(e, AuditEvent::Create { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, AuditEvent::Merge { report, .. } if report.noop)));
}

#[tokio::test]
async fn random_notes_lose_no_lines() {
    let ws = Workspace::new();
    let mut rng = StdRng::seed_from_u64(7);

    let mut expected = Vec::new();
    for serial in 0..30 {
        let note = research_note(&mut rng, serial);
        ws.coordinator
            .consolidate(&note.text, &note.metadata, None)
            .await
            .unwrap();
        expected.extend(note.lines);
    }

    let bodies = ws.all_bodies();
    for line in &expected {
        assert!(bodies.contains(line.as_str()), "lost line: {line}");
    }

    let docs = ws.corpus.list_documents().unwrap();
    assert_eq!(ws.index.len().unwrap(), docs.len());
    for summary in &docs {
        let record = ws.index.get(&summary.id).unwrap().unwrap();
        assert_eq!(record.metadata.revision, summary.revision);
    }
}

#[tokio::test]
async fn index_survives_reopen_and_rebuilds() {
    let ws = Workspace::new();
    ws.coordinator.consolidate(NOTE, &meta(), None).await.unwrap();
    ws.coordinator
        .consolidate(
            "## Method\n\nReplica lag was sampled every second.\n",
            &CandidateMetadata::new(0.5).with_topics(["replication"]),
            None,
        )
        .await
        .unwrap();
    let docs = ws.corpus.list_documents().unwrap().len();

    let reopened =
        SqliteEmbeddingIndex::open(ws.dir.path().join("index.db"), common::DIMS).unwrap();
    assert_eq!(reopened.len().unwrap(), docs);

    assert_eq!(ws.coordinator.reindex_all().await.unwrap(), docs);
    assert_eq!(ws.index.len().unwrap(), docs);
}

#[tokio::test]
async fn prefer_existing_keeps_contradicted_claims_out() {
    let config = ConsolidationConfig::from_yaml("merge:\n  resolution: prefer_existing\n").unwrap();
    assert_eq!(config.merge.resolution, ResolutionPolicy::PreferExisting);
    let ws = Workspace::with_config(config);

    let created = ws
        .coordinator
        .create("## Results\n\nBatching improves throughput under load.\n", &meta())
        .await
        .unwrap();

    let outcome = ws
        .coordinator
        .merge(
            &created.id,
            "## Results\n\nBatching does not improve throughput under load.\nQueue depth stayed flat.\n",
            &meta(),
            MergeStrategy::Integrate,
        )
        .await
        .unwrap();

    assert_eq!(outcome.report.withheld.len(), 1);
    let body = ws.corpus.read(&created.id).unwrap().body_text();
    assert!(body.contains("Batching improves throughput under load."));
    assert!(!body.contains("does not improve"));
    assert!(body.contains("Queue depth stayed flat."));
}
