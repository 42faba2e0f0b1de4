use super::*;
use crate::document::{DocumentId, DocumentStatus};
use chrono::TimeZone;
use std::collections::BTreeSet;

fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
}

fn existing_doc(body: &str, topics: &[&str], confidence: f32) -> Document {
    let mut metadata = DocumentMetadata::from_candidate(
        &CandidateMetadata::new(confidence).with_topics(topics.iter().copied()),
        at(1),
    );
    metadata.status = DocumentStatus::Researched;
    Document::from_text(DocumentId::from("attention"), body, metadata)
}

fn candidate(topics: &[&str], confidence: f32) -> CandidateMetadata {
    CandidateMetadata::new(confidence).with_topics(topics.iter().copied())
}

fn merger_with(resolution: ResolutionPolicy) -> DocumentMerger {
    DocumentMerger::new(MergeConfig {
        resolution,
        ..Default::default()
    })
    .unwrap()
}

const EXISTING: &str = "\
## Summary

Attention lets every token look at every other token.
Multi-head attention runs several attention functions in parallel.

## Results

Batching improves throughput.
Longer contexts increase memory use quadratically.
";

#[test]
fn integrate_adds_updated_findings_block_under_matched_heading() {
    let doc = existing_doc(EXISTING, &["transformers", "attention"], 0.7);
    let new_text = "## Results\n\nFlash attention reduces memory traffic.\nBatching improves throughput.\n";

    let (merged, report) = DocumentMerger::default().merge_at(
        &doc,
        new_text,
        &candidate(&["attention", "transformers"], 0.7),
        MergeStrategy::Integrate,
        at(2),
    );

    let results = merged.section("Results").unwrap();
    assert!(results.body.contains("**Updated Findings (2026-03-02):**"));
    assert!(results.body.contains("Flash attention reduces memory traffic."));
    assert_eq!(results.body.matches("Batching improves throughput.").count(), 1);
    assert_eq!(report.sections_modified, vec!["Results"]);
    assert!(report.sections_added.is_empty());
    assert!(!report.noop);
    assert_eq!(merged.revision, doc.revision + 1);
    assert_eq!(merged.metadata.updated_at, at(2));
    assert_eq!(merged.metadata.created_at, doc.metadata.created_at);
}

#[test]
fn integrate_adds_unmatched_headings_as_new_sections_in_order() {
    let doc = existing_doc(EXISTING, &["attention"], 0.7);
    let new_text = "## Limitations\n\nQuadratic cost.\n\n## Open Questions\n\n- Does sparsity help?\n";

    let (merged, report) = DocumentMerger::default().merge_at(
        &doc,
        new_text,
        &candidate(&["attention"], 0.7),
        MergeStrategy::Integrate,
        at(2),
    );

    assert_eq!(
        merged.headings(),
        vec!["Summary", "Results", "Limitations", "Open Questions"]
    );
    assert_eq!(report.sections_added, vec!["Limitations", "Open Questions"]);
}

#[test]
fn merge_never_removes_existing_lines() {
    let doc = existing_doc(EXISTING, &["attention"], 0.7);
    let new_text = "## Summary\n\nAttention is all you need.\n\n## Results\n\nBatching does not improve throughput.\n";

    for strategy in [MergeStrategy::Append, MergeStrategy::Integrate] {
        let (merged, _) = DocumentMerger::default().merge_at(
            &doc,
            new_text,
            &candidate(&["attention"], 0.4),
            strategy,
            at(2),
        );
        for section in &doc.sections {
            let after = merged.section(&section.heading).expect("section kept");
            for line in section.body.lines().filter(|l| !l.trim().is_empty()) {
                assert!(after.body.contains(line), "{:?} lost line {:?}", strategy, line);
            }
        }
    }
}

#[test]
fn merging_twice_is_idempotent() {
    let doc = existing_doc(EXISTING, &["attention"], 0.6);
    let new_text = "## Results\n\nBatching does not improve throughput.\nKV caching speeds up decoding.\n\n## Limitations\n\nQuadratic cost.\n";
    let meta = candidate(&["attention", "inference"], 0.9);
    let merger = DocumentMerger::default();

    let (once, first) = merger.merge_at(&doc, new_text, &meta, MergeStrategy::Integrate, at(2));
    let (twice, second) = merger.merge_at(&once, new_text, &meta, MergeStrategy::Integrate, at(3));

    assert!(!first.conflicts.is_empty());
    assert_eq!(twice, once);
    assert!(second.noop);
    assert!(second.conflicts.is_empty());
    assert!(second.sections_added.is_empty() && second.sections_modified.is_empty());
    let results = twice.section("Results").unwrap();
    assert_eq!(results.body.matches("**Updated Findings").count(), 1);
    assert_eq!(results.body.matches("KV caching speeds up decoding.").count(), 1);
}

#[test]
fn confidence_never_decreases() {
    let doc = existing_doc(EXISTING, &["attention"], 0.9);
    let (merged, report) = DocumentMerger::default().merge_at(
        &doc,
        "## Results\n\nSparse attention scales better.\n",
        &candidate(&["attention"], 0.3),
        MergeStrategy::Integrate,
        at(2),
    );

    assert_eq!(merged.metadata.confidence, 0.9);
    let metadata: Vec<&Conflict> = report.conflicts_of(ConflictKind::Metadata).collect();
    assert_eq!(metadata.len(), 1);
    assert_eq!(metadata[0].severity, Severity::High);
    assert_eq!(metadata[0].resolution, Resolution::PreferNew);
}

#[test]
fn confidence_rises_to_the_higher_value() {
    let doc = existing_doc(EXISTING, &["attention"], 0.5);
    let (merged, report) = DocumentMerger::default().merge_at(
        &doc,
        "## Results\n\nSparse attention scales better.\n",
        &candidate(&["attention"], 0.6),
        MergeStrategy::Integrate,
        at(2),
    );
    assert_eq!(merged.metadata.confidence, 0.6);
    assert_eq!(report.metadata_delta.confidence_before, 0.5);
    assert_eq!(report.metadata_delta.confidence_after, 0.6);
    assert_eq!(report.conflicts_of(ConflictKind::Metadata).count(), 0);
}

#[test]
fn low_topic_overlap_is_a_structural_conflict() {
    // {attention, transformers, nlp} vs {attention, vision, cnn}: 1 / 5 = 0.2
    let doc = existing_doc(EXISTING, &["attention", "transformers", "nlp"], 0.7);
    let (merged, report) = DocumentMerger::default().merge_at(
        &doc,
        "## Results\n\nConvolutions capture locality.\n",
        &candidate(&["attention", "vision", "cnn"], 0.7),
        MergeStrategy::Integrate,
        at(2),
    );

    let structural: Vec<&Conflict> = report.conflicts_of(ConflictKind::Structural).collect();
    assert_eq!(structural.len(), 1);
    assert_eq!(structural[0].severity, Severity::Medium);
    assert!(structural[0].description.contains("0.20"));
    let topics: Vec<&str> = merged.metadata.topics.iter().map(String::as_str).collect();
    assert_eq!(topics, vec!["attention", "cnn", "nlp", "transformers", "vision"]);
    assert_eq!(
        report.metadata_delta.topics_added,
        ["cnn", "vision"]
            .iter()
            .map(|s| s.to_string())
            .collect::<BTreeSet<String>>()
    );
}

#[test]
fn no_structural_conflict_when_both_sides_have_no_topics() {
    let doc = existing_doc(EXISTING, &[], 0.7);
    let (_, report) = DocumentMerger::default().merge_at(
        &doc,
        "## Results\n\nNew line.\n",
        &candidate(&[], 0.7),
        MergeStrategy::Integrate,
        at(2),
    );
    assert_eq!(report.conflicts_of(ConflictKind::Structural).count(), 0);
}

#[test]
fn negated_claim_is_a_content_conflict_resolved_prefer_new() {
    let doc = existing_doc(EXISTING, &["attention"], 0.7);
    let (merged, report) = DocumentMerger::default().merge_at(
        &doc,
        "## Results\n\nBatching does not improve throughput.\n",
        &candidate(&["attention"], 0.7),
        MergeStrategy::Integrate,
        at(2),
    );

    let content: Vec<&Conflict> = report.conflicts_of(ConflictKind::Content).collect();
    assert_eq!(content.len(), 1);
    assert!(content[0].severity >= Severity::Medium);
    assert_eq!(content[0].resolution, Resolution::PreferNew);
    assert_eq!(content[0].section.as_deref(), Some("Results"));
    assert!(!report.has_unresolved());

    let body = &merged.section("Results").unwrap().body;
    assert!(body.contains("Batching improves throughput."));
    assert!(body.contains("Batching does not improve throughput."));
}

#[test]
fn prefer_existing_withholds_conflicting_lines() {
    let doc = existing_doc(EXISTING, &["attention"], 0.7);
    let (merged, report) = merger_with(ResolutionPolicy::PreferExisting).merge_at(
        &doc,
        "## Results\n\nBatching does not improve throughput.\nKV caching speeds up decoding.\n",
        &candidate(&["attention"], 0.7),
        MergeStrategy::Integrate,
        at(2),
    );

    let body = &merged.section("Results").unwrap().body;
    assert!(!body.contains("does not improve"));
    assert!(body.contains("KV caching speeds up decoding."));
    assert_eq!(
        report.withheld,
        vec![WithheldLine {
            section: "Results".to_string(),
            line: "Batching does not improve throughput.".to_string(),
        }]
    );
    assert_eq!(report.conflicts[0].resolution, Resolution::PreferExisting);
    assert!(!report.has_unresolved());
}

#[test]
fn manual_policy_leaves_conflict_unresolved() {
    let doc = existing_doc(EXISTING, &["attention"], 0.7);
    let merger = merger_with(ResolutionPolicy::Manual);
    let new_text = "## Results\n\nBatching does not improve throughput.\n";
    let meta = candidate(&["attention"], 0.7);

    let (merged, report) = merger.merge_at(&doc, new_text, &meta, MergeStrategy::Integrate, at(2));
    assert!(report.has_unresolved());
    assert_eq!(report.withheld.len(), 1);
    assert_eq!(merged, doc);
    assert!(report.noop);

    // Still surfaced on a second attempt
    let (_, again) = merger.merge_at(&merged, new_text, &meta, MergeStrategy::Integrate, at(3));
    assert!(again.has_unresolved());
}

#[test]
fn near_duplicate_lines_are_skipped() {
    let doc = existing_doc(EXISTING, &["attention"], 0.7);
    let (merged, report) = DocumentMerger::default().merge_at(
        &doc,
        "## Summary\n\nMulti-head attention runs several attention functions in parallel!\n",
        &candidate(&["attention"], 0.7),
        MergeStrategy::Integrate,
        at(2),
    );
    assert!(report.noop);
    assert_eq!(merged, doc);
}

#[test]
fn negated_near_duplicate_is_not_swallowed_by_dedupe() {
    let doc = existing_doc(
        "## Results\n\nThe cache layer of the serving stack reliably improves median request latency under load.\n",
        &["serving"],
        0.7,
    );
    let (merged, report) = DocumentMerger::default().merge_at(
        &doc,
        "## Results\n\nThe cache layer of the serving stack never reliably improves median request latency under load.\n",
        &candidate(&["serving"], 0.7),
        MergeStrategy::Integrate,
        at(2),
    );
    assert_eq!(report.conflicts_of(ConflictKind::Content).count(), 1);
    assert!(merged.section("Results").unwrap().body.contains("never reliably"));
}

#[test]
fn headingless_text_integrates_into_findings() {
    let doc = existing_doc("Loose notes about attention.", &["attention"], 0.7);
    assert_eq!(doc.headings(), vec![SYNTHETIC_HEADING]);

    let (merged, report) = DocumentMerger::default().merge_at(
        &doc,
        "Rotary embeddings encode relative position.",
        &candidate(&["attention"], 0.7),
        MergeStrategy::Integrate,
        at(2),
    );
    assert_eq!(merged.headings(), vec![SYNTHETIC_HEADING]);
    assert_eq!(report.sections_modified, vec![SYNTHETIC_HEADING]);
    assert!(merged.sections[0].body.contains("Rotary embeddings"));
}

#[test]
fn status_only_moves_forward() {
    let mut doc = existing_doc(EXISTING, &["attention"], 0.7);
    doc.metadata.status = DocumentStatus::Validated;

    let draft = candidate(&["attention"], 0.7).with_status(DocumentStatus::Draft);
    let (merged, _) = DocumentMerger::default().merge_at(
        &doc,
        "## Results\n\nSomething new entirely.\n",
        &draft,
        MergeStrategy::Integrate,
        at(2),
    );
    assert_eq!(merged.metadata.status, DocumentStatus::Validated);

    let researched = existing_doc(EXISTING, &["attention"], 0.7);
    let validated = candidate(&["attention"], 0.7).with_status(DocumentStatus::Validated);
    let (merged, report) = DocumentMerger::default().merge_at(
        &researched,
        "",
        &validated,
        MergeStrategy::Integrate,
        at(2),
    );
    assert_eq!(merged.metadata.status, DocumentStatus::Validated);
    assert_eq!(report.metadata_delta.status_after, DocumentStatus::Validated);
}

#[test]
fn candidate_cannot_archive_through_a_merge() {
    let doc = existing_doc(EXISTING, &["attention"], 0.7);
    let archived = candidate(&["attention"], 0.7).with_status(DocumentStatus::Archived);

    let (merged, report) = DocumentMerger::default().merge_at(
        &doc,
        "## Results

Sparse attention trades recall for speed.
",
        &archived,
        MergeStrategy::Integrate,
        at(2),
    );
    assert_eq!(merged.metadata.status, DocumentStatus::Validated);
    assert!(!report.noop);

    // Once validated, the archive request alone changes nothing
    let (again, second) = DocumentMerger::default().merge_at(
        &merged,
        "",
        &archived,
        MergeStrategy::Integrate,
        at(3),
    );
    assert!(second.noop);
    assert_eq!(again, merged);
}

#[test]
fn append_adds_one_trailing_section_with_demoted_headings() {
    let doc = existing_doc(EXISTING, &["attention"], 0.7);
    let new_text = "## Results\n\nKV caching speeds up decoding.\n\n## Caveats\n\nOnly for autoregressive models.\n";
    let merger = DocumentMerger::default();
    let meta = candidate(&["attention"], 0.7);

    let (merged, report) = merger.merge_at(&doc, new_text, &meta, MergeStrategy::Append, at(2));
    assert_eq!(merged.sections.len(), doc.sections.len() + 1);
    assert_eq!(&merged.sections[..doc.sections.len()], &doc.sections[..]);

    let update = merged.sections.last().unwrap();
    assert_eq!(update.heading, "Update 2026-03-02");
    assert!(update.body.starts_with("**Results**\n\nKV caching"));
    assert!(update.body.contains("**Caveats**"));
    assert_eq!(report.sections_added, vec!["Update 2026-03-02"]);

    // Same content again: identical body already present
    let (again, second) = merger.merge_at(&merged, new_text, &meta, MergeStrategy::Append, at(2));
    assert!(second.noop);
    assert_eq!(again, merged);
}

#[test]
fn append_suffixes_taken_heading() {
    let doc = existing_doc(EXISTING, &["attention"], 0.7);
    let merger = DocumentMerger::default();
    let meta = candidate(&["attention"], 0.7);

    let (first, _) = merger.merge_at(&doc, "First addendum.", &meta, MergeStrategy::Append, at(2));
    let (second, _) = merger.merge_at(&first, "Second addendum.", &meta, MergeStrategy::Append, at(2));

    let headings = second.headings();
    assert_eq!(&headings[headings.len() - 2..], &["Update 2026-03-02", "Update 2026-03-02 (2)"]);
    assert_eq!(second.sections.last().unwrap().body, "Second addendum.");
}

#[test]
fn replace_swaps_body_and_keeps_provenance() {
    let doc = existing_doc(EXISTING, &["attention"], 0.8);
    let (merged, report) = DocumentMerger::default().merge_at(
        &doc,
        "## Results\n\nRewritten results.\n",
        &candidate(&["attention"], 0.6),
        MergeStrategy::Replace,
        at(5),
    );

    assert_eq!(merged.section("Results").unwrap().body, "Rewritten results.");
    assert_eq!(merged.section("Summary"), doc.section("Summary"));
    assert_eq!(report.sections_modified, vec!["Results"]);
    assert_eq!(merged.metadata.created_at, doc.metadata.created_at);
    assert_eq!(merged.metadata.original_confidence, Some(0.8));
    assert_eq!(merged.metadata.confidence, 0.8);

    // A later replace keeps the first recorded original confidence
    let (again, _) = DocumentMerger::default().merge_at(
        &merged,
        "## Results\n\nRewritten twice.\n",
        &candidate(&["attention"], 0.95),
        MergeStrategy::Replace,
        at(6),
    );
    assert_eq!(again.metadata.original_confidence, Some(0.8));
    assert_eq!(again.metadata.confidence, 0.95);
}

#[test]
fn replace_under_prefer_existing_keeps_the_contradicted_claim() {
    let doc = existing_doc(EXISTING, &["attention"], 0.7);
    let (merged, report) = merger_with(ResolutionPolicy::PreferExisting).merge_at(
        &doc,
        "## Results\n\nBatching does not improve throughput.\nSharding helps.\n",
        &candidate(&["attention"], 0.7),
        MergeStrategy::Replace,
        at(2),
    );

    let body = &merged.section("Results").unwrap().body;
    assert!(body.contains("Batching improves throughput."));
    assert!(body.contains("Longer contexts increase memory use quadratically."));
    assert!(body.contains("Sharding helps."));
    assert!(!body.contains("does not improve"));
    assert_eq!(report.conflicts_of(ConflictKind::Content).count(), 1);
    assert_eq!(report.conflicts[0].resolution, Resolution::PreferExisting);
    assert_eq!(report.sections_modified, vec!["Results"]);
    assert_eq!(merged.section("Summary"), doc.section("Summary"));
}

#[test]
fn replace_under_manual_never_empties_a_section() {
    let doc = existing_doc(EXISTING, &["attention"], 0.7);
    let merger = merger_with(ResolutionPolicy::Manual);
    let meta = candidate(&["attention"], 0.7);

    let (merged, report) = merger.merge_at(
        &doc,
        "## Results\n\nBatching does not improve throughput.\n",
        &meta,
        MergeStrategy::Replace,
        at(2),
    );
    assert!(report.has_unresolved());
    assert!(report.sections_modified.is_empty());
    assert!(report.noop);
    assert_eq!(merged.section("Results"), doc.section("Results"));

    let (merged, report) = merger.merge_at(
        &doc,
        "## Results\n\nBatching does not improve throughput.\nSharding helps.\n",
        &meta,
        MergeStrategy::Replace,
        at(2),
    );
    let body = &merged.section("Results").unwrap().body;
    assert!(body.contains("Batching improves throughput."));
    assert!(body.contains("Sharding helps."));
    assert!(report.has_unresolved());
    assert_eq!(report.withheld.len(), 1);
    assert_eq!(merged.metadata.original_confidence, Some(0.7));
}

#[test]
fn merged_document_survives_markdown_round_trip() {
    let doc = existing_doc(EXISTING, &["attention"], 0.7);
    let new_text = "## Results\n\nKV caching speeds up decoding.\n```python\n# cache = {}\n```\n\n## Limits\n\nQuadratic.\n";
    let (merged, _) = DocumentMerger::default().merge_at(
        &doc,
        new_text,
        &candidate(&["attention"], 0.7),
        MergeStrategy::Integrate,
        at(2),
    );

    let reloaded = Document::from_markdown(&merged.to_markdown().unwrap()).unwrap();
    assert_eq!(reloaded, merged);
}

#[test]
fn report_serializes_for_audit() {
    let doc = existing_doc(EXISTING, &["attention"], 0.7);
    let (_, report) = DocumentMerger::default().merge_at(
        &doc,
        "## Results\n\nBatching does not improve throughput.\n",
        &candidate(&["attention"], 0.7),
        MergeStrategy::Integrate,
        at(2),
    );
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["strategy"], "integrate");
    assert_eq!(json["conflicts"][0]["kind"], "content");
    assert_eq!(json["conflicts"][0]["resolution"], "prefer_new");
}

#[test]
fn invalid_config_is_rejected() {
    let config = MergeConfig {
        dedupe_threshold: 1.5,
        ..Default::default()
    };
    assert!(DocumentMerger::new(config).is_err());
}

#[test]
fn strategy_and_policy_parse_from_strings() {
    assert_eq!("REPLACE".parse::<MergeStrategy>().unwrap(), MergeStrategy::Replace);
    assert_eq!(
        "prefer-existing".parse::<ResolutionPolicy>().unwrap(),
        ResolutionPolicy::PreferExisting
    );
    assert!("shuffle".parse::<MergeStrategy>().is_err());
}
