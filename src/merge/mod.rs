//! DocumentMerger: section-aware merging that never loses content
//!
//! A merge parses the incoming text into sections, evolves metadata
//! (unions, max confidence, forward-only status), detects conflicts,
//! applies the resolution policy and then one of three strategies:
//!
//! - `Append`: the new content becomes one trailing section.
//! - `Integrate`: matched sections get an "Updated Findings" block with
//!   the lines they do not already contain; unmatched sections are added.
//! - `Replace`: matched section bodies are swapped out, with provenance
//!   (creation time, original confidence) kept in metadata.
//!
//! Except for `Replace`, every section, line and metadata value of the
//! existing document survives the merge.

mod conflict;
mod report;

pub use conflict::{
    confidence_severity, split_sentences, Conflict, ConflictKind, PolarityHit, PolarityKind,
    PolarityMatcher, PolarityRules, Resolution, SectionFinding, Severity,
};
pub use report::{MergeReport, MetadataDelta, WithheldLine};

use crate::config::ConfigurationError;
use crate::document::sections::{content_units, heading_key};
use crate::document::{
    parse_sections, CandidateMetadata, Document, DocumentMetadata, DocumentStatus, Section,
    SYNTHETIC_HEADING,
};
use crate::text::{jaccard, token_set, truncate_chars};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

/// How incoming sections are combined with existing ones
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    Append,
    #[default]
    Integrate,
    Replace,
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MergeStrategy::Append => "append",
            MergeStrategy::Integrate => "integrate",
            MergeStrategy::Replace => "replace",
        })
    }
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "append" => Ok(MergeStrategy::Append),
            "integrate" => Ok(MergeStrategy::Integrate),
            "replace" => Ok(MergeStrategy::Replace),
            other => Err(format!("unknown merge strategy: {}", other)),
        }
    }
}

/// What to do with conflicting incoming content
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPolicy {
    /// Write the new content
    #[default]
    PreferNew,
    /// Keep the existing content and withhold the new lines
    PreferExisting,
    /// Withhold the new lines and leave the conflict for a human
    Manual,
}

impl ResolutionPolicy {
    pub fn resolution(self) -> Resolution {
        match self {
            ResolutionPolicy::PreferNew => Resolution::PreferNew,
            ResolutionPolicy::PreferExisting => Resolution::PreferExisting,
            ResolutionPolicy::Manual => Resolution::Unresolved,
        }
    }

    fn withholds(self) -> bool {
        self != ResolutionPolicy::PreferNew
    }
}

impl FromStr for ResolutionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "prefer_new" => Ok(ResolutionPolicy::PreferNew),
            "prefer_existing" => Ok(ResolutionPolicy::PreferExisting),
            "manual" => Ok(ResolutionPolicy::Manual),
            other => Err(format!("unknown resolution policy: {}", other)),
        }
    }
}

/// Merger configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Strategy used when the caller does not name one
    pub default_strategy: MergeStrategy,
    pub resolution: ResolutionPolicy,
    /// Token Jaccard at or above which two lines count as duplicates
    pub dedupe_threshold: f32,
    /// Confidence difference above which a metadata conflict is raised
    pub confidence_delta: f32,
    /// Topic Jaccard below which a structural conflict is raised
    pub min_topic_overlap: f32,
    /// Claim-token Jaccard at or above which two sentences are about the same thing
    pub claim_overlap: f32,
    pub polarity: PolarityRules,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            default_strategy: MergeStrategy::default(),
            resolution: ResolutionPolicy::default(),
            dedupe_threshold: 0.85,
            confidence_delta: 0.15,
            min_topic_overlap: 0.30,
            claim_overlap: 0.5,
            polarity: PolarityRules::default(),
        }
    }
}

impl MergeConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (name, value) in [
            ("merge.dedupe_threshold", self.dedupe_threshold),
            ("merge.confidence_delta", self.confidence_delta),
            ("merge.min_topic_overlap", self.min_topic_overlap),
            ("merge.claim_overlap", self.claim_overlap),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigurationError::Invalid(format!(
                    "{} must lie in [0, 1] (got {})",
                    name, value
                )));
            }
        }
        if self.dedupe_threshold == 0.0 {
            return Err(ConfigurationError::Invalid(
                "merge.dedupe_threshold of 0 would treat every line as a duplicate".to_string(),
            ));
        }
        Ok(())
    }
}

/// Heading-level outcome of a strategy
struct SectionChanges {
    sections: Vec<Section>,
    added: Vec<String>,
    modified: Vec<String>,
}

impl SectionChanges {
    fn unchanged(existing: &Document) -> Self {
        Self {
            sections: existing.sections.clone(),
            added: Vec::new(),
            modified: Vec::new(),
        }
    }
}

/// Marker line opening each block of integrated content
pub fn update_marker(date: &str) -> String {
    format!("**Updated Findings ({}):**", date)
}

fn is_withheld(withheld: &[WithheldLine], heading: &str, line: &str) -> bool {
    let key = heading_key(heading);
    withheld
        .iter()
        .any(|w| w.line == line && heading_key(&w.section) == key)
}

/// `body` without the lines withheld for `heading`
fn strip_withheld(body: &str, withheld: &[WithheldLine], heading: &str) -> String {
    if withheld.is_empty() {
        return body.to_string();
    }
    body.lines()
        .filter(|line| !is_withheld(withheld, heading, line.trim_end()))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// `base`, or `base (n)` for the first free n
fn unique_heading(sections: &[Section], base: &str) -> String {
    let taken: BTreeSet<String> = sections.iter().map(Section::key).collect();
    if !taken.contains(&heading_key(base)) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{} ({})", base, n))
        .find(|candidate| !taken.contains(&heading_key(candidate)))
        .unwrap_or_else(|| base.to_string())
}

fn evolve_metadata(existing: &DocumentMetadata, candidate: &CandidateMetadata) -> DocumentMetadata {
    let mut evolved = existing.clone();
    evolved.topics.extend(candidate.topics.iter().cloned());
    evolved.questions.extend(candidate.questions.iter().cloned());
    evolved.confidence = existing.confidence.max(candidate.confidence);
    // Archival is never a side effect of a merge
    evolved.status = existing
        .status
        .advance(candidate.status.min(DocumentStatus::Validated));
    evolved
}

/// Merges incoming research content into existing documents
pub struct DocumentMerger {
    config: MergeConfig,
    matcher: PolarityMatcher,
}

impl DocumentMerger {
    pub fn new(config: MergeConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let matcher = PolarityMatcher::new(&config.polarity, config.claim_overlap);
        Ok(Self { config, matcher })
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Merge `new_text` into `existing`, timestamped now.
    pub fn merge(
        &self,
        existing: &Document,
        new_text: &str,
        new_metadata: &CandidateMetadata,
        strategy: MergeStrategy,
    ) -> (Document, MergeReport) {
        self.merge_at(existing, new_text, new_metadata, strategy, Utc::now())
    }

    /// Merge with an explicit clock.
    pub fn merge_at(
        &self,
        existing: &Document,
        new_text: &str,
        new_metadata: &CandidateMetadata,
        strategy: MergeStrategy,
        now: DateTime<Utc>,
    ) -> (Document, MergeReport) {
        let candidate = new_metadata.clone().normalized();
        let incoming = parse_sections(new_text);
        let resolution = self.config.resolution.resolution();

        let mut conflicts = Vec::new();
        conflicts.extend(self.metadata_conflict(&existing.metadata, &candidate, resolution));
        conflicts.extend(self.structural_conflict(&existing.metadata, &candidate, resolution));

        let mut withheld = Vec::new();
        for section in &incoming {
            let Some(current) = existing.section(&section.heading) else {
                continue;
            };
            let novel = self.novel_units(&current.body, &section.body);
            let existing_units = content_units(&current.body);
            if let Some(finding) = self.matcher.scan_section(&novel, &existing_units) {
                conflicts.push(content_conflict(&current.heading, &finding, resolution));
                if self.config.resolution.withholds() {
                    withheld.extend(finding.conflicting_units().into_iter().map(|line| {
                        WithheldLine {
                            section: current.heading.clone(),
                            line,
                        }
                    }));
                }
            }
        }

        let date = now.format("%Y-%m-%d").to_string();
        let changes = match strategy {
            MergeStrategy::Append => self.append(existing, &incoming, &withheld, &date),
            MergeStrategy::Integrate => self.integrate(existing, &incoming, &withheld, &date),
            MergeStrategy::Replace => self.replace(existing, &incoming, &withheld),
        };

        let metadata = evolve_metadata(&existing.metadata, &candidate);
        let metadata_delta = MetadataDelta {
            topics_added: metadata
                .topics
                .difference(&existing.metadata.topics)
                .cloned()
                .collect(),
            questions_added: metadata
                .questions
                .difference(&existing.metadata.questions)
                .cloned()
                .collect(),
            confidence_before: existing.metadata.confidence,
            confidence_after: metadata.confidence,
            status_before: existing.metadata.status,
            status_after: metadata.status,
        };

        if changes.sections == existing.sections && metadata_delta.is_unchanged() {
            // Only conflicts whose new lines are still being held back stay relevant
            conflicts.retain(|c| c.kind == ConflictKind::Content && c.resolution != Resolution::PreferNew);
            info!(doc_id = %existing.id, %strategy, "merge contributed nothing new");
            let report = MergeReport {
                strategy,
                conflicts,
                sections_added: Vec::new(),
                sections_modified: Vec::new(),
                metadata_delta,
                withheld,
                noop: true,
            };
            return (existing.clone(), report);
        }

        let mut merged = existing.clone();
        merged.sections = changes.sections;
        merged.metadata = metadata;
        merged.metadata.updated_at = now;
        if strategy == MergeStrategy::Replace && !changes.modified.is_empty() {
            merged.metadata.original_confidence = existing
                .metadata
                .original_confidence
                .or(Some(existing.metadata.confidence));
        }
        merged.revision = existing.revision + 1;

        let report = MergeReport {
            strategy,
            conflicts,
            sections_added: changes.added,
            sections_modified: changes.modified,
            metadata_delta,
            withheld,
            noop: false,
        };

        for conflict in report.conflicts.iter().filter(|c| c.resolution == Resolution::Unresolved) {
            warn!(
                doc_id = %existing.id,
                kind = %conflict.kind,
                severity = %conflict.severity,
                section = ?conflict.section,
                "unresolved conflict: {}",
                conflict.description
            );
        }
        info!(
            doc_id = %existing.id,
            revision = merged.revision,
            %strategy,
            added = report.sections_added.len(),
            modified = report.sections_modified.len(),
            conflicts = report.conflicts.len(),
            "merge computed"
        );

        (merged, report)
    }

    fn metadata_conflict(
        &self,
        existing: &DocumentMetadata,
        candidate: &CandidateMetadata,
        resolution: Resolution,
    ) -> Option<Conflict> {
        let delta = (existing.confidence - candidate.confidence).abs();
        if delta <= self.config.confidence_delta {
            return None;
        }
        Some(Conflict {
            kind: ConflictKind::Metadata,
            severity: confidence_severity(delta),
            description: format!(
                "confidence differs by {:.2} (existing {:.2}, new {:.2}); keeping {:.2}",
                delta,
                existing.confidence,
                candidate.confidence,
                existing.confidence.max(candidate.confidence)
            ),
            section: None,
            resolution,
        })
    }

    fn structural_conflict(
        &self,
        existing: &DocumentMetadata,
        candidate: &CandidateMetadata,
        resolution: Resolution,
    ) -> Option<Conflict> {
        if existing.topics.is_empty() && candidate.topics.is_empty() {
            return None;
        }
        let overlap = jaccard(&existing.topics, &candidate.topics);
        if overlap >= self.config.min_topic_overlap {
            return None;
        }
        Some(Conflict {
            kind: ConflictKind::Structural,
            severity: Severity::Medium,
            description: format!(
                "topic overlap {:.2} is below {:.2}; the match may be a false positive",
                overlap, self.config.min_topic_overlap
            ),
            section: None,
            resolution,
        })
    }

    fn is_duplicate(&self, line: &str, tokens: &BTreeSet<String>, other: &str, other_tokens: &BTreeSet<String>) -> bool {
        if line.trim() == other.trim() {
            return true;
        }
        !tokens.is_empty()
            && !other_tokens.is_empty()
            && jaccard(tokens, other_tokens) >= self.config.dedupe_threshold
            && self.matcher.compare(line, other).is_none()
    }

    /// Incoming units of `new_body` that `existing_body` does not already
    /// contain, without repeats among themselves.
    fn novel_units(&self, existing_body: &str, new_body: &str) -> Vec<String> {
        let mut seen: Vec<(String, BTreeSet<String>)> = content_units(existing_body)
            .into_iter()
            .map(|unit| {
                let tokens = token_set(&unit);
                (unit, tokens)
            })
            .collect();

        let mut novel = Vec::new();
        for unit in content_units(new_body) {
            let tokens = token_set(&unit);
            if seen
                .iter()
                .any(|(other, other_tokens)| self.is_duplicate(&unit, &tokens, other, other_tokens))
            {
                continue;
            }
            seen.push((unit.clone(), tokens));
            novel.push(unit);
        }
        novel
    }

    fn integrate(
        &self,
        existing: &Document,
        incoming: &[Section],
        withheld: &[WithheldLine],
        date: &str,
    ) -> SectionChanges {
        let mut changes = SectionChanges::unchanged(existing);

        for section in incoming {
            let key = section.key();
            match changes.sections.iter().position(|s| s.key() == key) {
                Some(idx) => {
                    let target = &mut changes.sections[idx];
                    let additions: Vec<String> = self
                        .novel_units(&target.body, &section.body)
                        .into_iter()
                        .filter(|unit| !is_withheld(withheld, &target.heading, unit))
                        .collect();
                    if additions.is_empty() {
                        continue;
                    }
                    let block = format!("{}\n{}", update_marker(date), additions.join("\n"));
                    target.body = if target.body.trim().is_empty() {
                        block
                    } else {
                        format!("{}\n\n{}", target.body.trim_end(), block)
                    };
                    changes.modified.push(target.heading.clone());
                }
                None => {
                    changes.added.push(section.heading.clone());
                    changes.sections.push(section.clone());
                }
            }
        }

        changes
    }

    fn append(
        &self,
        existing: &Document,
        incoming: &[Section],
        withheld: &[WithheldLine],
        date: &str,
    ) -> SectionChanges {
        let mut changes = SectionChanges::unchanged(existing);

        // A lone headingless block needs no demoted heading
        let label_sections = !(incoming.len() == 1 && incoming[0].heading == SYNTHETIC_HEADING);
        let parts: Vec<String> = incoming
            .iter()
            .filter_map(|section| {
                let body = strip_withheld(&section.body, withheld, &section.heading);
                let part = match (label_sections, body.is_empty()) {
                    (true, true) => format!("**{}**", section.heading),
                    (true, false) => format!("**{}**\n\n{}", section.heading, body),
                    (false, _) => body,
                };
                (!part.is_empty()).then_some(part)
            })
            .collect();
        let body = parts.join("\n\n");

        if body.is_empty() || existing.sections.iter().any(|s| s.body == body) {
            return changes;
        }

        let heading = unique_heading(&existing.sections, &format!("Update {}", date));
        changes.added.push(heading.clone());
        changes.sections.push(Section::new(heading, body));
        changes
    }

    fn replace(
        &self,
        existing: &Document,
        incoming: &[Section],
        withheld: &[WithheldLine],
    ) -> SectionChanges {
        let mut changes = SectionChanges::unchanged(existing);

        for section in incoming {
            let body = strip_withheld(&section.body, withheld, &section.heading);
            let key = section.key();
            match changes.sections.iter().position(|s| s.key() == key) {
                // A held-back contradiction keeps the existing claim it contradicts;
                // only the section's uncontested new lines are added.
                Some(idx) if withheld.iter().any(|w| heading_key(&w.section) == key) => {
                    let target = &mut changes.sections[idx];
                    let additions = self.novel_units(&target.body, &body);
                    if additions.is_empty() {
                        continue;
                    }
                    target.body = format!("{}\n{}", target.body.trim_end(), additions.join("\n"));
                    changes.modified.push(target.heading.clone());
                }
                Some(idx) => {
                    let target = &mut changes.sections[idx];
                    if target.body != body {
                        target.body = body;
                        changes.modified.push(target.heading.clone());
                    }
                }
                None => {
                    changes.added.push(section.heading.clone());
                    changes.sections.push(Section {
                        body,
                        ..section.clone()
                    });
                }
            }
        }

        changes
    }
}

impl Default for DocumentMerger {
    fn default() -> Self {
        let config = MergeConfig::default();
        let matcher = PolarityMatcher::new(&config.polarity, config.claim_overlap);
        Self { config, matcher }
    }
}

fn content_conflict(heading: &str, finding: &SectionFinding, resolution: Resolution) -> Conflict {
    let first = &finding.hits[0];
    Conflict {
        kind: ConflictKind::Content,
        severity: finding.severity,
        description: format!(
            "{} contradicting statement(s) in '{}': new \"{}\" vs existing \"{}\"",
            finding.hits.len(),
            heading,
            truncate_chars(&first.new_sentence, 80),
            truncate_chars(&first.existing_sentence, 80)
        ),
        section: Some(heading.to_string()),
        resolution,
    }
}

#[cfg(test)]
mod tests;
