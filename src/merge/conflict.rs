//! Conflict types and detection
//!
//! Content conflicts are found with polarity heuristics: two sentences
//! that make the same claim (high overlap of stemmed content words) where
//! exactly one is negated, or where the two use opposite words of a known
//! pair ("increases" / "decreases"). The word lists are configuration,
//! not a closed vocabulary, and the heuristic misses paraphrased
//! contradictions.

use crate::text::{jaccard, stem, tokenize};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// What disagrees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    Metadata,
    Content,
    Structural,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConflictKind::Metadata => "metadata",
            ConflictKind::Content => "content",
            ConflictKind::Structural => "structural",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// One level up, saturating at High
    pub fn raised(self) -> Severity {
        match self {
            Severity::Low => Severity::Medium,
            Severity::Medium | Severity::High => Severity::High,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        })
    }
}

/// How a conflict was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    PreferExisting,
    PreferNew,
    /// Left for a human; the conflicting new content was not written
    Unresolved,
}

/// A detected disagreement between a document and incoming content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub severity: Severity,
    pub description: String,
    /// Section the conflict was found in, for content conflicts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub resolution: Resolution,
}

/// Word lists driving content-conflict detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolarityRules {
    /// Tokens that negate a sentence
    pub negation_markers: Vec<String>,
    /// Word pairs with opposite meaning, compared after stemming
    pub opposing_pairs: Vec<(String, String)>,
    /// Words ignored when comparing claims
    pub stopwords: Vec<String>,
}

fn owned(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

impl Default for PolarityRules {
    fn default() -> Self {
        Self {
            negation_markers: owned(&[
                "not", "no", "never", "none", "nor", "neither", "cannot", "can't", "doesn't",
                "don't", "didn't", "isn't", "aren't", "wasn't", "weren't", "won't", "wouldn't",
                "shouldn't", "hasn't", "haven't", "hadn't", "without",
            ]),
            opposing_pairs: [
                ("increase", "decrease"),
                ("improve", "degrade"),
                ("improve", "worsen"),
                ("faster", "slower"),
                ("higher", "lower"),
                ("more", "less"),
                ("better", "worse"),
                ("effective", "ineffective"),
                ("safe", "unsafe"),
                ("succeed", "fail"),
                ("true", "false"),
                ("support", "contradict"),
                ("stable", "unstable"),
                ("accurate", "inaccurate"),
            ]
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect(),
            stopwords: owned(&[
                "the", "an", "of", "to", "in", "on", "for", "and", "or", "is", "are", "was",
                "were", "be", "been", "being", "do", "does", "did", "it", "its", "this", "that",
                "these", "those", "with", "by", "as", "at", "has", "have", "had", "will",
                "would", "can", "could", "should", "may", "might", "than",
            ]),
        }
    }
}

/// Which heuristic flagged a pair of sentences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolarityKind {
    /// Exactly one side is negated
    Negation,
    /// The sides use opposite words of a configured pair
    OpposingPair,
}

impl PolarityKind {
    fn severity(self) -> Severity {
        match self {
            PolarityKind::Negation => Severity::Medium,
            PolarityKind::OpposingPair => Severity::Low,
        }
    }
}

/// One contradicting sentence pair
#[derive(Debug, Clone, PartialEq)]
pub struct PolarityHit {
    pub kind: PolarityKind,
    /// The incoming content unit containing the sentence
    pub new_unit: String,
    pub new_sentence: String,
    pub existing_sentence: String,
}

/// All hits within one section, summarized to a single severity
#[derive(Debug, Clone, PartialEq)]
pub struct SectionFinding {
    pub severity: Severity,
    pub hits: Vec<PolarityHit>,
}

impl SectionFinding {
    /// Incoming units involved in at least one hit, in order, deduplicated
    pub fn conflicting_units(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.hits
            .iter()
            .filter(|h| seen.insert(h.new_unit.clone()))
            .map(|h| h.new_unit.clone())
            .collect()
    }
}

/// Hits at which a section's severity is raised one level
const MANY_HITS: usize = 3;

/// Minimum claim tokens for a sentence to be compared at all
const MIN_CLAIM_TOKENS: usize = 2;

struct Claim {
    negated: bool,
    /// Stemmed content words, markers and stopwords removed
    words: BTreeSet<String>,
}

/// Compiled form of [`PolarityRules`]
pub struct PolarityMatcher {
    negations: BTreeSet<String>,
    stopwords: BTreeSet<String>,
    pairs: Vec<(String, String)>,
    pair_words: BTreeSet<String>,
    claim_overlap: f32,
}

impl PolarityMatcher {
    pub fn new(rules: &PolarityRules, claim_overlap: f32) -> Self {
        let normalize = |w: &String| w.trim().to_lowercase().replace('\u{2019}', "'");
        let pairs: Vec<(String, String)> = rules
            .opposing_pairs
            .iter()
            .map(|(a, b)| (stem(&normalize(a)), stem(&normalize(b))))
            .collect();
        let pair_words = pairs
            .iter()
            .flat_map(|(a, b)| [a.clone(), b.clone()])
            .collect();
        Self {
            negations: rules.negation_markers.iter().map(normalize).collect(),
            stopwords: rules.stopwords.iter().map(normalize).collect(),
            pairs,
            pair_words,
            claim_overlap,
        }
    }

    fn claim(&self, sentence: &str) -> Claim {
        let mut negated = false;
        let mut words = BTreeSet::new();
        for token in tokenize(sentence) {
            if self.negations.contains(&token) {
                negated = !negated;
            } else if !self.stopwords.contains(&token) {
                words.insert(stem(&token));
            }
        }
        Claim { negated, words }
    }

    fn opposed(&self, a: &BTreeSet<String>, b: &BTreeSet<String>) -> bool {
        self.pairs.iter().any(|(x, y)| {
            (a.contains(x) && b.contains(y) && !a.contains(y) && !b.contains(x))
                || (a.contains(y) && b.contains(x) && !a.contains(x) && !b.contains(y))
        })
    }

    /// Classify a sentence pair, if it contradicts.
    pub fn compare(&self, new_sentence: &str, existing_sentence: &str) -> Option<PolarityKind> {
        let new = self.claim(new_sentence);
        let old = self.claim(existing_sentence);

        let opposed = self.opposed(&new.words, &old.words);
        let negation_differs = new.negated != old.negated;

        // A negated opposite ("does not decrease" vs "increases") agrees
        let kind = match (negation_differs, opposed) {
            (true, false) => PolarityKind::Negation,
            (false, true) => PolarityKind::OpposingPair,
            _ => return None,
        };

        let (new_words, old_words): (BTreeSet<String>, BTreeSet<String>) = if opposed {
            (
                new.words.difference(&self.pair_words).cloned().collect(),
                old.words.difference(&self.pair_words).cloned().collect(),
            )
        } else {
            (new.words, old.words)
        };
        if new_words.len() < MIN_CLAIM_TOKENS || old_words.len() < MIN_CLAIM_TOKENS {
            return None;
        }
        if jaccard(&new_words, &old_words) < self.claim_overlap {
            return None;
        }
        Some(kind)
    }

    /// Compare every sentence of the novel incoming units with every
    /// existing sentence of the same section.
    pub fn scan_section(&self, novel_units: &[String], existing_units: &[String]) -> Option<SectionFinding> {
        let existing: Vec<&str> = existing_units
            .iter()
            .filter(|u| !is_code_block(u))
            .flat_map(|u| split_sentences(u))
            .collect();

        let mut hits = Vec::new();
        for unit in novel_units.iter().filter(|u| !is_code_block(u)) {
            for new_sentence in split_sentences(unit) {
                for old_sentence in &existing {
                    if let Some(kind) = self.compare(new_sentence, old_sentence) {
                        hits.push(PolarityHit {
                            kind,
                            new_unit: unit.clone(),
                            new_sentence: new_sentence.to_string(),
                            existing_sentence: old_sentence.to_string(),
                        });
                    }
                }
            }
        }

        let mut severity = hits.iter().map(|h| h.kind.severity()).max()?;
        if hits.len() >= MANY_HITS {
            severity = severity.raised();
        }
        Some(SectionFinding { severity, hits })
    }
}

fn is_code_block(unit: &str) -> bool {
    let trimmed = unit.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

/// Split on sentence-ending punctuation followed by whitespace or the end.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?' | ';') {
            let at_boundary = chars.peek().map_or(true, |(_, next)| next.is_whitespace());
            if at_boundary {
                let end = idx + c.len_utf8();
                let sentence = text[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = end;
            }
        }
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

/// Severity of a confidence disagreement of `delta`.
pub fn confidence_severity(delta: f32) -> Severity {
    if delta > 0.40 {
        Severity::High
    } else if delta > 0.25 {
        Severity::Medium
    } else {
        Severity::Low
    }
}
