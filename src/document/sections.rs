//! Heading-delimited section parsing and rendering
//!
//! Headings are found with pulldown-cmark so that `#` lines inside fenced
//! code or block quotes are not mistaken for section boundaries. Text with
//! no headings degrades to a single synthetic section instead of failing.

use super::types::{normalize_term, Section};
use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use std::collections::HashMap;
use std::ops::Range;

/// Heading given to content that has no heading of its own.
pub const SYNTHETIC_HEADING: &str = "Findings";

/// Heading given to a heading line with no text.
const UNTITLED_HEADING: &str = "Untitled";

struct HeadingSpan {
    range: Range<usize>,
    level: u8,
    text: String,
}

fn markdown_options() -> Options {
    Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS
}

/// Locate top-level headings (not nested in quotes, lists or footnotes).
fn find_headings(text: &str) -> Vec<HeadingSpan> {
    let parser = Parser::new_ext(text, markdown_options()).into_offset_iter();

    let mut spans = Vec::new();
    let mut container_depth: usize = 0;
    let mut current: Option<HeadingSpan> = None;

    for (event, range) in parser {
        match event {
            Event::Start(Tag::BlockQuote)
            | Event::Start(Tag::List(_))
            | Event::Start(Tag::FootnoteDefinition(_)) => container_depth += 1,
            Event::End(TagEnd::BlockQuote)
            | Event::End(TagEnd::List(_))
            | Event::End(TagEnd::FootnoteDefinition) => {
                container_depth = container_depth.saturating_sub(1)
            }
            Event::Start(Tag::Heading { level, .. }) if container_depth == 0 => {
                current = Some(HeadingSpan {
                    range,
                    level: level as u8,
                    text: String::new(),
                });
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some(span) = current.take() {
                    spans.push(span);
                }
            }
            Event::Text(t) | Event::Code(t) => {
                if let Some(span) = current.as_mut() {
                    span.text.push_str(&t);
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if let Some(span) = current.as_mut() {
                    span.text.push(' ');
                }
            }
            _ => {}
        }
    }

    spans
}

fn clean_body(raw: &str) -> String {
    raw.trim_start_matches(['\r', '\n']).trim_end().to_string()
}

/// Parse text into sections.
///
/// - Content before the first heading becomes a [`SYNTHETIC_HEADING`] section.
/// - Text without any heading becomes one synthetic section.
/// - Repeated headings are folded into their first occurrence, so the
///   result always has unique headings.
pub fn parse_sections(text: &str) -> Vec<Section> {
    let headings = find_headings(text);
    let mut sections: Vec<Section> = Vec::new();

    let preamble_end = headings.first().map(|h| h.range.start).unwrap_or(text.len());
    let preamble = clean_body(&text[..preamble_end]);
    if !preamble.is_empty() {
        sections.push(Section::new(SYNTHETIC_HEADING, preamble));
    }

    for (i, heading) in headings.iter().enumerate() {
        let body_end = headings
            .get(i + 1)
            .map(|next| next.range.start)
            .unwrap_or(text.len());
        let body_start = heading.range.end.min(body_end);
        let title = heading.text.split_whitespace().collect::<Vec<_>>().join(" ");
        let title = if title.is_empty() {
            UNTITLED_HEADING.to_string()
        } else {
            title
        };
        sections.push(Section {
            heading: title,
            level: heading.level.clamp(1, 6),
            body: clean_body(&text[body_start..body_end]),
        });
    }

    fold_duplicates(sections)
}

fn fold_duplicates(sections: Vec<Section>) -> Vec<Section> {
    let mut folded: Vec<Section> = Vec::with_capacity(sections.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for section in sections {
        match positions.get(&section.key()) {
            Some(&idx) => {
                if !section.body.is_empty() {
                    let target = &mut folded[idx];
                    if !target.body.is_empty() {
                        target.body.push_str("\n\n");
                    }
                    target.body.push_str(&section.body);
                }
            }
            None => {
                positions.insert(section.key(), folded.len());
                folded.push(section);
            }
        }
    }

    folded
}

/// Render sections back to heading-delimited markdown.
pub fn render_sections(sections: &[Section]) -> String {
    let mut out = String::new();
    for section in sections {
        out.push_str(&"#".repeat(section.level.clamp(1, 6) as usize));
        out.push(' ');
        out.push_str(&section.heading);
        out.push_str("\n\n");
        if !section.body.is_empty() {
            out.push_str(&section.body);
            out.push_str("\n\n");
        }
    }
    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    out.push('\n');
    out
}

/// True if `line` is only a thematic break or setext underline
/// (`---`, `***`, `===`), which would change structure if re-parsed
/// under a different neighbour.
pub fn is_rule_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= 3
        && trimmed
            .chars()
            .all(|c| matches!(c, '-' | '*' | '_' | '=' | ' '))
}

/// Split a section body into content units: single non-blank lines, with
/// fenced code blocks kept whole. Rule lines are dropped.
pub fn content_units(body: &str) -> Vec<String> {
    let mut units = Vec::new();
    let mut fence: Option<(String, Vec<&str>)> = None;

    for line in body.lines() {
        let trimmed = line.trim_start();
        if let Some((marker, lines)) = fence.as_mut() {
            lines.push(line);
            if trimmed.starts_with(marker.as_str()) {
                units.push(lines.join("\n"));
                fence = None;
            }
            continue;
        }
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            fence = Some((trimmed[..3].to_string(), vec![line]));
            continue;
        }
        if line.trim().is_empty() || is_rule_line(line) {
            continue;
        }
        units.push(line.trim_end().to_string());
    }

    // Unterminated fence: keep what we have rather than dropping it
    if let Some((_, lines)) = fence {
        units.push(lines.join("\n"));
    }

    units
}

/// Headings are matched by normalized text.
pub fn heading_key(heading: &str) -> String {
    normalize_term(heading)
}
