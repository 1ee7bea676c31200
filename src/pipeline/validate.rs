//! Per-unit validation of a returned translation.
//!
//! A translation is accepted when it keeps the source's element structure
//! (same tag names, same order, same nesting depth) and its word count stays
//! within a factor of [`MAX_WORD_RATIO`] of the source in either direction.
//! A translation identical to its source is not an error: the unit is done,
//! it just gets no sibling.

use super::batch::count_words;
use crate::dom::{Document, NodeId};
use serde::Serialize;
use std::fmt;

pub const MAX_WORD_RATIO: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    Empty,
    StructureMismatch {
        source: Vec<String>,
        translated: Vec<String>,
    },
    LengthRatio {
        source_words: usize,
        translated_words: usize,
    },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Empty => f.write_str("empty translation"),
            RejectReason::StructureMismatch { source, translated } => write!(
                f,
                "tag structure differs: [{}] vs [{}]",
                source.join(" "),
                translated.join(" ")
            ),
            RejectReason::LengthRatio {
                source_words,
                translated_words,
            } => write!(
                f,
                "word count {translated_words} is out of range for a {source_words}-word source"
            ),
        }
    }
}

/// Result of validating one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UnitOutcome {
    Accepted,
    /// The provider echoed the source unchanged.
    Identical,
    Rejected(RejectReason),
}

/// Element names with their depth below the fragment root, in document order.
pub fn tag_sequence(html: &str) -> Vec<(String, usize)> {
    let doc = Document::parse_fragment(html);
    let mut out = Vec::new();
    walk(&doc, doc.root(), 0, &mut out);
    out
}

fn walk(doc: &Document, id: NodeId, depth: usize, out: &mut Vec<(String, usize)>) {
    for &child in doc.children(id) {
        if let Some(tag) = doc.tag_name(child) {
            out.push((tag.to_string(), depth));
            walk(doc, child, depth + 1, out);
        }
    }
}

fn text_words(html: &str) -> usize {
    let doc = Document::parse_fragment(html);
    count_words(&doc.text_content(doc.root()))
}

pub fn validate_unit(source_html: &str, translated_html: &str) -> UnitOutcome {
    let translated = translated_html.trim();
    if translated.is_empty() {
        return UnitOutcome::Rejected(RejectReason::Empty);
    }
    if translated == source_html.trim() {
        return UnitOutcome::Identical;
    }

    let source_tags = tag_sequence(source_html);
    let translated_tags = tag_sequence(translated);
    if source_tags != translated_tags {
        let render = |tags: Vec<(String, usize)>| -> Vec<String> {
            tags.into_iter()
                .map(|(name, depth)| format!("{name}@{depth}"))
                .collect()
        };
        return UnitOutcome::Rejected(RejectReason::StructureMismatch {
            source: render(source_tags),
            translated: render(translated_tags),
        });
    }

    let source_words = text_words(source_html);
    let translated_words = text_words(translated);
    if source_words > 0
        && (translated_words > source_words * MAX_WORD_RATIO
            || translated_words * MAX_WORD_RATIO < source_words)
    {
        return UnitOutcome::Rejected(RejectReason::LengthRatio {
            source_words,
            translated_words,
        });
    }

    UnitOutcome::Accepted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_structure_is_accepted() {
        assert_eq!(
            validate_unit("<b>Hello</b> world", "<b>Bonjour</b> le monde"),
            UnitOutcome::Accepted
        );
    }

    #[test]
    fn changed_tag_is_rejected() {
        let outcome = validate_unit("<b>Hello</b> world", "<i>Bonjour</i> le monde");
        assert!(matches!(
            outcome,
            UnitOutcome::Rejected(RejectReason::StructureMismatch { .. })
        ));
    }

    #[test]
    fn changed_nesting_is_rejected() {
        let outcome = validate_unit("<b>a</b><i>b</i> c", "<b>a<i>b</i></b> c");
        assert!(matches!(
            outcome,
            UnitOutcome::Rejected(RejectReason::StructureMismatch { .. })
        ));
    }

    #[test]
    fn dropped_tag_is_rejected() {
        let outcome = validate_unit("Hello <b>world</b>", "Bonjour le monde");
        assert!(matches!(outcome, UnitOutcome::Rejected(_)));
    }

    #[test]
    fn runaway_length_is_rejected() {
        let long = "word ".repeat(30);
        let outcome = validate_unit("Hello there", &long);
        assert_eq!(
            outcome,
            UnitOutcome::Rejected(RejectReason::LengthRatio {
                source_words: 2,
                translated_words: 30
            })
        );
    }

    #[test]
    fn truncated_translation_is_rejected() {
        let source = "one two three four five six seven eight nine ten eleven";
        assert!(matches!(
            validate_unit(source, "un"),
            UnitOutcome::Rejected(RejectReason::LengthRatio { .. })
        ));
    }

    #[test]
    fn cjk_translation_is_not_penalised() {
        // 4 English words vs 9 ideographs stays inside the ratio
        assert_eq!(
            validate_unit("The weather is nice", "今天天气很好真不错"),
            UnitOutcome::Accepted
        );
    }

    #[test]
    fn identical_and_empty() {
        assert_eq!(validate_unit("Paris", " Paris "), UnitOutcome::Identical);
        assert_eq!(
            validate_unit("Paris", "  "),
            UnitOutcome::Rejected(RejectReason::Empty)
        );
    }
}
