//! Batching of translation units.
//!
//! Units are collected from one document in document order and grouped so a
//! batch's aggregate size never exceeds the ceiling, except that a single unit
//! larger than the ceiling travels alone. Each batch is sent as one request,
//! with every unit wrapped in a positional `<SEGMENT_i>` marker so the
//! response can be split back into units.

use super::{CONTENT_ID, UNTRANSLATED_SELECTOR};
use crate::dom::{AttrSelector, Document, NodeId};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

static UNTRANSLATED: Lazy<AttrSelector> =
    Lazy::new(|| AttrSelector::parse(UNTRANSLATED_SELECTOR).unwrap());

/// How a unit's size is measured against the batch ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeMetric {
    /// Unicode scalar values of the unit's inner HTML.
    Chars,
    /// Word count × a tokens-per-word ratio (see [`TokenEstimator`]).
    #[default]
    EstimatedTokens,
}

/// One marked element waiting for a translation.
#[derive(Debug, Clone)]
pub struct TranslationUnit {
    pub node: NodeId,
    pub content_id: String,
    pub html: String,
    /// Index among the file's untranslated units.
    pub position: usize,
    pub size: usize,
}

/// Units from one file, sent together.
#[derive(Debug, Clone)]
pub struct Batch {
    /// 0-based batch number within the file.
    pub index: usize,
    pub units: Vec<TranslationUnit>,
    pub size: usize,
}

impl Batch {
    /// The request payload: one `<SEGMENT_i>…</SEGMENT_i>` line per unit.
    pub fn render(&self) -> String {
        render_segments(self.units.iter().map(|u| u.html.as_str()))
    }
}

pub fn render_segments<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .enumerate()
        .map(|(i, html)| format!("<SEGMENT_{i}>{html}</SEGMENT_{i}>"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Words in `text`, counting each CJK character as a word of its own.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace()
        .map(|token| {
            let cjk = token.chars().filter(|&c| is_cjk(c)).count();
            let other = token.chars().any(|c| !is_cjk(c) && c.is_alphanumeric());
            cjk + usize::from(other)
        })
        .sum()
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF      // hiragana, katakana
        | 0x3400..=0x4DBF    // CJK extension A
        | 0x4E00..=0x9FFF    // CJK unified ideographs
        | 0xAC00..=0xD7AF    // hangul syllables
        | 0xF900..=0xFAFF    // compatibility ideographs
        | 0x20000..=0x2FFFF) // extensions B+
}

/// Estimates token counts from word counts, refined by real counts.
///
/// Shared by every file in a run; the ratio moves towards each observed
/// `tokens / words` sample.
#[derive(Debug)]
pub struct TokenEstimator {
    ratio: Mutex<f64>,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_RATIO)
    }
}

impl TokenEstimator {
    /// Markup-heavy text tokenises at roughly 2 tokens per whitespace word.
    pub const DEFAULT_RATIO: f64 = 2.0;

    pub fn new(ratio: f64) -> Self {
        Self {
            ratio: Mutex::new(ratio.clamp(0.5, 10.0)),
        }
    }

    pub fn ratio(&self) -> f64 {
        *self.ratio.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn estimate(&self, text: &str) -> usize {
        (count_words(text) as f64 * self.ratio()).ceil() as usize
    }

    /// Fold in a real count for a text of `words` words.
    pub fn observe(&self, words: usize, tokens: usize) {
        if words == 0 || tokens == 0 {
            return;
        }
        let sample = (tokens as f64 / words as f64).clamp(0.5, 10.0);
        let mut ratio = self.ratio.lock().unwrap_or_else(|e| e.into_inner());
        *ratio = (*ratio + sample) / 2.0;
    }

    pub fn measure(&self, metric: SizeMetric, html: &str) -> usize {
        match metric {
            SizeMetric::Chars => html.chars().count(),
            SizeMetric::EstimatedTokens => self.estimate(html),
        }
    }
}

/// Every `[content-id]:not([translated-by])` element in document order, minus
/// units whose inner HTML is empty or a single character.
pub fn collect_units(
    doc: &Document,
    metric: SizeMetric,
    estimator: &TokenEstimator,
) -> Vec<TranslationUnit> {
    doc.select(&UNTRANSLATED)
        .into_iter()
        .enumerate()
        .filter_map(|(position, node)| {
            let html = doc.inner_html(node);
            if html.trim().chars().count() <= 1 {
                return None;
            }
            Some(TranslationUnit {
                node,
                content_id: doc.attr(node, CONTENT_ID).unwrap_or_default().to_string(),
                size: estimator.measure(metric, &html),
                html,
                position,
            })
        })
        .collect()
}

/// Group `units` into batches of at most `max_size`.
///
/// Overflow seals the current batch and the overflowing unit starts the next.
/// Order is preserved and every unit lands in exactly one batch.
pub fn batch_units(units: Vec<TranslationUnit>, max_size: usize) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current: Vec<TranslationUnit> = Vec::new();
    let mut current_size = 0usize;

    for unit in units {
        if !current.is_empty() && current_size + unit.size > max_size {
            batches.push(Batch {
                index: batches.len(),
                units: std::mem::take(&mut current),
                size: current_size,
            });
            current_size = 0;
        }
        current_size += unit.size;
        current.push(unit);
    }
    if !current.is_empty() {
        batches.push(Batch {
            index: batches.len(),
            units: current,
            size: current_size,
        });
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(position: usize, size: usize) -> TranslationUnit {
        TranslationUnit {
            node: Document::empty().root(),
            content_id: format!("id{position}"),
            html: format!("u{position}"),
            position,
            size,
        }
    }

    fn sizes(batches: &[Batch]) -> Vec<Vec<usize>> {
        batches
            .iter()
            .map(|b| b.units.iter().map(|u| u.size).collect())
            .collect()
    }

    #[test]
    fn batches_respect_the_ceiling() {
        let units = vec![unit(0, 4), unit(1, 4), unit(2, 4), unit(3, 1)];
        let batches = batch_units(units, 8);
        assert_eq!(sizes(&batches), vec![vec![4, 4], vec![4, 1]]);
        assert!(batches.iter().all(|b| b.size <= 8));
        assert_eq!(batches[1].index, 1);
    }

    #[test]
    fn oversized_unit_travels_alone() {
        let units = vec![unit(0, 2), unit(1, 50), unit(2, 2)];
        let batches = batch_units(units, 10);
        assert_eq!(sizes(&batches), vec![vec![2], vec![50], vec![2]]);
    }

    #[test]
    fn every_unit_lands_in_order_exactly_once() {
        let units: Vec<_> = (0..25).map(|i| unit(i, 1 + i % 7)).collect();
        let batches = batch_units(units, 12);
        let positions: Vec<_> = batches
            .iter()
            .flat_map(|b| b.units.iter().map(|u| u.position))
            .collect();
        assert_eq!(positions, (0..25).collect::<Vec<_>>());
        for b in &batches {
            assert!(b.units.len() == 1 || b.size <= 12);
        }
    }

    #[test]
    fn empty_input_yields_no_batches() {
        assert!(batch_units(Vec::new(), 10).is_empty());
    }

    #[test]
    fn render_wraps_units_in_positional_markers() {
        let batch = Batch {
            index: 0,
            units: vec![unit(7, 1), unit(8, 1)],
            size: 2,
        };
        assert_eq!(
            batch.render(),
            "<SEGMENT_0>u7</SEGMENT_0>\n<SEGMENT_1>u8</SEGMENT_1>"
        );
    }

    #[test]
    fn collect_skips_translated_and_tiny_units() {
        let doc = Document::parse(
            r#"<html><body>
                <p content-id="a">Hello</p>
                <p content-id="b" translated-by="t">Done</p>
                <p content-id="c"> x </p>
                <p>unmarked</p>
                <p content-id="d">World <b>again</b></p>
            </body></html>"#,
        );
        let units = collect_units(&doc, SizeMetric::Chars, &TokenEstimator::default());
        let ids: Vec<_> = units.iter().map(|u| u.content_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "d"]);
        assert_eq!(units[0].html, "Hello");
        assert_eq!(units[0].size, 5);
        assert_eq!(units[1].position, 2);
    }

    #[test]
    fn word_counts_treat_cjk_characters_as_words() {
        assert_eq!(count_words("Hello brave new world"), 4);
        assert_eq!(count_words("你好世界"), 4);
        assert_eq!(count_words("Xin chào"), 2);
        assert_eq!(count_words(" — "), 0);
    }

    #[test]
    fn estimator_moves_towards_observations() {
        let est = TokenEstimator::new(2.0);
        assert_eq!(est.estimate("one two three"), 6);
        est.observe(10, 10);
        assert!((est.ratio() - 1.5).abs() < 1e-9);
        est.observe(0, 10);
        assert!((est.ratio() - 1.5).abs() < 1e-9);
    }
}
