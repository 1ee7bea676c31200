//! Content marking: decide which elements are atomic translation units and
//! fingerprint them.
//!
//! ## Rules (pre-order walk)
//!
//! 1. An element that already has `content-id`, or is a translation sibling
//!    (`translation-id`), is skipped with its subtree.
//! 2. Blacklisted tags (`math`, `figure`, `pre`, `code`, `head`, `script`,
//!    `style`, `template`, `svg`, `noscript`) are skipped with their subtree.
//! 3. A container (element children, no direct non-whitespace text) is never
//!    marked; its children are visited.
//! 4. Otherwise the trimmed text content is fingerprinted unless it is
//!    trivial (see [`is_trivial_text`]). A freshly marked element owns its
//!    subtree, which is not visited.
//! 5. Non-container elements with trivial text are descended into so nested
//!    leaves can still be marked.
//!
//! Only attributes change; running the marker twice is a no-op.

use super::{read_file, sha256_hex, write_file_atomic, StageOutcome, CONTENT_ID, TRANSLATION_ID};
use crate::dom::{Document, NodeId};
use crate::error::FileError;
use std::path::Path;
use tracing::debug;

/// Tags whose content is never translated.
pub const BLACKLIST: &[&str] = &[
    "math", "figure", "pre", "code", "head", "script", "style", "template", "svg", "noscript",
];

const TRIVIAL_SYMBOLS: &[char] = &['*', '=', '-', '_', '.', ',', ':', ';', '!', '?', '#'];

/// `content-id` value for a piece of text: lowercase hex SHA-256 of the
/// trimmed text.
pub fn fingerprint(text: &str) -> String {
    sha256_hex(text.trim())
}

/// Text that carries nothing worth translating: empty, a single character,
/// digits, separator punctuation (`---`, `* * *`), or a mix of digits and
/// that punctuation (`1.`, `12:30`).
pub fn is_trivial_text(text: &str) -> bool {
    let text = text.trim();
    if text.chars().count() < 2 {
        return true;
    }
    text.chars()
        .all(|c| c.is_whitespace() || c.is_ascii_digit() || TRIVIAL_SYMBOLS.contains(&c))
}

/// A container has at least one element child and no direct text.
pub fn is_container(doc: &Document, id: NodeId) -> bool {
    doc.has_element_child(id) && !doc.has_direct_text(id)
}

/// Mark every qualifying element in `doc`. Returns how many were newly marked.
pub fn mark_document(doc: &mut Document) -> usize {
    let mut marked = 0;
    let mut stack: Vec<NodeId> = doc.children(doc.root()).iter().rev().copied().collect();

    while let Some(id) = stack.pop() {
        if let Some(tag) = doc.tag_name(id) {
            if doc.has_attr(id, CONTENT_ID)
                || doc.has_attr(id, TRANSLATION_ID)
                || BLACKLIST.contains(&tag)
            {
                continue;
            }
            if !is_container(doc, id) {
                let text = doc.text_content(id);
                if !is_trivial_text(&text) {
                    doc.set_attr(id, CONTENT_ID, fingerprint(&text));
                    marked += 1;
                    continue;
                }
            }
        }
        stack.extend(doc.children(id).iter().rev().copied());
    }
    marked
}

/// Mark one markup string. Returns the new markup and the number of newly
/// marked elements.
pub fn mark_html(html: &str) -> (String, usize) {
    let mut doc = Document::parse(html);
    let marked = mark_document(&mut doc);
    (doc.to_html(), marked)
}

/// Mark one content document on disk. The file is rewritten only when at
/// least one element was newly marked.
pub fn mark_file(path: &Path) -> Result<StageOutcome, FileError> {
    let html = read_file(path)?;
    let mut doc = Document::parse(&html);
    let marked = mark_document(&mut doc);
    if marked == 0 {
        debug!("{}: nothing to mark", path.display());
        return Ok(StageOutcome::default());
    }
    write_file_atomic(path, &doc.to_html())?;
    debug!("{}: marked {} elements", path.display(), marked);
    Ok(StageOutcome {
        changed: true,
        count: marked,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(inner: &str) -> String {
        format!("<html><head><title>t</title></head><body>{inner}</body></html>")
    }

    fn ids(doc: &Document) -> Vec<String> {
        doc.descendants(doc.root())
            .into_iter()
            .filter_map(|n| doc.attr(n, CONTENT_ID).map(str::to_string))
            .collect()
    }

    #[test]
    fn trivial_text_classification() {
        assert!(is_trivial_text(""));
        assert!(is_trivial_text("   \n "));
        assert!(is_trivial_text("a"));
        assert!(is_trivial_text("42"));
        assert!(is_trivial_text("---"));
        assert!(is_trivial_text("* * *"));
        assert!(!is_trivial_text("Hello world"));
        assert!(!is_trivial_text("Hi"));
        assert!(!is_trivial_text("你好"));
    }

    #[test]
    fn fingerprint_is_deterministic_and_trims() {
        assert_eq!(fingerprint("Hello world"), fingerprint("  Hello world \n"));
        assert_eq!(
            fingerprint("Hello world"),
            "64ec88ca00b268e5ba1a35678a1b5316d212f4f366b2477232534a8aeca37f3c"
        );
        assert_ne!(fingerprint("Hello"), fingerprint("World"));
    }

    #[test]
    fn leaf_is_marked_container_is_not() {
        let mut doc = Document::parse(&body("<div><p>Hello world</p><p>42</p><p>---</p></div>"));
        assert_eq!(mark_document(&mut doc), 1);

        let div = doc.find_element("div").unwrap();
        assert!(!doc.has_attr(div, CONTENT_ID));
        let p = doc.find_element("p").unwrap();
        assert_eq!(doc.attr(p, CONTENT_ID), Some(fingerprint("Hello world").as_str()));
    }

    #[test]
    fn marked_element_owns_its_subtree() {
        let mut doc = Document::parse(&body("<p>Some <em>emphasised words</em> here</p>"));
        assert_eq!(mark_document(&mut doc), 1);
        let em = doc.find_element("em").unwrap();
        assert!(!doc.has_attr(em, CONTENT_ID));
    }

    #[test]
    fn blacklisted_subtrees_are_skipped() {
        let mut doc = Document::parse(&body(
            "<pre>let x = 1;</pre><figure><figcaption>A caption</figcaption></figure><p>Body text</p>",
        ));
        assert_eq!(mark_document(&mut doc), 1);
        assert_eq!(ids(&doc), vec![fingerprint("Body text")]);
    }

    #[test]
    fn list_item_with_number_prefix_is_one_unit() {
        let mut doc = Document::parse(&body("<ul><li>1. <span>First item</span></li></ul>"));
        assert_eq!(mark_document(&mut doc), 1);
        let li = doc.find_element("li").unwrap();
        assert!(doc.has_attr(li, CONTENT_ID));
        let span = doc.find_element("span").unwrap();
        assert!(!doc.has_attr(span, CONTENT_ID));
    }

    #[test]
    fn trivial_text_is_never_marked() {
        let mut doc = Document::parse(&body("<p>* <b>*</b></p><p>12</p><p>ok <i>text</i></p>"));
        assert_eq!(mark_document(&mut doc), 1);
        assert_eq!(ids(&doc), vec![fingerprint("ok text")]);
    }

    #[test]
    fn marking_is_idempotent() {
        let src = body("<section><h1>Title here</h1><p>Hello world</p><p>Again</p></section>");
        let (once, n1) = mark_html(&src);
        let (twice, n2) = mark_html(&once);
        assert_eq!(n1, 3);
        assert_eq!(n2, 0);
        assert_eq!(once, twice);
    }

    #[test]
    fn translation_siblings_are_not_marked() {
        let src = body(
            r#"<p content-id="x" translated-by="y">Hello world</p><p translation-id="y" translation-lang="French">Bonjour le monde</p>"#,
        );
        let mut doc = Document::parse(&src);
        assert_eq!(mark_document(&mut doc), 0);
    }

    #[test]
    fn mark_file_rewrites_only_when_changed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ch1.xhtml");
        std::fs::write(&path, body("<p>Hello world</p>")).unwrap();

        let first = mark_file(&path).unwrap();
        assert!(first.changed);
        assert_eq!(first.count, 1);
        let second = mark_file(&path).unwrap();
        assert!(!second.changed);
        assert!(std::fs::read_to_string(&path).unwrap().contains("content-id="));
    }
}
