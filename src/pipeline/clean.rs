//! Markup cleanup applied before marking.
//!
//! Converters often leave empty anchors (`<a id="p12"/>`) and empty `<div>`s
//! behind. Both split otherwise contiguous text into separate units, so they
//! are removed from the raw markup. Rules run in order; each is a pure
//! `&str → String` pass.

use super::{read_file, write_file_atomic, StageOutcome};
use crate::error::FileError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tracing::debug;

static RE_EMPTY_ANCHOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<a(?:\s[^>]*)?(?:/>|>\s*</a>)").unwrap());

static RE_EMPTY_DIV: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<div(?:\s[^>]*)?>\s*</div>").unwrap());

/// Apply every cleanup rule. Returns the cleaned markup and the number of
/// fragments removed.
pub fn clean_markup(input: &str) -> (String, usize) {
    let mut removed = 0;
    let mut out = input.to_string();
    for rule in [&*RE_EMPTY_ANCHOR, &*RE_EMPTY_DIV] {
        let hits = rule.find_iter(&out).count();
        if hits > 0 {
            removed += hits;
            out = rule.replace_all(&out, "").into_owned();
        }
    }
    (out, removed)
}

/// Clean one content document on disk. Written only when something changed.
pub fn clean_file(path: &Path) -> Result<StageOutcome, FileError> {
    let html = read_file(path)?;
    let (cleaned, removed) = clean_markup(&html);
    if removed == 0 {
        return Ok(StageOutcome::default());
    }
    write_file_atomic(path, &cleaned)?;
    debug!("{}: removed {} empty elements", path.display(), removed);
    Ok(StageOutcome {
        changed: true,
        count: removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_empty_anchors() {
        let (out, n) = clean_markup(r##"<p>One<a id="x"/> two<a href="#n1">  </a>.</p>"##);
        assert_eq!(out, "<p>One two.</p>");
        assert_eq!(n, 2);
    }

    #[test]
    fn keeps_anchors_with_content_and_other_a_tags() {
        let src = r#"<p><a href="x">link</a><abbr title="t">ABBR</abbr><aside/></p>"#;
        let (out, n) = clean_markup(src);
        assert_eq!(out, src);
        assert_eq!(n, 0);
    }

    #[test]
    fn removes_empty_divs() {
        let (out, n) = clean_markup("<div class=\"s\">\n  </div><div>kept</div>");
        assert_eq!(out, "<div>kept</div>");
        assert_eq!(n, 1);
    }

    #[test]
    fn clean_file_skips_unchanged_files() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("c.xhtml");
        std::fs::write(&path, "<p>fine</p>").unwrap();
        assert!(!clean_file(&path).unwrap().changed);
        std::fs::write(&path, "<p>x<a id=\"y\"></a></p>").unwrap();
        assert!(clean_file(&path).unwrap().changed);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "<p>x</p>");
    }
}
