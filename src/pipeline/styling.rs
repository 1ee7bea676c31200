//! Bilingual display stylesheet.
//!
//! A `<style id="injected-style">` block is inserted right after `<head>` (or
//! replaced if an earlier run already injected one). Untranslated originals
//! are dimmed; `--hide` can hide either language entirely.

use super::{read_file, write_file_atomic, StageOutcome};
use crate::error::FileError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub const STYLE_ID: &str = "injected-style";

static RE_INJECTED_STYLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)<style\s+id="injected-style"[^>]*>.*?</style>"#).unwrap());
static RE_HEAD_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<head(?:\s[^>]*)?>").unwrap());
static RE_HEAD_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</head>").unwrap());

/// Which language to hide when reading the bilingual book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HideMode {
    /// Show both; originals are dimmed.
    #[default]
    None,
    /// Hide originals that have a translation.
    Source,
    /// Hide translations.
    Target,
}

impl fmt::Display for HideMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HideMode::None => "none",
            HideMode::Source => "source",
            HideMode::Target => "target",
        })
    }
}

impl FromStr for HideMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(HideMode::None),
            "source" => Ok(HideMode::Source),
            "target" => Ok(HideMode::Target),
            other => Err(format!("hide must be one of source, target, none (got '{other}')")),
        }
    }
}

/// CSS for a hide mode.
///
/// Originals whose translation turned out identical carry `translation-lang`
/// themselves; they stand for both languages and are never dimmed or hidden.
pub fn stylesheet(mode: HideMode) -> String {
    const DIM: &str = "[content-id]:not([translation-lang]) { opacity: 0.7; }";
    match mode {
        HideMode::None => DIM.to_string(),
        HideMode::Source => format!(
            "{DIM}\n[content-id][translated-by]:not([translation-lang]) {{ display: none !important; }}"
        ),
        HideMode::Target => "[translation-id] { display: none !important; }".to_string(),
    }
}

/// Insert or replace the injected style block. `None` when the markup has no
/// `<head>` to put it in.
pub fn inject_style(html: &str, mode: HideMode) -> Option<String> {
    let tag = format!("<style id=\"{STYLE_ID}\">\n{}\n</style>", stylesheet(mode));

    if let Some(m) = RE_INJECTED_STYLE.find(html) {
        return Some(format!("{}{}{}", &html[..m.start()], tag, &html[m.end()..]));
    }
    if let Some(m) = RE_HEAD_OPEN.find(html) {
        return Some(format!("{}\n{}\n{}", &html[..m.end()], tag, &html[m.end()..]));
    }
    RE_HEAD_CLOSE
        .find(html)
        .map(|m| format!("{}\n{}\n{}", &html[..m.start()], tag, &html[m.start()..]))
}

/// Apply the stylesheet to one content document on disk.
pub fn style_file(path: &Path, mode: HideMode) -> Result<StageOutcome, FileError> {
    let html = read_file(path)?;
    let styled = inject_style(&html, mode).ok_or_else(|| FileError::ReadFailed {
        path: path.to_path_buf(),
        detail: "no <head> element to inject the stylesheet into".into(),
    })?;
    if styled == html {
        return Ok(StageOutcome::default());
    }
    write_file_atomic(path, &styled)?;
    Ok(StageOutcome {
        changed: true,
        count: 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "<html><head><title>t</title></head><body><header>h</header></body></html>";

    #[test]
    fn injects_after_head_open() {
        let out = inject_style(PAGE, HideMode::None).unwrap();
        assert!(out.starts_with("<html><head>\n<style id=\"injected-style\">"));
        assert!(out.contains("opacity: 0.7"));
        // <header> is not mistaken for <head>
        assert_eq!(out.matches("injected-style").count(), 1);
    }

    #[test]
    fn replaces_existing_block() {
        let once = inject_style(PAGE, HideMode::None).unwrap();
        let twice = inject_style(&once, HideMode::Target).unwrap();
        assert_eq!(twice.matches("<style id=\"injected-style\">").count(), 1);
        assert!(twice.contains("[translation-id] { display: none !important; }"));
        assert!(!twice.contains("opacity"));
    }

    #[test]
    fn hide_source_keeps_identical_units_visible() {
        let css = stylesheet(HideMode::Source);
        assert!(css.contains("[content-id][translated-by]:not([translation-lang])"));
    }

    #[test]
    fn no_head_is_reported() {
        assert!(inject_style("<p>bare</p>", HideMode::None).is_none());
    }

    #[test]
    fn hide_mode_parses() {
        assert_eq!("Source".parse::<HideMode>().unwrap(), HideMode::Source);
        assert!("both".parse::<HideMode>().is_err());
    }
}
