//! Attribute selectors.
//!
//! The pipeline only ever asks "elements that have these attributes and lack
//! those", so this supports exactly that subset of CSS:
//!
//! ```text
//! tag? ( "[" attr "]" | ":not([" attr "])" )*
//! ```

use super::{Document, NodeId};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported selector '{selector}': {reason}")]
pub struct SelectorError {
    pub selector: String,
    pub reason: String,
}

/// A compiled attribute-presence / attribute-absence selector.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttrSelector {
    tag: Option<String>,
    present: Vec<String>,
    absent: Vec<String>,
}

impl AttrSelector {
    pub fn parse(selector: &str) -> Result<Self, SelectorError> {
        let fail = |reason: &str| SelectorError {
            selector: selector.to_string(),
            reason: reason.to_string(),
        };

        let mut out = AttrSelector::default();
        let mut rest = selector.trim();

        let tag_len = rest
            .find(|c: char| c == '[' || c == ':')
            .unwrap_or(rest.len());
        if tag_len > 0 {
            let tag = &rest[..tag_len];
            if !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                return Err(fail("invalid tag name"));
            }
            out.tag = Some(tag.to_ascii_lowercase());
            rest = &rest[tag_len..];
        }

        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix(":not([") {
                let end = after.find("])").ok_or_else(|| fail("unterminated :not(["))?;
                out.absent.push(validate_attr(&after[..end]).map_err(|r| fail(r))?);
                rest = &after[end + 2..];
            } else if let Some(after) = rest.strip_prefix('[') {
                let end = after.find(']').ok_or_else(|| fail("unterminated ["))?;
                out.present.push(validate_attr(&after[..end]).map_err(|r| fail(r))?);
                rest = &after[end + 1..];
            } else {
                return Err(fail("expected '[' or ':not(['"));
            }
        }

        if out.tag.is_none() && out.present.is_empty() && out.absent.is_empty() {
            return Err(fail("empty selector"));
        }
        Ok(out)
    }

    /// Build directly from attribute lists.
    pub fn attributes(present: &[&str], absent: &[&str]) -> Self {
        AttrSelector {
            tag: None,
            present: present.iter().map(|s| s.to_string()).collect(),
            absent: absent.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn matches(&self, doc: &Document, id: NodeId) -> bool {
        let Some(tag) = doc.tag_name(id) else {
            return false;
        };
        if let Some(want) = &self.tag {
            if !tag.eq_ignore_ascii_case(want) {
                return false;
            }
        }
        self.present.iter().all(|a| doc.has_attr(id, a))
            && !self.absent.iter().any(|a| doc.has_attr(id, a))
    }
}

fn validate_attr(name: &str) -> Result<String, &'static str> {
    let name = name.trim();
    if name.is_empty() {
        return Err("empty attribute name");
    }
    if name
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '=' | '"' | '\'' | '[' | ']'))
    {
        return Err("only attribute presence is supported");
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_presence_and_absence() {
        let sel = AttrSelector::parse("[content-id]:not([translated-by])").unwrap();
        assert_eq!(sel, AttrSelector::attributes(&["content-id"], &["translated-by"]));
    }

    #[test]
    fn parses_tag_prefix() {
        let sel = AttrSelector::parse("meta[charset]").unwrap();
        assert_eq!(sel.tag.as_deref(), Some("meta"));
        assert_eq!(sel.present, vec!["charset".to_string()]);
    }

    #[test]
    fn rejects_value_predicates() {
        assert!(AttrSelector::parse("[lang=en]").is_err());
        assert!(AttrSelector::parse("[content-id").is_err());
        assert!(AttrSelector::parse("").is_err());
    }

    #[test]
    fn selects_in_document_order() {
        let doc = Document::parse(
            r#"<html><body><p content-id="1">a</p><div><p content-id="2" translated-by="x">b</p><p content-id="3">c</p></div></body></html>"#,
        );
        let sel = AttrSelector::parse("[content-id]:not([translated-by])").unwrap();
        let ids: Vec<_> = doc
            .select(&sel)
            .into_iter()
            .filter_map(|n| doc.attr(n, "content-id"))
            .collect();
        assert_eq!(ids, vec!["1", "3"]);
    }
}
