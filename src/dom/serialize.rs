//! Arena → markup.
//!
//! Output stays well-formed XHTML where the input allows it: void elements
//! and empty foreign (SVG/MathML) elements are self-closed, and the XML
//! declaration (which an HTML parser turns into a bogus comment) is restored.

use super::{Document, Namespace, NodeId, NodeKind};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &[
    "script", "style", "xmp", "iframe", "noembed", "noframes", "plaintext", "noscript",
];

pub(super) fn write_node(doc: &Document, id: NodeId, out: &mut String) {
    match doc.kind(id) {
        NodeKind::Document => {
            for &child in doc.children(id) {
                write_node(doc, child, out);
            }
        }
        NodeKind::Doctype {
            name,
            public_id,
            system_id,
        } => {
            out.push_str("<!DOCTYPE ");
            out.push_str(name);
            if !public_id.is_empty() {
                out.push_str(&format!(" PUBLIC \"{public_id}\""));
                if !system_id.is_empty() {
                    out.push_str(&format!(" \"{system_id}\""));
                }
            } else if !system_id.is_empty() {
                out.push_str(&format!(" SYSTEM \"{system_id}\""));
            }
            out.push('>');
        }
        NodeKind::Comment(text) => {
            if text.starts_with("?xml") && text.ends_with('?') {
                out.push('<');
                out.push_str(text);
                out.push('>');
            } else {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            }
        }
        NodeKind::ProcessingInstruction { target, data } => {
            out.push_str(&format!("<?{target} {data}?>"));
        }
        NodeKind::Text(text) => {
            let raw = doc
                .parent(id)
                .and_then(|p| doc.tag_name(p))
                .is_some_and(|tag| RAW_TEXT_ELEMENTS.contains(&tag));
            if raw {
                out.push_str(text);
            } else {
                escape_text(text, out);
            }
        }
        NodeKind::Element(el) => {
            out.push('<');
            out.push_str(&el.name);
            for (key, value) in &el.attrs {
                out.push(' ');
                out.push_str(key);
                out.push_str("=\"");
                escape_attr(value, out);
                out.push('"');
            }

            let children = doc.children(id);
            let html_void = el.namespace == Namespace::Html && VOID_ELEMENTS.contains(&el.name.as_str());
            let foreign_empty = el.namespace != Namespace::Html && children.is_empty();
            if html_void || foreign_empty {
                out.push_str("/>");
                return;
            }

            out.push('>');
            for &child in children {
                write_node(doc, child, out);
            }
            out.push_str("</");
            out.push_str(&el.name);
            out.push('>');
        }
    }
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::dom::Document;

    #[test]
    fn void_elements_are_self_closed() {
        let doc = Document::parse_fragment("one<br>two<img src=\"a.png\">");
        assert_eq!(doc.to_html(), "one<br/>two<img src=\"a.png\"/>");
    }

    #[test]
    fn text_and_attributes_are_escaped() {
        let doc = Document::parse_fragment("<a title=\"&quot;x&quot;\">a &amp; b &lt; c</a>");
        assert_eq!(doc.to_html(), "<a title=\"&quot;x&quot;\">a &amp; b &lt; c</a>");
    }

    #[test]
    fn style_contents_are_not_escaped() {
        let doc = Document::parse("<html><head><style>p > b { color: red; }</style></head><body></body></html>");
        assert!(doc.to_html().contains("p > b { color: red; }"));
    }

    #[test]
    fn xml_declaration_and_doctype_round_trip() {
        let src = "<?xml version=\"1.0\" encoding=\"utf-8\"?><!DOCTYPE html><html><head></head><body><p>Hi</p></body></html>";
        let out = Document::parse(src).to_html();
        assert!(out.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"), "got: {out}");
        assert!(out.contains("<!DOCTYPE html>"), "got: {out}");
        assert!(out.contains("<p>Hi</p>"), "got: {out}");
    }
}
