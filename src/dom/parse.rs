//! html5ever → arena conversion.

use super::{Document, Element, Namespace, NodeId, NodeKind};
use html5ever::parse_document as html5_parse_document;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Handle, NodeData, RcDom};

const SVG_NS: &str = "http://www.w3.org/2000/svg";
const MATHML_NS: &str = "http://www.w3.org/1998/Math/MathML";
const HTML_NS: &str = "http://www.w3.org/1999/xhtml";

pub(super) fn parse_document(html: &str) -> Document {
    let dom = html5_parse_document(RcDom::default(), Default::default()).one(html);
    let mut doc = Document::empty();
    let root = doc.root();
    import_children(&mut doc, root, &dom.document);
    doc
}

/// Fragments are parsed inside a synthetic document so the tree builder sees
/// them in `<body>` context; the body's children become the root's children.
pub(super) fn parse_fragment(html: &str) -> Document {
    let wrapped = format!("<html><head></head><body>{html}</body></html>");
    let dom = html5_parse_document(RcDom::default(), Default::default()).one(wrapped);

    let mut doc = Document::empty();
    let root = doc.root();
    match find_body(&dom.document) {
        Some(body) => import_children(&mut doc, root, &body),
        None => import_children(&mut doc, root, &dom.document),
    }
    doc
}

fn find_body(handle: &Handle) -> Option<Handle> {
    for child in handle.children.borrow().iter() {
        if let NodeData::Element { name, .. } = &child.data {
            if &*name.local == "body" {
                return Some(child.clone());
            }
        }
        if let Some(found) = find_body(child) {
            return Some(found);
        }
    }
    None
}

fn import_children(doc: &mut Document, parent: NodeId, handle: &Handle) {
    for child in handle.children.borrow().iter() {
        import_node(doc, parent, child);
    }
}

fn import_node(doc: &mut Document, parent: NodeId, handle: &Handle) {
    let kind = match &handle.data {
        NodeData::Document => {
            import_children(doc, parent, handle);
            return;
        }
        NodeData::Doctype {
            name,
            public_id,
            system_id,
        } => NodeKind::Doctype {
            name: name.to_string(),
            public_id: public_id.to_string(),
            system_id: system_id.to_string(),
        },
        NodeData::Text { contents } => NodeKind::Text(contents.borrow().to_string()),
        NodeData::Comment { contents } => NodeKind::Comment(contents.to_string()),
        NodeData::ProcessingInstruction { target, contents } => NodeKind::ProcessingInstruction {
            target: target.to_string(),
            data: contents.to_string(),
        },
        NodeData::Element { name, attrs, .. } => {
            let attrs = attrs
                .borrow()
                .iter()
                .map(|a| {
                    let key = match &a.name.prefix {
                        Some(prefix) => format!("{}:{}", prefix, a.name.local),
                        None => a.name.local.to_string(),
                    };
                    (key, a.value.to_string())
                })
                .collect();
            NodeKind::Element(Element {
                name: name.local.to_string(),
                namespace: namespace_of(&name.ns),
                attrs,
            })
        }
    };

    let id = doc.push_node(kind, Some(parent));
    doc.nodes[parent.0].children.push(id);

    if let NodeData::Element {
        template_contents, ..
    } = &handle.data
    {
        if let Some(contents) = template_contents.borrow().as_ref() {
            import_children(doc, id, contents);
        }
    }
    import_children(doc, id, handle);
}

fn namespace_of(ns: &str) -> Namespace {
    match ns {
        HTML_NS => Namespace::Html,
        SVG_NS => Namespace::Svg,
        MATHML_NS => Namespace::MathMl,
        _ => Namespace::Other,
    }
}
