//! Mutable HTML document model.
//!
//! `markup5ever_rcdom` trees are built from `Rc`/`RefCell` and cannot cross an
//! `.await` inside a spawned task. The parser output is therefore copied into
//! an index arena ([`Document`]) that owns plain `String`s, is `Send`, and is
//! mutated through [`NodeId`] handles.
//!
//! Nodes are never freed: detaching a subtree leaves its slots in the arena.
//! Documents live for one pass over one file, so the waste is bounded.

mod parse;
mod select;
mod serialize;

pub use select::{AttrSelector, SelectorError};

/// Handle to a node inside a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Element namespace, needed to serialize foreign content correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Html,
    Svg,
    MathMl,
    Other,
}

#[derive(Debug, Clone)]
pub struct Element {
    pub name: String,
    pub namespace: Namespace,
    attrs: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Document,
    Doctype {
        name: String,
        public_id: String,
        system_id: String,
    },
    Element(Element),
    Text(String),
    Comment(String),
    ProcessingInstruction {
        target: String,
        data: String,
    },
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// An owned, mutable HTML tree.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Document {
    /// Parse a complete HTML/XHTML document.
    pub fn parse(html: &str) -> Self {
        parse::parse_document(html)
    }

    /// Parse an HTML fragment as if it were the content of a `<body>`.
    ///
    /// The returned document's root children are the fragment's top-level
    /// nodes.
    pub fn parse_fragment(html: &str) -> Self {
        parse::parse_fragment(html)
    }

    pub(crate) fn empty() -> Self {
        Document {
            nodes: vec![Node {
                kind: NodeKind::Document,
                parent: None,
                children: Vec::new(),
            }],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes[id.0].kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[id.0].kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.element(id).is_some()
    }

    /// Tag name of an element node, `None` for every other node kind.
    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|el| el.name.as_str())
    }

    // ── Attributes ───────────────────────────────────────────────────────

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?
            .attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, id: NodeId, name: &str) -> bool {
        self.attr(id, name).is_some()
    }

    pub fn attrs(&self, id: NodeId) -> &[(String, String)] {
        self.element(id).map(|el| el.attrs.as_slice()).unwrap_or(&[])
    }

    /// Set (or overwrite) an attribute. No-op on non-element nodes.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(el) = self.element_mut(id) {
            match el.attrs.iter_mut().find(|(k, _)| k == name) {
                Some((_, v)) => *v = value,
                None => el.attrs.push((name.to_string(), value)),
            }
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        if let Some(el) = self.element_mut(id) {
            el.attrs.retain(|(k, _)| k != name);
        }
    }

    // ── Text ─────────────────────────────────────────────────────────────

    /// Concatenation of every descendant text node, in document order.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        for &child in self.children(id) {
            match self.kind(child) {
                NodeKind::Text(t) => out.push_str(t),
                NodeKind::Element(_) => self.collect_text(child, out),
                _ => {}
            }
        }
    }

    /// `true` when at least one direct child is a text node holding
    /// something other than whitespace.
    pub fn has_direct_text(&self, id: NodeId) -> bool {
        self.children(id).iter().any(|&c| match self.kind(c) {
            NodeKind::Text(t) => !t.trim().is_empty(),
            _ => false,
        })
    }

    pub fn has_element_child(&self, id: NodeId) -> bool {
        self.children(id).iter().any(|&c| self.is_element(c))
    }

    // ── Traversal ────────────────────────────────────────────────────────

    /// Every node under `id` (excluding `id`) in pre-order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// First element named `tag` in document order.
    pub fn find_element(&self, tag: &str) -> Option<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .find(|&id| self.tag_name(id) == Some(tag))
    }

    /// Elements matching `selector`, in document order.
    pub fn select(&self, selector: &AttrSelector) -> Vec<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .filter(|&id| selector.matches(self, id))
            .collect()
    }

    // ── Structure mutation ───────────────────────────────────────────────

    fn push_node(&mut self, kind: NodeKind, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            parent,
            children: Vec::new(),
        });
        id
    }

    /// Create a detached element.
    pub fn create_element(&mut self, name: &str, attrs: Vec<(String, String)>) -> NodeId {
        self.push_node(
            NodeKind::Element(Element {
                name: name.to_string(),
                namespace: Namespace::Html,
                attrs,
            }),
            None,
        )
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    /// Remove `id` from its parent's child list. The node stays in the arena.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|&c| c != id);
        }
    }

    /// Insert `new` as the next sibling of `anchor`.
    ///
    /// Returns `false` when `anchor` has no parent.
    pub fn insert_after(&mut self, anchor: NodeId, new: NodeId) -> bool {
        let Some(parent) = self.nodes[anchor.0].parent else {
            return false;
        };
        self.detach(new);
        let siblings = &mut self.nodes[parent.0].children;
        let pos = siblings
            .iter()
            .position(|&c| c == anchor)
            .map(|p| p + 1)
            .unwrap_or(siblings.len());
        siblings.insert(pos, new);
        self.nodes[new.0].parent = Some(parent);
        true
    }

    /// Deep-copy the subtree rooted at `id`. The copy is detached.
    pub fn clone_subtree(&mut self, id: NodeId) -> NodeId {
        let kind = self.nodes[id.0].kind.clone();
        let copy = self.push_node(kind, None);
        let children = self.nodes[id.0].children.clone();
        for child in children {
            let child_copy = self.clone_subtree(child);
            self.nodes[child_copy.0].parent = Some(copy);
            self.nodes[copy.0].children.push(child_copy);
        }
        copy
    }

    /// Copy a subtree from another document into this one. The copy is
    /// detached.
    fn import(&mut self, other: &Document, id: NodeId) -> NodeId {
        let copy = self.push_node(other.kind(id).clone(), None);
        for &child in other.children(id) {
            let child_copy = self.import(other, child);
            self.nodes[child_copy.0].parent = Some(copy);
            self.nodes[copy.0].children.push(child_copy);
        }
        copy
    }

    /// Replace the children of `id` with the parsed nodes of `html`.
    pub fn set_inner_html(&mut self, id: NodeId, html: &str) {
        let old = std::mem::take(&mut self.nodes[id.0].children);
        for child in old {
            self.nodes[child.0].parent = None;
        }
        let fragment = Document::parse_fragment(html);
        for &top in fragment.children(fragment.root()) {
            let copy = self.import(&fragment, top);
            self.nodes[copy.0].parent = Some(id);
            self.nodes[id.0].children.push(copy);
        }
    }

    // ── Serialization ────────────────────────────────────────────────────

    /// Serialize the whole document.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for &child in self.children(self.root) {
            serialize::write_node(self, child, &mut out);
        }
        out
    }

    /// Serialize the children of `id`.
    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        for &child in self.children(id) {
            serialize::write_node(self, child, &mut out);
        }
        out
    }

    /// Serialize `id` itself, including its own tag.
    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        serialize::write_node(self, id, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><title>T</title></head><body><p id="a">Hello <b>world</b></p><p id="b">Second</p></body></html>"#;

    #[test]
    fn parse_and_query_attributes() {
        let doc = Document::parse(PAGE);
        let p = doc.find_element("p").unwrap();
        assert_eq!(doc.attr(p, "id"), Some("a"));
        assert_eq!(doc.text_content(p), "Hello world");
        assert!(doc.has_direct_text(p));
        assert!(doc.has_element_child(p));
    }

    #[test]
    fn set_and_remove_attr() {
        let mut doc = Document::parse(PAGE);
        let p = doc.find_element("p").unwrap();
        doc.set_attr(p, "content-id", "x");
        doc.set_attr(p, "content-id", "y");
        assert_eq!(doc.attr(p, "content-id"), Some("y"));
        assert_eq!(doc.attrs(p).len(), 2);
        doc.remove_attr(p, "content-id");
        assert!(!doc.has_attr(p, "content-id"));
    }

    #[test]
    fn clone_and_insert_after_preserves_order() {
        let mut doc = Document::parse(PAGE);
        let p = doc.find_element("p").unwrap();
        let copy = doc.clone_subtree(p);
        doc.set_attr(copy, "id", "a2");
        assert!(doc.insert_after(p, copy));

        let body = doc.find_element("body").unwrap();
        let ids: Vec<_> = doc
            .children(body)
            .iter()
            .filter_map(|&c| doc.attr(c, "id"))
            .collect();
        assert_eq!(ids, vec!["a", "a2", "b"]);
        // the original is untouched by edits to the copy
        assert_eq!(doc.attr(p, "id"), Some("a"));
    }

    #[test]
    fn set_inner_html_replaces_children() {
        let mut doc = Document::parse(PAGE);
        let p = doc.find_element("p").unwrap();
        doc.set_inner_html(p, "Bonjour <b>le monde</b>");
        assert_eq!(doc.inner_html(p), "Bonjour <b>le monde</b>");
        assert_eq!(doc.text_content(p), "Bonjour le monde");
    }

    #[test]
    fn detached_nodes_are_not_serialized() {
        let mut doc = Document::parse(PAGE);
        let p = doc.find_element("p").unwrap();
        doc.detach(p);
        assert!(!doc.to_html().contains("Hello"));
    }
}
