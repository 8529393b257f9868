//! HTML fragment to XHTML.
//!
//! Rendered Markdown may carry raw HTML (`<br>`, `<img ...>`, unclosed
//! `<p>`), but EPUB pages are XML. The fragment is parsed with html5ever the
//! way a browser would and the resulting tree is written back out as
//! well-formed XHTML.

use html5ever::driver::ParseOpts;
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::tree_builder::{ElementFlags, NodeOrText, QuirksMode, TreeSink};
use html5ever::{Attribute, Namespace, QualName, ns, parse_document};
use quick_xml::escape::escape;
use std::borrow::Cow;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

type Handle = Rc<Node>;

enum NodeData {
    Document,
    Element {
        name: QualName,
        attrs: RefCell<Vec<Attribute>>,
    },
    Text(RefCell<String>),
    /// Comments and processing instructions; never written out.
    Comment,
}

struct Node {
    data: NodeData,
    parent: RefCell<Option<Weak<Node>>>,
    children: RefCell<Vec<Handle>>,
}

impl Node {
    fn new(data: NodeData) -> Handle {
        Rc::new(Node {
            data,
            parent: RefCell::new(None),
            children: RefCell::new(Vec::new()),
        })
    }

    fn parent(&self) -> Option<Handle> {
        self.parent.borrow().as_ref().and_then(Weak::upgrade)
    }
}

fn detach(node: &Handle) {
    if let Some(parent) = node.parent() {
        parent
            .children
            .borrow_mut()
            .retain(|child| !Rc::ptr_eq(child, node));
    }
    node.parent.replace(None);
}

fn insert_child(parent: &Handle, index: usize, child: Handle) {
    detach(&child);
    child.parent.replace(Some(Rc::downgrade(parent)));
    let mut children = parent.children.borrow_mut();
    let index = index.min(children.len());
    children.insert(index, child);
}

fn push_text(parent: &Handle, index: usize, text: &str) {
    if index > 0 {
        let children = parent.children.borrow();
        if let Some(NodeData::Text(existing)) = children.get(index - 1).map(|c| &c.data) {
            existing.borrow_mut().push_str(text);
            return;
        }
    }
    insert_child(parent, index, Node::new(NodeData::Text(RefCell::new(text.to_string()))));
}

/// TreeSink building a reference-counted tree.
struct XhtmlSink {
    document: Handle,
}

impl XhtmlSink {
    fn new() -> Self {
        Self {
            document: Node::new(NodeData::Document),
        }
    }
}

impl TreeSink for XhtmlSink {
    type Handle = Handle;
    type Output = Handle;
    type ElemName<'a>
        = &'a QualName
    where
        Self: 'a;

    fn finish(self) -> Self::Output {
        self.document
    }

    fn parse_error(&self, _msg: Cow<'static, str>) {
        // Lenient, like a browser
    }

    fn get_document(&self) -> Self::Handle {
        self.document.clone()
    }

    fn elem_name<'a>(&'a self, target: &'a Self::Handle) -> Self::ElemName<'a> {
        static EMPTY: QualName = QualName {
            prefix: None,
            ns: ns!(),
            local: html5ever::local_name!(""),
        };

        match &target.data {
            NodeData::Element { name, .. } => name,
            _ => &EMPTY,
        }
    }

    fn create_element(
        &self,
        name: QualName,
        attrs: Vec<Attribute>,
        _flags: ElementFlags,
    ) -> Self::Handle {
        Node::new(NodeData::Element {
            name,
            attrs: RefCell::new(attrs),
        })
    }

    fn create_comment(&self, _text: StrTendril) -> Self::Handle {
        Node::new(NodeData::Comment)
    }

    fn create_pi(&self, _target: StrTendril, _data: StrTendril) -> Self::Handle {
        Node::new(NodeData::Comment)
    }

    fn append(&self, parent: &Self::Handle, child: NodeOrText<Self::Handle>) {
        let end = parent.children.borrow().len();
        match child {
            NodeOrText::AppendNode(node) => insert_child(parent, end, node),
            NodeOrText::AppendText(text) => push_text(parent, end, &text),
        }
    }

    fn append_based_on_parent_node(
        &self,
        element: &Self::Handle,
        prev_element: &Self::Handle,
        child: NodeOrText<Self::Handle>,
    ) {
        if element.parent().is_some() {
            self.append_before_sibling(element, child);
        } else {
            self.append(prev_element, child);
        }
    }

    fn append_doctype_to_document(
        &self,
        _name: StrTendril,
        _public_id: StrTendril,
        _system_id: StrTendril,
    ) {
        // The page template writes its own DOCTYPE
    }

    fn get_template_contents(&self, target: &Self::Handle) -> Self::Handle {
        target.clone()
    }

    fn same_node(&self, x: &Self::Handle, y: &Self::Handle) -> bool {
        Rc::ptr_eq(x, y)
    }

    fn set_quirks_mode(&self, _mode: QuirksMode) {}

    fn append_before_sibling(&self, sibling: &Self::Handle, new_node: NodeOrText<Self::Handle>) {
        let Some(parent) = sibling.parent() else {
            return;
        };

        if let NodeOrText::AppendNode(node) = &new_node {
            detach(node);
        }
        let Some(index) = parent
            .children
            .borrow()
            .iter()
            .position(|child| Rc::ptr_eq(child, sibling))
        else {
            return;
        };

        match new_node {
            NodeOrText::AppendNode(node) => insert_child(&parent, index, node),
            NodeOrText::AppendText(text) => push_text(&parent, index, &text),
        }
    }

    fn add_attrs_if_missing(&self, target: &Self::Handle, attrs: Vec<Attribute>) {
        if let NodeData::Element {
            attrs: existing, ..
        } = &target.data
        {
            let mut existing = existing.borrow_mut();
            for attr in attrs {
                if !existing.iter().any(|a| a.name == attr.name) {
                    existing.push(attr);
                }
            }
        }
    }

    fn remove_from_parent(&self, target: &Self::Handle) {
        detach(target);
    }

    fn reparent_children(&self, node: &Self::Handle, new_parent: &Self::Handle) {
        let children = node.children.take();
        let mut adopted = new_parent.children.borrow_mut();
        for child in children {
            child.parent.replace(Some(Rc::downgrade(new_parent)));
            adopted.push(child);
        }
    }
}

/// Rewrites an HTML body fragment as well-formed XHTML.
///
/// Void elements are self-closed, unclosed elements are closed where the
/// HTML parser closes them, and text and attribute values are re-escaped.
/// Comments are dropped.
pub fn to_xhtml(fragment: &str) -> String {
    let html = format!("<html><head></head><body>{}</body></html>", fragment);
    let document = parse_document(XhtmlSink::new(), ParseOpts::default())
        .from_utf8()
        .one(html.as_bytes());

    let mut output = String::with_capacity(fragment.len() + fragment.len() / 8);
    if let Some(body) = find_element(&document, "body") {
        for child in body.children.borrow().iter() {
            write_node(child, &ns!(html), &mut output);
        }
    }
    output
}

fn find_element(node: &Handle, local: &str) -> Option<Handle> {
    if let NodeData::Element { name, .. } = &node.data {
        if name.ns == ns!(html) && &*name.local == local {
            return Some(node.clone());
        }
    }
    node.children
        .borrow()
        .iter()
        .find_map(|child| find_element(child, local))
}

fn write_node(node: &Handle, parent_ns: &Namespace, output: &mut String) {
    match &node.data {
        NodeData::Element { name, attrs } => {
            let tag = qualified_name(name);
            output.push('<');
            output.push_str(&tag);

            let foreign = name.ns == ns!(svg) || name.ns == ns!(mathml);
            if foreign && name.ns != *parent_ns {
                output.push_str(" xmlns=\"");
                output.push_str(&name.ns);
                output.push('"');
            }

            for attr in attrs.borrow().iter() {
                let attr_name = qualified_name(&attr.name);
                if !is_xml_name(&attr_name) || (foreign && attr_name == "xmlns") {
                    continue;
                }
                output.push(' ');
                output.push_str(&attr_name);
                output.push_str("=\"");
                output.push_str(&escape(xml_chars(&attr.value).as_ref()));
                output.push('"');
            }

            let children = node.children.borrow();
            if children.is_empty() && (foreign || is_void(name)) {
                output.push_str("/>");
                return;
            }

            output.push('>');
            for child in children.iter() {
                write_node(child, &name.ns, output);
            }
            output.push_str("</");
            output.push_str(&tag);
            output.push('>');
        }
        NodeData::Text(text) => {
            output.push_str(&escape(xml_chars(&text.borrow()).as_ref()));
        }
        NodeData::Document => {
            for child in node.children.borrow().iter() {
                write_node(child, parent_ns, output);
            }
        }
        NodeData::Comment => {}
    }
}

fn qualified_name(name: &QualName) -> String {
    match &name.prefix {
        Some(prefix) => format!("{}:{}", prefix, name.local),
        None => name.local.to_string(),
    }
}

fn is_void(name: &QualName) -> bool {
    name.ns == ns!(html)
        && matches!(
            &*name.local,
            "area"
                | "base"
                | "br"
                | "col"
                | "embed"
                | "hr"
                | "img"
                | "input"
                | "link"
                | "meta"
                | "param"
                | "source"
                | "track"
                | "wbr"
        )
}

/// HTML allows attribute names XML does not (`a"b`, `1x`); those are dropped.
fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '-' | '.' | '_' | ':'))
}

fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\t' | '\n' | '\r'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

/// Drops characters XML 1.0 cannot carry, such as stray control bytes.
fn xml_chars(text: &str) -> Cow<'_, str> {
    if text.chars().all(is_xml_char) {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text.chars().filter(|c| is_xml_char(*c)).collect())
    }
}
