//! VXML document codec.
//!
//! The payload is an XML tree in which every `document` element is one
//! logical document. A document's `content` children carry a `name` attribute
//! and the text to analyse. Enrichment appends new `content` elements to the
//! document and the whole tree is written back out.

use std::io::Cursor;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::DocumentError;
use crate::projector::ProjectedContent;

pub const DOCUMENT_ELEMENT: &str = "document";
pub const CONTENT_ELEMENT: &str = "content";
pub const NAME_ATTRIBUTE: &str = "name";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
}

impl Node {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Self::Element(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    /// Concatenated text of this element and its descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) => e.collect_text(out),
                Node::Comment(_) => {}
            }
        }
    }

    pub fn append(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    fn from_start(start: &BytesStart<'_>) -> Result<Self, DocumentError> {
        let mut element = Self::new(std::str::from_utf8(start.name().as_ref())?);
        for attr in start.attributes() {
            let attr = attr?;
            let key = std::str::from_utf8(attr.key.as_ref())?.to_string();
            let value = attr.unescape_value()?.into_owned();
            element.attributes.push((key, value));
        }
        Ok(element)
    }

    fn write<W: std::io::Write>(&self, writer: &mut Writer<W>) -> Result<(), DocumentError> {
        let mut start = BytesStart::new(self.name.as_str());
        for (k, v) in &self.attributes {
            start.push_attribute((k.as_str(), v.as_str()));
        }
        if self.children.is_empty() {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }
        writer.write_event(Event::Start(start))?;
        for child in &self.children {
            match child {
                Node::Element(e) => e.write(writer)?,
                Node::Text(t) => writer.write_event(Event::Text(BytesText::new(t)))?,
                Node::Comment(c) => {
                    writer.write_event(Event::Comment(BytesText::from_escaped(c.as_str())))?
                }
            }
        }
        writer.write_event(Event::End(BytesEnd::new(self.name.as_str())))?;
        Ok(())
    }
}

impl From<ProjectedContent> for Element {
    fn from(content: ProjectedContent) -> Self {
        let mut element = Element::new(CONTENT_ELEMENT);
        element
            .attributes
            .push((NAME_ATTRIBUTE.to_string(), content.name));
        // The content name wins over a feature called `name`.
        element.attributes.extend(
            content
                .attributes
                .into_iter()
                .filter(|(k, _)| k != NAME_ATTRIBUTE),
        );
        if let Some(body) = content.body.filter(|b| !b.is_empty()) {
            element.children.push(Node::Text(body));
        }
        element
    }
}

/// A parsed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    pub doctype: Option<String>,
    pub root: Element,
}

impl XmlDocument {
    pub fn parse(data: &[u8]) -> Result<Self, DocumentError> {
        let text = std::str::from_utf8(data)?;
        let mut reader = Reader::from_str(text);
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;
        let mut doctype = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => stack.push(Element::from_start(&start)?),
                Event::Empty(start) => {
                    let element = Element::from_start(&start)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| DocumentError::Malformed("unbalanced end tag".into()))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(t) => {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(Node::Text(t.unescape()?.into_owned()));
                    }
                }
                Event::CData(c) => {
                    if let Some(parent) = stack.last_mut() {
                        parent
                            .children
                            .push(Node::Text(std::str::from_utf8(&c)?.to_string()));
                    }
                }
                Event::Comment(c) => {
                    if let Some(parent) = stack.last_mut() {
                        parent
                            .children
                            .push(Node::Comment(std::str::from_utf8(&c)?.to_string()));
                    }
                }
                Event::DocType(d) => doctype = Some(std::str::from_utf8(&d)?.trim().to_string()),
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(DocumentError::Malformed("unclosed element".into()));
        }
        let root = root.ok_or_else(|| DocumentError::Malformed("no root element".into()))?;
        Ok(Self { doctype, root })
    }

    /// Every logical document in the tree, outermost first.
    pub fn documents_mut(&mut self) -> Vec<&mut Element> {
        let mut out = Vec::new();
        collect_documents(&mut self.root, &mut out);
        out
    }

    /// Serialises the tree with an XML declaration.
    pub fn assemble(&self) -> Result<Vec<u8>, DocumentError> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        if let Some(doctype) = &self.doctype {
            writer.write_event(Event::DocType(BytesText::from_escaped(doctype.as_str())))?;
        }
        self.root.write(&mut writer)?;
        Ok(writer.into_inner().into_inner())
    }
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), DocumentError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(Node::Element(element));
    } else if root.is_none() {
        *root = Some(element);
    } else {
        return Err(DocumentError::Malformed("multiple root elements".into()));
    }
    Ok(())
}

fn collect_documents<'a>(element: &'a mut Element, out: &mut Vec<&'a mut Element>) {
    if element.name == DOCUMENT_ELEMENT {
        out.push(element);
        return;
    }
    for child in &mut element.children {
        if let Node::Element(e) = child {
            collect_documents(e, out);
        }
    }
}

/// The text of a document's `content` children eligible for analysis,
/// newline-joined. With `exclude_by_default` only contents named in `listed`
/// are used; otherwise every content except those named is used.
pub fn filter(document: &Element, listed: &[String], exclude_by_default: bool) -> String {
    document
        .child_elements()
        .filter(|e| e.name == CONTENT_ELEMENT)
        .filter(|e| {
            let is_listed = e
                .attribute(NAME_ATTRIBUTE)
                .is_some_and(|name| listed.iter().any(|l| l == name));
            is_listed == exclude_by_default
        })
        .map(Element::text)
        .filter(|t| !t.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
