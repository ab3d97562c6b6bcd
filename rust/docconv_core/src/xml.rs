//! A minimal owned tree over `quick-xml` events, keyed by local names.
//!
//! Package parts are small enough to hold in memory, and a tree is much easier
//! to walk than an event stream when a `w:p` needs lookahead into its `w:pPr`.

use crate::error::Result;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    fn from_start(e: &BytesStart<'_>) -> Result<Self> {
        let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
        let mut attrs = Vec::new();
        for a in e.attributes() {
            let a = a.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(a.key.local_name().as_ref()).into_owned();
            let value = a.unescape_value()?.into_owned();
            attrs.push((key, value));
        }
        Ok(Self {
            name,
            attrs,
            children: Vec::new(),
        })
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// `w:val` of the child `name`, the usual shape of a WordprocessingML property.
    pub fn child_val(&self, name: &str) -> Option<&str> {
        self.child(name).and_then(|c| c.attr("val"))
    }

    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|c| match c {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.elements().find(|e| e.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.elements().filter(move |e| e.name == name)
    }

    pub fn descendant(&self, name: &str) -> Option<&XmlElement> {
        fn go<'a>(e: &'a XmlElement, name: &str, depth: usize) -> Option<&'a XmlElement> {
            if depth >= crate::dom::MAX_DEPTH {
                return None;
            }
            for c in e.elements() {
                if c.name == name {
                    return Some(c);
                }
                if let Some(x) = go(c, name, depth + 1) {
                    return Some(x);
                }
            }
            None
        }
        go(self, name, 0)
    }

    pub fn text(&self) -> String {
        fn go(e: &XmlElement, depth: usize, out: &mut String) {
            for c in &e.children {
                match c {
                    XmlNode::Text(t) => out.push_str(t),
                    XmlNode::Element(el) if depth < crate::dom::MAX_DEPTH => go(el, depth + 1, out),
                    XmlNode::Element(_) => {}
                }
            }
        }
        let mut out = String::new();
        go(self, 0, &mut out);
        out
    }
}

fn attach(stack: &mut [XmlElement], node: XmlNode) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    }
}

/// Parses `xml` and returns its document element.
pub fn parse(xml: &str) -> Result<XmlElement> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<XmlElement> = vec![XmlElement::default()];

    loop {
        match reader.read_event()? {
            Event::Start(e) => stack.push(XmlElement::from_start(&e)?),
            Event::Empty(e) => {
                let el = XmlElement::from_start(&e)?;
                attach(&mut stack, XmlNode::Element(el));
            }
            Event::End(_) => {
                if stack.len() > 1 {
                    if let Some(el) = stack.pop() {
                        attach(&mut stack, XmlNode::Element(el));
                    }
                }
            }
            Event::Text(t) => {
                let text = t.unescape()?;
                if !text.is_empty() {
                    attach(&mut stack, XmlNode::Text(text.into_owned()));
                }
            }
            Event::CData(c) => {
                let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                attach(&mut stack, XmlNode::Text(text));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    // Unclosed elements in a truncated part are kept rather than rejected.
    while stack.len() > 1 {
        if let Some(el) = stack.pop() {
            attach(&mut stack, XmlNode::Element(el));
        }
    }
    let root = stack.pop().unwrap_or_default();
    Ok(root
        .children
        .into_iter()
        .find_map(|c| match c {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
        .unwrap_or_default())
}

/// XML 1.0 `Char`: tab, newline and carriage return are the only C0 controls,
/// and U+FFFE / U+FFFF are excluded. Other code points are dropped by the escapers.
pub fn is_xml_char(ch: char) -> bool {
    matches!(ch, '\t' | '\n' | '\r') || (ch >= ' ' && ch != '\u{FFFE}' && ch != '\u{FFFF}')
}

pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ if !is_xml_char(ch) => {}
            _ => out.push(ch),
        }
    }
    out
}

pub fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ if !is_xml_char(ch) => {}
            _ => out.push(ch),
        }
    }
    out
}
