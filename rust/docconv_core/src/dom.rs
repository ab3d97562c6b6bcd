//! Small helpers over `markup5ever_rcdom`.
//!
//! Every recursive walk in the crate is bounded by [`MAX_DEPTH`]; anything
//! nested deeper is left as-is.

use html5ever::parse_document;
use html5ever::serialize::{serialize, SerializeOpts, TraversalScope};
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::{Attribute, LocalName, Namespace, QualName};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom, SerializableHandle};
use std::cell::RefCell;
use std::rc::Rc;

pub const MAX_DEPTH: usize = 256;

const HTML_NS: &str = "http://www.w3.org/1999/xhtml";

pub fn parse_html(input: &str) -> RcDom {
    parse_document(RcDom::default(), Default::default()).one(input)
}

pub fn tag_lower(node: &Handle) -> Option<String> {
    match &node.data {
        NodeData::Element { name, .. } => Some(name.local.to_string().to_ascii_lowercase()),
        _ => None,
    }
}

pub fn is_tag(node: &Handle, tag: &str) -> bool {
    match &node.data {
        NodeData::Element { name, .. } => (&*name.local).eq_ignore_ascii_case(tag),
        _ => false,
    }
}

pub fn attr_get(node: &Handle, name: &str) -> Option<String> {
    match &node.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|a| (&*a.name.local).eq_ignore_ascii_case(name))
            .map(|a| a.value.to_string()),
        _ => None,
    }
}

pub fn set_attr(node: &Handle, name: &str, value: &str) {
    let NodeData::Element { attrs, .. } = &node.data else {
        return;
    };
    let mut attrs = attrs.borrow_mut();
    if let Some(a) = attrs.iter_mut().find(|a| (&*a.name.local).eq_ignore_ascii_case(name)) {
        a.value = StrTendril::from(value);
        return;
    }
    attrs.push(Attribute {
        name: QualName::new(None, Namespace::from(""), LocalName::from(name)),
        value: StrTendril::from(value),
    });
}

pub fn element_children(node: &Handle) -> Vec<Handle> {
    node.children
        .borrow()
        .iter()
        .filter(|c| matches!(c.data, NodeData::Element { .. }))
        .cloned()
        .collect()
}

pub fn find_element(node: &Handle, tag: &str) -> Option<Handle> {
    fn go(node: &Handle, tag: &str, depth: usize) -> Option<Handle> {
        if is_tag(node, tag) {
            return Some(node.clone());
        }
        if depth >= MAX_DEPTH {
            tracing::warn!(depth, "DOM nesting limit reached; subtree skipped");
            return None;
        }
        for c in node.children.borrow().iter() {
            if let Some(x) = go(c, tag, depth + 1) {
                return Some(x);
            }
        }
        None
    }
    go(node, tag, 0)
}

pub fn find_body_children(dom: &RcDom) -> Vec<Handle> {
    match find_element(&dom.document, "body") {
        Some(body) => body.children.borrow().clone(),
        None => dom.document.children.borrow().clone(),
    }
}

/// Elements named in `tags`, in document order. Matching elements are not
/// searched further, so only the outermost match of a nested pair is returned.
pub fn collect_outermost(node: &Handle, tags: &[&str]) -> Vec<Handle> {
    fn go(node: &Handle, tags: &[&str], depth: usize, out: &mut Vec<Handle>) {
        if tags.iter().any(|t| is_tag(node, t)) {
            out.push(node.clone());
            return;
        }
        if depth >= MAX_DEPTH {
            tracing::warn!(depth, "DOM nesting limit reached; subtree skipped");
            return;
        }
        for c in node.children.borrow().iter() {
            go(c, tags, depth + 1, out);
        }
    }
    let mut out = Vec::new();
    go(node, tags, 0, &mut out);
    out
}

/// Every element named `tag`, nested ones included.
pub fn collect_elements(node: &Handle, tag: &str) -> Vec<Handle> {
    fn go(node: &Handle, tag: &str, depth: usize, out: &mut Vec<Handle>) {
        if is_tag(node, tag) {
            out.push(node.clone());
        }
        if depth >= MAX_DEPTH {
            tracing::warn!(depth, "DOM nesting limit reached; subtree skipped");
            return;
        }
        for c in node.children.borrow().iter() {
            go(c, tag, depth + 1, out);
        }
    }
    let mut out = Vec::new();
    go(node, tag, 0, &mut out);
    out
}

pub fn text_content(node: &Handle) -> String {
    fn go(node: &Handle, depth: usize, out: &mut String) {
        if let NodeData::Text { contents } = &node.data {
            out.push_str(&contents.borrow());
        }
        if depth >= MAX_DEPTH {
            tracing::warn!(depth, "DOM nesting limit reached; subtree skipped");
            return;
        }
        for c in node.children.borrow().iter() {
            go(c, depth + 1, out);
        }
    }
    let mut out = String::new();
    go(node, 0, &mut out);
    out
}

pub fn new_element(tag: &str, attrs: &[(&str, &str)]) -> Handle {
    Node::new(NodeData::Element {
        name: QualName::new(None, Namespace::from(HTML_NS), LocalName::from(tag)),
        attrs: RefCell::new(
            attrs
                .iter()
                .map(|(k, v)| Attribute {
                    name: QualName::new(None, Namespace::from(""), LocalName::from(*k)),
                    value: StrTendril::from(*v),
                })
                .collect(),
        ),
        template_contents: RefCell::new(None),
        mathml_annotation_xml_integration_point: false,
    })
}

pub fn new_text(text: &str) -> Handle {
    Node::new(NodeData::Text {
        contents: RefCell::new(StrTendril::from(text)),
    })
}

pub fn prepend_child(parent: &Handle, child: Handle) {
    child.parent.set(Some(Rc::downgrade(parent)));
    parent.children.borrow_mut().insert(0, child);
}

pub fn parent_of(node: &Handle) -> Option<Handle> {
    let weak = node.parent.take();
    let parent = weak.as_ref().and_then(|w| w.upgrade());
    node.parent.set(weak);
    parent
}

/// Swap `old` for `new` in `old`'s parent. Returns false for detached nodes.
pub fn replace_node(old: &Handle, new: Handle) -> bool {
    let Some(parent) = parent_of(old) else {
        return false;
    };
    let mut children = parent.children.borrow_mut();
    let Some(idx) = children.iter().position(|c| Rc::ptr_eq(c, old)) else {
        return false;
    };
    new.parent.set(Some(Rc::downgrade(&parent)));
    old.parent.set(None);
    children[idx] = new;
    true
}

/// Detach `node` from its parent. Returns false for detached nodes.
pub fn remove_node(node: &Handle) -> bool {
    let Some(parent) = parent_of(node) else {
        return false;
    };
    let mut children = parent.children.borrow_mut();
    let before = children.len();
    children.retain(|c| !Rc::ptr_eq(c, node));
    node.parent.set(None);
    children.len() != before
}

pub fn serialize_document(dom: &RcDom) -> String {
    let mut buf: Vec<u8> = Vec::new();
    let handle: SerializableHandle = dom.document.clone().into();
    // Writing into a Vec cannot fail.
    let _ = serialize(&mut buf, &handle, SerializeOpts::default());
    String::from_utf8_lossy(&buf).into_owned()
}

pub fn inner_html(node: &Handle) -> String {
    let mut buf: Vec<u8> = Vec::new();
    let handle: SerializableHandle = node.clone().into();
    let opts = SerializeOpts {
        traversal_scope: TraversalScope::ChildrenOnly(None),
        ..Default::default()
    };
    let _ = serialize(&mut buf, &handle, opts);
    String::from_utf8_lossy(&buf).into_owned()
}

pub fn outer_html(node: &Handle) -> String {
    let mut buf: Vec<u8> = Vec::new();
    let handle: SerializableHandle = node.clone().into();
    let opts = SerializeOpts {
        traversal_scope: TraversalScope::IncludeNode,
        ..Default::default()
    };
    let _ = serialize(&mut buf, &handle, opts);
    String::from_utf8_lossy(&buf).into_owned()
}

pub fn collapse_ws(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_ws = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !in_ws {
                out.push(' ');
                in_ws = true;
            }
        } else {
            out.push(ch);
            in_ws = false;
        }
    }
    out
}

/// `align="center"`, a `text-align:center` style, or a class mentioning
/// `center` (e.g. `text-center`).
pub fn is_centered(node: &Handle) -> bool {
    let align = attr_get(node, "align").unwrap_or_default().to_ascii_lowercase();
    if align == "center" {
        return true;
    }
    let style = attr_get(node, "style").unwrap_or_default().to_ascii_lowercase();
    if style.contains("text-align:center") || style.contains("text-align: center") {
        return true;
    }
    let class = attr_get(node, "class").unwrap_or_default().to_ascii_lowercase();
    class.contains("center")
}

pub fn sanitize_href(href: &str) -> Option<String> {
    let h = href.trim();
    if h.is_empty() {
        return None;
    }
    let low = h.to_ascii_lowercase();
    if low.starts_with("javascript:") || low.starts_with("data:") || low.starts_with("vbscript:") {
        return None;
    }
    Some(h.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centered_detection_covers_align_style_and_class() {
        let dom = parse_html(
            r#"<p id="a" align="CENTER">a</p><p style="color:red; text-align: center">b</p><div class="text-center">c</div><p>d</p>"#,
        );
        let body = find_body_children(&dom);
        let flags: Vec<bool> = body.iter().map(is_centered).collect();
        assert_eq!(flags, vec![true, true, true, false]);
    }

    #[test]
    fn replace_node_keeps_position() {
        let dom = parse_html("<p>a<img src=x.png>b</p>");
        let img = find_element(&dom.document, "img").unwrap();
        assert!(replace_node(&img, new_text("TOKEN")));
        let p = find_element(&dom.document, "p").unwrap();
        assert_eq!(text_content(&p), "aTOKENb");
        assert!(find_element(&dom.document, "img").is_none());
    }

    #[test]
    fn remove_node_detaches_subtree() {
        let dom = parse_html("<p>a</p><script>if (a<b) {}</script><p>b</p>");
        let script = find_element(&dom.document, "script").unwrap();
        assert!(remove_node(&script));
        assert!(!remove_node(&script));
        assert!(find_element(&dom.document, "script").is_none());
        assert_eq!(find_body_children(&dom).len(), 2);
    }

    #[test]
    fn walks_stop_at_the_depth_limit() {
        let html = format!("{}<span>deep</span>{}", "<div>".repeat(300), "</div>".repeat(300));
        let dom = parse_html(&html);
        assert_eq!(collect_elements(&dom.document, "div").len(), MAX_DEPTH - 2);
        assert!(find_element(&dom.document, "span").is_none());
        assert!(collect_outermost(&dom.document, &["span"]).is_empty());
        assert_eq!(text_content(&dom.document), "");
    }

    #[test]
    fn set_attr_overwrites_existing_value() {
        let dom = parse_html(r#"<img src="a.png">"#);
        let img = find_element(&dom.document, "img").unwrap();
        set_attr(&img, "src", "b.png");
        set_attr(&img, "alt", "pic");
        let html = outer_html(&img);
        assert!(html.contains(r#"src="b.png""#));
        assert!(html.contains(r#"alt="pic""#));
    }

    #[test]
    fn collect_outermost_skips_nested_matches() {
        let dom = parse_html("<table><tr><td><table><tr><td>x</td></tr></table></td></tr></table>");
        assert_eq!(collect_outermost(&dom.document, &["table"]).len(), 1);
        assert_eq!(collect_elements(&dom.document, "table").len(), 2);
    }

    #[test]
    fn unsafe_hrefs_are_dropped() {
        assert_eq!(sanitize_href(" https://a.b "), Some("https://a.b".to_string()));
        assert_eq!(sanitize_href("JavaScript:alert(1)"), None);
        assert_eq!(sanitize_href(""), None);
    }
}
