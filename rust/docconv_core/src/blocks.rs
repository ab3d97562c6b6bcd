//! HTML -> paragraph model used by the DOCX writer.
//!
//! Only the body's direct children are treated as blocks. Lists recurse into
//! nested `ul`/`ol`; everything else inside a block is flattened into runs.

use crate::config::ConvertConfig;
use crate::dom::{
    collapse_ws, element_children, find_body_children, is_centered, is_tag, parse_html, sanitize_href,
    tag_lower, text_content, MAX_DEPTH,
};
use crate::rewrite::{row_cells, table_rows};
use markup5ever_rcdom::{Handle, NodeData};

pub const RULE_TEXT: &str = "────────";

/// Deepest list level the numbering definitions provide.
pub const MAX_LIST_LEVEL: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStyle {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub strike: bool,
    pub code: bool,
    pub size_pt: u32,
}

impl RunStyle {
    pub fn plain(size_pt: u32) -> Self {
        Self {
            bold: false,
            italic: false,
            underline: false,
            strike: false,
            code: false,
            size_pt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text { text: String, style: RunStyle },
    Break,
    Link { href: String, segments: Vec<Segment> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParagraphStyle {
    Normal,
    Heading(u8),
    CodeBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListInfo {
    pub ordered: bool,
    pub level: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paragraph {
    pub style: ParagraphStyle,
    pub centered: bool,
    pub indent_twips: u32,
    pub list: Option<ListInfo>,
    pub segments: Vec<Segment>,
}

impl Paragraph {
    fn new(style: ParagraphStyle) -> Self {
        Self {
            style,
            centered: false,
            indent_twips: 0,
            list: None,
            segments: Vec::new(),
        }
    }

    /// Concatenated text of every run, links included.
    pub fn plain_text(&self) -> String {
        fn go(segments: &[Segment], out: &mut String) {
            for s in segments {
                match s {
                    Segment::Text { text, .. } => out.push_str(text),
                    Segment::Break => out.push('\n'),
                    Segment::Link { segments, .. } => go(segments, out),
                }
            }
        }
        let mut out = String::new();
        go(&self.segments, &mut out);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    /// Rows of cells; each cell holds its inline content as one paragraph.
    pub rows: Vec<Vec<Paragraph>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Paragraph(Paragraph),
    Table(Table),
}

fn is_small_heading(node: &Handle) -> bool {
    matches!(tag_lower(node).as_deref(), Some("h4" | "h5" | "h6"))
}

fn is_paragraphish(node: &Handle) -> bool {
    matches!(tag_lower(node).as_deref(), Some("p" | "div" | "center"))
}

fn heading_level(tag: &str) -> Option<u8> {
    let level = tag.strip_prefix('h')?.parse::<u8>().ok()?;
    (1..=6).contains(&level).then_some(level)
}

fn has_content(segments: &[Segment]) -> bool {
    segments.iter().any(|s| match s {
        Segment::Text { text, .. } => !text.trim().is_empty(),
        Segment::Break => true,
        Segment::Link { segments, .. } => has_content(segments),
    })
}

/// Drops whitespace-only runs at both edges, then trims the remaining edge text.
fn trim_edges(segments: &mut Vec<Segment>) {
    while let Some(Segment::Text { text, .. }) = segments.first() {
        if text.trim().is_empty() {
            segments.remove(0);
        } else {
            break;
        }
    }
    while let Some(Segment::Text { text, .. }) = segments.last() {
        if text.trim().is_empty() {
            segments.pop();
        } else {
            break;
        }
    }
    if let Some(Segment::Text { text, .. }) = segments.first_mut() {
        *text = text.trim_start().to_string();
    }
    if let Some(Segment::Text { text, .. }) = segments.last_mut() {
        *text = text.trim_end().to_string();
    }
}

struct BlockBuilder<'a> {
    config: &'a ConvertConfig,
    blocks: Vec<Block>,
}

impl<'a> BlockBuilder<'a> {
    fn push(&mut self, mut p: Paragraph) {
        if p.style != ParagraphStyle::CodeBlock {
            trim_edges(&mut p.segments);
        }
        if has_content(&p.segments) {
            self.blocks.push(Block::Paragraph(p));
        }
    }

    fn inline_paragraph(&self, node: &Handle, style: ParagraphStyle, base: RunStyle) -> Paragraph {
        let mut p = Paragraph::new(style);
        inline(node, base, &mut p.segments, 0);
        p
    }

    /// `h4`..`h6` and the paragraph after it as one paragraph.
    fn merged_heading(&mut self, heading: &Handle, level: u8, next: &Handle) {
        let mut head = RunStyle::plain(self.config.heading_size(level));
        head.bold = true;
        let mut p = Paragraph::new(ParagraphStyle::Normal);
        inline(heading, head, &mut p.segments, 0);
        trim_edges(&mut p.segments);
        let plain = RunStyle::plain(self.config.body_size_pt);
        p.segments.push(Segment::Text {
            text: " ".to_string(),
            style: plain,
        });
        let mut body = Vec::new();
        inline(next, plain, &mut body, 0);
        trim_edges(&mut body);
        p.segments.extend(body);
        self.push(p);
    }

    fn block(&mut self, node: &Handle) {
        let body = RunStyle::plain(self.config.body_size_pt);
        let tag = match &node.data {
            NodeData::Element { .. } => tag_lower(node).unwrap_or_default(),
            NodeData::Text { contents } => {
                let text = collapse_ws(&contents.borrow());
                if !text.trim().is_empty() {
                    let mut p = Paragraph::new(ParagraphStyle::Normal);
                    p.segments.push(Segment::Text { text, style: body });
                    self.push(p);
                }
                return;
            }
            _ => return,
        };

        if let Some(level) = heading_level(&tag) {
            let mut run = RunStyle::plain(self.config.heading_size(level));
            run.bold = true;
            let mut p = self.inline_paragraph(node, ParagraphStyle::Heading(level), run);
            p.centered = true;
            self.push(p);
            return;
        }

        match tag.as_str() {
            "p" | "div" | "center" => {
                let mut p = self.inline_paragraph(node, ParagraphStyle::Normal, body);
                p.centered = tag == "center" || is_centered(node);
                self.push(p);
            }
            "blockquote" => {
                let mut p = self.inline_paragraph(node, ParagraphStyle::Normal, body);
                p.indent_twips = self.config.blockquote_indent_twips;
                p.centered = is_centered(node);
                self.push(p);
            }
            "pre" => self.code_block(node),
            "ul" | "ol" => self.list(node, tag == "ol", 0),
            "hr" => {
                let mut p = Paragraph::new(ParagraphStyle::Normal);
                p.segments.push(Segment::Text {
                    text: RULE_TEXT.to_string(),
                    style: body,
                });
                self.push(p);
            }
            "table" => {
                if self.config.keep_tables_in_docx {
                    self.table(node);
                } else {
                    tracing::debug!("table dropped from docx output");
                }
            }
            "img" | "figure" | "script" | "style" | "template" => {}
            _ => {
                let mut p = self.inline_paragraph(node, ParagraphStyle::Normal, body);
                p.centered = is_centered(node);
                self.push(p);
            }
        }
    }

    fn code_block(&mut self, pre: &Handle) {
        let mut style = RunStyle::plain(self.config.body_size_pt);
        style.code = true;
        let text = text_content(pre).replace("\r\n", "\n");
        let text = text.strip_suffix('\n').unwrap_or(&text);
        let mut p = Paragraph::new(ParagraphStyle::CodeBlock);
        for line in text.split('\n') {
            if !line.is_empty() {
                p.segments.push(Segment::Text {
                    text: line.to_string(),
                    style,
                });
            }
            p.segments.push(Segment::Break);
        }
        self.push(p);
    }

    fn list(&mut self, list: &Handle, ordered: bool, level: u8) {
        let level = level.min(MAX_LIST_LEVEL);
        let base = RunStyle::plain(self.config.body_size_pt);
        for li in element_children(list).iter().filter(|c| is_tag(c, "li")) {
            let mut p = Paragraph::new(ParagraphStyle::Normal);
            p.list = Some(ListInfo { ordered, level });
            for child in li.children.borrow().iter() {
                if is_tag(child, "ul") || is_tag(child, "ol") {
                    continue;
                }
                inline_node(child, base, &mut p.segments, 1);
            }
            self.push(p);

            for nested in element_children(li) {
                match tag_lower(&nested).as_deref() {
                    Some("ul") => self.list(&nested, false, level + 1),
                    Some("ol") => self.list(&nested, true, level + 1),
                    _ => {}
                }
            }
        }
    }

    fn table(&mut self, table: &Handle) {
        let base = RunStyle::plain(self.config.body_size_pt);
        let rows: Vec<Vec<Paragraph>> = table_rows(table)
            .iter()
            .map(|row| {
                row_cells(row)
                    .iter()
                    .map(|cell| {
                        let mut style = base;
                        style.bold = is_tag(cell, "th");
                        let mut p = self.inline_paragraph(cell, ParagraphStyle::Normal, style);
                        p.centered = is_centered(cell);
                        trim_edges(&mut p.segments);
                        p
                    })
                    .collect()
            })
            .filter(|cells: &Vec<Paragraph>| !cells.is_empty())
            .collect();
        if !rows.is_empty() {
            self.blocks.push(Block::Table(Table { rows }));
        }
    }
}

fn inline(node: &Handle, style: RunStyle, out: &mut Vec<Segment>, depth: usize) {
    if depth >= MAX_DEPTH {
        tracing::warn!(depth, "inline nesting limit reached; content skipped");
        return;
    }
    for child in node.children.borrow().iter() {
        inline_node(child, style, out, depth + 1);
    }
}

fn inline_node(node: &Handle, style: RunStyle, out: &mut Vec<Segment>, depth: usize) {
    match &node.data {
        NodeData::Text { contents } => {
            let text = collapse_ws(&contents.borrow());
            if !text.is_empty() {
                out.push(Segment::Text { text, style });
            }
        }
        NodeData::Element { .. } => inline_element(node, style, out, depth),
        _ => {}
    }
}

fn inline_element(node: &Handle, style: RunStyle, out: &mut Vec<Segment>, depth: usize) {
    let tag = tag_lower(node).unwrap_or_default();
    let mut s = style;
    match tag.as_str() {
        "strong" | "b" => s.bold = true,
        "em" | "i" => s.italic = true,
        "u" | "ins" => s.underline = true,
        "s" | "del" | "strike" => s.strike = true,
        "code" | "kbd" | "samp" | "tt" => s.code = true,
        "br" => {
            out.push(Segment::Break);
            return;
        }
        "a" => {
            if let Some(href) = crate::dom::attr_get(node, "href").and_then(|h| sanitize_href(&h)) {
                let mut segments = Vec::new();
                inline(node, style, &mut segments, depth);
                if !segments.is_empty() {
                    out.push(Segment::Link { href, segments });
                }
                return;
            }
        }
        "img" | "figure" | "table" | "script" | "style" | "template" => return,
        _ => {}
    }
    inline(node, s, out, depth);
}

fn is_blank_text(node: &Handle) -> bool {
    match &node.data {
        NodeData::Text { contents } => contents.borrow().trim().is_empty(),
        NodeData::Comment { .. } => true,
        _ => false,
    }
}

/// Builds the block list for an HTML document or fragment.
pub fn build_blocks(html: &str, config: &ConvertConfig) -> Vec<Block> {
    let dom = parse_html(html);
    let children = find_body_children(&dom);
    let mut b = BlockBuilder {
        config,
        blocks: Vec::new(),
    };

    let mut i = 0;
    while i < children.len() {
        let node = &children[i];
        if config.merge_small_headings && is_small_heading(node) {
            let next = children[i + 1..]
                .iter()
                .position(|c| !is_blank_text(c))
                .map(|off| i + 1 + off);
            if let Some(j) = next.filter(|&j| is_paragraphish(&children[j])) {
                let level = heading_level(&tag_lower(node).unwrap_or_default()).unwrap_or(4);
                b.merged_heading(node, level, &children[j]);
                i = j + 1;
                continue;
            }
        }
        b.block(node);
        i += 1;
    }

    tracing::debug!(blocks = b.blocks.len(), "built docx blocks");
    b.blocks
}
