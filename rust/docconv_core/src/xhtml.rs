//! DOCX body -> XHTML document.
//!
//! Only the WordprocessingML needed for readable HTML is looked at:
//! paragraphs, runs and their basic properties, hyperlinks, drawings, numbering
//! references and tables. Anything else is skipped.

use crate::dom::MAX_DEPTH;
use crate::package::DocxPackage;
use crate::xml::{escape_attr, escape_text, XmlElement, XmlNode};

const EMU_PER_PX: u64 = 9525;

const DEFAULT_CSS: &str = "body{font-family:Calibri,'Microsoft YaHei',sans-serif;}\
table{border-collapse:collapse;}\
td,th{border:1px solid #999;padding:2pt 4pt;vertical-align:top;}";

/// Renders the whole package as an HTML document. The `<head>` carries no
/// charset declaration; `rewrite::ensure_meta_utf8` adds it.
pub fn docx_to_xhtml(pkg: &DocxPackage) -> String {
    let body = pkg.document.child("body").unwrap_or(&pkg.document);
    let content = Converter { pkg }.blocks(body, 0);

    let title = pkg.title.as_deref().unwrap_or_default();
    format!(
        "<!DOCTYPE html><html><head><title>{}</title><style>{}</style></head><body>{}</body></html>",
        escape_text(title),
        DEFAULT_CSS,
        content
    )
}

fn on_off(el: Option<&XmlElement>) -> bool {
    match el {
        None => false,
        Some(e) => !matches!(e.attr("val"), Some("0") | Some("false") | Some("off")),
    }
}

#[derive(Debug, Default)]
struct RunProps {
    bold: bool,
    italic: bool,
    underline: bool,
    strike: bool,
    superscript: bool,
    subscript: bool,
    size_half_pt: Option<u32>,
    color: Option<String>,
}

impl RunProps {
    fn from_rpr(rpr: Option<&XmlElement>) -> Self {
        let Some(rpr) = rpr else {
            return Self::default();
        };
        let vert = rpr.child_val("vertAlign").unwrap_or_default();
        Self {
            bold: on_off(rpr.child("b")),
            italic: on_off(rpr.child("i")),
            underline: rpr
                .child("u")
                .map(|u| u.attr("val") != Some("none"))
                .unwrap_or(false),
            strike: on_off(rpr.child("strike")) || on_off(rpr.child("dstrike")),
            superscript: vert == "superscript",
            subscript: vert == "subscript",
            size_half_pt: rpr.child_val("sz").and_then(|v| v.parse().ok()),
            color: rpr
                .child_val("color")
                .filter(|c| !c.eq_ignore_ascii_case("auto"))
                .map(|c| c.to_string()),
        }
    }

    fn wrap(&self, inner: String) -> String {
        let mut out = inner;
        let mut css = Vec::new();
        if let Some(sz) = self.size_half_pt {
            let pt = sz as f32 / 2.0;
            css.push(format!("font-size:{pt}pt"));
        }
        if let Some(c) = &self.color {
            css.push(format!("color:#{c}"));
        }
        if !css.is_empty() {
            out = format!("<span style=\"{}\">{out}</span>", css.join(";"));
        }
        for (on, tag) in [
            (self.subscript, "sub"),
            (self.superscript, "sup"),
            (self.strike, "s"),
            (self.underline, "u"),
            (self.italic, "em"),
            (self.bold, "strong"),
        ] {
            if on {
                out = format!("<{tag}>{out}</{tag}>");
            }
        }
        out
    }
}

struct ListLevel {
    ordered: bool,
    li_open: bool,
}

/// Block output plus the stack of lists currently open in it.
struct BlockWriter {
    out: String,
    lists: Vec<ListLevel>,
}

impl BlockWriter {
    fn new() -> Self {
        Self {
            out: String::new(),
            lists: Vec::new(),
        }
    }

    fn close_list(&mut self) {
        if let Some(level) = self.lists.pop() {
            if level.li_open {
                self.out.push_str("</li>");
            }
            self.out.push_str(if level.ordered { "</ol>" } else { "</ul>" });
        }
    }

    fn close_all_lists(&mut self) {
        while !self.lists.is_empty() {
            self.close_list();
        }
    }

    fn enter_list_item(&mut self, ilvl: usize, ordered: bool) {
        let depth = ilvl + 1;
        while self.lists.len() > depth {
            self.close_list();
        }
        if self.lists.len() == depth {
            let same_kind = self.lists.last().map(|l| l.ordered == ordered).unwrap_or(false);
            if !same_kind {
                self.close_list();
            } else if let Some(top) = self.lists.last_mut() {
                if top.li_open {
                    self.out.push_str("</li>");
                    top.li_open = false;
                }
            }
        }
        while self.lists.len() < depth {
            self.out.push_str(if ordered { "<ol>" } else { "<ul>" });
            self.lists.push(ListLevel {
                ordered,
                li_open: false,
            });
        }
        self.out.push_str("<li>");
        if let Some(top) = self.lists.last_mut() {
            top.li_open = true;
        }
    }

    fn finish(mut self) -> String {
        self.close_all_lists();
        self.out
    }
}

struct Converter<'a> {
    pkg: &'a DocxPackage,
}

impl Converter<'_> {
    fn blocks(&self, container: &XmlElement, depth: usize) -> String {
        let mut w = BlockWriter::new();
        self.blocks_into(&mut w, container, depth);
        w.finish()
    }

    fn blocks_into(&self, w: &mut BlockWriter, container: &XmlElement, depth: usize) {
        if depth >= MAX_DEPTH {
            tracing::warn!(depth, "docx nesting limit reached; content skipped");
            return;
        }
        for el in container.elements() {
            match el.name.as_str() {
                "p" => self.paragraph(w, el, depth),
                "tbl" => {
                    w.close_all_lists();
                    let table = self.table(el, depth);
                    w.out.push_str(&table);
                }
                "sdt" => {
                    if let Some(content) = el.child("sdtContent") {
                        self.blocks_into(w, content, depth + 1);
                    }
                }
                "customXml" => self.blocks_into(w, el, depth + 1),
                _ => {}
            }
        }
    }

    fn paragraph(&self, w: &mut BlockWriter, p: &XmlElement, depth: usize) {
        let ppr = p.child("pPr");
        let style_id = ppr.and_then(|x| x.child_val("pStyle"));
        let heading = style_id.and_then(|s| self.pkg.heading_level(s));
        let list = ppr
            .and_then(|x| x.child("numPr"))
            .and_then(|num| {
                let num_id = num.child_val("numId")?;
                if num_id == "0" {
                    return None;
                }
                let ilvl = num.child_val("ilvl").and_then(|v| v.parse::<u32>().ok()).unwrap_or(0);
                Some((num_id.to_string(), ilvl))
            });
        let align = match ppr.and_then(|x| x.child_val("jc")) {
            Some("center") => Some("center"),
            Some("right") | Some("end") => Some("right"),
            Some("both") | Some("distribute") => Some("justify"),
            _ => None,
        };
        let style_attr = align
            .map(|a| format!(" style=\"text-align:{a}\""))
            .unwrap_or_default();

        let content = self.inlines(p, depth + 1);

        if let (Some((num_id, ilvl)), None) = (&list, heading) {
            let ordered = self.pkg.numbering.is_ordered(num_id, *ilvl);
            w.enter_list_item(*ilvl as usize, ordered);
            w.out.push_str(&content);
            return;
        }

        w.close_all_lists();
        match heading {
            Some(level) => {
                w.out.push_str(&format!("<h{level}{style_attr}>{content}</h{level}>"));
            }
            None if content.trim().is_empty() => {
                w.out.push_str(&format!("<p{style_attr}>&nbsp;</p>"));
            }
            None => {
                w.out.push_str(&format!("<p{style_attr}>{content}</p>"));
            }
        }
    }

    /// Runs of a paragraph, hyperlink or any run container (`w:ins`, `w:smartTag`, ...).
    fn inlines(&self, container: &XmlElement, depth: usize) -> String {
        let mut out = String::new();
        if depth >= MAX_DEPTH {
            return out;
        }
        for el in container.elements() {
            match el.name.as_str() {
                "r" => out.push_str(&self.run(el, depth + 1)),
                "hyperlink" => {
                    let href = el
                        .attr("id")
                        .and_then(|rid| self.pkg.hyperlink_target(rid))
                        .map(|t| t.to_string())
                        .or_else(|| el.attr("anchor").map(|a| format!("#{a}")));
                    let inner = self.inlines(el, depth + 1);
                    match href {
                        Some(href) => {
                            out.push_str(&format!("<a href=\"{}\">{inner}</a>", escape_attr(&href)))
                        }
                        None => out.push_str(&inner),
                    }
                }
                "pPr" | "del" | "moveFrom" | "bookmarkStart" | "bookmarkEnd" | "proofErr" => {}
                _ => out.push_str(&self.inlines(el, depth + 1)),
            }
        }
        out
    }

    fn run(&self, r: &XmlElement, depth: usize) -> String {
        let props = RunProps::from_rpr(r.child("rPr"));
        let mut inner = String::new();
        for c in &r.children {
            let XmlNode::Element(el) = c else { continue };
            match el.name.as_str() {
                "t" => inner.push_str(&escape_text(&el.text())),
                "tab" => inner.push('\t'),
                "br" | "cr" => inner.push_str("<br/>"),
                "noBreakHyphen" => inner.push('-'),
                "drawing" | "pict" | "object" => inner.push_str(&self.image(el, depth + 1)),
                _ => {}
            }
        }
        if inner.is_empty() {
            return inner;
        }
        props.wrap(inner)
    }

    fn image(&self, el: &XmlElement, _depth: usize) -> String {
        let rid = el
            .descendant("blip")
            .and_then(|b| b.attr("embed"))
            .or_else(|| el.descendant("imagedata").and_then(|i| i.attr("id")));
        let Some(src) = rid.and_then(|rid| self.pkg.image_path(rid)) else {
            return String::new();
        };
        let alt = el
            .descendant("docPr")
            .and_then(|d| d.attr("descr").filter(|s| !s.is_empty()).or_else(|| d.attr("name")))
            .unwrap_or_default();
        let mut out = format!("<img src=\"{}\" alt=\"{}\"", escape_attr(&src), escape_attr(alt));
        if let Some(extent) = el.descendant("extent") {
            let px = |v: Option<&str>| v.and_then(|v| v.parse::<u64>().ok()).map(|emu| emu / EMU_PER_PX);
            if let (Some(w), Some(h)) = (px(extent.attr("cx")), px(extent.attr("cy"))) {
                out.push_str(&format!(" width=\"{w}\" height=\"{h}\""));
            }
        }
        out.push_str("/>");
        out
    }

    fn table(&self, tbl: &XmlElement, depth: usize) -> String {
        struct Cell {
            col: usize,
            span: usize,
            rowspan: usize,
            continuation: bool,
            html: String,
            header: bool,
        }

        let mut out = String::from("<table>");
        if let Some(grid) = tbl.child("tblGrid") {
            let cols: Vec<String> = grid
                .children_named("gridCol")
                .filter_map(|c| c.attr("w")?.parse::<u32>().ok())
                .map(|twips| format!("<col style=\"width:{}pt\"/>", twips as f32 / 20.0))
                .collect();
            if !cols.is_empty() {
                out.push_str("<colgroup>");
                out.push_str(&cols.concat());
                out.push_str("</colgroup>");
            }
        }

        let mut rows: Vec<Vec<Cell>> = Vec::new();
        for tr in tbl.children_named("tr") {
            let header = tr
                .child("trPr")
                .map(|p| on_off(p.child("tblHeader")))
                .unwrap_or(false);
            let mut col = 0;
            let mut cells = Vec::new();
            for tc in tr.children_named("tc") {
                let tcpr = tc.child("tcPr");
                let span = tcpr
                    .and_then(|p| p.child_val("gridSpan"))
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(1)
                    .max(1);
                let continuation = tcpr
                    .and_then(|p| p.child("vMerge"))
                    .map(|m| m.attr("val") != Some("restart"))
                    .unwrap_or(false);
                let html = if continuation {
                    String::new()
                } else {
                    self.blocks(tc, depth + 1)
                };
                cells.push(Cell {
                    col,
                    span,
                    rowspan: 1,
                    continuation,
                    html,
                    header,
                });
                col += span;
            }
            rows.push(cells);
        }

        // Fold vertical-merge continuations into the cell that started them.
        for r in 0..rows.len() {
            for c in 0..rows[r].len() {
                if !rows[r][c].continuation {
                    continue;
                }
                let col = rows[r][c].col;
                let origin = (0..r).rev().find_map(|pr| {
                    rows[pr]
                        .iter()
                        .position(|cell| cell.col == col && !cell.continuation)
                        .map(|pc| (pr, pc))
                });
                if let Some((pr, pc)) = origin {
                    rows[pr][pc].rowspan += 1;
                }
            }
        }

        for row in &rows {
            out.push_str("<tr>");
            for cell in row.iter().filter(|c| !c.continuation) {
                let tag = if cell.header { "th" } else { "td" };
                out.push('<');
                out.push_str(tag);
                if cell.span > 1 {
                    out.push_str(&format!(" colspan=\"{}\"", cell.span));
                }
                if cell.rowspan > 1 {
                    out.push_str(&format!(" rowspan=\"{}\"", cell.rowspan));
                }
                out.push('>');
                out.push_str(&cell.html);
                out.push_str(&format!("</{tag}>"));
            }
            out.push_str("</tr>");
        }
        out.push_str("</table>");
        out
    }
}
