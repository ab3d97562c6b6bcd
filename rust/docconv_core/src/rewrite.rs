//! Rule-based DOM passes shared by the conversion pipelines.

use crate::dom::{
    attr_get, collect_elements, collect_outermost, element_children, find_element, is_tag,
    new_element, new_text, outer_html, prepend_child, replace_node, set_attr, tag_lower,
};
use crate::package::Picture;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use markup5ever_rcdom::{Handle, RcDom};
use std::collections::HashMap;

pub fn ensure_meta_utf8(dom: &RcDom) {
    let Some(head) = find_element(&dom.document, "head") else {
        return;
    };
    let has_meta = collect_elements(&head, "meta").iter().any(|m| {
        attr_get(m, "charset")
            .map(|c| c.eq_ignore_ascii_case("utf-8"))
            .unwrap_or(false)
    });
    if !has_meta {
        prepend_child(&head, new_element("meta", &[("charset", "UTF-8")]));
    }
}

pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "tif" | "tiff" => "image/tiff",
        "emf" => "image/x-emf",
        "wmf" => "image/x-wmf",
        _ => "application/octet-stream",
    }
}

pub fn data_uri(picture: &Picture) -> String {
    format!(
        "data:{};base64,{}",
        mime_for_extension(picture.extension()),
        STANDARD.encode(&picture.data)
    )
}

/// Points every `<img>` whose file name matches a package picture at a base64
/// data URI. Returns how many images were inlined.
pub fn embed_images(dom: &RcDom, pictures: &[Picture]) -> usize {
    if pictures.is_empty() {
        return 0;
    }
    let by_name: HashMap<&str, &Picture> =
        pictures.iter().map(|p| (p.file_name.as_str(), p)).collect();

    let mut embedded = 0;
    for img in collect_elements(&dom.document, "img") {
        let Some(src) = attr_get(&img, "src").filter(|s| !s.is_empty()) else {
            continue;
        };
        let file_name = match src.rfind('/') {
            Some(slash) if slash + 1 < src.len() => &src[slash + 1..],
            _ => src.as_str(),
        };
        if let Some(pic) = by_name.get(file_name) {
            set_attr(&img, "src", &data_uri(pic));
            embedded += 1;
        } else {
            tracing::debug!(%src, "no package picture for image");
        }
    }
    embedded
}

fn style_width(style: &str) -> Option<String> {
    style.split(';').find_map(|decl| {
        let (k, v) = decl.split_once(':')?;
        (k.trim().eq_ignore_ascii_case("width") && !v.trim().is_empty()).then(|| v.trim().to_string())
    })
}

fn explicit_width(node: &Handle) -> Option<String> {
    if let Some(w) = attr_get(node, "style").as_deref().and_then(style_width) {
        return Some(w);
    }
    attr_get(node, "width")
        .filter(|w| !w.trim().is_empty())
        .map(|w| {
            let w = w.trim();
            if w.chars().all(|c| c.is_ascii_digit()) {
                format!("{w}px")
            } else {
                w.to_string()
            }
        })
}

/// Rows of `table` itself, not of tables nested in its cells.
pub(crate) fn table_rows(table: &Handle) -> Vec<Handle> {
    let mut rows = Vec::new();
    for child in element_children(table) {
        match tag_lower(&child).as_deref() {
            Some("tr") => rows.push(child),
            Some("thead") | Some("tbody") | Some("tfoot") => {
                rows.extend(element_children(&child).into_iter().filter(|c| is_tag(c, "tr")));
            }
            _ => {}
        }
    }
    rows
}

pub(crate) fn row_cells(row: &Handle) -> Vec<Handle> {
    element_children(row)
        .into_iter()
        .filter(|c| is_tag(c, "td") || is_tag(c, "th"))
        .collect()
}

fn table_cols(table: &Handle) -> Vec<Handle> {
    let mut cols = Vec::new();
    for child in element_children(table) {
        if is_tag(&child, "col") {
            cols.push(child);
        } else if is_tag(&child, "colgroup") {
            cols.extend(element_children(&child).into_iter().filter(|c| is_tag(c, "col")));
        }
    }
    cols
}

fn colspan(cell: &Handle) -> usize {
    attr_get(cell, "colspan")
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(1)
        .max(1)
}

fn split_length(width: &str) -> Option<(f64, &str)> {
    let at = width.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(width.len());
    let value = width[..at].parse::<f64>().ok()?;
    Some((value, width[at..].trim()))
}

/// Adds up lengths that share a unit; mixed units keep the first one.
fn span_width(widths: &[String]) -> Option<String> {
    let first = widths.first()?;
    let mut total = 0.0;
    let mut unit = None;
    for w in widths {
        let (value, u) = split_length(w)?;
        match unit {
            None => unit = Some(u),
            Some(seen) if seen != u => return Some(first.clone()),
            Some(_) => {}
        }
        total += value;
    }
    let unit = unit.unwrap_or_default();
    if total.fract() == 0.0 {
        Some(format!("{}{unit}", total as u64))
    } else {
        Some(format!("{total:.2}{unit}"))
    }
}

/// Gives every first-row cell an explicit width. A cell covering grid
/// columns that all have a `<col>` width gets their sum; any other cell gets
/// its equal share of the widest row.
pub fn stamp_table_widths(dom: &RcDom) {
    for table in collect_elements(&dom.document, "table") {
        let rows = table_rows(&table);
        let Some(first) = rows.first() else { continue };
        let col_widths: Vec<Option<String>> = table_cols(&table).iter().map(explicit_width).collect();
        let columns = rows
            .iter()
            .map(|r| row_cells(r).iter().map(colspan).sum::<usize>())
            .max()
            .unwrap_or(0)
            .max(col_widths.len());
        if columns == 0 {
            continue;
        }

        let mut cursor = 0;
        for cell in row_cells(first) {
            let span = colspan(&cell);
            let grid = cursor..cursor + span;
            cursor += span;
            if explicit_width(&cell).is_some() {
                continue;
            }

            let spanned: Option<Vec<String>> = grid
                .map(|c| col_widths.get(c).cloned().flatten())
                .collect();
            let width = spanned
                .and_then(|w| span_width(&w))
                .unwrap_or_else(|| format!("{:.2}%", 100.0 * span as f64 / columns as f64));

            let style = attr_get(&cell, "style").unwrap_or_default();
            let style = style.trim().trim_end_matches(';');
            let stamped = if style.is_empty() {
                format!("width:{width}")
            } else {
                format!("{style};width:{width}")
            };
            set_attr(&cell, "style", &stamped);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    pub token: String,
    pub html: String,
    /// Tables sit on their own lines; images stay inline.
    pub block: bool,
}

fn raw_token(idx: usize) -> String {
    format!("%%DOCCONV_RAW_{idx}%%")
}

/// Replaces every outermost `<img>` and `<table>` with a plain-text token and
/// returns the removed markup in document order.
pub fn extract_raw_blocks(dom: &RcDom) -> Vec<RawBlock> {
    let mut out = Vec::new();
    for (idx, node) in collect_outermost(&dom.document, &["img", "table"])
        .into_iter()
        .enumerate()
    {
        let token = raw_token(idx);
        let html = outer_html(&node);
        let block = is_tag(&node, "table");
        if replace_node(&node, new_text(&token)) {
            out.push(RawBlock { token, html, block });
        }
    }
    out
}

/// Substitutes tokens back. Tokens lost on the way are reported, not fatal.
pub fn restore_raw_blocks(text: &str, blocks: &[RawBlock]) -> String {
    let mut out = text.to_string();
    let mut missing: Vec<&str> = Vec::new();
    for b in blocks {
        let Some(pos) = out.find(&b.token) else {
            missing.push(&b.token);
            continue;
        };
        if b.block {
            let before = out[..pos].trim_end_matches([' ', '\n']);
            let after = out[pos + b.token.len()..].trim_start_matches([' ', '\n']);
            let mut next = String::with_capacity(out.len() + b.html.len());
            next.push_str(before);
            if !before.is_empty() {
                next.push_str("\n\n");
            }
            next.push_str(&b.html);
            if !after.is_empty() {
                next.push_str("\n\n");
            }
            next.push_str(after);
            out = next;
        } else {
            out.replace_range(pos..pos + b.token.len(), &b.html);
        }
    }
    if !missing.is_empty() {
        tracing::warn!(?missing, "raw html placeholders dropped during markdown rendering");
    }
    out
}
