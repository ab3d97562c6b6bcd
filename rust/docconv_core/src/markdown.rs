use crate::dom::{
    collapse_ws, collect_outermost, find_element, inner_html, parse_html, remove_node, sanitize_href,
    serialize_document,
};
use crate::entities::decode_entities;
use crate::rewrite::{ensure_meta_utf8, extract_raw_blocks, restore_raw_blocks, stamp_table_widths};
use crate::xml::escape_text;
use pulldown_cmark::{html, Options, Parser};

pub fn markdown_to_html(md: &str) -> String {
    let mut opts = Options::empty();
    opts.insert(Options::ENABLE_TABLES);
    opts.insert(Options::ENABLE_STRIKETHROUGH);
    opts.insert(Options::ENABLE_TASKLISTS);
    opts.insert(Options::ENABLE_FOOTNOTES);
    let parser = Parser::new_ext(md, opts);
    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

/// Markdown rendered into a standalone UTF-8 HTML document.
pub fn markdown_to_html_document(md: &str, title: Option<&str>) -> String {
    let page = format!(
        "<!DOCTYPE html><html><head><title>{}</title></head><body>{}</body></html>",
        escape_text(title.unwrap_or_default()),
        markdown_to_html(md)
    );
    let dom = parse_html(&page);
    ensure_meta_utf8(&dom);
    serialize_document(&dom)
}

/// HTML -> Markdown.
///
/// Images and tables have no faithful Markdown form (base64 sources, merged
/// cells, widths), so they are lifted out of the DOM as placeholder tokens,
/// the rest is rendered, and their HTML is substituted back verbatim.
pub fn html_to_markdown(html: &str) -> String {
    let dom = parse_html(html);
    for node in collect_outermost(&dom.document, SKIPPED_SUBTREES) {
        remove_node(&node);
    }
    stamp_table_widths(&dom);
    let raw = extract_raw_blocks(&dom);
    let body = match find_element(&dom.document, "body") {
        Some(body) => inner_html(&body),
        None => serialize_document(&dom),
    };
    let md = render_markdown(&body);
    restore_raw_blocks(&md, &raw)
}

fn md_escape_text(s: &str) -> String {
    s.replace('[', "\\[").replace(']', "\\]")
}

fn md_format_link(text: &str, href: &str) -> String {
    let needs_angle = href
        .chars()
        .any(|c| c.is_whitespace() || c == '(' || c == ')');
    if needs_angle {
        format!("[{}](<{}>)", md_escape_text(text), href)
    } else {
        format!("[{}]({})", md_escape_text(text), href)
    }
}

fn find_tag_end(s: &str, lt: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = lt;
    let mut in_s = false;
    let mut in_d = false;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' if !in_d => in_s = !in_s,
            b'"' if !in_s => in_d = !in_d,
            b'>' if !in_s && !in_d => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Value of `name` in a serialized start tag (html5ever always double-quotes).
fn attr_val(raw: &str, name: &str) -> Option<String> {
    let low = raw.to_ascii_lowercase();
    let needle = format!(" {name}=\"");
    let idx = low.find(&needle)?;
    let rest = &raw[idx + needle.len()..];
    let end = rest.find('"')?;
    Some(decode_entities(&rest[..end]))
}

/// Elements whose content never reaches Markdown. Script and style text is
/// serialized unescaped, so it cannot be tag-scanned.
const SKIPPED_SUBTREES: &[&str] = &["head", "title", "script", "style", "noscript", "template"];

/// Byte offset just past the `</name ...>` closing `from`'s element.
fn skip_past_close(input: &str, from: usize, name: &str) -> Option<usize> {
    let needle = format!("</{name}");
    let lower = input[from..].to_ascii_lowercase();
    let at = from + lower.find(&needle)?;
    let gt = find_tag_end(input, at)?;
    Some(gt + 1)
}

enum FrameKind {
    Link(Option<String>),
    Quote,
}

struct Frame {
    kind: FrameKind,
    buf: String,
}

#[derive(Default)]
struct MarkdownWriter {
    out: String,
    frames: Vec<Frame>,
    pre_depth: u32,
    /// (ordered, next number)
    lists: Vec<(bool, u32)>,
}

impl MarkdownWriter {
    fn buf(&mut self) -> &mut String {
        match self.frames.last_mut() {
            Some(f) => &mut f.buf,
            None => &mut self.out,
        }
    }

    fn push(&mut self, s: &str) {
        self.buf().push_str(s);
    }

    fn ensure_newline(&mut self) {
        let b = self.buf();
        if !b.is_empty() && !b.ends_with('\n') {
            b.push('\n');
        }
    }

    fn ensure_blank_line(&mut self) {
        let b = self.buf();
        if b.is_empty() || b.ends_with("\n\n") {
            return;
        }
        if !b.ends_with('\n') {
            b.push('\n');
        }
        b.push('\n');
    }

    fn text(&mut self, raw: &str) {
        let decoded = decode_entities(raw);
        if self.pre_depth > 0 {
            self.push(&decoded);
            return;
        }
        let collapsed = collapse_ws(&decoded);
        let b = self.buf();
        let at_break = b.is_empty() || b.ends_with('\n') || b.ends_with(' ');
        let t = if at_break { collapsed.trim_start() } else { collapsed.as_str() };
        b.push_str(t);
    }

    fn list_indent(&self) -> String {
        let parents = self.lists.len().saturating_sub(1);
        self.lists[..parents]
            .iter()
            .map(|(ordered, _)| if *ordered { "   " } else { "  " })
            .collect()
    }

    fn close_frame(&mut self) {
        let Some(frame) = self.frames.pop() else {
            return;
        };
        match frame.kind {
            FrameKind::Link(href) => {
                let text = frame.buf.trim();
                match href {
                    Some(href) => {
                        let link = md_format_link(text, &href);
                        self.push(&link);
                    }
                    None => self.push(text),
                }
            }
            FrameKind::Quote => {
                let quoted: Vec<String> = frame
                    .buf
                    .trim()
                    .lines()
                    .map(|l| if l.is_empty() { ">".to_string() } else { format!("> {l}") })
                    .collect();
                self.ensure_blank_line();
                self.push(&quoted.join("\n"));
                self.ensure_blank_line();
            }
        }
    }

    fn start_tag(&mut self, name: &str, rest: &str) {
        match name {
            "br" => {
                if self.pre_depth > 0 {
                    self.push("\n");
                } else {
                    self.push("  \n");
                }
            }
            "p" | "div" | "center" | "section" | "article" if self.lists.is_empty() => {
                self.ensure_blank_line()
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = name[1..].parse::<usize>().unwrap_or(1);
                self.ensure_blank_line();
                self.push(&"#".repeat(level));
                self.push(" ");
            }
            "strong" | "b" => self.push("**"),
            "em" | "i" => self.push("*"),
            "s" | "del" | "strike" => self.push("~~"),
            "ul" | "ol" => {
                if self.lists.is_empty() {
                    self.ensure_blank_line();
                } else {
                    self.ensure_newline();
                }
                self.lists.push((name == "ol", 1));
            }
            "li" => {
                self.ensure_newline();
                let indent = self.list_indent();
                self.push(&indent);
                let marker = match self.lists.last_mut() {
                    Some((true, n)) => {
                        let m = format!("{n}. ");
                        *n += 1;
                        m
                    }
                    _ => "- ".to_string(),
                };
                self.push(&marker);
            }
            "pre" => {
                self.ensure_blank_line();
                self.push("```\n");
                self.pre_depth += 1;
            }
            "code" if self.pre_depth == 0 => self.push("`"),
            "a" => {
                let href = attr_val(rest, "href").and_then(|h| sanitize_href(&h));
                self.frames.push(Frame {
                    kind: FrameKind::Link(href),
                    buf: String::new(),
                });
            }
            "blockquote" => {
                self.ensure_blank_line();
                self.frames.push(Frame {
                    kind: FrameKind::Quote,
                    buf: String::new(),
                });
            }
            "hr" => {
                self.ensure_blank_line();
                self.push("---");
                self.ensure_blank_line();
            }
            _ => {}
        }
    }

    fn end_tag(&mut self, name: &str) {
        match name {
            "p" | "div" | "center" | "section" | "article" if self.lists.is_empty() => {
                self.ensure_blank_line()
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => self.ensure_blank_line(),
            "strong" | "b" => self.push("**"),
            "em" | "i" => self.push("*"),
            "s" | "del" | "strike" => self.push("~~"),
            "ul" | "ol" => {
                self.lists.pop();
                if self.lists.is_empty() {
                    self.ensure_blank_line();
                } else {
                    self.ensure_newline();
                }
            }
            "li" => self.ensure_newline(),
            "pre" => {
                self.pre_depth = self.pre_depth.saturating_sub(1);
                self.ensure_newline();
                self.push("```");
                self.ensure_blank_line();
            }
            "code" if self.pre_depth == 0 => self.push("`"),
            "a" if matches!(self.frames.last(), Some(Frame { kind: FrameKind::Link(_), .. })) => {
                self.close_frame()
            }
            "blockquote" if matches!(self.frames.last(), Some(Frame { kind: FrameKind::Quote, .. })) => {
                self.close_frame()
            }
            _ => {}
        }
    }

    fn finish(mut self) -> String {
        while !self.frames.is_empty() {
            self.close_frame();
        }
        let normalized = self.out.replace("\r\n", "\n");
        let mut out = String::with_capacity(normalized.len());
        let mut newlines = 0;
        for ch in normalized.chars() {
            if ch == '\n' {
                newlines += 1;
                if newlines > 2 {
                    continue;
                }
            } else {
                newlines = 0;
            }
            out.push(ch);
        }
        out.trim().to_string()
    }
}

/// Tag scanner over serialized HTML.
fn render_markdown(input: &str) -> String {
    let mut w = MarkdownWriter::default();
    let b = input.as_bytes();
    let mut i: usize = 0;

    while i < b.len() {
        let Some(lt_rel) = b[i..].iter().position(|&c| c == b'<') else {
            w.text(&input[i..]);
            break;
        };
        let lt = i + lt_rel;
        w.text(&input[i..lt]);
        i = lt;

        if b[i..].starts_with(b"<!--") {
            match input[i + 4..].find("-->") {
                Some(end) => i = i + 4 + end + 3,
                None => break,
            }
            continue;
        }

        let Some(gt) = find_tag_end(input, i) else {
            w.text(&input[i..]);
            break;
        };
        let raw = input[i + 1..gt].trim();
        i = gt + 1;

        let is_end = raw.starts_with('/');
        let tag = raw.trim_start_matches('/').trim();
        if tag.is_empty() || tag.starts_with('!') {
            continue;
        }
        let name_end = tag
            .find(|c: char| c.is_whitespace() || c == '/')
            .unwrap_or(tag.len());
        let (name, rest) = tag.split_at(name_end);
        let lower = name.to_ascii_lowercase();
        let self_close = raw.ends_with('/');

        if !is_end && !self_close && SKIPPED_SUBTREES.contains(&lower.as_str()) {
            match skip_past_close(input, i, &lower) {
                Some(next) => i = next,
                None => break,
            }
            continue;
        }

        if is_end {
            w.end_tag(&lower);
        } else {
            w.start_tag(&lower, &format!(" {}", rest.trim()));
        }
    }

    w.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_renders_gfm_extensions() {
        let html = markdown_to_html("# T\n\n~~gone~~\n\n| a | b |\n|---|---|\n| 1 | 2 |\n");
        assert!(html.contains("<h1>T</h1>"));
        assert!(html.contains("<del>gone</del>"));
        assert!(html.contains("<table>"));
    }

    #[test]
    fn html_document_has_utf8_meta_and_title() {
        let page = markdown_to_html_document("hello *world*", Some("A & B"));
        assert!(page.starts_with("<!DOCTYPE html>"));
        assert!(page.contains("<meta charset=\"UTF-8\">"));
        assert!(page.contains("<title>A &amp; B</title>"));
        assert!(page.contains("<p>hello <em>world</em></p>"));
    }

    #[test]
    fn headings_emphasis_and_links() {
        let md = html_to_markdown(
            r#"<h2>Intro</h2><p>Some <strong>bold</strong> and <em>soft</em> text with <a href="https://x.y/a b">a [link]</a>.</p>"#,
        );
        assert_eq!(
            md,
            "## Intro\n\nSome **bold** and *soft* text with [a \\[link\\]](<https://x.y/a b>)."
        );
    }

    #[test]
    fn unsafe_links_keep_only_text() {
        let md = html_to_markdown(r#"<p><a href="javascript:alert(1)">click</a></p>"#);
        assert_eq!(md, "click");
    }

    #[test]
    fn nested_lists_indent_under_their_marker() {
        let md = html_to_markdown("<ol><li>one<ul><li>a</li><li>b</li></ul></li><li>two</li></ol><p>end</p>");
        assert_eq!(md, "1. one\n   - a\n   - b\n2. two\n\nend");
    }

    #[test]
    fn code_blocks_keep_whitespace() {
        let md = html_to_markdown("<pre><code>fn main() {\n    x &lt; y;\n}\n</code></pre><p>use <code>x</code></p>");
        assert_eq!(md, "```\nfn main() {\n    x < y;\n}\n```\n\nuse `x`");
    }

    #[test]
    fn quotes_and_rules() {
        let md = html_to_markdown("<blockquote><p>first</p><p>second</p></blockquote><hr><p>after</p>");
        assert_eq!(md, "> first\n>\n> second\n\n---\n\nafter");
    }

    #[test]
    fn head_and_scripts_are_dropped() {
        let md = html_to_markdown(
            "<html><head><title>T</title><style>p{}</style></head><body><script>var a = 1;</script><p>x</p></body></html>",
        );
        assert_eq!(md, "x");
    }

    #[test]
    fn script_text_with_angle_brackets_keeps_later_content() {
        let md = html_to_markdown("<p>before</p><script>if (a<b) { x(); }</script><p>keep</p><p>also</p>");
        assert_eq!(md, "before\n\nkeep\n\nalso");
    }

    #[test]
    fn scanner_jumps_over_raw_text_elements() {
        let md = render_markdown("<p>a</p><STYLE>p<b>{}</STYLE ><p>b</p>");
        assert_eq!(md, "a\n\nb");
    }

    #[test]
    fn deeply_nested_markup_is_not_lifted() {
        let html = format!(
            "<p>top</p>{}<img src=\"deep.png\">{}<p>end</p>",
            "<div>".repeat(300),
            "</div>".repeat(300)
        );
        let md = html_to_markdown(&html);
        assert!(md.starts_with("top"));
        assert!(md.ends_with("end"));
        assert!(!md.contains("deep.png"));
        assert!(!md.contains("%%DOCCONV_RAW"));
    }

    #[test]
    fn images_and_tables_survive_as_raw_html() {
        let md = html_to_markdown(
            r#"<p>Logo: <img src="data:image/png;base64,AAAA" alt="l"></p><table><tr><td>a_b</td><td>*c*</td></tr></table><p>done</p>"#,
        );
        assert!(md.starts_with(r#"Logo: <img src="data:image/png;base64,AAAA" alt="l">"#));
        assert!(md.contains(
            r#"<table><tbody><tr><td style="width:50.00%">a_b</td><td style="width:50.00%">*c*</td></tr></tbody></table>"#
        ));
        assert!(md.ends_with("</table>\n\ndone"));
    }
}
