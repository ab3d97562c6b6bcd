//! Paragraph model -> minimal WordprocessingML package.

use crate::blocks::{Block, Paragraph, ParagraphStyle, RunStyle, Segment, Table, MAX_LIST_LEVEL};
use crate::config::ConvertConfig;
use crate::error::{Error, Result};
use crate::xml::{escape_attr, escape_text};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const BULLET_NUM_ID: u32 = 1;
const DECIMAL_NUM_ID: u32 = 2;
const FIRST_LINK_RID: usize = 10;
const LINK_COLOR: &str = "0563C1";

struct DocWriter<'a> {
    config: &'a ConvertConfig,
    /// External href -> relationship id.
    links: BTreeMap<String, String>,
    body: String,
}

fn collect_hrefs(segments: &[Segment], out: &mut BTreeSet<String>) {
    for s in segments {
        if let Segment::Link { href, .. } = s {
            if !href.starts_with('#') {
                out.insert(href.clone());
            }
        }
    }
}

fn paragraphs_of(blocks: &[Block]) -> Vec<&Paragraph> {
    let mut out = Vec::new();
    for b in blocks {
        match b {
            Block::Paragraph(p) => out.push(p),
            Block::Table(t) => out.extend(t.rows.iter().flatten()),
        }
    }
    out
}

fn link_relationships(blocks: &[Block]) -> BTreeMap<String, String> {
    let mut hrefs = BTreeSet::new();
    for p in paragraphs_of(blocks) {
        collect_hrefs(&p.segments, &mut hrefs);
    }
    hrefs
        .into_iter()
        .enumerate()
        .map(|(i, href)| (href, format!("rId{}", FIRST_LINK_RID + i)))
        .collect()
}

impl<'a> DocWriter<'a> {
    fn run_props(&self, style: &RunStyle, link: bool) -> String {
        let fonts = &self.config.fonts;
        let western = if style.code { &fonts.code } else { &fonts.latin };
        let mut rpr = String::from("<w:rPr>");
        rpr.push_str(&format!(
            r#"<w:rFonts w:ascii="{w}" w:hAnsi="{w}" w:cs="{w}" w:eastAsia="{ea}"/>"#,
            w = escape_attr(western),
            ea = escape_attr(&fonts.east_asia)
        ));
        if style.bold {
            rpr.push_str("<w:b/>");
        }
        if style.italic {
            rpr.push_str("<w:i/>");
        }
        if style.strike {
            rpr.push_str("<w:strike/>");
        }
        if link {
            rpr.push_str(&format!(r#"<w:color w:val="{LINK_COLOR}"/>"#));
        }
        rpr.push_str(r#"<w:kern w:val="0"/>"#);
        let half_points = style.size_pt * 2;
        rpr.push_str(&format!(r#"<w:sz w:val="{half_points}"/><w:szCs w:val="{half_points}"/>"#));
        if style.underline || link {
            rpr.push_str(r#"<w:u w:val="single"/>"#);
        }
        rpr.push_str("</w:rPr>");
        rpr
    }

    fn segments(&mut self, segments: &[Segment], last_style: RunStyle, link: bool) {
        let mut last_style = last_style;
        for seg in segments {
            match seg {
                Segment::Text { text, style } => {
                    if text.is_empty() {
                        continue;
                    }
                    last_style = *style;
                    let rpr = self.run_props(style, link);
                    self.body.push_str("<w:r>");
                    self.body.push_str(&rpr);
                    self.body.push_str(r#"<w:t xml:space="preserve">"#);
                    self.body.push_str(&escape_text(text));
                    self.body.push_str("</w:t></w:r>");
                }
                Segment::Break => {
                    let rpr = self.run_props(&last_style, link);
                    self.body.push_str("<w:r>");
                    self.body.push_str(&rpr);
                    self.body.push_str("<w:br/></w:r>");
                }
                Segment::Link { href, segments } => {
                    match href.strip_prefix('#') {
                        Some(anchor) => self.body.push_str(&format!(
                            r#"<w:hyperlink w:anchor="{}" w:history="1">"#,
                            escape_attr(anchor)
                        )),
                        None => {
                            let rid = self.links.get(href).cloned().unwrap_or_default();
                            self.body
                                .push_str(&format!(r#"<w:hyperlink r:id="{rid}" w:history="1">"#));
                        }
                    }
                    self.segments(segments, last_style, true);
                    self.body.push_str("</w:hyperlink>");
                }
            }
        }
    }

    fn paragraph(&mut self, p: &Paragraph) {
        self.body.push_str("<w:p><w:pPr>");
        match p.style {
            ParagraphStyle::Normal => {}
            ParagraphStyle::Heading(level) => {
                self.body.push_str(&format!(r#"<w:pStyle w:val="Heading{level}"/>"#));
            }
            ParagraphStyle::CodeBlock => self.body.push_str(r#"<w:pStyle w:val="CodeBlock"/>"#),
        }
        if let Some(list) = p.list {
            let num_id = if list.ordered { DECIMAL_NUM_ID } else { BULLET_NUM_ID };
            self.body.push_str(&format!(
                r#"<w:numPr><w:ilvl w:val="{}"/><w:numId w:val="{num_id}"/></w:numPr>"#,
                list.level.min(MAX_LIST_LEVEL)
            ));
        }
        self.body.push_str(r#"<w:spacing w:line="240" w:lineRule="auto"/>"#);
        if p.indent_twips > 0 {
            self.body.push_str(&format!(r#"<w:ind w:left="{}"/>"#, p.indent_twips));
        }
        if p.centered {
            self.body.push_str(r#"<w:jc w:val="center"/>"#);
        }
        self.body.push_str("</w:pPr>");
        let base = RunStyle::plain(self.config.body_size_pt);
        self.segments(&p.segments, base, false);
        self.body.push_str("</w:p>");
    }

    fn table(&mut self, t: &Table) {
        let columns = t.rows.iter().map(Vec::len).max().unwrap_or(0);
        self.body.push_str(
            r#"<w:tbl><w:tblPr><w:tblW w:w="5000" w:type="pct"/><w:tblBorders><w:top w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:left w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:bottom w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:right w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:insideH w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:insideV w:val="single" w:sz="4" w:space="0" w:color="auto"/></w:tblBorders></w:tblPr><w:tblGrid>"#,
        );
        for _ in 0..columns {
            self.body.push_str("<w:gridCol/>");
        }
        self.body.push_str("</w:tblGrid>");
        for row in &t.rows {
            self.body.push_str("<w:tr>");
            for cell in row {
                self.body.push_str(r#"<w:tc><w:tcPr><w:tcW w:w="0" w:type="auto"/></w:tcPr>"#);
                self.paragraph(cell);
                self.body.push_str("</w:tc>");
            }
            // Short rows are padded; every cell needs a paragraph.
            for _ in row.len()..columns {
                self.body.push_str(r#"<w:tc><w:tcPr><w:tcW w:w="0" w:type="auto"/></w:tcPr><w:p/></w:tc>"#);
            }
            self.body.push_str("</w:tr>");
        }
        self.body.push_str("</w:tbl>");
    }
}

fn document_xml(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>{body}<w:sectPr><w:pgSz w:w="12240" w:h="15840"/><w:pgMar w:top="1440" w:right="1440" w:bottom="1440" w:left="1440" w:header="708" w:footer="708" w:gutter="0"/><w:cols w:space="708"/><w:docGrid w:linePitch="360"/></w:sectPr></w:body>
</w:document>"#
    )
}

fn content_types_xml(has_numbering: bool) -> String {
    let numbering = if has_numbering {
        r#"
  <Override PartName="/word/numbering.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.numbering+xml"/>"#
    } else {
        ""
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
  <Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
  <Default Extension="xml" ContentType="application/xml"/>
  <Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>
  <Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/>{numbering}
</Types>"#
    )
}

const PACKAGE_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/>
</Relationships>"#;

fn document_rels_xml(has_numbering: bool, links: &BTreeMap<String, String>) -> String {
    let mut rels = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>"#,
    );
    if has_numbering {
        rels.push_str(
            r#"
  <Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/numbering" Target="numbering.xml"/>"#,
        );
    }
    for (href, rid) in links {
        rels.push_str(&format!(
            r#"
  <Relationship Id="{rid}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="{}" TargetMode="External"/>"#,
            escape_attr(href)
        ));
    }
    rels.push_str("\n</Relationships>");
    rels
}

fn styles_xml(config: &ConvertConfig) -> String {
    let fonts = &config.fonts;
    let latin = escape_attr(&fonts.latin);
    let east_asia = escape_attr(&fonts.east_asia);
    let code = escape_attr(&fonts.code);
    let body_sz = config.body_size_pt * 2;

    let mut styles = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:docDefaults>
    <w:rPrDefault><w:rPr><w:rFonts w:ascii="{latin}" w:hAnsi="{latin}" w:cs="{latin}" w:eastAsia="{east_asia}"/><w:kern w:val="0"/><w:sz w:val="{body_sz}"/><w:szCs w:val="{body_sz}"/></w:rPr></w:rPrDefault>
    <w:pPrDefault><w:pPr><w:spacing w:after="120" w:line="240" w:lineRule="auto"/></w:pPr></w:pPrDefault>
  </w:docDefaults>
  <w:style w:type="paragraph" w:default="1" w:styleId="Normal">
    <w:name w:val="Normal"/>
    <w:qFormat/>
  </w:style>"#
    );
    for level in 1..=6u8 {
        let sz = config.heading_size(level) * 2;
        styles.push_str(&format!(
            r#"
  <w:style w:type="paragraph" w:styleId="Heading{level}">
    <w:name w:val="heading {level}"/>
    <w:basedOn w:val="Normal"/>
    <w:next w:val="Normal"/>
    <w:uiPriority w:val="9"/>
    <w:qFormat/>
    <w:pPr><w:keepNext/><w:keepLines/><w:spacing w:before="240" w:after="120"/><w:outlineLvl w:val="{}"/></w:pPr>
    <w:rPr><w:b/><w:sz w:val="{sz}"/><w:szCs w:val="{sz}"/></w:rPr>
  </w:style>"#,
            level - 1
        ));
    }
    styles.push_str(&format!(
        r#"
  <w:style w:type="paragraph" w:styleId="CodeBlock">
    <w:name w:val="Code Block"/>
    <w:basedOn w:val="Normal"/>
    <w:qFormat/>
    <w:pPr><w:spacing w:before="120" w:after="120"/></w:pPr>
    <w:rPr><w:rFonts w:ascii="{code}" w:hAnsi="{code}" w:cs="{code}"/></w:rPr>
  </w:style>
</w:styles>"#
    ));
    styles
}

fn numbering_xml(config: &ConvertConfig) -> String {
    let latin = escape_attr(&config.fonts.latin);
    let level = |ilvl: u8, fmt: &str, text: &str| -> String {
        let left = config.list_indent_twips * (u32::from(ilvl) + 1);
        format!(
            r#"<w:lvl w:ilvl="{ilvl}"><w:start w:val="1"/><w:numFmt w:val="{fmt}"/><w:lvlText w:val="{}"/><w:lvlJc w:val="left"/><w:pPr><w:ind w:left="{left}" w:hanging="360"/></w:pPr><w:rPr><w:rFonts w:ascii="{latin}" w:hAnsi="{latin}" w:cs="{latin}"/></w:rPr></w:lvl>"#,
            escape_attr(text)
        )
    };

    let mut out = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:numbering xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:abstractNum w:abstractNumId="1"><w:multiLevelType w:val="hybridMultilevel"/>"#,
    );
    for ilvl in 0..=MAX_LIST_LEVEL {
        out.push_str(&level(ilvl, "bullet", config.bullet_glyph(usize::from(ilvl))));
    }
    out.push_str(
        r#"</w:abstractNum>
  <w:abstractNum w:abstractNumId="2"><w:multiLevelType w:val="hybridMultilevel"/>"#,
    );
    for ilvl in 0..=MAX_LIST_LEVEL {
        out.push_str(&level(ilvl, "decimal", &format!("%{}.", ilvl + 1)));
    }
    out.push_str(&format!(
        r#"</w:abstractNum>
  <w:num w:numId="{BULLET_NUM_ID}"><w:abstractNumId w:val="1"/></w:num>
  <w:num w:numId="{DECIMAL_NUM_ID}"><w:abstractNumId w:val="2"/></w:num>
</w:numbering>"#
    ));
    out
}

/// Serializes `blocks` into the bytes of a `.docx` package.
pub fn write_docx(blocks: &[Block], config: &ConvertConfig) -> Result<Vec<u8>> {
    let links = link_relationships(blocks);
    let has_numbering = paragraphs_of(blocks).iter().any(|p| p.list.is_some());

    let mut w = DocWriter {
        config,
        links,
        body: String::new(),
    };
    for block in blocks {
        match block {
            Block::Paragraph(p) => w.paragraph(p),
            Block::Table(t) => w.table(t),
        }
    }
    if matches!(blocks.last(), Some(Block::Table(_))) {
        w.body.push_str("<w:p/>");
    }

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let opt = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    zip.start_file("[Content_Types].xml", opt)?;
    zip.write_all(content_types_xml(has_numbering).as_bytes())?;

    zip.add_directory("_rels/", opt)?;
    zip.start_file("_rels/.rels", opt)?;
    zip.write_all(PACKAGE_RELS_XML.as_bytes())?;

    zip.add_directory("word/", opt)?;
    zip.add_directory("word/_rels/", opt)?;

    zip.start_file("word/document.xml", opt)?;
    zip.write_all(document_xml(&w.body).as_bytes())?;

    zip.start_file("word/_rels/document.xml.rels", opt)?;
    zip.write_all(document_rels_xml(has_numbering, &w.links).as_bytes())?;

    zip.start_file("word/styles.xml", opt)?;
    zip.write_all(styles_xml(config).as_bytes())?;

    if has_numbering {
        zip.start_file("word/numbering.xml", opt)?;
        zip.write_all(numbering_xml(config).as_bytes())?;
    }

    let bytes = zip.finish()?.into_inner();
    tracing::debug!(
        blocks = blocks.len(),
        links = w.links.len(),
        bytes = bytes.len(),
        "wrote docx package"
    );
    Ok(bytes)
}

pub fn write_docx_file(path: &Path, blocks: &[Block], config: &ConvertConfig) -> Result<()> {
    let bytes = write_docx(blocks, config)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::io("create directory", parent, e))?;
    }
    std::fs::write(path, bytes).map_err(|e| Error::io("write", path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::build_blocks;
    use crate::package::DocxPackage;
    use std::io::Read;
    use zip::ZipArchive;

    fn part(bytes: &[u8], name: &str) -> Option<String> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut file = archive.by_name(name).ok()?;
        let mut s = String::new();
        file.read_to_string(&mut s).unwrap();
        Some(s)
    }

    #[test]
    fn every_run_carries_fonts_kerning_and_size() {
        let cfg = ConvertConfig::default();
        let blocks = build_blocks("<h2>T</h2><p>plain <strong>bold</strong></p>", &cfg);
        let bytes = write_docx(&blocks, &cfg).unwrap();
        let doc = part(&bytes, "word/document.xml").unwrap();

        assert!(doc.contains(r#"<w:pStyle w:val="Heading2"/>"#));
        assert!(doc.contains(r#"<w:jc w:val="center"/>"#));
        assert!(doc.contains(r#"<w:sz w:val="44"/>"#));
        assert!(doc.contains(r#"<w:b/><w:kern w:val="0"/><w:sz w:val="24"/>"#));
        let runs = doc.matches("<w:r>").count();
        assert_eq!(runs, 3);
        assert_eq!(
            doc.matches(r#"<w:rFonts w:ascii="Calibri" w:hAnsi="Calibri" w:cs="Calibri" w:eastAsia="Microsoft YaHei"/>"#)
                .count(),
            runs
        );
        assert_eq!(doc.matches(r#"<w:kern w:val="0"/>"#).count(), runs);
        assert_eq!(doc.matches(r#"<w:spacing w:line="240" w:lineRule="auto"/>"#).count(), 2);
        assert!(part(&bytes, "word/numbering.xml").is_none());
    }

    #[test]
    fn lists_get_numbering_part_with_level_glyphs() {
        let cfg = ConvertConfig::default();
        let blocks = build_blocks("<ul><li>a<ul><li>b</li></ul></li></ul><ol><li>c</li></ol>", &cfg);
        let bytes = write_docx(&blocks, &cfg).unwrap();

        let doc = part(&bytes, "word/document.xml").unwrap();
        assert!(doc.contains(r#"<w:numPr><w:ilvl w:val="1"/><w:numId w:val="1"/></w:numPr>"#));
        assert!(doc.contains(r#"<w:numPr><w:ilvl w:val="0"/><w:numId w:val="2"/></w:numPr>"#));

        let numbering = part(&bytes, "word/numbering.xml").unwrap();
        assert!(numbering.contains(r#"<w:lvl w:ilvl="0"><w:start w:val="1"/><w:numFmt w:val="bullet"/><w:lvlText w:val="•"/>"#));
        assert!(numbering.contains(r#"<w:lvl w:ilvl="1"><w:start w:val="1"/><w:numFmt w:val="bullet"/><w:lvlText w:val="◦"/>"#));
        assert!(numbering.contains(r#"<w:lvl w:ilvl="3"><w:start w:val="1"/><w:numFmt w:val="bullet"/><w:lvlText w:val="•"/>"#));
        assert!(numbering.contains(r#"<w:lvlText w:val="%2."/>"#));
        assert!(numbering.contains(r#"<w:ind w:left="1440" w:hanging="360"/>"#));
        assert!(numbering.contains(r#"<w:ind w:left="6480" w:hanging="360"/>"#));

        let types = part(&bytes, "[Content_Types].xml").unwrap();
        assert!(types.contains("/word/numbering.xml"));
        let rels = part(&bytes, "word/_rels/document.xml.rels").unwrap();
        assert!(rels.contains(r#"Target="numbering.xml""#));
    }

    #[test]
    fn hyperlinks_get_sorted_relationship_ids() {
        let cfg = ConvertConfig::default();
        let blocks = build_blocks(
            r##"<p><a href="https://z.example/">z</a> <a href="https://a.example/?q=1&amp;r=2">a</a> <a href="#top">top</a></p>"##,
            &cfg,
        );
        let bytes = write_docx(&blocks, &cfg).unwrap();
        let rels = part(&bytes, "word/_rels/document.xml.rels").unwrap();
        assert!(rels.contains(r#"Id="rId10" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://a.example/?q=1&amp;r=2" TargetMode="External""#));
        assert!(rels.contains(r#"Id="rId11" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://z.example/""#));

        let doc = part(&bytes, "word/document.xml").unwrap();
        assert!(doc.contains(r#"<w:hyperlink r:id="rId11" w:history="1">"#));
        assert!(doc.contains(r#"<w:hyperlink w:anchor="top" w:history="1">"#));
    }

    #[test]
    fn kept_tables_are_written_and_padded() {
        let cfg = ConvertConfig {
            keep_tables_in_docx: true,
            ..ConvertConfig::default()
        };
        let blocks = build_blocks("<table><tr><td>a</td><td>b</td></tr><tr><td>c</td></tr></table>", &cfg);
        let bytes = write_docx(&blocks, &cfg).unwrap();
        let doc = part(&bytes, "word/document.xml").unwrap();
        assert_eq!(doc.matches("<w:tc>").count(), 4);
        assert_eq!(doc.matches("<w:gridCol/>").count(), 2);
        assert!(doc.contains("</w:tbl><w:p/>"));
    }

    #[test]
    fn written_package_reads_back() {
        let cfg = ConvertConfig::default();
        let blocks = build_blocks("<h1>Title</h1><p>Body &lt;text&gt;</p><ul><li>x</li></ul>", &cfg);
        let bytes = write_docx(&blocks, &cfg).unwrap();
        let pkg = DocxPackage::from_bytes(bytes).unwrap();
        assert_eq!(pkg.heading_level("Heading1"), Some(1));
        assert!(!pkg.numbering.is_ordered("1", 0));
        assert!(pkg.numbering.is_ordered("2", 0));
        assert!(pkg.document.text().contains("Body <text>"));
    }

    #[test]
    fn file_writer_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/out.docx");
        let cfg = ConvertConfig::default();
        write_docx_file(&path, &build_blocks("<p>x</p>", &cfg), &cfg).unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn control_characters_never_reach_document_xml() {
        let cfg = ConvertConfig::default();
        let blocks = build_blocks("<p>a&#1;b\u{8}c</p><pre>x\u{b}\ty</pre>", &cfg);
        let bytes = write_docx(&blocks, &cfg).unwrap();
        let doc = part(&bytes, "word/document.xml").unwrap();
        assert!(doc.contains(">abc</w:t>"));
        assert!(doc.contains(">x\ty</w:t>"));
        assert!(!doc.chars().any(|c| c < ' ' && !matches!(c, '\t' | '\n' | '\r')));
        assert!(DocxPackage::from_bytes(bytes).is_ok());
    }
}
