//! File-level conversions. Each one reads its input, runs the in-memory
//! pipeline and writes the output, creating missing parent directories.

use crate::blocks::build_blocks;
use crate::config::ConvertConfig;
use crate::dom::{parse_html, serialize_document};
use crate::docx::write_docx_file;
use crate::error::{Error, Result};
use crate::markdown::{html_to_markdown, markdown_to_html, markdown_to_html_document};
use crate::package::DocxPackage;
use crate::rewrite::{embed_images, ensure_meta_utf8, stamp_table_widths};
use crate::xhtml::docx_to_xhtml;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Docx,
    Html,
    Markdown,
}

impl Format {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "docx" => Some(Self::Docx),
            "html" | "htm" => Some(Self::Html),
            "md" | "markdown" => Some(Self::Markdown),
            _ => None,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Docx => "docx",
            Self::Html => "html",
            Self::Markdown => "markdown",
        })
    }
}

fn read_text(path: &Path, what: &'static str) -> Result<String> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io("read", path, e))?;
    if text.trim().is_empty() {
        return Err(Error::EmptyInput(what));
    }
    Ok(text)
}

fn write_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::io("create directory", parent, e))?;
    }
    std::fs::write(path, text).map_err(|e| Error::io("write", path, e))
}

/// DOCX package -> standalone UTF-8 HTML with images inlined as data URIs.
pub fn docx_package_to_html(pkg: &DocxPackage, config: &ConvertConfig) -> String {
    let dom = parse_html(&docx_to_xhtml(pkg));
    ensure_meta_utf8(&dom);
    if config.embed_images && !pkg.pictures.is_empty() {
        let embedded = embed_images(&dom, &pkg.pictures);
        tracing::debug!(embedded, pictures = pkg.pictures.len(), "embedded images");
    }
    stamp_table_widths(&dom);
    serialize_document(&dom)
}

pub fn docx_to_html(input: &Path, output: &Path, config: &ConvertConfig) -> Result<()> {
    let pkg = DocxPackage::open(input)?;
    let html = docx_package_to_html(&pkg, config);
    write_text(output, &html)
}

pub fn docx_to_markdown(input: &Path, output: &Path, config: &ConvertConfig) -> Result<()> {
    let pkg = DocxPackage::open(input)?;
    let html = docx_package_to_html(&pkg, config);
    write_text(output, &html_to_markdown(&html))
}

pub fn markdown_to_docx(input: &Path, output: &Path, config: &ConvertConfig) -> Result<()> {
    let md = read_text(input, "markdown input")?;
    let blocks = build_blocks(&markdown_to_html(&md), config);
    write_docx_file(output, &blocks, config)
}

pub fn html_to_docx(input: &Path, output: &Path, config: &ConvertConfig) -> Result<()> {
    let html = read_text(input, "html input")?;
    let blocks = build_blocks(&html, config);
    write_docx_file(output, &blocks, config)
}

/// The page title is the input's file stem.
pub fn markdown_to_html_file(input: &Path, output: &Path) -> Result<()> {
    let md = read_text(input, "markdown input")?;
    let title = input.file_stem().and_then(|s| s.to_str());
    write_text(output, &markdown_to_html_document(&md, title))
}

pub fn html_to_markdown_file(input: &Path, output: &Path) -> Result<()> {
    let html = read_text(input, "html input")?;
    write_text(output, &html_to_markdown(&html))
}

/// Picks the conversion from the input and output extensions.
pub fn convert(input: &Path, output: &Path, config: &ConvertConfig) -> Result<()> {
    let detect = |p: &Path| {
        Format::from_path(p).ok_or_else(|| Error::Unsupported(format!("unknown file type: {}", p.display())))
    };
    let from = detect(input)?;
    let to = detect(output)?;
    tracing::debug!(%from, %to, input = %input.display(), output = %output.display(), "converting");

    match (from, to) {
        (Format::Docx, Format::Html) => docx_to_html(input, output, config),
        (Format::Docx, Format::Markdown) => docx_to_markdown(input, output, config),
        (Format::Markdown, Format::Docx) => markdown_to_docx(input, output, config),
        (Format::Markdown, Format::Html) => markdown_to_html_file(input, output),
        (Format::Html, Format::Markdown) => html_to_markdown_file(input, output),
        (Format::Html, Format::Docx) => html_to_docx(input, output, config),
        (from, to) => Err(Error::Unsupported(format!("{from} -> {to}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::test_support::{build_zip, document};
    use std::path::PathBuf;

    fn write(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    fn sample_docx(dir: &Path) -> PathBuf {
        let rels = r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId8" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="media/image1.png"/></Relationships>"#;
        let body = r#"<w:p><w:r><w:t>Hello</w:t></w:r></w:p><w:p><w:r><w:drawing><wp:inline xmlns:wp="urn:wp" xmlns:a="urn:a"><wp:docPr id="1" name="p"/><a:graphic><a:graphicData><a:blip r:embed="rId8"/></a:graphicData></a:graphic></wp:inline></w:drawing></w:r></w:p><w:tbl><w:tr><w:tc><w:p><w:r><w:t>a</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>b</w:t></w:r></w:p></w:tc></w:tr></w:tbl>"#;
        let bytes = build_zip(&[
            ("word/document.xml", document(body).as_bytes()),
            ("word/_rels/document.xml.rels", rels.as_bytes()),
            ("word/media/image1.png", b"PNG"),
        ]);
        write(dir, "in.docx", &bytes)
    }

    #[test]
    fn formats_come_from_extensions() {
        assert_eq!(Format::from_path(Path::new("a/b.DOCX")), Some(Format::Docx));
        assert_eq!(Format::from_path(Path::new("x.htm")), Some(Format::Html));
        assert_eq!(Format::from_path(Path::new("x.markdown")), Some(Format::Markdown));
        assert_eq!(Format::from_path(Path::new("x.txt")), None);
        assert_eq!(Format::from_path(Path::new("README")), None);
    }

    #[test]
    fn docx_to_html_embeds_images_and_stamps_tables() {
        let dir = tempfile::tempdir().unwrap();
        let input = sample_docx(dir.path());
        let output = dir.path().join("out/page.html");
        docx_to_html(&input, &output, &ConvertConfig::default()).unwrap();

        let html = std::fs::read_to_string(&output).unwrap();
        assert!(html.contains(r#"<meta charset="UTF-8">"#));
        assert!(html.contains("<p>Hello</p>"));
        assert!(html.contains(r#"src="data:image/png;base64,UE5H""#));
        assert!(html.contains("width:50.00%"));
    }

    #[test]
    fn image_embedding_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let input = sample_docx(dir.path());
        let output = dir.path().join("page.html");
        let cfg = ConvertConfig {
            embed_images: false,
            ..ConvertConfig::default()
        };
        docx_to_html(&input, &output, &cfg).unwrap();
        let html = std::fs::read_to_string(&output).unwrap();
        assert!(html.contains(r#"src="word/media/image1.png""#));
    }

    #[test]
    fn docx_to_markdown_keeps_images_and_tables_as_html() {
        let dir = tempfile::tempdir().unwrap();
        let input = sample_docx(dir.path());
        let output = dir.path().join("page.md");
        convert(&input, &output, &ConvertConfig::default()).unwrap();
        let md = std::fs::read_to_string(&output).unwrap();
        assert!(md.starts_with("Hello\n\n<img"));
        assert!(md.contains("data:image/png;base64,UE5H"));
        assert!(md.contains("<table"));
    }

    #[test]
    fn markdown_round_trips_through_docx_and_html() {
        let dir = tempfile::tempdir().unwrap();
        let md = write(
            dir.path(),
            "notes.md",
            "# Notes\n\n##### Tip\nKeep it short.\n\n- one\n- two\n".as_bytes(),
        );
        let docx = dir.path().join("notes.docx");
        convert(&md, &docx, &ConvertConfig::default()).unwrap();

        let pkg = DocxPackage::open(&docx).unwrap();
        let text = pkg.document.text();
        assert!(text.contains("Notes"));
        assert!(text.contains("Tip Keep it short."));

        let html = dir.path().join("notes.html");
        convert(&docx, &html, &ConvertConfig::default()).unwrap();
        let page = std::fs::read_to_string(&html).unwrap();
        assert!(page.contains(r#"<h1 style="text-align:center">"#));
        assert!(page.contains("Notes"));
        assert!(page.contains("<ul><li>"));
        assert_eq!(page.matches("<li>").count(), 2);
    }

    #[test]
    fn markdown_page_uses_file_stem_as_title() {
        let dir = tempfile::tempdir().unwrap();
        let md = write(dir.path(), "guide.md", b"*hi*");
        let out = dir.path().join("guide.html");
        markdown_to_html_file(&md, &out).unwrap();
        let page = std::fs::read_to_string(&out).unwrap();
        assert!(page.contains("<title>guide</title>"));
        assert!(page.contains("<em>hi</em>"));
    }

    #[test]
    fn empty_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let md = write(dir.path(), "blank.md", b"  \n\t\n");
        let err = markdown_to_docx(&md, &dir.path().join("x.docx"), &ConvertConfig::default()).unwrap_err();
        assert!(matches!(err, Error::EmptyInput(_)));
    }

    #[test]
    fn missing_input_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.html");
        let err = html_to_markdown_file(&missing, &dir.path().join("x.md")).unwrap_err();
        assert!(matches!(err, Error::Io { ref path, .. } if path == &missing));
    }

    #[test]
    fn same_format_and_unknown_extensions_are_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let md = write(dir.path(), "a.md", b"x");
        let cfg = ConvertConfig::default();
        assert!(matches!(
            convert(&md, &dir.path().join("b.md"), &cfg),
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(
            convert(&md, &dir.path().join("b.pdf"), &cfg),
            Err(Error::Unsupported(_))
        ));
    }
}
