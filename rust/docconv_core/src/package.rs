//! Read side of a DOCX package: the parts the XHTML converter needs.

use crate::error::{Error, Result};
use crate::xml::{self, XmlElement};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;
use zip::result::ZipError;
use zip::ZipArchive;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Picture {
    pub file_name: String,
    pub data: Vec<u8>,
}

impl Picture {
    pub fn extension(&self) -> &str {
        self.file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    /// Last segment of the relationship type URI, e.g. `image` or `hyperlink`.
    pub kind: String,
    pub target: String,
    pub external: bool,
}

/// (numId, ilvl) -> ordered, resolved through `w:num/w:abstractNumId`.
#[derive(Debug, Clone, Default)]
pub struct Numbering {
    abstract_levels: HashMap<String, HashMap<u32, bool>>,
    nums: HashMap<String, String>,
}

impl Numbering {
    fn parse(root: &XmlElement) -> Self {
        let mut out = Self::default();
        for abs in root.children_named("abstractNum") {
            let Some(id) = abs.attr("abstractNumId") else { continue };
            let levels = abs
                .children_named("lvl")
                .filter_map(|lvl| {
                    let ilvl = lvl.attr("ilvl")?.parse::<u32>().ok()?;
                    let ordered = lvl.child_val("numFmt").map(|f| f != "bullet").unwrap_or(false);
                    Some((ilvl, ordered))
                })
                .collect();
            out.abstract_levels.insert(id.to_string(), levels);
        }
        for num in root.children_named("num") {
            if let (Some(num_id), Some(abs)) = (num.attr("numId"), num.child_val("abstractNumId")) {
                out.nums.insert(num_id.to_string(), abs.to_string());
            }
        }
        out
    }

    /// Unknown numbering renders as bullets.
    pub fn is_ordered(&self, num_id: &str, ilvl: u32) -> bool {
        self.nums
            .get(num_id)
            .and_then(|abs| self.abstract_levels.get(abs))
            .and_then(|levels| levels.get(&ilvl))
            .copied()
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct DocxPackage {
    pub document: XmlElement,
    pub title: Option<String>,
    pub heading_styles: HashMap<String, u8>,
    pub numbering: Numbering,
    pub relationships: HashMap<String, Relationship>,
    pub pictures: Vec<Picture>,
}

fn read_part<R: Read + std::io::Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Option<String>> {
    let mut file = match archive.by_name(name) {
        Ok(f) => f,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut buf = String::new();
    file.read_to_string(&mut buf)?;
    Ok(Some(buf))
}

fn heading_level_from_style(style: &XmlElement) -> Option<u8> {
    let id = style.attr("styleId").unwrap_or_default().to_ascii_lowercase();
    if id == "title" {
        return Some(1);
    }
    let from_name = |s: &str| -> Option<u8> {
        let rest = s.strip_prefix("heading")?.trim();
        rest.parse::<u8>().ok().filter(|l| (1..=6).contains(l))
    };
    if let Some(l) = from_name(&id) {
        return Some(l);
    }
    if let Some(l) = style.child_val("name").and_then(|n| from_name(&n.to_ascii_lowercase())) {
        return Some(l);
    }
    style
        .child("pPr")
        .and_then(|p| p.child_val("outlineLvl"))
        .and_then(|v| v.parse::<u8>().ok())
        .filter(|l| *l < 6)
        .map(|l| l + 1)
}

fn parse_heading_styles(root: &XmlElement) -> HashMap<String, u8> {
    root.children_named("style")
        .filter(|s| s.attr("type").map(|t| t == "paragraph").unwrap_or(true))
        .filter_map(|s| Some((s.attr("styleId")?.to_string(), heading_level_from_style(s)?)))
        .collect()
}

fn parse_relationships(root: &XmlElement) -> HashMap<String, Relationship> {
    root.children_named("Relationship")
        .filter_map(|r| {
            let id = r.attr("Id")?;
            let kind = r.attr("Type").unwrap_or_default();
            let kind = kind.rsplit('/').next().unwrap_or_default().to_string();
            let rel = Relationship {
                kind,
                target: r.attr("Target")?.to_string(),
                external: r.attr("TargetMode").map(|m| m == "External").unwrap_or(false),
            };
            Some((id.to_string(), rel))
        })
        .collect()
}

impl DocxPackage {
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| Error::io("read", path, e))?;
        Self::from_bytes(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;

        let document_xml = read_part(&mut archive, "word/document.xml")?
            .ok_or_else(|| Error::MissingPart("word/document.xml".to_string()))?;
        let document = xml::parse(&document_xml)?;

        let heading_styles = match read_part(&mut archive, "word/styles.xml")? {
            Some(s) => parse_heading_styles(&xml::parse(&s)?),
            None => HashMap::new(),
        };
        let numbering = match read_part(&mut archive, "word/numbering.xml")? {
            Some(s) => Numbering::parse(&xml::parse(&s)?),
            None => Numbering::default(),
        };
        let relationships = match read_part(&mut archive, "word/_rels/document.xml.rels")? {
            Some(s) => parse_relationships(&xml::parse(&s)?),
            None => HashMap::new(),
        };
        let title = match read_part(&mut archive, "docProps/core.xml")? {
            Some(s) => xml::parse(&s)?
                .child("title")
                .map(|t| t.text().trim().to_string())
                .filter(|t| !t.is_empty()),
            None => None,
        };

        let mut pictures = Vec::new();
        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if !file.is_file() || !file.name().starts_with("word/media/") {
                continue;
            }
            let file_name = file.name().rsplit('/').next().unwrap_or_default().to_string();
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)?;
            pictures.push(Picture { file_name, data });
        }

        tracing::debug!(
            headings = heading_styles.len(),
            relationships = relationships.len(),
            pictures = pictures.len(),
            "opened docx package"
        );

        Ok(Self {
            document,
            title,
            heading_styles,
            numbering,
            relationships,
            pictures,
        })
    }

    pub fn heading_level(&self, style_id: &str) -> Option<u8> {
        self.heading_styles.get(style_id).copied()
    }

    /// Package path of an image relationship, e.g. `word/media/image1.png`.
    pub fn image_path(&self, rid: &str) -> Option<String> {
        let rel = self.relationships.get(rid)?;
        if rel.external {
            return Some(rel.target.clone());
        }
        Some(match rel.target.strip_prefix('/') {
            Some(abs) => abs.to_string(),
            None => format!("word/{}", rel.target),
        })
    }

    pub fn hyperlink_target(&self, rid: &str) -> Option<&str> {
        self.relationships
            .get(rid)
            .filter(|r| r.kind == "hyperlink")
            .map(|r| r.target.as_str())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    pub const W_NS: &str = r#"xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships""#;

    pub fn build_zip(parts: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in parts {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    pub fn document(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document {W_NS}><w:body>{body}</w:body></w:document>"#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{build_zip, document, W_NS};
    use super::*;

    #[test]
    fn missing_document_part_is_reported() {
        let bytes = build_zip(&[("word/styles.xml", b"<w:styles/>")]);
        let err = DocxPackage::from_bytes(bytes).unwrap_err();
        assert!(matches!(err, Error::MissingPart(ref p) if p == "word/document.xml"));
    }

    #[test]
    fn not_a_zip_is_a_zip_error() {
        let err = DocxPackage::from_bytes(b"plain text".to_vec()).unwrap_err();
        assert!(matches!(err, Error::Zip(_)));
    }

    #[test]
    fn reads_styles_numbering_rels_and_media() {
        let styles = format!(
            r#"<w:styles {W_NS}>
<w:style w:type="paragraph" w:styleId="Heading2"><w:name w:val="heading 2"/></w:style>
<w:style w:type="paragraph" w:styleId="a3"><w:name w:val="heading 3"/></w:style>
<w:style w:type="paragraph" w:styleId="Custom"><w:name w:val="Custom"/><w:pPr><w:outlineLvl w:val="3"/></w:pPr></w:style>
<w:style w:type="paragraph" w:styleId="Normal"><w:name w:val="Normal"/></w:style>
</w:styles>"#
        );
        let numbering = format!(
            r#"<w:numbering {W_NS}>
<w:abstractNum w:abstractNumId="0"><w:lvl w:ilvl="0"><w:numFmt w:val="bullet"/></w:lvl><w:lvl w:ilvl="1"><w:numFmt w:val="decimal"/></w:lvl></w:abstractNum>
<w:num w:numId="5"><w:abstractNumId w:val="0"/></w:num>
</w:numbering>"#
        );
        let rels = r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId4" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="media/image1.png"/>
<Relationship Id="rId5" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://example.com/" TargetMode="External"/>
</Relationships>"#;
        let bytes = build_zip(&[
            ("word/document.xml", document("").as_bytes()),
            ("word/styles.xml", styles.as_bytes()),
            ("word/numbering.xml", numbering.as_bytes()),
            ("word/_rels/document.xml.rels", rels.as_bytes()),
            ("word/media/image1.png", b"\x89PNG"),
        ]);
        let pkg = DocxPackage::from_bytes(bytes).unwrap();

        assert_eq!(pkg.heading_level("Heading2"), Some(2));
        assert_eq!(pkg.heading_level("a3"), Some(3));
        assert_eq!(pkg.heading_level("Custom"), Some(4));
        assert_eq!(pkg.heading_level("Normal"), None);

        assert!(!pkg.numbering.is_ordered("5", 0));
        assert!(pkg.numbering.is_ordered("5", 1));
        assert!(!pkg.numbering.is_ordered("99", 0));

        assert_eq!(pkg.image_path("rId4").as_deref(), Some("word/media/image1.png"));
        assert_eq!(pkg.hyperlink_target("rId5"), Some("https://example.com/"));
        assert_eq!(pkg.hyperlink_target("rId4"), None);

        assert_eq!(pkg.pictures.len(), 1);
        assert_eq!(pkg.pictures[0].file_name, "image1.png");
        assert_eq!(pkg.pictures[0].extension(), "png");
    }
}
