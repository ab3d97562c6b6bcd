use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Fonts {
    /// ASCII / hAnsi / complex-script font.
    pub latin: String,
    /// CJK font; keeps Latin/CJK spacing even in Word.
    pub east_asia: String,
    pub code: String,
}

impl Default for Fonts {
    fn default() -> Self {
        Self {
            latin: "Calibri".to_string(),
            east_asia: "Microsoft YaHei".to_string(),
            code: "Consolas".to_string(),
        }
    }
}

/// Knobs shared by every conversion direction.
///
/// Every field has a default, so a TOML file only needs the keys it overrides:
///
/// ```toml
/// body_size_pt = 11
/// bullet_glyphs = ["-", "+"]
///
/// [fonts]
/// east_asia = "SimSun"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    pub fonts: Fonts,
    pub body_size_pt: u32,
    /// Point sizes for h1..h6.
    pub heading_sizes_pt: [u32; 6],
    pub bullet_glyphs: Vec<String>,
    pub list_indent_twips: u32,
    pub blockquote_indent_twips: u32,
    pub merge_small_headings: bool,
    pub embed_images: bool,
    pub keep_tables_in_docx: bool,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            fonts: Fonts::default(),
            body_size_pt: 12,
            heading_sizes_pt: [26, 22, 18, 16, 14, 12],
            bullet_glyphs: vec!["•".to_string(), "◦".to_string(), "▪".to_string()],
            list_indent_twips: 720,
            blockquote_indent_twips: 720,
            merge_small_headings: true,
            embed_images: true,
            keep_tables_in_docx: false,
        }
    }
}

impl ConvertConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::io("read", path, e))?;
        Self::from_toml_str(&raw).map_err(|source| Error::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(raw: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Level is clamped to 1..=6.
    pub fn heading_size(&self, level: u8) -> u32 {
        let idx = usize::from(level.clamp(1, 6)) - 1;
        self.heading_sizes_pt[idx]
    }

    /// Glyphs cycle when the nesting is deeper than the configured list.
    pub fn bullet_glyph(&self, depth: usize) -> &str {
        if self.bullet_glyphs.is_empty() {
            return "•";
        }
        &self.bullet_glyphs[depth % self.bullet_glyphs.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_sizes_follow_levels_and_clamp() {
        let cfg = ConvertConfig::default();
        assert_eq!(cfg.heading_size(1), 26);
        assert_eq!(cfg.heading_size(4), 16);
        assert_eq!(cfg.heading_size(6), 12);
        assert_eq!(cfg.heading_size(0), 26);
        assert_eq!(cfg.heading_size(9), 12);
    }

    #[test]
    fn bullet_glyphs_cycle_by_depth() {
        let cfg = ConvertConfig::default();
        assert_eq!(cfg.bullet_glyph(0), "•");
        assert_eq!(cfg.bullet_glyph(1), "◦");
        assert_eq!(cfg.bullet_glyph(2), "▪");
        assert_eq!(cfg.bullet_glyph(3), "•");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = ConvertConfig::from_toml_str(
            r#"
body_size_pt = 11
[fonts]
east_asia = "SimSun"
"#,
        )
        .unwrap();
        assert_eq!(cfg.body_size_pt, 11);
        assert_eq!(cfg.fonts.east_asia, "SimSun");
        assert_eq!(cfg.fonts.latin, "Calibri");
        assert!(cfg.merge_small_headings);
    }

    #[test]
    fn load_reports_path_on_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "body_size_pt = \"big\"").unwrap();
        let err = ConvertConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }
}
