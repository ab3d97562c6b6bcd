//! Conversions between DOCX, HTML and Markdown.
//!
//! Parsing and rendering are left to `html5ever`, `pulldown-cmark`, `zip` and
//! `quick-xml`; this crate wires them together and applies a few fixed DOM
//! rules on the way (inlined images, table widths, heading sizes, list glyphs).

pub mod blocks;
pub mod config;
pub mod convert;
pub mod docx;
pub mod dom;
pub mod entities;
pub mod error;
pub mod markdown;
pub mod package;
pub mod rewrite;
pub mod xhtml;
pub mod xml;

pub use config::{ConvertConfig, Fonts};
pub use convert::{
    convert, docx_package_to_html, docx_to_html, docx_to_markdown, html_to_docx, html_to_markdown_file,
    markdown_to_docx, markdown_to_html_file, Format,
};
pub use error::{Error, Result};
pub use markdown::{html_to_markdown, markdown_to_html, markdown_to_html_document};
pub use package::DocxPackage;
