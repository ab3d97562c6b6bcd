use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid docx package: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("malformed package xml: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("missing package part: {0}")]
    MissingPart(String),
    #[error("invalid config {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("empty {0}")]
    EmptyInput(&'static str),
    #[error("unsupported conversion: {0}")]
    Unsupported(String),
    #[error(transparent)]
    IoRaw(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }
}
