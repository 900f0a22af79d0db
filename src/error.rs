use std::path::PathBuf;

use crate::declaration::Span;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the library.
///
/// Only [`Error::Configuration`] aborts a build. Parse failures of single files are
/// returned by the parser but the pipeline turns them into diagnostics and keeps going.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required external input (root path, config file, routes file) is missing or unreadable
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A source file's structure could not be derived
    #[error("parse error in {}: {message}", file.display())]
    Parse {
        file: PathBuf,
        message: String,
        span: Option<Span>,
    },

    /// The requested export format is not known
    #[error("unsupported export format `{0}`")]
    UnsupportedFormat(String),

    /// The export destination could not be written
    #[error("failed to write export to {}: {source}", path.display())]
    ExportWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The cache store failed
    #[error("cache error: {0}")]
    Cache(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether this error belongs to the export failure family
    pub fn is_export_failure(&self) -> bool {
        matches!(self, Error::UnsupportedFormat(_) | Error::ExportWrite { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(format!("JSON: {}", err))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(format!("YAML: {}", err))
    }
}
