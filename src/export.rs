//! Export of an assembled document by format name.

use crate::error::{Error, Result};
use crate::openapi_builder::OpenApiDocument;
use crate::serializer::{serialize_collection, serialize_json, serialize_yaml, write_to_file};
use log::info;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Yaml,
    /// Postman v2.1 request collection
    Collection,
}

impl ExportFormat {
    /// Case-insensitive format name
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "yaml" | "yml" => Some(ExportFormat::Yaml),
            "postman" | "collection" => Some(ExportFormat::Collection),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Yaml => "yaml",
            ExportFormat::Collection => "postman_collection.json",
        }
    }
}

/// Renders documents by format name. Never modifies the document.
pub struct ExportManager;

impl ExportManager {
    /// Accepted format names
    pub fn formats() -> &'static [&'static str] {
        &["json", "yaml", "yml", "postman", "collection"]
    }

    /// # Errors
    ///
    /// [`Error::UnsupportedFormat`] for a name that is not one of [`ExportManager::formats`].
    pub fn export(doc: &OpenApiDocument, format: &str) -> Result<Vec<u8>> {
        let parsed =
            ExportFormat::parse(format).ok_or_else(|| Error::UnsupportedFormat(format.to_string()))?;
        let text = match parsed {
            ExportFormat::Json => serialize_json(doc)?,
            ExportFormat::Yaml => serialize_yaml(doc)?,
            ExportFormat::Collection => serialize_collection(doc)?,
        };
        Ok(text.into_bytes())
    }

    /// Render and write to `dest`; `Ok(true)` once written
    pub fn export_to(doc: &OpenApiDocument, format: &str, dest: &Path) -> Result<bool> {
        let bytes = Self::export(doc, format)?;
        write_to_file(&bytes, dest)?;
        info!("Wrote {} ({} bytes)", dest.display(), bytes.len());
        Ok(true)
    }
}
