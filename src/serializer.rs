//! Renderings of an OpenAPI document: JSON, YAML and a request collection.

use crate::error::{Error, Result};
use crate::example::ExampleGenerator;
use crate::extractor::HttpMethod;
use crate::openapi_builder::{OpenApiDocument, Operation};
use log::debug;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Serializes an OpenAPI document to YAML.
pub fn serialize_yaml(doc: &OpenApiDocument) -> Result<String> {
    debug!("Serializing OpenAPI document to YAML");
    Ok(serde_yaml::to_string(doc)?)
}

/// Serializes an OpenAPI document to pretty-printed JSON.
///
/// Maps in the document are ordered, so equal documents always render to equal bytes.
pub fn serialize_json(doc: &OpenApiDocument) -> Result<String> {
    debug!("Serializing OpenAPI document to JSON");
    Ok(serde_json::to_string_pretty(doc)?)
}

/// Writes content to a file, creating parent directories as needed.
///
/// # Errors
///
/// [`Error::ExportWrite`] when the directory or the file cannot be written.
pub fn write_to_file(content: &[u8], path: &Path) -> Result<()> {
    debug!("Writing {} bytes to {}", content.len(), path.display());
    let write_error = |source: std::io::Error| Error::ExportWrite {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_error)?;
    }
    fs::write(path, content).map_err(write_error)
}

pub const COLLECTION_SCHEMA: &str =
    "https://schema.getpostman.com/json/collection/v2.1.0/collection.json";

/// Request collection in the Postman v2.1 shape
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Collection {
    pub info: CollectionInfo,
    pub item: Vec<CollectionItem>,
    pub variable: Vec<KeyValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schema: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionItem {
    pub name: String,
    pub request: CollectionRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionRequest {
    pub method: String,
    pub header: Vec<KeyValue>,
    pub url: CollectionUrl,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<CollectionBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionUrl {
    pub raw: String,
    pub host: Vec<String>,
    pub path: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub query: Vec<KeyValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub variable: Vec<KeyValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionBody {
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub urlencoded: Vec<KeyValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

const BASE_URL: &str = "{{baseUrl}}";

/// One request per operation, in document order, with example values filled in
pub fn to_collection(doc: &OpenApiDocument) -> Collection {
    let examples = ExampleGenerator::new(&doc.components.schemas);
    let item = doc
        .operations()
        .map(|(path, method, op)| collection_item(path, method, op, &examples))
        .collect();
    let base_url = doc
        .servers
        .first()
        .map(|s| s.url.clone())
        .unwrap_or_else(|| "http://localhost".to_string());

    Collection {
        info: CollectionInfo {
            name: doc.info.title.clone(),
            description: doc.info.description.clone(),
            schema: COLLECTION_SCHEMA.to_string(),
        },
        item,
        variable: vec![KeyValue::new("baseUrl", base_url)],
    }
}

pub fn serialize_collection(doc: &OpenApiDocument) -> Result<String> {
    debug!("Serializing OpenAPI document to a request collection");
    Ok(serde_json::to_string_pretty(&to_collection(doc))?)
}

fn collection_item(
    path: &str,
    method: HttpMethod,
    op: &Operation,
    examples: &ExampleGenerator<'_>,
) -> CollectionItem {
    let mut header = Vec::new();
    let mut query = Vec::new();
    let mut variable = Vec::new();
    for param in &op.parameters {
        let value = display_value(&examples.example(&param.schema));
        match param.location.as_str() {
            "path" => variable.push(KeyValue::new(param.name.clone(), value)),
            "query" => query.push(KeyValue::new(param.name.clone(), value)),
            "header" => header.push(KeyValue::new(param.name.clone(), value)),
            _ => {}
        }
    }

    let body = op.request_body.as_ref().and_then(|body| {
        let (content_type, media) = body.content.iter().next()?;
        header.push(KeyValue::new("Content-Type", content_type.clone()));
        let example = media
            .example
            .clone()
            .unwrap_or_else(|| examples.example(&media.schema));
        Some(if content_type == "application/x-www-form-urlencoded" {
            let urlencoded = match &example {
                Value::Object(map) => map
                    .iter()
                    .map(|(k, v)| KeyValue::new(k.clone(), display_value(v)))
                    .collect(),
                _ => Vec::new(),
            };
            CollectionBody {
                mode: "urlencoded".to_string(),
                raw: None,
                urlencoded,
            }
        } else {
            CollectionBody {
                mode: "raw".to_string(),
                raw: Some(serde_json::to_string_pretty(&example).unwrap_or_default()),
                urlencoded: Vec::new(),
            }
        })
    });

    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(name) => format!(":{}", name),
            None => s.to_string(),
        })
        .collect();
    let mut raw = format!("{}/{}", BASE_URL, segments.join("/"));
    if !query.is_empty() {
        let pairs: Vec<String> = query
            .iter()
            .map(|kv| format!("{}={}", kv.key, kv.value))
            .collect();
        raw = format!("{}?{}", raw, pairs.join("&"));
    }

    CollectionItem {
        name: op
            .summary
            .clone()
            .unwrap_or_else(|| format!("{} {}", method, path)),
        request: CollectionRequest {
            method: method.to_string(),
            header,
            url: CollectionUrl {
                raw,
                host: vec![BASE_URL.to_string()],
                path: segments,
                query,
                variable,
            },
            body,
            description: op.description.clone(),
        },
    }
}

/// Strings render bare, everything else as JSON
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
