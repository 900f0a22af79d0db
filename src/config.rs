//! Build configuration.
//!
//! One [`Config`] value is passed explicitly to the pipeline; nothing reads global
//! state. Files are YAML or JSON, picked by extension, and every section is optional.

use crate::detector::Framework;
use crate::error::{Error, Result};
use crate::extractor::RouteBinding;
use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the analyzed source tree
    pub root: PathBuf,
    pub info: InfoConfig,
    pub servers: Vec<ServerConfig>,
    /// Route sources to run; detected from imports when empty
    pub frameworks: Vec<Framework>,
    /// Externally supplied route bindings
    pub routes: Vec<RouteBinding>,
    /// YAML or JSON file holding more route bindings
    pub routes_file: Option<PathBuf>,
    pub security: SecurityConfig,
    pub cache: CacheConfig,
    pub scan: ScanConfig,
    pub schema: SchemaConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            info: InfoConfig::default(),
            servers: Vec::new(),
            frameworks: Vec::new(),
            routes: Vec::new(),
            routes_file: None,
            security: SecurityConfig::default(),
            cache: CacheConfig::default(),
            scan: ScanConfig::default(),
            schema: SchemaConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfoConfig {
    pub title: String,
    pub version: String,
    pub description: Option<String>,
}

impl Default for InfoConfig {
    fn default() -> Self {
        Self {
            title: "Generated API".to_string(),
            version: "1.0.0".to_string(),
            description: Some("API documentation generated from Rust code".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A declared authentication scheme: a kind plus free-form parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemeDeclaration {
    #[serde(alias = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub params: BTreeMap<String, String>,
}

impl SchemeDeclaration {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Scheme name -> declaration, emitted in declaration order
    pub schemes: IndexMap<String, SchemeDeclaration>,
    /// Middleware id (or the part before `:`) -> scheme name
    pub middleware: BTreeMap<String, String>,
    /// Schemes applied to operations that get none from middleware or annotations
    pub default: Vec<String>,
}

impl SecurityConfig {
    /// Scheme a middleware id maps to: exact match first, then the part before `:`
    pub fn scheme_for_middleware(&self, middleware: &str) -> Option<&str> {
        self.middleware
            .get(middleware)
            .or_else(|| {
                middleware
                    .split_once(':')
                    .and_then(|(head, _)| self.middleware.get(head))
            })
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Directory of the file-backed store; an in-memory store is used when unset
    pub dir: Option<PathBuf>,
    pub ttl_secs: Option<u64>,
    /// Mix the modification time into file fingerprints
    pub include_mtime: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            ttl_secs: None,
            include_mtime: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Directory or file names skipped while scanning, besides hidden dirs and `target`
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Emit struct-level relations as optional properties
    pub include_relations: bool,
    /// Emit every discovered model, not only the referenced ones
    pub include_all_models: bool,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            include_relations: true,
            include_all_models: true,
        }
    }
}

impl Config {
    /// Configuration for a root directory with every other setting at its default
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load a YAML (`.yaml`/`.yml`) or JSON (`.json`) configuration file.
    ///
    /// A relative `root` or `routes_file` is resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading configuration from {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        let mut config: Config = parse_by_extension(path, &text)?;

        let base = path.parent().unwrap_or(Path::new("."));
        if config.root.is_relative() {
            config.root = base.join(&config.root);
        }
        if let Some(routes_file) = config.routes_file.as_mut() {
            if routes_file.is_relative() {
                *routes_file = base.join(&*routes_file);
            }
        }
        Ok(config)
    }

    /// Check the inputs a build cannot do without
    pub fn validate(&self) -> Result<()> {
        if !self.root.exists() {
            return Err(Error::config(format!(
                "root path does not exist: {}",
                self.root.display()
            )));
        }
        if !self.root.is_dir() {
            return Err(Error::config(format!(
                "root path is not a directory: {}",
                self.root.display()
            )));
        }
        if let Some(routes_file) = &self.routes_file {
            if !routes_file.is_file() {
                return Err(Error::config(format!(
                    "routes file is not readable: {}",
                    routes_file.display()
                )));
            }
        }
        for name in &self.security.default {
            if !self.security.schemes.contains_key(name) {
                return Err(Error::config(format!(
                    "default security scheme `{}` is not declared",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Configured routes followed by the ones from `routes_file`
    pub fn load_routes(&self) -> Result<Vec<RouteBinding>> {
        let mut routes = self.routes.clone();
        if let Some(path) = &self.routes_file {
            let text = std::fs::read_to_string(path).map_err(|e| {
                Error::config(format!("cannot read routes file {}: {}", path.display(), e))
            })?;
            let extra: Vec<RouteBinding> = parse_by_extension(path, &text)?;
            debug!("Loaded {} routes from {}", extra.len(), path.display());
            routes.extend(extra);
        }
        Ok(routes)
    }
}

fn parse_by_extension<T: serde::de::DeserializeOwned>(path: &Path, text: &str) -> Result<T> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let parsed = match extension.as_deref() {
        Some("json") => serde_json::from_str(text).map_err(|e| e.to_string()),
        Some("yaml") | Some("yml") => serde_yaml::from_str(text).map_err(|e| e.to_string()),
        _ => {
            return Err(Error::config(format!(
                "unsupported configuration format: {}",
                path.display()
            )))
        }
    };
    parsed.map_err(|e| Error::config(format!("invalid {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::HttpMethod;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.cache.enabled);
        assert!(config.cache.include_mtime);
        assert!(config.schema.include_relations);
        assert_eq!(config.info.title, "Generated API");
    }

    #[test]
    fn test_load_yaml_resolves_relative_paths() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(
            dir.path().join("routes.yaml"),
            "- method: GET\n  path: /health\n  handler: health\n",
        )
        .unwrap();
        let config_path = dir.path().join("openapi.yaml");
        fs::write(
            &config_path,
            r#"
root: src
routes_file: routes.yaml
info:
  title: Shop
  version: "2.0"
frameworks: [axum, actix]
routes:
  - method: post
    path: /orders
    handler: OrderController@store
    middleware: ["auth:api"]
security:
  schemes:
    token:
      kind: bearer
      bearer_format: JWT
  middleware:
    auth: token
  default: [token]
cache:
  ttl_secs: 60
"#,
        )
        .unwrap();

        let config = Config::load(&config_path).unwrap();
        assert_eq!(config.root, dir.path().join("src"));
        assert_eq!(config.info.title, "Shop");
        assert_eq!(config.frameworks, vec![Framework::Axum, Framework::ActixWeb]);
        assert_eq!(config.cache.ttl_secs, Some(60));
        assert!(config.cache.enabled);
        assert_eq!(
            config.security.schemes["token"],
            SchemeDeclaration::new("bearer").param("bearer_format", "JWT")
        );
        assert_eq!(config.security.scheme_for_middleware("auth:api"), Some("token"));
        assert_eq!(config.security.scheme_for_middleware("throttle"), None);
        config.validate().unwrap();

        let routes = config.load_routes().unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].method, HttpMethod::Post);
        assert_eq!(routes[1].path, "/health");
    }

    #[test]
    fn test_load_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("openapi.json");
        fs::write(&path, r#"{"root": ".", "schema": {"include_relations": false}}"#).unwrap();
        let config = Config::load(&path).unwrap();
        assert!(!config.schema.include_relations);
        assert!(config.schema.include_all_models);
    }

    #[test]
    fn test_validate_rejects_missing_inputs() {
        let missing = Config::for_root("/definitely/not/here");
        assert!(matches!(missing.validate(), Err(Error::Configuration(_))));

        let dir = TempDir::new().unwrap();
        let mut config = Config::for_root(dir.path());
        config.routes_file = Some(dir.path().join("nope.yaml"));
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let mut config = Config::for_root(dir.path());
        config.security.default = vec!["ghost".to_string()];
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_unknown_extension_is_a_configuration_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("openapi.toml");
        fs::write(&path, "root = '.'").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::Configuration(_))));
    }
}
