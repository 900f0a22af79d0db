use crate::analysis::FileAnalysis;
use clap::ValueEnum;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Supported web frameworks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framework {
    /// Axum web framework
    Axum,
    /// Actix-Web framework
    #[value(name = "actix-web", alias = "actix")]
    #[serde(alias = "actix", alias = "actix-web")]
    ActixWeb,
    /// Rocket web framework
    Rocket,
}

impl Framework {
    fn from_crate_name(name: &str) -> Option<Self> {
        match name {
            "axum" => Some(Framework::Axum),
            "actix_web" => Some(Framework::ActixWeb),
            "rocket" => Some(Framework::Rocket),
            _ => None,
        }
    }
}

/// Framework detector for identifying web frameworks used in a Rust project.
///
/// Detection looks at the first segment of every flattened `use` path, so grouped,
/// nested, renamed and glob imports all count.
pub struct FrameworkDetector;

/// Result of framework detection.
pub struct DetectionResult {
    /// Detected frameworks, in a stable order
    pub frameworks: Vec<Framework>,
}

impl FrameworkDetector {
    /// Detects web frameworks used in the analyzed files.
    ///
    /// # Arguments
    ///
    /// * `files` - Analyzed source files
    ///
    /// # Returns
    ///
    /// Returns a `DetectionResult` containing all detected frameworks.
    pub fn detect(files: &[FileAnalysis]) -> DetectionResult {
        debug!("Detecting frameworks in {} files", files.len());

        let detected: BTreeSet<Framework> = files
            .iter()
            .flat_map(|f| f.imports.iter())
            .filter_map(|import| {
                let root = import.split("::").next().unwrap_or(import);
                Framework::from_crate_name(root)
            })
            .collect();

        let frameworks: Vec<Framework> = detected.into_iter().collect();
        debug!("Detected frameworks: {:?}", frameworks);

        DetectionResult { frameworks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::FileAnalyzer;
    use crate::fingerprint::Fingerprint;
    use crate::parser::AstParser;
    use std::path::Path;

    /// Helper function to parse and analyze source text
    fn analyze(content: &str) -> FileAnalysis {
        let unit = AstParser::parse_source(
            Path::new("test.rs"),
            content,
            Fingerprint::compute(content.as_bytes()),
            "",
        )
        .unwrap();
        FileAnalyzer::analyze(unit)
    }

    #[test]
    fn test_detect_axum_framework() {
        let parsed = analyze(
            r#"
            use axum::{Router, routing::get};
            use axum::extract::Path;

            pub fn app() -> Router {
                Router::new().route("/", get(hello))
            }
        "#,
        );
        let result = FrameworkDetector::detect(&[parsed]);

        assert_eq!(result.frameworks, vec![Framework::Axum]);
    }

    #[test]
    fn test_detect_mixed_frameworks() {
        let parsed_axum = analyze("use axum::Router;");
        let parsed_actix = analyze("use actix_web::{web, App};");
        let parsed_rocket = analyze("use rocket::{get, routes};");

        let result = FrameworkDetector::detect(&[parsed_axum, parsed_actix, parsed_rocket]);

        assert_eq!(
            result.frameworks,
            vec![Framework::Axum, Framework::ActixWeb, Framework::Rocket]
        );
    }

    #[test]
    fn test_detect_no_framework() {
        let parsed = analyze(
            r#"
            use std::collections::HashMap;
            use serde::{Serialize, Deserialize};
        "#,
        );
        let result = FrameworkDetector::detect(&[parsed]);

        assert!(result.frameworks.is_empty());
    }

    #[test]
    fn test_detect_with_renamed_and_glob_imports() {
        let renamed = analyze("use actix_web as actix;\nuse actix::web;");
        let glob = analyze("use axum::*;");

        let result = FrameworkDetector::detect(&[renamed, glob]);

        assert_eq!(result.frameworks, vec![Framework::Axum, Framework::ActixWeb]);
    }

    #[test]
    fn test_detect_multiple_files_same_framework() {
        let files = vec![
            analyze("use axum::Router;"),
            analyze("use axum::routing::get;"),
            analyze("use axum::extract::Path;"),
        ];

        let result = FrameworkDetector::detect(&files);

        assert_eq!(result.frameworks, vec![Framework::Axum]);
    }

    #[test]
    fn test_detect_empty_file_list() {
        let result = FrameworkDetector::detect(&[]);

        assert!(result.frameworks.is_empty());
    }
}
