//! OpenAPI Synth - OpenAPI documents from the sources of Rust web projects.
//!
//! The library statically analyzes a source tree, collects data models and HTTP
//! routes, and assembles an OpenAPI 3.0 document. Per-file analyses are cached by
//! content fingerprint so that rebuilding after an edit only re-analyzes what changed.
//!
//! # Supported Frameworks
//!
//! - **Axum**: routes from `Router` definitions and method chains
//! - **Actix-Web** and **Rocket**: routes from attributes like `#[get("/path")]`
//! - Any framework: routes bound in the configuration file
//!
//! # Architecture
//!
//! 1. [`scanner`] - Lists the `.rs` files under the root in a stable order
//! 2. [`fingerprint`] and [`cache`] - Skip files whose analysis is already stored
//! 3. [`parser`] and [`analysis`] - Turn one file into declarations, models and rule sets
//! 4. [`model`], [`validation`] and [`relation`] - Merge models across files
//! 5. [`extractor`] and [`route_analyzer`] - Find routes and bind them to handlers
//! 6. [`operation`] and [`parameter`] - Describe each route as an operation
//! 7. [`openapi_builder`] and [`schema_generator`] - Assemble the document
//! 8. [`export`] - Render it as JSON, YAML or a request collection
//!
//! [`pipeline`] runs all of these in order.
//!
//! # Example Usage
//!
//! ```no_run
//! use openapi_synth::{config::Config, export::ExportManager, pipeline::Pipeline};
//!
//! let config = Config::for_root("./my-project");
//! let mut pipeline = Pipeline::from_config(config).unwrap();
//! let output = pipeline.build().unwrap();
//!
//! for diagnostic in &output.diagnostics {
//!     eprintln!("{:?}: {}", diagnostic.kind, diagnostic.message);
//! }
//! let yaml = ExportManager::export(&output.document, "yaml").unwrap();
//! println!("{}", String::from_utf8_lossy(&yaml));
//! ```
//!
//! # Command-Line Interface
//!
//! For command-line usage, see the [`cli`] module.

pub mod analysis;
pub mod annotation;
pub mod cache;
pub mod change_detector;
pub mod cli;
pub mod config;
pub mod declaration;
pub mod detector;
pub mod diagnostics;
pub mod docblock;
pub mod error;
pub mod example;
pub mod export;
pub mod extractor;
pub mod fingerprint;
pub mod model;
pub mod openapi_builder;
pub mod operation;
pub mod parameter;
pub mod parser;
pub mod pipeline;
pub mod relation;
pub mod route_analyzer;
pub mod scanner;
pub mod schema_generator;
pub mod security;
pub mod serializer;
pub mod type_ref;
pub mod type_resolver;
pub mod validation;
