//! OpenAPI Synth - Command-line tool for generating OpenAPI documents.
//!
//! Analyzes the sources of a Rust web project and writes an OpenAPI 3.0 document
//! (or a request collection) describing its routes and models.
//!
//! # Usage
//!
//! ```bash
//! openapi-synth [OPTIONS] [PROJECT_PATH]
//! ```
//!
//! # Examples
//!
//! Generate YAML documentation:
//! ```bash
//! openapi-synth ./my-api-project -o openapi.yaml
//! ```
//!
//! Use a config file and a persistent cache:
//! ```bash
//! openapi-synth -c openapi-synth.yaml --cache-dir .synth-cache -f json -o openapi.json
//! ```
//!
//! Rebuild whenever a source file changes:
//! ```bash
//! openapi-synth ./my-api-project -o openapi.yaml --watch
//! ```

use anyhow::Result;
use clap::Parser;
use log::info;
use openapi_synth::cli;

fn main() -> Result<()> {
    // Parse once to learn the verbose flag, validate after the logger is up
    let args = cli::CliArgs::parse();

    let log_level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    info!("OpenAPI Synth starting...");

    let args = cli::parse_args_from_parsed(args)?;
    cli::run(args)?;

    info!("OpenAPI document generation completed successfully");

    Ok(())
}
