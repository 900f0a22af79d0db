use crate::config::Config;
use crate::detector::Framework;
use crate::diagnostics::Severity;
use crate::error::Error;
use crate::export::ExportManager;
use crate::pipeline::{BuildOutput, Pipeline};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::time::Duration;

/// OpenAPI Synth - Generate OpenAPI documents from Rust web project sources
#[derive(Parser, Debug)]
#[command(name = "openapi-synth")]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to the Rust project directory (overrides `root` from the config file)
    #[arg(value_name = "PROJECT_PATH")]
    pub project_path: Option<PathBuf>,

    /// Configuration file (YAML or JSON)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short = 'f', long = "format", value_enum, default_value = "yaml")]
    pub output_format: OutputFormat,

    /// Output file path (if not specified, outputs to stdout)
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output_path: Option<PathBuf>,

    /// Web framework to read routes for (if not specified, auto-detect)
    #[arg(short = 'w', long = "framework", value_enum)]
    pub framework: Option<Framework>,

    /// Directory for the persistent analysis cache
    #[arg(long = "cache-dir", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Analyze every file, ignoring the cache
    #[arg(long = "no-cache")]
    pub no_cache: bool,

    /// Keep running and rebuild when sources change
    #[arg(long = "watch")]
    pub watch: bool,

    /// Polling interval for --watch, in milliseconds
    #[arg(long = "interval", value_name = "MS", default_value_t = 1000)]
    pub interval_ms: u64,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Yaml,
    Json,
    /// Postman v2.1 request collection
    #[value(alias = "collection")]
    Postman,
}

impl OutputFormat {
    /// Export format name
    pub fn name(&self) -> &'static str {
        match self {
            OutputFormat::Yaml => "yaml",
            OutputFormat::Json => "json",
            OutputFormat::Postman => "postman",
        }
    }
}

/// Parse command line arguments
pub fn parse_args() -> Result<CliArgs> {
    parse_args_from_parsed(CliArgs::parse())
}

/// Validate and log already-parsed arguments
pub fn parse_args_from_parsed(args: CliArgs) -> Result<CliArgs> {
    debug!("Parsed arguments: {:?}", args);

    if args.project_path.is_none() && args.config.is_none() {
        anyhow::bail!("Either a project path or a config file (--config) is required");
    }
    if let Some(path) = &args.project_path {
        if !path.is_dir() {
            anyhow::bail!("Project path is not a directory: {}", path.display());
        }
    }
    if args.watch && args.output_path.is_none() {
        anyhow::bail!("--watch needs an output file (--output)");
    }

    info!("Output format: {}", args.output_format.name());
    match &args.output_path {
        Some(output) => info!("Output file: {}", output.display()),
        None => info!("Output: stdout"),
    }
    match &args.framework {
        Some(framework) => info!("Framework: {:?}", framework),
        None => info!("Framework: auto-detect"),
    }
    Ok(args)
}

/// The configuration file (if any) with command-line overrides applied
pub fn load_config(args: &CliArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(path) = &args.project_path {
        config.root = path.clone();
    }
    if let Some(framework) = args.framework {
        config.frameworks = vec![framework];
    }
    if let Some(dir) = &args.cache_dir {
        config.cache.dir = Some(dir.clone());
    }
    if args.no_cache {
        config.cache.enabled = false;
    }
    Ok(config)
}

/// Run the main workflow
pub fn run(args: CliArgs) -> Result<()> {
    let config = load_config(&args)?;
    info!("Project path: {}", config.root.display());
    let mut pipeline = Pipeline::from_config(config).context("Failed to open the cache")?;

    let output = pipeline.build().context("Build failed")?;
    emit(&args, &output)?;

    if !args.watch {
        return Ok(());
    }
    info!("Watching for changes every {} ms", args.interval_ms);
    loop {
        std::thread::sleep(Duration::from_millis(args.interval_ms));
        let changed = pipeline.poll_changes();
        if changed.is_empty() {
            continue;
        }
        for path in &changed {
            debug!("Changed: {}", path.display());
        }
        match pipeline.build() {
            Ok(output) => keep_watching(emit(&args, &output))?,
            Err(e) => warn!("Rebuild failed: {}", e),
        }
    }
}

/// A failed export does not end a watch; the next change retries it
fn keep_watching(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.downcast_ref::<Error>().is_some_and(Error::is_export_failure) => {
            warn!("Export failed: {:#}", e);
            Ok(())
        }
        other => other,
    }
}

fn emit(args: &CliArgs, output: &BuildOutput) -> Result<()> {
    for diagnostic in &output.diagnostics {
        let location = diagnostic
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        match diagnostic.severity {
            Severity::Error | Severity::Warning => {
                warn!("{:?} {}: {}", diagnostic.kind, location, diagnostic.message)
            }
            Severity::Info => debug!("{:?} {}: {}", diagnostic.kind, location, diagnostic.message),
        }
    }

    let format = args.output_format.name();
    match &args.output_path {
        Some(path) => {
            ExportManager::export_to(&output.document, format, path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        None => {
            let bytes = ExportManager::export(&output.document, format)?;
            println!("{}", String::from_utf8_lossy(&bytes));
        }
    }

    let stats = &output.stats;
    info!("Summary:");
    info!("  - Files scanned: {}", stats.files_scanned);
    info!("  - Files analyzed: {}", stats.files_analyzed);
    info!("  - Files from cache: {}", stats.files_cached);
    info!("  - Files failed: {}", stats.files_failed);
    info!("  - Models: {}", stats.models);
    info!("  - Operations: {}", stats.operations);
    info!("  - Diagnostics: {}", output.diagnostics.len());
    Ok(())
}
