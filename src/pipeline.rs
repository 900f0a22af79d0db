//! The build: scan, analyze (or reuse cached analyses), resolve, assemble.

use crate::analysis::{FileAnalysis, FileAnalyzer};
use crate::cache::{CacheManager, CacheStore, FileStore, MemoryStore};
use crate::change_detector::{ChangeDetector, FileState};
use crate::config::Config;
use crate::detector::{Framework, FrameworkDetector};
use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink, Diagnostics, Severity};
use crate::error::{Error, Result};
use crate::extractor::actix::ActixExtractor;
use crate::extractor::axum::AxumExtractor;
use crate::extractor::{ConfiguredRoutes, RouteSource};
use crate::fingerprint::Fingerprint;
use crate::model::ModelRegistry;
use crate::openapi_builder::{OpenApiBuilder, OpenApiDocument};
use crate::operation::OperationResolver;
use crate::parser::{module_path_for, AstParser};
use crate::relation::RelationResolver;
use crate::route_analyzer::{HandlerRegistry, RouteAnalyzer};
use crate::scanner::FileScanner;
use crate::validation::RuleSet;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Counters for one build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    pub files_scanned: usize,
    /// Parsed and analyzed in this build
    pub files_analyzed: usize,
    pub files_cached: usize,
    pub files_failed: usize,
    pub models: usize,
    pub operations: usize,
}

/// A document plus everything that went wrong on the way to it
#[derive(Debug)]
pub struct BuildOutput {
    pub document: OpenApiDocument,
    pub diagnostics: Vec<Diagnostic>,
    pub stats: BuildStats,
}

pub struct Pipeline {
    config: Config,
    cache: Option<CacheManager>,
    detector: ChangeDetector,
}

impl Pipeline {
    /// A pipeline over an explicit store; `None` disables caching
    pub fn new(config: Config, store: Option<Box<dyn CacheStore>>) -> Self {
        let cache = store.map(|store| CacheManager::new(store, config.cache.ttl_secs));
        let detector = ChangeDetector::new(config.cache.include_mtime);
        Self {
            config,
            cache,
            detector,
        }
    }

    /// A pipeline whose store follows `config.cache`
    pub fn from_config(config: Config) -> Result<Self> {
        let store: Option<Box<dyn CacheStore>> = match (&config.cache.enabled, &config.cache.dir) {
            (false, _) => None,
            (true, Some(dir)) => Some(Box::new(FileStore::open(dir)?)),
            (true, None) => Some(Box::new(MemoryStore::new())),
        };
        Ok(Self::new(config, store))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self, path: &Path) -> FileState {
        self.detector.state(path)
    }

    /// Re-fingerprint tracked files and mark the changed ones stale
    pub fn poll_changes(&mut self) -> Vec<PathBuf> {
        self.detector.poll()
    }

    pub fn reset_cache(&mut self) -> Result<()> {
        self.detector.reset();
        match &self.cache {
            Some(cache) => cache.reset(),
            None => Ok(()),
        }
    }

    /// Run one full build.
    ///
    /// # Errors
    ///
    /// Only configuration failures abort a build. Everything else is recovered and
    /// reported in [`BuildOutput::diagnostics`].
    pub fn build(&mut self) -> Result<BuildOutput> {
        self.config.validate()?;
        let mut sink = Diagnostics::new();
        let mut stats = BuildStats::default();

        let scan = FileScanner::new(self.config.root.clone())
            .with_exclude(self.config.scan.exclude.clone())
            .scan()?;
        for warning in scan.warnings {
            sink.emit(Diagnostic::new(
                DiagnosticKind::Parse,
                Severity::Warning,
                warning,
            ));
        }
        stats.files_scanned = scan.rust_files.len();
        info!("Scanning {} files", stats.files_scanned);

        let scanned: BTreeSet<&Path> = scan.rust_files.iter().map(PathBuf::as_path).collect();
        self.detector.retain(|p| scanned.contains(p));
        if let Some(cache) = &self.cache {
            match cache.retain_paths(|p| scanned.contains(p)) {
                Ok(0) => {}
                Ok(evicted) => debug!("Evicted {} cache entries for removed files", evicted),
                Err(e) => warn!("Could not evict cache entries for removed files: {}", e),
            }
        }

        let mut files = Vec::new();
        for path in &scan.rust_files {
            match self.analyze_file(path, &mut stats) {
                Ok(analysis) => files.push(analysis),
                Err(e) => {
                    stats.files_failed += 1;
                    sink.emit(parse_failure(path, e));
                }
            }
        }
        for file in &files {
            sink.extend(file.diagnostics.iter().cloned());
        }

        let document = self.assemble(&files, &mut sink, &mut stats)?;
        info!(
            "Built {} operations from {} files ({} analyzed, {} cached, {} failed)",
            stats.operations,
            stats.files_scanned,
            stats.files_analyzed,
            stats.files_cached,
            stats.files_failed
        );
        Ok(BuildOutput {
            document,
            diagnostics: sink.into_vec(),
            stats,
        })
    }

    /// Cached analysis when the fingerprint is known, fresh analysis otherwise
    fn analyze_file(&mut self, path: &Path, stats: &mut BuildStats) -> Result<FileAnalysis> {
        let (fingerprint, content) = Fingerprint::from_file(path, self.config.cache.include_mtime)?;
        let previous = self.detector.stored_fingerprint(path).cloned();
        let state = self.detector.observe(path, fingerprint.clone());

        if let Some(cache) = &self.cache {
            if state == FileState::Stale {
                if let Some(previous) = previous.filter(|p| *p != fingerprint) {
                    if let Err(e) = cache.invalidate(path, &previous) {
                        warn!("Could not drop stale cache entry for {}: {}", path.display(), e);
                    }
                }
            }
            match cache.lookup(path, &fingerprint) {
                Ok(Some(analysis)) => {
                    debug!("Cache hit for {}", path.display());
                    stats.files_cached += 1;
                    self.detector.mark_cached(path);
                    return Ok(analysis);
                }
                Ok(None) => {}
                Err(e) => warn!("Cache lookup failed for {}: {}", path.display(), e),
            }
        }

        let module_path = module_path_for(&self.config.root, path);
        let unit = AstParser::parse_source(path, &content, fingerprint, &module_path)?;
        let analysis = FileAnalyzer::analyze(unit);
        stats.files_analyzed += 1;

        if let Some(cache) = &self.cache {
            match cache.store(&analysis) {
                Ok(()) => self.detector.mark_cached(path),
                Err(e) => warn!("Could not cache {}: {}", path.display(), e),
            }
        }
        Ok(analysis)
    }

    fn assemble(
        &self,
        files: &[FileAnalysis],
        sink: &mut Diagnostics,
        stats: &mut BuildStats,
    ) -> Result<OpenApiDocument> {
        let mut models = ModelRegistry::new();
        let mut rule_sets: BTreeMap<String, RuleSet> = BTreeMap::new();
        for file in files {
            for model in &file.models {
                models.insert(model.clone(), sink);
            }
            for (target, set) in &file.rule_sets {
                rule_sets
                    .entry(target.clone())
                    .or_default()
                    .merge(set.clone());
            }
        }
        models.apply_rule_sets(&rule_sets);
        RelationResolver::resolve(&mut models, sink);
        stats.models = models.len();

        let sources = self.route_sources(files)?;
        let handlers = HandlerRegistry::build(files);
        let routes = RouteAnalyzer::analyze(&sources, files, &handlers, sink);

        let resolver = OperationResolver::new(&models, &self.config.security);
        let mut builder = OpenApiBuilder::new(&self.config, &models);
        for route in &routes {
            let Some(handler) = handlers.get(&route.handler) else {
                continue;
            };
            let operation = resolver.resolve(route, &handler, sink);
            builder.add_operation(&operation);
        }

        let document = builder.build();
        stats.operations = document.operation_count();
        Ok(document)
    }

    /// Configured routes first, then attribute routes, then router chains
    fn route_sources(&self, files: &[FileAnalysis]) -> Result<Vec<Box<dyn RouteSource>>> {
        let frameworks = if self.config.frameworks.is_empty() {
            FrameworkDetector::detect(files).frameworks
        } else {
            self.config.frameworks.clone()
        };
        debug!("Route sources for frameworks: {:?}", frameworks);

        let mut sources: Vec<Box<dyn RouteSource>> =
            vec![Box::new(ConfiguredRoutes::new(self.config.load_routes()?))];
        let attribute_routed = frameworks.is_empty()
            || frameworks
                .iter()
                .any(|f| matches!(f, Framework::ActixWeb | Framework::Rocket));
        if attribute_routed {
            sources.push(Box::new(ActixExtractor));
        }
        sources.push(Box::new(AxumExtractor));
        Ok(sources)
    }
}

fn parse_failure(path: &Path, error: Error) -> Diagnostic {
    match error {
        Error::Parse { message, span, .. } => {
            let diagnostic = Diagnostic::parse(path, message);
            match span {
                Some(span) => diagnostic.with_span(span),
                None => diagnostic,
            }
        }
        other => Diagnostic::parse(path, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(
            dir.path().join("src/main.rs"),
            r#"
            use axum::{routing::get, Router};
            mod items;
            fn app() -> Router {
                Router::new().route("/items/:id", get(items::show))
            }
            "#,
        )
        .unwrap();
        fs::write(
            dir.path().join("src/items.rs"),
            r#"
            pub struct Item { pub id: i64, pub name: String }
            pub async fn show(id: i64) -> Json<Item> { todo!() }
            "#,
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_build_reports_stats() {
        let dir = project();
        let mut pipeline = Pipeline::new(
            Config::for_root(dir.path()),
            Some(Box::new(MemoryStore::new())),
        );
        let output = pipeline.build().unwrap();

        assert_eq!(output.stats.files_scanned, 2);
        assert_eq!(output.stats.files_analyzed, 2);
        assert_eq!(output.stats.files_cached, 0);
        assert_eq!(output.stats.operations, 1);
        assert!(output.document.paths.contains_key("/items/{id}"));

        let again = pipeline.build().unwrap();
        assert_eq!(again.stats.files_cached, 2);
        assert_eq!(again.stats.files_analyzed, 0);
        assert_eq!(again.document, output.document);
    }

    #[test]
    fn test_parse_failure_is_recovered() {
        let dir = project();
        fs::write(dir.path().join("src/broken.rs"), "pub fn (").unwrap();
        let mut pipeline = Pipeline::new(Config::for_root(dir.path()), None);
        let output = pipeline.build().unwrap();

        assert_eq!(output.stats.files_failed, 1);
        assert_eq!(output.stats.operations, 1);
        let parse: Vec<&Diagnostic> = output
            .diagnostics
            .iter()
            .filter(|d| d.kind == DiagnosticKind::Parse)
            .collect();
        assert_eq!(parse.len(), 1);
        assert!(parse[0].path.as_deref().unwrap().ends_with("broken.rs"));
    }

    #[test]
    fn test_missing_root_aborts() {
        let mut pipeline = Pipeline::new(Config::for_root("/no/such/root"), None);
        assert!(matches!(pipeline.build(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_from_config_uses_file_store() {
        let dir = project();
        let mut config = Config::for_root(dir.path());
        config.cache.dir = Some(dir.path().join(".cache"));
        let mut pipeline = Pipeline::from_config(config).unwrap();
        pipeline.build().unwrap();
        // two entries and the manifest
        assert_eq!(fs::read_dir(dir.path().join(".cache")).unwrap().count(), 3);
    }
}
