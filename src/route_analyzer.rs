//! Binds route bindings to handler declarations.

use crate::analysis::FileAnalysis;
use crate::declaration::{Declaration, DeclarationKind};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::extractor::{
    normalize_handler, qualify, suffix_matches, HttpMethod, PathTemplate, RouteBinding,
    RouteSource,
};
use log::{debug, info};
use std::collections::HashMap;

/// A callable that can handle a route
#[derive(Debug, Clone, Copy)]
pub struct Handler<'a> {
    pub file: &'a FileAnalysis,
    pub decl: &'a Declaration,
    /// Type name of the enclosing impl block, for methods
    pub owner_type: Option<&'a str>,
}

/// Every function and method in the analyzed files, by qualified id
pub struct HandlerRegistry<'a> {
    ids: Vec<String>,
    handlers: Vec<Handler<'a>>,
    by_id: HashMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(String),
    Missing,
    Ambiguous(Vec<String>),
}

impl<'a> HandlerRegistry<'a> {
    pub fn build(files: &'a [FileAnalysis]) -> Self {
        let mut registry = Self {
            ids: Vec::new(),
            handlers: Vec::new(),
            by_id: HashMap::new(),
        };
        for file in files {
            let mut scopes = Vec::new();
            registry.collect(file, &mut scopes, None, &file.declarations);
        }
        debug!("Indexed {} handler candidates", registry.handlers.len());
        registry
    }

    fn collect(
        &mut self,
        file: &'a FileAnalysis,
        scopes: &mut Vec<String>,
        owner_type: Option<&'a str>,
        declarations: &'a [Declaration],
    ) {
        for decl in declarations {
            match decl.kind {
                DeclarationKind::Function | DeclarationKind::Method => {
                    let id = qualify(&file.module_path, scopes, &decl.name);
                    if self.by_id.contains_key(&id) {
                        continue;
                    }
                    self.by_id.insert(id.clone(), self.handlers.len());
                    self.ids.push(id);
                    self.handlers.push(Handler {
                        file,
                        decl,
                        owner_type,
                    });
                }
                DeclarationKind::Module => {
                    scopes.push(decl.name.clone());
                    self.collect(file, scopes, None, &decl.children);
                    scopes.pop();
                }
                DeclarationKind::Impl => {
                    scopes.push(decl.name.clone());
                    self.collect(file, scopes, Some(decl.name.as_str()), &decl.children);
                    scopes.pop();
                }
                _ => {}
            }
        }
    }

    /// Find a handler by exact qualified id, then by unique suffix
    pub fn lookup(&self, handler: &str) -> Lookup {
        let wanted = normalize_handler(handler);
        if self.by_id.contains_key(&wanted) {
            return Lookup::Found(wanted);
        }
        let mut candidates: Vec<String> = self
            .ids
            .iter()
            .filter(|id| suffix_matches(id, &wanted))
            .cloned()
            .collect();
        match candidates.len() {
            0 => Lookup::Missing,
            1 => Lookup::Found(candidates.remove(0)),
            _ => Lookup::Ambiguous(candidates),
        }
    }

    pub fn get(&self, id: &str) -> Option<Handler<'a>> {
        self.by_id.get(id).map(|idx| self.handlers[*idx])
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// A route bound to its handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub method: HttpMethod,
    pub template: PathTemplate,
    /// Qualified id of the bound handler
    pub handler: String,
    pub middleware: Vec<String>,
}

impl Route {
    /// OpenAPI path key
    pub fn path(&self) -> String {
        self.template.render()
    }
}

struct Candidate {
    binding: RouteBinding,
    template: PathTemplate,
    lookup: Lookup,
    order: usize,
}

impl Candidate {
    /// Higher is better: bound first, then more specific, then earlier
    fn rank(&self) -> (bool, (usize, usize, bool), std::cmp::Reverse<usize>) {
        (
            matches!(self.lookup, Lookup::Found(_)),
            self.template.specificity(),
            std::cmp::Reverse(self.order),
        )
    }
}

/// Route/controller analyzer
pub struct RouteAnalyzer;

impl RouteAnalyzer {
    /// Collect bindings from every source and bind them to handlers.
    ///
    /// Bindings with the same method and path shape collapse into one route: a
    /// binding whose handler resolves wins, then the most specific template, then
    /// the earliest source. Routes whose handler cannot be found are skipped and
    /// reported. The result is ordered by path, then method.
    pub fn analyze(
        sources: &[Box<dyn RouteSource>],
        files: &[FileAnalysis],
        handlers: &HandlerRegistry<'_>,
        sink: &mut dyn DiagnosticSink,
    ) -> Vec<Route> {
        let mut bindings = Vec::new();
        for source in sources {
            let found = source.bindings(files, sink);
            info!("Route source `{}` produced {} bindings", source.name(), found.len());
            bindings.extend(found);
        }
        Self::bind(bindings, handlers, sink)
    }

    pub fn bind(
        bindings: Vec<RouteBinding>,
        handlers: &HandlerRegistry<'_>,
        sink: &mut dyn DiagnosticSink,
    ) -> Vec<Route> {
        let mut groups: Vec<((HttpMethod, String), Candidate)> = Vec::new();
        for (order, binding) in bindings.into_iter().enumerate() {
            let template = PathTemplate::parse(&binding.path);
            let key = (binding.method, template.shape());
            let candidate = Candidate {
                lookup: handlers.lookup(&binding.handler),
                binding,
                template,
                order,
            };
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, best)) => {
                    if candidate.rank() > best.rank() {
                        debug!(
                            "Route {} {} replaces binding to `{}`",
                            candidate.binding.method, candidate.binding.path, best.binding.handler
                        );
                        *best = candidate;
                    }
                }
                None => groups.push((key, candidate)),
            }
        }

        let mut routes = Vec::new();
        for (_, candidate) in groups {
            let Candidate {
                binding,
                template,
                lookup,
                ..
            } = candidate;
            match lookup {
                Lookup::Found(handler) => routes.push(Route {
                    method: binding.method,
                    template,
                    handler,
                    middleware: binding.middleware,
                }),
                Lookup::Missing => sink.emit(located(
                    Diagnostic::resolution(format!(
                        "route {} {} is bound to unknown handler `{}`; skipped",
                        binding.method, binding.path, binding.handler
                    )),
                    &binding,
                )),
                Lookup::Ambiguous(candidates) => sink.emit(located(
                    Diagnostic::resolution(format!(
                        "route {} {} handler `{}` is ambiguous ({}); skipped",
                        binding.method,
                        binding.path,
                        binding.handler,
                        candidates.join(", ")
                    )),
                    &binding,
                )),
            }
        }

        routes.sort_by(|a, b| {
            a.path()
                .cmp(&b.path())
                .then_with(|| a.method.cmp(&b.method))
        });
        debug!("Bound {} routes", routes.len());
        routes
    }
}

/// Point a binding diagnostic at the file that declared the route, when known
fn located(diagnostic: Diagnostic, binding: &RouteBinding) -> Diagnostic {
    let diagnostic = diagnostic.for_declaration(binding.handler.clone());
    match &binding.origin {
        Some(origin) => diagnostic.at(origin),
        None => diagnostic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::FileAnalyzer;
    use crate::diagnostics::{DiagnosticKind, Diagnostics};
    use crate::fingerprint::Fingerprint;
    use crate::parser::AstParser;
    use std::path::Path;

    fn analyze(module_path: &str, code: &str) -> FileAnalysis {
        let unit = AstParser::parse_source(
            Path::new("test.rs"),
            code,
            Fingerprint::compute(code.as_bytes()),
            module_path,
        )
        .unwrap();
        FileAnalyzer::analyze(unit)
    }

    fn files() -> Vec<FileAnalysis> {
        vec![
            analyze(
                "handlers::users",
                r#"
                pub async fn show(id: i64) {}
                pub async fn list() {}
                impl UserController {
                    pub fn store() {}
                }
                "#,
            ),
            analyze("handlers::posts", "pub async fn show(id: i64) {}"),
        ]
    }

    #[test]
    fn test_lookup_exact_suffix_and_ambiguous() {
        let files = files();
        let registry = HandlerRegistry::build(&files);

        assert_eq!(registry.len(), 4);
        assert_eq!(
            registry.lookup("crate::handlers::users::show"),
            Lookup::Found("handlers::users::show".to_string())
        );
        assert_eq!(
            registry.lookup("list"),
            Lookup::Found("handlers::users::list".to_string())
        );
        assert_eq!(
            registry.lookup("UserController@store"),
            Lookup::Found("handlers::users::UserController::store".to_string())
        );
        assert!(matches!(registry.lookup("show"), Lookup::Ambiguous(c) if c.len() == 2));
        assert_eq!(registry.lookup("missing"), Lookup::Missing);

        let handler = registry.get("handlers::users::UserController::store").unwrap();
        assert_eq!(handler.owner_type, Some("UserController"));
    }

    #[test]
    fn test_dedup_prefers_bound_then_specific() {
        let files = files();
        let registry = HandlerRegistry::build(&files);
        let mut sink = Diagnostics::new();

        let routes = RouteAnalyzer::bind(
            vec![
                RouteBinding::new(HttpMethod::Get, "/users/:id", "nowhere"),
                RouteBinding::new(HttpMethod::Get, "/users/{user}", "users::show"),
                RouteBinding::new(HttpMethod::Get, "/users", "list"),
                RouteBinding::new(HttpMethod::Get, "/files/*rest", "list"),
                RouteBinding::new(HttpMethod::Get, "/files/{name}", "posts::show"),
            ],
            &registry,
            &mut sink,
        );

        let summary: Vec<(String, &str)> = routes
            .iter()
            .map(|r| (r.path(), r.handler.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("/files/{name}".to_string(), "handlers::posts::show"),
                ("/users".to_string(), "handlers::users::list"),
                ("/users/{user}".to_string(), "handlers::users::show"),
            ]
        );
        assert!(sink.is_empty());
    }

    #[test]
    fn test_unbound_routes_are_skipped_and_reported() {
        let files = files();
        let registry = HandlerRegistry::build(&files);
        let mut sink = Diagnostics::new();

        let routes = RouteAnalyzer::bind(
            vec![
                RouteBinding::new(HttpMethod::Post, "/orders", "OrderController@store")
                    .declared_in("src/routes.rs"),
                RouteBinding::new(HttpMethod::Get, "/things/{id}", "show")
                    .declared_in("src/app.rs"),
                RouteBinding::new(HttpMethod::Get, "/legacy", "gone"),
            ],
            &registry,
            &mut sink,
        );

        assert!(routes.is_empty());
        assert_eq!(sink.count(DiagnosticKind::Resolution), 3);
        let located: Vec<(Option<&Path>, Option<&str>)> = sink
            .items()
            .iter()
            .map(|d| (d.path.as_deref(), d.declaration.as_deref()))
            .collect();
        assert_eq!(
            located,
            vec![
                (Some(Path::new("src/routes.rs")), Some("OrderController@store")),
                (Some(Path::new("src/app.rs")), Some("show")),
                (None, Some("gone")),
            ]
        );
    }

    #[test]
    fn test_routes_sorted_by_path_then_method() {
        let files = files();
        let registry = HandlerRegistry::build(&files);
        let routes = RouteAnalyzer::bind(
            vec![
                RouteBinding::new(HttpMethod::Post, "/users", "UserController::store"),
                RouteBinding::new(HttpMethod::Get, "/users", "list"),
            ],
            &registry,
            &mut Diagnostics::new(),
        );
        let methods: Vec<HttpMethod> = routes.iter().map(|r| r.method).collect();
        assert_eq!(methods, vec![HttpMethod::Get, HttpMethod::Post]);
    }
}
