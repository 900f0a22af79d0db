//! Route discovery.
//!
//! Routes reach the pipeline as [`RouteBinding`]s: (method, path template, handler
//! identifier, middleware). They come from three kinds of [`RouteSource`]:
//!
//! - **Configured routes**: the externally supplied route list, see [`ConfiguredRoutes`]
//! - **Router chains**: `Router::new().route(..).nest(..)`, `App::new().service(..)`,
//!   lowered per file into [`RouterFragment`]s and stitched here, see [`axum::AxumExtractor`]
//! - **Route attributes**: `#[get("/users/{id}")]` on handlers, see [`actix::ActixExtractor`]

pub mod actix;
pub mod axum;

use crate::analysis::FileAnalysis;
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

/// HTTP methods supported by route extractors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
    Options,
    Head,
    Patch,
    Trace,
}

impl HttpMethod {
    /// Every method, in path item order
    pub const ALL: [HttpMethod; 8] = [
        HttpMethod::Get,
        HttpMethod::Put,
        HttpMethod::Post,
        HttpMethod::Delete,
        HttpMethod::Options,
        HttpMethod::Head,
        HttpMethod::Patch,
        HttpMethod::Trace,
    ];

    /// Case-insensitive method name
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Some(HttpMethod::Get),
            "post" => Some(HttpMethod::Post),
            "put" => Some(HttpMethod::Put),
            "delete" => Some(HttpMethod::Delete),
            "patch" => Some(HttpMethod::Patch),
            "head" => Some(HttpMethod::Head),
            "options" => Some(HttpMethod::Options),
            "trace" => Some(HttpMethod::Trace),
            _ => None,
        }
    }

    /// Lowercase name, as used for OpenAPI path item keys
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "get",
            HttpMethod::Post => "post",
            HttpMethod::Put => "put",
            HttpMethod::Delete => "delete",
            HttpMethod::Patch => "patch",
            HttpMethod::Head => "head",
            HttpMethod::Options => "options",
            HttpMethod::Trace => "trace",
        }
    }

    /// Methods whose plain handler arguments are read from the query string
    pub fn reads_query(&self) -> bool {
        matches!(
            self,
            HttpMethod::Get
                | HttpMethod::Head
                | HttpMethod::Delete
                | HttpMethod::Options
                | HttpMethod::Trace
        )
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}

impl TryFrom<String> for HttpMethod {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unknown HTTP method `{}`", value))
    }
}

impl From<HttpMethod> for String {
    fn from(method: HttpMethod) -> Self {
        method.to_string()
    }
}

/// One route as supplied by the hosting framework's router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteBinding {
    pub method: HttpMethod,
    /// Path template in any supported dialect (`/users/:id`, `/users/<id>`, `/users/{id}`)
    pub path: String,
    /// Handler identifier (`handlers::users::show`, `UserController@show`, `show`)
    pub handler: String,
    #[serde(default)]
    pub middleware: Vec<String>,
    /// File that declared the route; unset for configured routes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<PathBuf>,
}

impl RouteBinding {
    pub fn new(method: HttpMethod, path: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            handler: handler.into(),
            middleware: Vec::new(),
            origin: None,
        }
    }

    pub fn declared_in(mut self, path: impl Into<PathBuf>) -> Self {
        self.origin = Some(path.into());
        self
    }

    pub fn with_middleware(mut self, middleware: Vec<String>) -> Self {
        self.middleware = middleware;
        self
    }
}

/// A router or service registration under a prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub prefix: String,
    /// Path text naming the mounted router function or the registered handler
    pub target: String,
    pub middleware: Vec<String>,
}

/// Router construction found in one function body, before cross-file stitching
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterFragment {
    /// Qualified name of the function building the router
    pub owner: String,
    pub routes: Vec<RouteBinding>,
    /// Routers built by other functions, nested or merged in
    pub mounts: Vec<Mount>,
    /// Attribute-routed handlers registered under a prefix (`.service(h)`, `routes![h]`)
    pub services: Vec<Mount>,
}

impl RouterFragment {
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty() && self.mounts.is_empty() && self.services.is_empty()
    }
}

/// Source of route bindings
pub trait RouteSource {
    /// Name used in log output
    fn name(&self) -> &'static str;

    fn bindings(&self, files: &[FileAnalysis], sink: &mut dyn DiagnosticSink) -> Vec<RouteBinding>;
}

/// The externally supplied route list
pub struct ConfiguredRoutes {
    routes: Vec<RouteBinding>,
}

impl ConfiguredRoutes {
    pub fn new(routes: Vec<RouteBinding>) -> Self {
        Self { routes }
    }
}

impl RouteSource for ConfiguredRoutes {
    fn name(&self) -> &'static str {
        "configured"
    }

    fn bindings(&self, _files: &[FileAnalysis], _sink: &mut dyn DiagnosticSink) -> Vec<RouteBinding> {
        self.routes.clone()
    }
}

/// Qualified identifier of a declaration: module path, enclosing scopes, name
pub fn qualify(module_path: &str, scopes: &[String], name: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if !module_path.is_empty() {
        parts.push(module_path);
    }
    parts.extend(scopes.iter().map(String::as_str));
    parts.push(name);
    parts.join("::")
}

/// Strip `crate::`, `self::` and `super::` prefixes and normalize `Type@method`
pub fn normalize_handler(handler: &str) -> String {
    let handler = handler.replace('@', "::");
    let segments: Vec<&str> = handler
        .split("::")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .skip_while(|s| matches!(*s, "crate" | "self" | "super"))
        .collect();
    segments.join("::")
}

/// Whether `id` is `wanted` or ends with `::wanted`
pub fn suffix_matches(id: &str, wanted: &str) -> bool {
    id == wanted
        || id
            .strip_suffix(wanted)
            .is_some_and(|head| head.ends_with("::"))
}

/// Combine a prefix and path, handling slashes correctly
pub fn join_paths(prefix: &str, path: &str) -> String {
    if prefix.is_empty() {
        return path.to_string();
    }

    let prefix = prefix.trim_end_matches('/');
    let path = path.trim_start_matches('/');

    if path.is_empty() {
        prefix.to_string()
    } else {
        format!("{}/{}", prefix, path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Static(String),
    Param(String),
    /// Matches the rest of the path
    Wildcard(String),
}

/// A path template in normalized form
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathTemplate {
    pub segments: Vec<Segment>,
}

impl PathTemplate {
    /// Accepts `:id`, `<id>`, `{id}`, `{id:\d+}`, `*rest`, `{*rest}` and `<rest..>`
    pub fn parse(raw: &str) -> Self {
        let segments = raw
            .split('/')
            .filter(|s| !s.is_empty())
            .map(Self::parse_segment)
            .collect();
        Self { segments }
    }

    fn parse_segment(seg: &str) -> Segment {
        if let Some(name) = seg.strip_prefix(':') {
            return Segment::Param(name.to_string());
        }
        if let Some(name) = seg.strip_prefix('*') {
            return Segment::Wildcard(if name.is_empty() { "path" } else { name }.to_string());
        }
        let inner = seg
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .or_else(|| seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')));
        match inner {
            Some(inner) => {
                let name = inner.split(':').next().unwrap_or(inner).trim();
                if let Some(rest) = name.strip_prefix('*') {
                    Segment::Wildcard(rest.to_string())
                } else if let Some(rest) = name.strip_suffix("..") {
                    Segment::Wildcard(rest.to_string())
                } else {
                    Segment::Param(name.to_string())
                }
            }
            None => Segment::Static(seg.to_string()),
        }
    }

    /// OpenAPI rendering: `/users/{id}`
    pub fn render(&self) -> String {
        let body: Vec<String> = self
            .segments
            .iter()
            .map(|s| match s {
                Segment::Static(text) => text.clone(),
                Segment::Param(name) | Segment::Wildcard(name) => format!("{{{}}}", name),
            })
            .collect();
        format!("/{}", body.join("/"))
    }

    /// Rendering with variable names erased, for duplicate detection.
    /// A wildcard overlaps a parameter in the same position.
    pub fn shape(&self) -> String {
        let body: Vec<&str> = self
            .segments
            .iter()
            .map(|s| match s {
                Segment::Static(text) => text.as_str(),
                Segment::Param(_) | Segment::Wildcard(_) => "{}",
            })
            .collect();
        format!("/{}", body.join("/"))
    }

    pub fn variables(&self) -> Vec<String> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Param(name) | Segment::Wildcard(name) => Some(name.clone()),
                Segment::Static(_) => None,
            })
            .collect()
    }

    /// Ordering key: more static text wins, wildcards lose
    pub fn specificity(&self) -> (usize, usize, bool) {
        let statics: Vec<&String> = self
            .segments
            .iter()
            .filter_map(|s| match s {
                Segment::Static(text) => Some(text),
                _ => None,
            })
            .collect();
        let has_wildcard = self.segments.iter().any(|s| matches!(s, Segment::Wildcard(_)));
        (
            statics.len(),
            statics.iter().map(|s| s.len()).sum(),
            !has_wildcard,
        )
    }
}

/// Normalize any supported path dialect to OpenAPI form
pub fn normalize_path(raw: &str) -> String {
    PathTemplate::parse(raw).render()
}

/// Routes and service registrations reachable from root routers
#[derive(Debug, Default)]
pub struct StitchedRouters {
    pub routes: Vec<RouteBinding>,
    pub services: Vec<Mount>,
}

/// Joins router fragments across files by following `nest`/`merge`/`configure` mounts.
///
/// Fragments that no other fragment mounts are roots. Expansion carries a visited set
/// of fragment owners, so mutually mounting routers terminate.
pub fn stitch_routers(files: &[FileAnalysis], sink: &mut dyn DiagnosticSink) -> StitchedRouters {
    let fragments: Vec<(&FileAnalysis, &RouterFragment)> = files
        .iter()
        .flat_map(|f| f.routers.iter().map(move |r| (f, r)))
        .collect();
    let by_owner: HashMap<&str, usize> = fragments
        .iter()
        .enumerate()
        .map(|(i, (_, r))| (r.owner.as_str(), i))
        .collect();

    let resolve = |target: &str| -> Option<usize> {
        let wanted = normalize_handler(target);
        if let Some(idx) = by_owner.get(wanted.as_str()) {
            return Some(*idx);
        }
        let candidates: Vec<usize> = fragments
            .iter()
            .enumerate()
            .filter(|(_, (_, r))| suffix_matches(&r.owner, &wanted))
            .map(|(i, _)| i)
            .collect();
        match candidates.as_slice() {
            [single] => Some(*single),
            _ => None,
        }
    };

    let mut mounted = BTreeSet::new();
    for (_, fragment) in &fragments {
        for mount in &fragment.mounts {
            if let Some(idx) = resolve(&mount.target) {
                mounted.insert(idx);
            }
        }
    }

    let mut out = StitchedRouters::default();
    for root in (0..fragments.len()).filter(|i| !mounted.contains(i)) {
        let mut visited = BTreeSet::new();
        expand(root, "", &[], &fragments, &resolve, &mut visited, &mut out, sink);
    }
    debug!(
        "Stitched {} router fragments into {} routes and {} services",
        fragments.len(),
        out.routes.len(),
        out.services.len()
    );
    out
}

#[allow(clippy::too_many_arguments)]
fn expand(
    idx: usize,
    prefix: &str,
    middleware: &[String],
    fragments: &[(&FileAnalysis, &RouterFragment)],
    resolve: &dyn Fn(&str) -> Option<usize>,
    visited: &mut BTreeSet<usize>,
    out: &mut StitchedRouters,
    sink: &mut dyn DiagnosticSink,
) {
    if !visited.insert(idx) {
        return;
    }
    let (file, fragment) = fragments[idx];
    let with_outer = |own: &[String]| -> Vec<String> {
        middleware.iter().chain(own.iter()).cloned().collect()
    };

    for route in &fragment.routes {
        out.routes.push(RouteBinding {
            method: route.method,
            path: join_paths(prefix, &route.path),
            handler: route.handler.clone(),
            middleware: with_outer(&route.middleware),
            origin: Some(file.path.clone()),
        });
    }
    for service in &fragment.services {
        out.services.push(Mount {
            prefix: join_paths(prefix, &service.prefix),
            target: service.target.clone(),
            middleware: with_outer(&service.middleware),
        });
    }
    for mount in &fragment.mounts {
        match resolve(&mount.target) {
            Some(target) if visited.contains(&target) => sink.emit(
                Diagnostic::resolution(format!(
                    "router `{}` mounts `{}` recursively; skipped",
                    fragment.owner, mount.target
                ))
                .at(&file.path)
                .for_declaration(fragment.owner.clone()),
            ),
            Some(target) => expand(
                target,
                &join_paths(prefix, &mount.prefix),
                &with_outer(&mount.middleware),
                fragments,
                resolve,
                visited,
                out,
                sink,
            ),
            None => sink.emit(
                Diagnostic::resolution(format!(
                    "router `{}` mounts unknown router `{}`",
                    fragment.owner, mount.target
                ))
                .at(&file.path)
                .for_declaration(fragment.owner.clone()),
            ),
        }
    }
    visited.remove(&idx);
}
