use crate::analysis::FileAnalysis;
use crate::annotation::middleware_name;
use crate::diagnostics::DiagnosticSink;
use crate::extractor::{
    join_paths, qualify, stitch_routers, HttpMethod, Mount, RouteBinding, RouteSource,
    RouterFragment,
};
use indexmap::IndexMap;
use log::debug;
use quote::ToTokens;
use std::collections::HashSet;
use syn::punctuated::Punctuated;
use syn::{visit::Visit, Expr, ExprMethodCall, Lit, Token};

/// Router-chain route source.
///
/// Emits every route reachable from a root router once fragments from all files are
/// stitched together. Used for axum routers and for actix `App`/`scope` chains that
/// register routes with `.route(path, web::get().to(handler))`.
pub struct AxumExtractor;

impl RouteSource for AxumExtractor {
    fn name(&self) -> &'static str {
        "router"
    }

    fn bindings(&self, files: &[FileAnalysis], sink: &mut dyn DiagnosticSink) -> Vec<RouteBinding> {
        stitch_routers(files, sink).routes
    }
}

/// Methods that extend a router chain
const ROUTER_METHODS: &[&str] = &[
    "route",
    "nest",
    "nest_service",
    "merge",
    "layer",
    "route_layer",
    "service",
    "wrap",
    "mount",
    "configure",
];

/// Routes, mounts and services of a chain under construction
#[derive(Debug, Clone, Default)]
struct Chain {
    prefix: String,
    routes: Vec<RouteBinding>,
    mounts: Vec<Mount>,
    services: Vec<Mount>,
}

impl Chain {
    fn scoped(prefix: String) -> Self {
        Self {
            prefix,
            ..Self::default()
        }
    }

    /// Fold a sub-chain in, prepending this chain's prefix
    fn absorb(&mut self, prefix: &str, other: Chain) {
        let prefix = join_paths(&self.prefix, prefix);
        for mut route in other.routes {
            route.path = join_paths(&prefix, &route.path);
            self.routes.push(route);
        }
        for mut mount in other.mounts {
            mount.prefix = join_paths(&prefix, &mount.prefix);
            self.mounts.push(mount);
        }
        for mut service in other.services {
            service.prefix = join_paths(&prefix, &service.prefix);
            self.services.push(service);
        }
    }

    fn add_middleware(&mut self, name: String) {
        let targets = self
            .routes
            .iter_mut()
            .map(|r| &mut r.middleware)
            .chain(self.mounts.iter_mut().map(|m| &mut m.middleware))
            .chain(self.services.iter_mut().map(|s| &mut s.middleware));
        for middleware in targets {
            middleware.insert(0, name.clone());
        }
    }

    fn is_empty(&self) -> bool {
        self.routes.is_empty() && self.mounts.is_empty() && self.services.is_empty()
    }
}

/// Visitor that lowers router construction chains into [`RouterFragment`]s.
///
/// Runs once per file at parse time, so cached files keep contributing routes.
pub struct RouterVisitor<'a> {
    module_path: &'a str,
    scopes: Vec<String>,
    fragments: Vec<RouterFragment>,
}

impl<'a> RouterVisitor<'a> {
    pub fn collect(file: &syn::File, module_path: &'a str) -> Vec<RouterFragment> {
        let mut visitor = RouterVisitor {
            module_path,
            scopes: Vec::new(),
            fragments: Vec::new(),
        };
        visitor.visit_file(file);
        visitor.fragments
    }

    fn lower_fn(&mut self, sig: &syn::Signature, block: &syn::Block) {
        let owner = qualify(self.module_path, &self.scopes, &sig.ident.to_string());

        // `fn config(cfg: &mut web::ServiceConfig)` registers into its argument
        let roots = sig
            .inputs
            .iter()
            .filter_map(|input| match input {
                syn::FnArg::Typed(pat_type) => {
                    let ty = pat_type.ty.to_token_stream().to_string();
                    let is_config = ty.contains("ServiceConfig") || ty.contains("Router");
                    match (&*pat_type.pat, is_config) {
                        (syn::Pat::Ident(ident), true) => Some(ident.ident.to_string()),
                        _ => None,
                    }
                }
                syn::FnArg::Receiver(_) => None,
            })
            .collect();

        let mut collector = ChainCollector {
            roots,
            locals: IndexMap::new(),
            chains: Vec::new(),
        };
        collector.visit_block(block);

        let mut fragment = RouterFragment {
            owner,
            ..RouterFragment::default()
        };
        let leftovers = collector.locals.into_values();
        for chain in collector.chains.into_iter().chain(leftovers) {
            fragment.routes.extend(chain.routes);
            fragment.mounts.extend(chain.mounts);
            fragment.services.extend(chain.services);
        }
        if !fragment.is_empty() {
            debug!(
                "Router fragment {}: {} routes, {} mounts, {} services",
                fragment.owner,
                fragment.routes.len(),
                fragment.mounts.len(),
                fragment.services.len()
            );
            self.fragments.push(fragment);
        }
    }
}

impl<'ast, 'a> Visit<'ast> for RouterVisitor<'a> {
    fn visit_item_fn(&mut self, node: &'ast syn::ItemFn) {
        self.lower_fn(&node.sig, &node.block);
    }

    fn visit_item_mod(&mut self, node: &'ast syn::ItemMod) {
        self.scopes.push(node.ident.to_string());
        syn::visit::visit_item_mod(self, node);
        self.scopes.pop();
    }

    fn visit_item_impl(&mut self, node: &'ast syn::ItemImpl) {
        let Some(name) = crate::type_resolver::type_name(&node.self_ty) else {
            return;
        };
        self.scopes.push(name);
        syn::visit::visit_item_impl(self, node);
        self.scopes.pop();
    }

    fn visit_impl_item_fn(&mut self, node: &'ast syn::ImplItemFn) {
        self.lower_fn(&node.sig, &node.block);
    }
}

/// Finds router chains inside one function body
struct ChainCollector {
    /// Arguments that are routers or service configs
    roots: HashSet<String>,
    /// `let` bindings holding a chain, in declaration order
    locals: IndexMap<String, Chain>,
    chains: Vec<Chain>,
}

impl ChainCollector {
    fn lower_chain(&mut self, expr: &Expr) -> Option<Chain> {
        match expr {
            Expr::MethodCall(call) => {
                let mut chain = self.lower_chain(&call.receiver)?;
                self.apply(&mut chain, call);
                Some(chain)
            }
            Expr::Call(call) => {
                let Expr::Path(func) = &*call.func else {
                    return None;
                };
                let names: Vec<String> = func
                    .path
                    .segments
                    .iter()
                    .map(|s| s.ident.to_string())
                    .collect();
                let segments: Vec<&str> = names.iter().map(String::as_str).collect();
                match segments.as_slice() {
                    [.., "Router" | "App" | "ServiceConfig", "new" | "default"] => {
                        Some(Chain::default())
                    }
                    [.., "scope" | "resource"] => {
                        Some(Chain::scoped(call.args.first().and_then(string_literal)?))
                    }
                    [.., "rocket", "build"] => Some(Chain::default()),
                    // a call to another router-building function: `users::router(state)`
                    [.., last] if last.starts_with(|c: char| c.is_ascii_lowercase()) => {
                        let mut chain = Chain::default();
                        chain.mounts.push(Mount {
                            prefix: String::new(),
                            target: names.join("::"),
                            middleware: Vec::new(),
                        });
                        Some(chain)
                    }
                    _ => None,
                }
            }
            Expr::Path(path) => {
                let ident = path.path.get_ident()?.to_string();
                if let Some(chain) = self.locals.shift_remove(&ident) {
                    return Some(chain);
                }
                if self.roots.contains(&ident) {
                    return Some(Chain::default());
                }
                None
            }
            Expr::Paren(paren) => self.lower_chain(&paren.expr),
            Expr::Reference(reference) => self.lower_chain(&reference.expr),
            Expr::Try(try_expr) => self.lower_chain(&try_expr.expr),
            Expr::Await(await_expr) => self.lower_chain(&await_expr.base),
            _ => None,
        }
    }

    fn apply(&mut self, chain: &mut Chain, call: &ExprMethodCall) {
        let args: Vec<&Expr> = call.args.iter().collect();
        match (call.method.to_string().as_str(), args.as_slice()) {
            ("route", [path, method_router]) => {
                let Some(path) = string_literal(path) else {
                    return;
                };
                let full_path = join_paths(&chain.prefix, &path);
                for (method, handler) in method_routes(method_router) {
                    chain.routes.push(RouteBinding::new(method, full_path.clone(), handler));
                }
            }
            // actix `web::resource("/x").route(web::get().to(h))`
            ("route", [method_router]) => {
                for (method, handler) in method_routes(method_router) {
                    chain.routes.push(RouteBinding::new(method, chain.prefix.clone(), handler));
                }
            }
            ("nest" | "nest_service", [prefix, router]) => {
                let Some(prefix) = string_literal(prefix) else {
                    return;
                };
                self.mount(chain, &prefix, router);
            }
            ("merge", [router]) => self.mount(chain, "", router),
            ("configure", [func]) => {
                if let Some(target) = path_text(func) {
                    let prefix = chain.prefix.clone();
                    chain.mounts.push(Mount {
                        prefix,
                        target,
                        middleware: Vec::new(),
                    });
                }
            }
            ("service", [service]) => match self.lower_chain(service) {
                Some(sub) => chain.absorb("", sub),
                None => {
                    if let Some(target) = path_text(service) {
                        let prefix = chain.prefix.clone();
                        chain.services.push(Mount {
                            prefix,
                            target,
                            middleware: Vec::new(),
                        });
                    }
                }
            },
            // rocket `.mount("/api", routes![a, b])`
            ("mount", [prefix, Expr::Macro(mac)]) => {
                let Some(prefix) = string_literal(prefix) else {
                    return;
                };
                let full_prefix = join_paths(&chain.prefix, &prefix);
                if let Ok(paths) = mac
                    .mac
                    .parse_body_with(Punctuated::<syn::Path, Token![,]>::parse_terminated)
                {
                    for path in paths {
                        chain.services.push(Mount {
                            prefix: full_prefix.clone(),
                            target: syn_path_text(&path),
                            middleware: Vec::new(),
                        });
                    }
                }
            }
            ("layer" | "route_layer" | "wrap", [layer]) => {
                chain.add_middleware(middleware_name(&layer.to_token_stream().to_string()));
            }
            _ => {}
        }
    }

    fn mount(&mut self, chain: &mut Chain, prefix: &str, router: &Expr) {
        match self.lower_chain(router) {
            Some(sub) => chain.absorb(prefix, sub),
            None => {
                if let Some(target) = path_text(router) {
                    let prefix = join_paths(&chain.prefix, prefix);
                    chain.mounts.push(Mount {
                        prefix,
                        target,
                        middleware: Vec::new(),
                    });
                }
            }
        }
    }

    /// Whether an expression is the outer end of a router chain
    fn starts_chain(expr: &Expr) -> bool {
        match expr {
            Expr::MethodCall(call) => ROUTER_METHODS.contains(&call.method.to_string().as_str()),
            Expr::Call(call) => match &*call.func {
                Expr::Path(func) => {
                    let text = syn_path_text(&func.path);
                    text.ends_with("Router::new") || text.ends_with("App::new")
                }
                _ => false,
            },
            _ => false,
        }
    }
}

impl<'ast> Visit<'ast> for ChainCollector {
    fn visit_local(&mut self, node: &'ast syn::Local) {
        if let (syn::Pat::Ident(ident), Some(init)) = (&node.pat, &node.init) {
            if Self::starts_chain(&init.expr) {
                if let Some(chain) = self.lower_chain(&init.expr) {
                    self.locals.insert(ident.ident.to_string(), chain);
                    return;
                }
            }
        }
        syn::visit::visit_local(self, node);
    }

    fn visit_expr_method_call(&mut self, node: &'ast ExprMethodCall) {
        if ROUTER_METHODS.contains(&node.method.to_string().as_str()) {
            if let Some(chain) = self.lower_chain(&Expr::MethodCall(node.clone())) {
                if !chain.is_empty() {
                    self.chains.push(chain);
                }
                return;
            }
        }
        syn::visit::visit_expr_method_call(self, node);
    }

    // nested fn items are lowered on their own
    fn visit_item_fn(&mut self, _node: &'ast syn::ItemFn) {}
}

/// `(method, handler)` pairs of a method router expression
fn method_routes(expr: &Expr) -> Vec<(HttpMethod, String)> {
    match expr {
        // `get(handler)`, `routing::post(handler)`
        Expr::Call(call) => {
            let Expr::Path(func) = &*call.func else {
                return Vec::new();
            };
            let Some(name) = func.path.segments.last().map(|s| s.ident.to_string()) else {
                return Vec::new();
            };
            match (HttpMethod::parse(&name), call.args.first()) {
                (Some(method), Some(handler)) => {
                    path_text(handler).map(|h| (method, h)).into_iter().collect()
                }
                _ => Vec::new(),
            }
        }
        Expr::MethodCall(call) => {
            let name = call.method.to_string();
            // actix `web::get().to(handler)`
            if name == "to" {
                let handler = call.args.first().and_then(path_text);
                let method = match &*call.receiver {
                    Expr::Call(inner) => match &*inner.func {
                        Expr::Path(func) => func
                            .path
                            .segments
                            .last()
                            .and_then(|s| HttpMethod::parse(&s.ident.to_string())),
                        _ => None,
                    },
                    _ => None,
                };
                return match (method, handler) {
                    (Some(method), Some(handler)) => vec![(method, handler)],
                    _ => Vec::new(),
                };
            }
            let mut out = method_routes(&call.receiver);
            // `get(list).post(create)`
            if let (Some(method), Some(handler)) = (
                HttpMethod::parse(&name),
                call.args.first().and_then(path_text),
            ) {
                out.push((method, handler));
            }
            out
        }
        Expr::Paren(paren) => method_routes(&paren.expr),
        _ => Vec::new(),
    }
}

fn string_literal(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Lit(expr_lit) => match &expr_lit.lit {
            Lit::Str(lit_str) => Some(lit_str.value()),
            _ => None,
        },
        _ => None,
    }
}

/// Path text of a handler or router reference (`users::list`, `users::router()`)
fn path_text(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Path(path) => Some(syn_path_text(&path.path)),
        Expr::Call(call) if call.args.is_empty() => path_text(&call.func),
        Expr::Reference(reference) => path_text(&reference.expr),
        _ => None,
    }
}

fn syn_path_text(path: &syn::Path) -> String {
    path.segments
        .iter()
        .map(|s| s.ident.to_string())
        .collect::<Vec<_>>()
        .join("::")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fragments(code: &str) -> Vec<RouterFragment> {
        let file = syn::parse_file(code).expect("Failed to parse test code");
        RouterVisitor::collect(&file, "app")
    }

    #[test]
    fn test_simple_route_extraction() {
        let frags = fragments(
            r#"
            use axum::{Router, routing::get};

            async fn handler() -> &'static str {
                "Hello, World!"
            }

            fn app() -> Router {
                Router::new().route("/hello", get(handler))
            }
        "#,
        );

        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].owner, "app::app");
        assert_eq!(
            frags[0].routes,
            vec![RouteBinding::new(HttpMethod::Get, "/hello", "handler")]
        );
    }

    #[test]
    fn test_chained_method_router() {
        let frags = fragments(
            r#"
            fn app() -> Router {
                Router::new()
                    .route("/users", get(list_users).post(create_user))
                    .route("/users/:id", routing::delete(users::remove))
            }
        "#,
        );

        let routes = &frags[0].routes;
        assert_eq!(routes.len(), 3);
        assert_eq!(routes[1].method, HttpMethod::Post);
        assert_eq!(routes[1].handler, "create_user");
        assert_eq!(routes[2].handler, "users::remove");
    }

    #[test]
    fn test_nest_inline_and_by_function() {
        let frags = fragments(
            r#"
            fn users_router() -> Router {
                Router::new()
                    .route("/", get(list_users))
                    .route("/:id", get(get_user))
            }

            fn app() -> Router {
                let admin = Router::new().route("/stats", get(stats));
                Router::new()
                    .nest("/api/users", users_router())
                    .nest("/admin", admin)
                    .layer(middleware::from_fn(require_auth))
            }
        "#,
        );

        assert_eq!(frags.len(), 2);
        let app = &frags[1];
        assert_eq!(app.routes.len(), 1);
        assert_eq!(app.routes[0].path, "/admin/stats");
        assert_eq!(app.routes[0].middleware, vec!["require_auth".to_string()]);
        assert_eq!(
            app.mounts,
            vec![Mount {
                prefix: "/api/users".to_string(),
                target: "users_router".to_string(),
                middleware: vec!["require_auth".to_string()],
            }]
        );
    }

    #[test]
    fn test_unconsumed_local_router_is_kept() {
        let frags = fragments(
            r#"
            async fn main() {
                let app = Router::new().route("/health", get(health));
                let app = app.layer(TraceLayer::new_for_http());
                axum::serve(listener, app).await.unwrap();
            }
        "#,
        );
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].routes[0].path, "/health");
        assert_eq!(frags[0].routes[0].middleware.len(), 1);
    }

    #[test]
    fn test_actix_scopes_and_services() {
        let frags = fragments(
            r#"
            pub fn config(cfg: &mut web::ServiceConfig) {
                cfg.service(
                    web::scope("/users")
                        .service(list_users)
                        .route("/{id}", web::get().to(get_user))
                );
            }
        "#,
        );
        let config = &frags[0];
        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services[0].prefix, "/users");
        assert_eq!(config.services[0].target, "list_users");
        assert_eq!(config.routes[0].path, "/users/{id}");
        assert_eq!(config.routes[0].handler, "get_user");
    }

    #[test]
    fn test_rocket_mount() {
        let frags = fragments(
            r#"
            fn rocket() -> _ {
                rocket::build().mount("/api", routes![index, users::show])
            }
        "#,
        );
        let services: Vec<(&str, &str)> = frags[0]
            .services
            .iter()
            .map(|s| (s.prefix.as_str(), s.target.as_str()))
            .collect();
        assert_eq!(services, vec![("/api", "index"), ("/api", "users::show")]);
    }
}
