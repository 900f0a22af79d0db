use crate::analysis::FileAnalysis;
use crate::annotation::{Annotation, KnownAnnotation};
use crate::declaration::{Declaration, DeclarationKind};
use crate::diagnostics::DiagnosticSink;
use crate::extractor::{
    join_paths, normalize_handler, qualify, stitch_routers, suffix_matches, HttpMethod,
    RouteBinding, RouteSource,
};
use log::debug;

/// Attribute route source for Actix-Web and Rocket.
///
/// Handlers carry their own route (`#[get("/users/{id}")]`, `#[route("/x", method = "POST")]`).
/// A handler registered under a prefix (`web::scope("/api").service(handler)`,
/// `.mount("/api", routes![handler])`) gets one binding per registration; an
/// unregistered handler is bound at its attribute path.
pub struct ActixExtractor;

/// Route attribute found on a handler
#[derive(Debug, Clone, PartialEq)]
struct AttributeRoute {
    handler: String,
    methods: Vec<HttpMethod>,
    path: String,
    middleware: Vec<String>,
}

impl RouteSource for ActixExtractor {
    fn name(&self) -> &'static str {
        "attribute"
    }

    fn bindings(&self, files: &[FileAnalysis], sink: &mut dyn DiagnosticSink) -> Vec<RouteBinding> {
        let mut attributed = Vec::new();
        for file in files {
            let mut scopes = Vec::new();
            let mut found = Vec::new();
            collect_routes(&file.module_path, &mut scopes, &file.declarations, &mut found);
            attributed.extend(found.into_iter().map(|route| (file.path.as_path(), route)));
        }
        debug!("Found {} attribute-routed handlers", attributed.len());

        let services = stitch_routers(files, sink).services;
        let mut bindings = Vec::new();
        for (origin, route) in &attributed {
            let registrations: Vec<_> = services
                .iter()
                .filter(|s| suffix_matches(&route.handler, &normalize_handler(&s.target)))
                .collect();

            let placements: Vec<(String, Vec<String>)> = if registrations.is_empty() {
                vec![(route.path.clone(), Vec::new())]
            } else {
                registrations
                    .iter()
                    .map(|s| (join_paths(&s.prefix, &route.path), s.middleware.clone()))
                    .collect()
            };

            for (path, outer) in placements {
                let middleware: Vec<String> =
                    outer.into_iter().chain(route.middleware.iter().cloned()).collect();
                for method in &route.methods {
                    bindings.push(
                        RouteBinding::new(*method, path.clone(), route.handler.clone())
                            .with_middleware(middleware.clone())
                            .declared_in(*origin),
                    );
                }
            }
        }
        bindings
    }
}

fn collect_routes(
    module_path: &str,
    scopes: &mut Vec<String>,
    declarations: &[Declaration],
    out: &mut Vec<AttributeRoute>,
) {
    for decl in declarations {
        match decl.kind {
            DeclarationKind::Function | DeclarationKind::Method => {
                for ann in Annotation::parse_all(&decl.annotations) {
                    if let KnownAnnotation::Route {
                        methods,
                        path,
                        middleware,
                    } = ann.classify()
                    {
                        out.push(AttributeRoute {
                            handler: qualify(module_path, scopes, &decl.name),
                            methods,
                            path,
                            middleware,
                        });
                    }
                }
            }
            DeclarationKind::Module | DeclarationKind::Impl => {
                scopes.push(decl.name.clone());
                collect_routes(module_path, scopes, &decl.children, out);
                scopes.pop();
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::FileAnalyzer;
    use crate::diagnostics::Diagnostics;
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
        .expect("Failed to parse test code");
        FileAnalyzer::analyze(unit)
    }

    fn bindings(files: &[FileAnalysis]) -> Vec<RouteBinding> {
        ActixExtractor.bindings(files, &mut Diagnostics::new())
    }

    #[test]
    fn test_simple_get_route() {
        let file = analyze(
            "",
            r#"
            use actix_web::{get, HttpResponse};

            #[get("/hello")]
            async fn hello() -> HttpResponse {
                HttpResponse::Ok().body("Hello")
            }
        "#,
        );

        let routes = bindings(&[file]);
        assert_eq!(
            routes,
            vec![RouteBinding::new(HttpMethod::Get, "/hello", "hello").declared_in("test.rs")]
        );
    }

    #[test]
    fn test_multiple_http_methods() {
        let file = analyze(
            "handlers",
            r#"
            #[get("/resource")]
            async fn get_resource() -> HttpResponse { HttpResponse::Ok().finish() }

            #[post("/resource")]
            async fn create_resource() -> HttpResponse { HttpResponse::Ok().finish() }

            #[route("/resource/{id}", method = "PUT", method = "PATCH")]
            async fn update_resource() -> HttpResponse { HttpResponse::Ok().finish() }
        "#,
        );

        let routes = bindings(&[file]);
        let summary: Vec<(HttpMethod, &str)> = routes
            .iter()
            .map(|r| (r.method, r.handler.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (HttpMethod::Get, "handlers::get_resource"),
                (HttpMethod::Post, "handlers::create_resource"),
                (HttpMethod::Put, "handlers::update_resource"),
                (HttpMethod::Patch, "handlers::update_resource"),
            ]
        );
    }

    #[test]
    fn test_scope_handling_across_files() {
        let handlers = analyze(
            "handlers::users",
            r#"
            #[get("")]
            async fn list_users() -> HttpResponse { HttpResponse::Ok().finish() }

            #[get("/{id}")]
            async fn get_user() -> HttpResponse { HttpResponse::Ok().finish() }
        "#,
        );
        let main = analyze(
            "",
            r#"
            fn app() {
                App::new()
                    .service(
                        web::scope("/api/users")
                            .service(handlers::users::list_users)
                            .service(users::get_user),
                    );
            }
        "#,
        );

        let routes = bindings(&[handlers, main]);
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].path, "/api/users");
        assert_eq!(routes[1].path, "/api/users/{id}");
    }

    #[test]
    fn test_methods_inside_impl_blocks() {
        let file = analyze(
            "controllers",
            r#"
            impl UserController {
                #[delete("/users/<id>")]
                pub fn destroy(id: i64) -> Status { Status::NoContent }
            }
        "#,
        );
        let routes = bindings(&[file]);
        assert_eq!(routes[0].handler, "controllers::UserController::destroy");
        assert_eq!(routes[0].path, "/users/<id>");
    }
}
