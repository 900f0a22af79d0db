//! Operations: a bound route with everything the document needs about it.

use crate::annotation::{Annotation, KnownAnnotation};
use crate::config::SecurityConfig;
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::docblock::{DocBlock, DocTag};
use crate::extractor::HttpMethod;
use crate::model::ModelRegistry;
use crate::parameter::{Parameter, ParameterExtractor, RequestBody};
use crate::route_analyzer::{Handler, Route};
use crate::type_ref::TypeRef;
use crate::type_resolver::{InferenceInput, TypeResolver};
use log::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSpec {
    /// Status code or `default`
    pub status: String,
    pub description: String,
    /// Body type; `None` for responses without content
    pub ty: Option<TypeRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOperation {
    pub method: HttpMethod,
    /// OpenAPI path key
    pub path: String,
    pub handler: String,
    pub operation_id: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub deprecated: bool,
    pub parameters: Vec<Parameter>,
    pub request_body: Option<RequestBody>,
    /// In status order, `default` last
    pub responses: Vec<ResponseSpec>,
    /// Security scheme names
    pub security: Vec<String>,
}

/// Resolves routes into operations
pub struct OperationResolver<'a> {
    models: &'a ModelRegistry,
    security: &'a SecurityConfig,
}

impl<'a> OperationResolver<'a> {
    pub fn new(models: &'a ModelRegistry, security: &'a SecurityConfig) -> Self {
        Self { models, security }
    }

    pub fn resolve(
        &self,
        route: &Route,
        handler: &Handler<'_>,
        sink: &mut dyn DiagnosticSink,
    ) -> ResolvedOperation {
        let decl = handler.decl;
        let docs = decl.docs.as_deref().map(DocBlock::parse).unwrap_or_default();
        let extracted = ParameterExtractor::new(self.models).extract(route, handler, sink);

        let mut summary = docs.summary();
        let mut description = docs.description();
        let mut tags = docs.tag_names();
        let mut deprecated = docs.is_deprecated();
        let mut security = Vec::new();

        for annotation in Annotation::parse_all(&decl.annotations) {
            match annotation.classify() {
                KnownAnnotation::Api {
                    summary: api_summary,
                    description: api_description,
                    tags: api_tags,
                    deprecated: api_deprecated,
                    security: api_security,
                    ..
                } => {
                    summary = api_summary.or(summary);
                    description = api_description.or(description);
                    tags.extend(api_tags);
                    deprecated |= api_deprecated;
                    security.extend(api_security);
                }
                KnownAnnotation::Deprecated(_) => deprecated = true,
                _ => {}
            }
        }

        if tags.is_empty() {
            tags.extend(default_tag(handler));
        }
        dedup_in_order(&mut tags);

        for middleware in &route.middleware {
            if let Some(scheme) = self.security.scheme_for_middleware(middleware) {
                security.push(scheme.to_string());
            }
        }
        if security.is_empty() {
            security = self.security.default.clone();
        }
        dedup_in_order(&mut security);

        let responses = self.responses(handler, &docs, sink);
        debug!(
            "Resolved {} {} -> {} ({} params)",
            route.method,
            route.path(),
            route.handler,
            extracted.parameters.len()
        );

        ResolvedOperation {
            method: route.method,
            path: route.path(),
            handler: route.handler.clone(),
            operation_id: route.handler.replace("::", "_"),
            summary,
            description,
            tags,
            deprecated,
            parameters: extracted.parameters,
            request_body: extracted.body,
            responses,
            security,
        }
    }

    /// `200` from the return type, plus every `@response` tag
    fn responses(
        &self,
        handler: &Handler<'_>,
        docs: &DocBlock,
        sink: &mut dyn DiagnosticSink,
    ) -> Vec<ResponseSpec> {
        let decl = handler.decl;
        let inferred = TypeResolver::infer(InferenceInput {
            explicit: decl.type_decl.as_deref(),
            doc_hint: docs.return_type(),
            default: None,
            generics: &decl.generics,
        });
        if let Some(conflict) = inferred.conflict {
            sink.emit(
                Diagnostic::type_conflict(conflict)
                    .at(&handler.file.path)
                    .for_declaration(decl.name.clone())
                    .with_span(decl.span),
            );
        }
        let ty = Some(inferred.ty).filter(|ty| self.has_content(ty));

        let mut responses = vec![ResponseSpec {
            status: "200".to_string(),
            description: docs
                .return_description()
                .unwrap_or("Successful response")
                .to_string(),
            ty,
        }];

        for tag in docs.responses() {
            let DocTag::Response {
                status,
                type_hint,
                description,
            } = tag
            else {
                continue;
            };
            let ty = type_hint.as_deref().map(TypeResolver::parse_doc_type);
            match responses.iter_mut().find(|r| r.status == *status) {
                Some(existing) => {
                    if let Some(description) = description {
                        existing.description = description.clone();
                    }
                    if ty.is_some() {
                        existing.ty = ty;
                    }
                }
                None => responses.push(ResponseSpec {
                    status: status.clone(),
                    description: description
                        .clone()
                        .unwrap_or_else(|| default_description(status)),
                    ty,
                }),
            }
        }

        responses.sort_by(|a, b| {
            (a.status == "default", &a.status).cmp(&(b.status == "default", &b.status))
        });
        responses
    }

    /// Whether a return type describes a response body.
    ///
    /// Framework response types (`HttpResponse`, `StatusCode`, `impl IntoResponse`)
    /// map to unknown or to objects that are not models; they carry no content.
    fn has_content(&self, ty: &TypeRef) -> bool {
        let base = ty.strip_nullable();
        if base.is_unknown() {
            return false;
        }
        base.referenced_models()
            .iter()
            .all(|name| self.models.by_name(name).is_some())
    }
}

/// Impl type for methods, otherwise the last module segment
fn default_tag(handler: &Handler<'_>) -> Option<String> {
    if let Some(owner) = handler.owner_type {
        return Some(owner.to_string());
    }
    handler
        .file
        .module_path
        .rsplit("::")
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn default_description(status: &str) -> String {
    match status {
        "200" | "201" | "202" | "204" => "Successful response",
        "400" => "Bad request",
        "401" => "Unauthorized",
        "403" => "Forbidden",
        "404" => "Not found",
        "409" => "Conflict",
        "422" => "Unprocessable entity",
        "500" => "Internal server error",
        _ => "Response",
    }
    .to_string()
}

fn dedup_in_order(items: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{FileAnalysis, FileAnalyzer};
    use crate::diagnostics::Diagnostics;
    use crate::extractor::PathTemplate;
    use crate::fingerprint::Fingerprint;
    use crate::parser::AstParser;
    use crate::route_analyzer::HandlerRegistry;
    use crate::type_ref::ScalarKind;
    use std::path::Path;

    fn analyze(module_path: &str, code: &str) -> FileAnalysis {
        let unit = AstParser::parse_source(
            Path::new("src/api.rs"),
            code,
            Fingerprint::compute(code.as_bytes()),
            module_path,
        )
        .unwrap();
        FileAnalyzer::analyze(unit)
    }

    fn resolve(
        code: &str,
        handler: &str,
        method: HttpMethod,
        path: &str,
        middleware: Vec<String>,
        security: &SecurityConfig,
    ) -> ResolvedOperation {
        let files = vec![analyze("api::users", code)];
        let mut sink = Diagnostics::new();
        let mut models = ModelRegistry::new();
        for model in files.iter().flat_map(|f| f.models.iter()) {
            models.insert(model.clone(), &mut sink);
        }
        let handlers = HandlerRegistry::build(&files);
        let route = Route {
            method,
            template: PathTemplate::parse(path),
            handler: handler.to_string(),
            middleware,
        };
        let bound = handlers.get(handler).unwrap();
        OperationResolver::new(&models, security).resolve(&route, &bound, &mut sink)
    }

    #[test]
    fn test_metadata_from_docs() {
        let op = resolve(
            r#"
            pub struct User { pub id: i64 }

            /// Show a user
            ///
            /// Looks the user up by id.
            /// @tag accounts
            /// @response 404 no such user
            /// @deprecated use v2
            pub async fn show(id: i64) -> Json<User> { todo!() }
            "#,
            "api::users::show",
            HttpMethod::Get,
            "/users/{id}",
            Vec::new(),
            &SecurityConfig::default(),
        );

        assert_eq!(op.operation_id, "api_users_show");
        assert_eq!(op.summary.as_deref(), Some("Show a user"));
        assert_eq!(op.description.as_deref(), Some("Looks the user up by id."));
        assert_eq!(op.tags, vec!["accounts".to_string()]);
        assert!(op.deprecated);
        assert_eq!(op.responses.len(), 2);
        assert_eq!(op.responses[0].ty, Some(TypeRef::object("User")));
        assert_eq!(op.responses[1].status, "404");
        assert_eq!(op.responses[1].description, "no such user");
        assert_eq!(op.responses[1].ty, None);
    }

    #[test]
    fn test_framework_response_types_have_no_content() {
        let op = resolve(
            r#"
            impl UserController {
                pub async fn destroy(id: i64) -> impl IntoResponse { StatusCode::NO_CONTENT }
                pub async fn touch() -> HttpResponse { HttpResponse::Ok().finish() }
            }
            "#,
            "api::users::UserController::destroy",
            HttpMethod::Delete,
            "/users/{id}",
            Vec::new(),
            &SecurityConfig::default(),
        );
        assert_eq!(op.responses[0].ty, None);
        assert_eq!(op.tags, vec!["UserController".to_string()]);
    }

    #[test]
    fn test_security_from_middleware_annotations_and_default() {
        let mut security = SecurityConfig::default();
        security
            .middleware
            .insert("auth".to_string(), "token".to_string());
        security.default = vec!["basic".to_string()];
        let code = r#"
            pub fn list() -> Vec<String> { Vec::new() }
            #[api(security = "key")]
            pub fn export() {}
        "#;

        let guarded = resolve(
            code,
            "api::users::list",
            HttpMethod::Get,
            "/users",
            vec!["auth:api".to_string(), "throttle".to_string()],
            &security,
        );
        assert_eq!(guarded.security, vec!["token".to_string()]);
        assert_eq!(guarded.tags, vec!["users".to_string()]);
        assert_eq!(
            guarded.responses[0].ty,
            Some(TypeRef::array(TypeRef::scalar(ScalarKind::String)))
        );

        let annotated = resolve(code, "api::users::export", HttpMethod::Get, "/export", Vec::new(), &security);
        assert_eq!(annotated.security, vec!["key".to_string()]);

        let open = resolve(code, "api::users::list", HttpMethod::Get, "/users", Vec::new(), &security);
        assert_eq!(open.security, vec!["basic".to_string()]);
    }
}
