//! Parameter extraction for one bound route.
//!
//! Three signals are merged: path template variables, the handler signature, and
//! handler-level validation rules. Path variables are always required and typed as
//! string unless a handler argument types them. A `required` rule always wins over
//! what the signature says.

use crate::declaration::{DeclarationKind, Literal};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::docblock::{DocBlock, DocTag};
use crate::model::{Field, ModelRegistry};
use crate::route_analyzer::{Handler, Route};
use crate::type_ref::{ScalarKind, TypeRef};
use crate::type_resolver::{parse_type, type_name, wrapper_of, InferenceInput, TypeResolver};
use crate::validation::{Constraint, ValidationRule, ValidationRuleAnalyzer};
use log::debug;
use serde::{Deserialize, Serialize};
use syn::Type;

/// Extractor and argument types that carry no request input
const IGNORED_TYPES: &[&str] = &[
    "State",
    "Extension",
    "Data",
    "HttpRequest",
    "HeaderMap",
    "Request",
    "ConnectInfo",
    "Method",
    "Uri",
    "OriginalUri",
    "MatchedPath",
    "Payload",
    "CookieJar",
    "TypedHeader",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    Path,
    Query,
    Header,
    Body,
}

impl ParameterLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterLocation::Path => "path",
            ParameterLocation::Query => "query",
            ParameterLocation::Header => "header",
            ParameterLocation::Body => "body",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub location: ParameterLocation,
    pub ty: TypeRef,
    pub required: bool,
    pub default: Option<Literal>,
    pub description: Option<String>,
    pub constraints: Vec<Constraint>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, location: ParameterLocation, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            location,
            ty,
            required: location == ParameterLocation::Path,
            default: None,
            description: None,
            constraints: Vec::new(),
        }
    }

    fn from_field(field: &Field, location: ParameterLocation) -> Self {
        Self {
            name: field.name.clone(),
            location,
            ty: field.ty.clone(),
            required: field.required,
            default: field.default.clone(),
            description: field.description.clone(),
            constraints: field.constraints.clone(),
        }
    }

    /// Fold a validation rule in; `required` wins over anything the signature said
    fn apply_rule(&mut self, rule: &ValidationRule) {
        for constraint in &rule.constraints {
            if !self.constraints.contains(constraint) {
                self.constraints.push(constraint.clone());
            }
        }
        if self.ty.strip_nullable().is_unknown() {
            let implied = rule.implied_type();
            self.ty = if self.ty.is_nullable() {
                TypeRef::nullable(implied)
            } else {
                implied
            };
        }
        if self.location == ParameterLocation::Path {
            return;
        }
        if rule.is_nullable() {
            self.ty = TypeRef::nullable(self.ty.clone());
            self.required = false;
        }
        if rule.is_required() {
            self.required = true;
        }
    }
}

/// Request body of an operation
#[derive(Debug, Clone, PartialEq)]
pub struct RequestBody {
    pub content_type: String,
    /// Body type from a `Json<T>`/`Form<T>` extractor
    pub ty: Option<TypeRef>,
    /// Inline fields from plain arguments and rules. With a body type these are
    /// handler rules refining fields of that type.
    pub fields: Vec<Parameter>,
    pub required: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedParameters {
    /// Path, then query, then header parameters
    pub parameters: Vec<Parameter>,
    pub body: Option<RequestBody>,
}

#[derive(Default)]
struct Collector {
    path: Vec<Parameter>,
    query: Vec<Parameter>,
    header: Vec<Parameter>,
    body: Option<RequestBody>,
    body_fields: Vec<Parameter>,
    /// Handler rules aimed at fields of the typed body
    body_rules: Vec<Parameter>,
}

impl Collector {
    fn path_var(&mut self, name: &str) -> Option<&mut Parameter> {
        self.path.iter_mut().find(|p| p.name == name)
    }

    /// Type a path variable; path parameters are never nullable
    fn type_path_var(&mut self, name: &str, ty: TypeRef) {
        if ty.strip_nullable().is_unknown() {
            return;
        }
        if let Some(param) = self.path_var(name) {
            param.ty = ty.strip_nullable().clone();
        }
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.path
            .iter_mut()
            .chain(self.query.iter_mut())
            .chain(self.header.iter_mut())
            .chain(self.body_fields.iter_mut())
            .find(|p| p.name == name)
    }

    fn finish(self) -> ExtractedParameters {
        let body = match self.body {
            Some(mut typed) => {
                if !self.body_fields.is_empty() {
                    debug!(
                        "Ignoring {} inline body fields next to a typed body",
                        self.body_fields.len()
                    );
                }
                typed.fields = self.body_rules;
                Some(typed)
            }
            None if !self.body_fields.is_empty() => Some(RequestBody {
                content_type: "application/json".to_string(),
                ty: None,
                required: self.body_fields.iter().any(|f| f.required),
                fields: self.body_fields,
            }),
            None => None,
        };
        let mut parameters = self.path;
        parameters.extend(self.query);
        parameters.extend(self.header);
        ExtractedParameters { parameters, body }
    }
}

/// Parameter extractor
pub struct ParameterExtractor<'a> {
    models: &'a ModelRegistry,
}

impl<'a> ParameterExtractor<'a> {
    pub fn new(models: &'a ModelRegistry) -> Self {
        Self { models }
    }

    pub fn extract(
        &self,
        route: &Route,
        handler: &Handler<'_>,
        sink: &mut dyn DiagnosticSink,
    ) -> ExtractedParameters {
        let decl = handler.decl;
        let docs = decl.docs.as_deref().map(DocBlock::parse).unwrap_or_default();
        let mut c = Collector::default();

        for variable in route.template.variables() {
            let mut param = Parameter::new(
                variable.clone(),
                ParameterLocation::Path,
                TypeRef::scalar(ScalarKind::String),
            );
            param.description = docs.param(&variable).and_then(|(_, d)| d.clone());
            c.path.push(param);
        }

        for arg in decl.children_of(DeclarationKind::Param) {
            let Some(ty) = arg.type_decl.as_deref().and_then(parse_type) else {
                continue;
            };
            let (optional, ty) = strip_option(&ty);
            match wrapper_of(ty) {
                Some((name, inner)) if name == "Path" => {
                    self.type_path(inner, &arg.bindings, &decl.generics, &mut c)
                }
                Some((name, inner)) if name == "Query" => {
                    self.expand_query(inner, &decl.generics, &mut c)
                }
                Some((name, inner)) if name == "Json" || name == "Form" => {
                    let content_type = if name == "Form" {
                        "application/x-www-form-urlencoded"
                    } else {
                        "application/json"
                    };
                    c.body = Some(RequestBody {
                        content_type: content_type.to_string(),
                        ty: Some(TypeResolver::from_rust_type(inner, &decl.generics)),
                        fields: Vec::new(),
                        required: !optional,
                    });
                }
                _ if type_name(ty).is_some_and(|n| IGNORED_TYPES.contains(&n.as_str())) => {}
                _ => {
                    let (type_hint, description) = match docs.param(&arg.name) {
                        Some((hint, description)) => (hint.as_deref(), description.clone()),
                        None => (None, None),
                    };
                    let inferred = TypeResolver::infer(InferenceInput {
                        explicit: arg.type_decl.as_deref(),
                        doc_hint: type_hint,
                        default: None,
                        generics: &decl.generics,
                    });
                    if let Some(conflict) = inferred.conflict {
                        sink.emit(
                            Diagnostic::type_conflict(conflict)
                                .at(&handler.file.path)
                                .for_declaration(format!("{}.{}", decl.name, arg.name))
                                .with_span(arg.span),
                        );
                    }

                    if c.path_var(&arg.name).is_some() {
                        c.type_path_var(&arg.name, inferred.ty);
                        continue;
                    }
                    if let TypeRef::Object(model) = inferred.ty.strip_nullable() {
                        if self.models.by_name(model).is_none() {
                            debug!(
                                "Argument `{}` of `{}` has non-model type `{}`; not a parameter",
                                arg.name, decl.name, model
                            );
                            continue;
                        }
                    }
                    let location = if route.method.reads_query() {
                        ParameterLocation::Query
                    } else {
                        ParameterLocation::Body
                    };
                    let mut param = Parameter::new(arg.name.clone(), location, inferred.ty);
                    param.required = !param.ty.is_nullable();
                    param.description = description;
                    match location {
                        ParameterLocation::Query => c.query.push(param),
                        _ => c.body_fields.push(param),
                    }
                }
            }
        }

        for tag in docs.headers() {
            if let DocTag::Header {
                name,
                type_hint,
                description,
            } = tag
            {
                let ty = type_hint
                    .as_deref()
                    .map(TypeResolver::parse_doc_type)
                    .unwrap_or(TypeRef::scalar(ScalarKind::String));
                let mut param = Parameter::new(name.clone(), ParameterLocation::Header, ty);
                param.description = description.clone();
                c.header.push(param);
            }
        }

        if let Some((_, rules)) = ValidationRuleAnalyzer::analyze(decl) {
            for rule in &rules.rules {
                if let Some(param) = c.find_mut(&rule.field) {
                    param.apply_rule(rule);
                    continue;
                }
                let location = if route.method.reads_query() {
                    ParameterLocation::Query
                } else {
                    ParameterLocation::Body
                };
                if location == ParameterLocation::Body {
                    if let Some(ty) = c.body.as_ref().and_then(|b| b.ty.clone()) {
                        let refined = self.refine_body_field(&ty, rule, handler, sink);
                        match c.body_rules.iter_mut().find(|p| p.name == refined.name) {
                            Some(existing) => existing.apply_rule(rule),
                            None => c.body_rules.push(refined),
                        }
                        continue;
                    }
                }
                let mut param = Parameter::new(rule.field.clone(), location, TypeRef::Unknown);
                param.apply_rule(rule);
                match location {
                    ParameterLocation::Query => c.query.push(param),
                    _ => c.body_fields.push(param),
                }
            }
        }

        c.finish()
    }

    /// A handler rule for a field of the typed body: the model field with the rule folded in
    fn refine_body_field(
        &self,
        body: &TypeRef,
        rule: &ValidationRule,
        handler: &Handler<'_>,
        sink: &mut dyn DiagnosticSink,
    ) -> Parameter {
        let decl = handler.decl;
        let model = match body.strip_nullable() {
            TypeRef::Object(name) => self.models.by_name(name),
            _ => None,
        };
        let mut param = match model {
            Some(model) => match model.field(&rule.field) {
                Some(field) => Parameter::from_field(field, ParameterLocation::Body),
                None => {
                    sink.emit(
                        Diagnostic::resolution(format!(
                            "rule for `{}` names no field of request body `{}`",
                            rule.field, model.name
                        ))
                        .at(&handler.file.path)
                        .for_declaration(decl.name.clone())
                        .with_span(decl.span),
                    );
                    Parameter::new(rule.field.clone(), ParameterLocation::Body, TypeRef::Unknown)
                }
            },
            None => {
                debug!(
                    "Body of `{}` is not a known model; rule for `{}` kept as is",
                    decl.name, rule.field
                );
                Parameter::new(rule.field.clone(), ParameterLocation::Body, TypeRef::Unknown)
            }
        };
        param.apply_rule(rule);
        param
    }

    /// `Path<T>`: a scalar, a tuple in template order, or a struct whose fields name variables
    fn type_path(&self, inner: &Type, bindings: &[String], generics: &[String], c: &mut Collector) {
        if let Type::Tuple(tuple) = inner {
            let names: Vec<String> = if bindings.len() == tuple.elems.len() {
                bindings.to_vec()
            } else {
                c.path.iter().map(|p| p.name.clone()).collect()
            };
            for (name, elem) in names.iter().zip(tuple.elems.iter()) {
                c.type_path_var(name, TypeResolver::from_rust_type(elem, generics));
            }
            return;
        }

        let ty = TypeResolver::from_rust_type(inner, generics);
        if let TypeRef::Object(name) = &ty {
            if let Some(model) = self.models.by_name(name) {
                for field in &model.fields {
                    c.type_path_var(&field.name, field.ty.clone());
                }
                return;
            }
        }
        let target = bindings
            .first()
            .filter(|b| c.path.iter().any(|p| p.name == **b))
            .cloned()
            .or_else(|| c.path.first().map(|p| p.name.clone()));
        if let Some(name) = target {
            c.type_path_var(&name, ty);
        }
    }

    /// `Query<T>` with a model `T` expands into one query parameter per field
    fn expand_query(&self, inner: &Type, generics: &[String], c: &mut Collector) {
        let ty = TypeResolver::from_rust_type(inner, generics);
        match ty.strip_nullable() {
            TypeRef::Object(name) => match self.models.by_name(name) {
                Some(model) => c.query.extend(
                    model
                        .fields
                        .iter()
                        .map(|f| Parameter::from_field(f, ParameterLocation::Query)),
                ),
                None => debug!("Query type `{}` is not a known model", name),
            },
            other => debug!("Query type `{}` cannot be expanded", other),
        }
    }
}

/// `Option<T>` -> (true, T)
fn strip_option(ty: &Type) -> (bool, &Type) {
    match wrapper_of(ty) {
        Some((name, inner)) if name == "Option" => (true, inner),
        _ => (false, ty),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{FileAnalysis, FileAnalyzer};
    use crate::diagnostics::{DiagnosticKind, Diagnostics};
    use crate::extractor::{HttpMethod, PathTemplate};
    use crate::fingerprint::Fingerprint;
    use crate::parser::AstParser;
    use crate::route_analyzer::HandlerRegistry;
    use crate::validation::RuleType;
    use std::path::Path;

    fn analyze(code: &str) -> FileAnalysis {
        let unit = AstParser::parse_source(
            Path::new("src/handlers.rs"),
            code,
            Fingerprint::compute(code.as_bytes()),
            "handlers",
        )
        .unwrap();
        FileAnalyzer::analyze(unit)
    }

    fn extract(
        code: &str,
        method: HttpMethod,
        path: &str,
        handler: &str,
    ) -> (ExtractedParameters, Diagnostics) {
        let files = vec![analyze(code)];
        let mut models = ModelRegistry::new();
        let mut sink = Diagnostics::new();
        for model in files.iter().flat_map(|f| f.models.iter()) {
            models.insert(model.clone(), &mut sink);
        }
        let handlers = HandlerRegistry::build(&files);
        let id = format!("handlers::{}", handler);
        let route = Route {
            method,
            template: PathTemplate::parse(path),
            handler: id.clone(),
            middleware: Vec::new(),
        };
        let bound = handlers.get(&id).unwrap();
        let extracted = ParameterExtractor::new(&models).extract(&route, &bound, &mut sink);
        (extracted, sink)
    }

    #[test]
    fn test_typed_path_variable() {
        let (extracted, _) = extract(
            "pub async fn show(id: i32) -> String { String::new() }",
            HttpMethod::Get,
            "/items/{id}",
            "show",
        );

        assert_eq!(extracted.parameters.len(), 1);
        let id = &extracted.parameters[0];
        assert_eq!(id.name, "id");
        assert_eq!(id.location, ParameterLocation::Path);
        assert_eq!(id.ty.schema_type(), Some("integer"));
        assert!(id.required);
        assert!(extracted.body.is_none());
    }

    #[test]
    fn test_untyped_path_variables_are_strings() {
        let (extracted, _) = extract(
            "pub async fn show() {}",
            HttpMethod::Get,
            "/users/:user/posts/<slug>",
            "show",
        );
        let names: Vec<&str> = extracted.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["user", "slug"]);
        assert!(extracted
            .parameters
            .iter()
            .all(|p| p.required && p.ty == TypeRef::scalar(ScalarKind::String)));
    }

    #[test]
    fn test_axum_extractors() {
        let (extracted, _) = extract(
            r#"
            pub struct Pagination {
                pub page: u32,
                pub q: Option<String>,
            }
            pub struct NewComment {
                pub body: String,
            }
            pub async fn create(
                State(db): State<Db>,
                Path((post_id, lang)): Path<(u64, String)>,
                Query(page): Query<Pagination>,
                Json(input): Json<NewComment>,
            ) {}
            "#,
            HttpMethod::Post,
            "/posts/{post_id}/{lang}/comments",
            "create",
        );

        let summary: Vec<(&str, ParameterLocation, bool)> = extracted
            .parameters
            .iter()
            .map(|p| (p.name.as_str(), p.location, p.required))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("post_id", ParameterLocation::Path, true),
                ("lang", ParameterLocation::Path, true),
                ("page", ParameterLocation::Query, true),
                ("q", ParameterLocation::Query, false),
            ]
        );
        assert_eq!(
            extracted.parameters[0].ty,
            TypeRef::scalar(ScalarKind::Int64)
        );
        let body = extracted.body.unwrap();
        assert_eq!(body.ty, Some(TypeRef::object("NewComment")));
        assert!(body.required);
    }

    #[test]
    fn test_plain_arguments_follow_method() {
        let code = r#"
            /// @param limit int Page size
            pub fn search(term: String, limit: Option<u32>, pool: PgPool) {}
        "#;
        let (get, _) = extract(code, HttpMethod::Get, "/search", "search");
        let names: Vec<(&str, ParameterLocation)> = get
            .parameters
            .iter()
            .map(|p| (p.name.as_str(), p.location))
            .collect();
        assert_eq!(
            names,
            vec![
                ("term", ParameterLocation::Query),
                ("limit", ParameterLocation::Query)
            ]
        );
        assert!(!get.parameters[1].required);
        assert_eq!(get.parameters[1].description.as_deref(), Some("Page size"));

        let (post, _) = extract(code, HttpMethod::Post, "/search", "search");
        assert!(post.parameters.is_empty());
        let body = post.body.unwrap();
        assert_eq!(body.ty, None);
        assert_eq!(body.fields.len(), 2);
        assert!(body.required);
    }

    #[test]
    fn test_handler_rules_override_required() {
        let (extracted, _) = extract(
            r#"
            #[rules(name = "required|string", age = "integer", nickname = "required")]
            pub async fn store(nickname: Option<String>) {}
            "#,
            HttpMethod::Post,
            "/people",
            "store",
        );

        let body = extracted.body.unwrap();
        let field = |name: &str| body.fields.iter().find(|f| f.name == name).unwrap();
        assert!(field("nickname").required);
        assert!(field("name").required);
        assert_eq!(field("name").ty, TypeRef::scalar(ScalarKind::String));
        assert!(!field("age").required);
        assert_eq!(field("age").ty, TypeRef::scalar(ScalarKind::Integer));
        assert!(field("age")
            .constraints
            .contains(&Constraint::Type(RuleType::Integer)));
    }

    #[test]
    fn test_handler_rules_refine_typed_body_fields() {
        let (extracted, sink) = extract(
            r#"
            pub struct CreateUser {
                pub email: String,
                pub age: Option<u32>,
            }
            #[rules(email = "required|email|unique:users", age = "min:18", nickname = "required")]
            pub async fn create(Json(body): Json<CreateUser>) {}
            "#,
            HttpMethod::Post,
            "/users",
            "create",
        );

        let body = extracted.body.unwrap();
        assert_eq!(body.ty, Some(TypeRef::object("CreateUser")));
        let names: Vec<&str> = body.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["email", "age", "nickname"]);
        assert!(body.fields[0]
            .constraints
            .contains(&Constraint::Format("email".to_string())));
        assert!(body.fields[1].ty.is_nullable());
        assert!(!body.fields[1].required);
        assert!(body.fields[2].required);

        let unknown: Vec<_> = sink
            .items()
            .iter()
            .filter(|d| d.kind == DiagnosticKind::Resolution)
            .collect();
        assert_eq!(unknown.len(), 1);
        assert!(unknown[0].message.contains("`nickname`"));
        assert_eq!(unknown[0].declaration.as_deref(), Some("create"));
    }

    #[test]
    fn test_doc_headers_and_type_conflicts() {
        let (extracted, sink) = extract(
            r#"
            /// @header X-Request-Id string Correlation id
            /// @param page string
            pub fn list(page: i64) {}
            "#,
            HttpMethod::Get,
            "/things",
            "list",
        );
        let header = extracted
            .parameters
            .iter()
            .find(|p| p.location == ParameterLocation::Header)
            .unwrap();
        assert_eq!(header.name, "X-Request-Id");
        assert!(!header.required);
        assert_eq!(sink.count(DiagnosticKind::TypeConflict), 1);
        assert_eq!(extracted.parameters[0].ty, TypeRef::scalar(ScalarKind::Int64));
    }
}
