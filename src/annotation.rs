//! Attribute (annotation) parsing.
//!
//! Every non-doc attribute is kept as raw token text on its [`Declaration`] and parsed
//! here into a name plus an ordered argument list. Classification into the small set of
//! annotations the analyzers understand happens afterwards, in [`Annotation::classify`];
//! anything else passes through as [`KnownAnnotation::Opaque`].
//!
//! [`Declaration`]: crate::declaration::Declaration

use crate::declaration::Literal;
use crate::extractor::HttpMethod;
use crate::relation::RelationKind;
use serde::{Deserialize, Serialize};
use syn::parse::discouraged::Speculative;
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{Expr, Meta, Token};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    /// `None` for positional arguments
    pub key: Option<String>,
    pub value: Literal,
}

impl Argument {
    pub fn positional(value: Literal) -> Self {
        Self { key: None, value }
    }

    pub fn named(key: impl Into<String>, value: Literal) -> Self {
        Self {
            key: Some(key.into()),
            value,
        }
    }
}

impl Parse for Argument {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let fork = input.fork();
        if let Ok(path) = fork.call(syn::Path::parse_mod_style) {
            if fork.peek(Token![=]) {
                input.advance_to(&fork);
                input.parse::<Token![=]>()?;
                let expr: Expr = input.parse()?;
                return Ok(Argument::named(path_text(&path), Literal::from_expr(&expr)));
            }
            if fork.peek(syn::token::Paren) {
                input.advance_to(&fork);
                let content;
                syn::parenthesized!(content in input);
                let nested = Punctuated::<Argument, Token![,]>::parse_terminated(&content)?;
                return Ok(Argument::named(
                    path_text(&path),
                    arguments_to_map(nested.into_iter().collect()),
                ));
            }
        }
        let expr: Expr = input.parse()?;
        Ok(Argument::positional(Literal::from_expr(&expr)))
    }
}

fn path_text(path: &syn::Path) -> String {
    path.segments
        .iter()
        .map(|s| s.ident.to_string())
        .collect::<Vec<_>>()
        .join("::")
}

/// Nested argument lists become a mapping; positional entries are keyed by index
fn arguments_to_map(args: Vec<Argument>) -> Literal {
    Literal::Map(
        args.into_iter()
            .enumerate()
            .map(|(idx, arg)| (arg.key.unwrap_or_else(|| idx.to_string()), arg.value))
            .collect(),
    )
}

/// A parsed attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Full attribute path, e.g. `serde` or `actix_web::get`
    pub name: String,
    pub args: Vec<Argument>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerdeDefault {
    Trait,
    Function(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationSpec {
    pub kind: RelationKind,
    /// Missing for field-level relations, where the field type names the target
    pub target: Option<String>,
    pub foreign_key: Option<String>,
}

/// Annotations the analyzers understand, plus an opaque pass-through
#[derive(Debug, Clone, PartialEq)]
pub enum KnownAnnotation {
    Route {
        methods: Vec<HttpMethod>,
        path: String,
        middleware: Vec<String>,
    },
    Relation(Vec<RelationSpec>),
    Rules(Vec<Argument>),
    Validate(Vec<Argument>),
    Serde {
        rename: Option<String>,
        rename_all: Option<String>,
        skip: bool,
        flatten: bool,
        default: Option<SerdeDefault>,
    },
    Api {
        summary: Option<String>,
        description: Option<String>,
        tags: Vec<String>,
        deprecated: bool,
        security: Vec<String>,
        default: Option<Literal>,
        example: Option<Literal>,
    },
    Deprecated(Option<String>),
    Opaque(String),
}

impl Annotation {
    /// Parse raw attribute text (`get("/users")`, `serde(rename = "x")`, `deprecated`).
    ///
    /// Never fails: text that does not parse keeps its leading name and carries the
    /// remainder as a single raw positional argument.
    pub fn parse(text: &str) -> Annotation {
        match syn::parse_str::<Meta>(text) {
            Ok(Meta::Path(path)) => Annotation {
                name: path_text(&path),
                args: Vec::new(),
            },
            Ok(Meta::NameValue(nv)) => Annotation {
                name: path_text(&nv.path),
                args: vec![Argument::positional(Literal::from_expr(&nv.value))],
            },
            Ok(Meta::List(list)) => {
                let name = path_text(&list.path);
                match list.parse_args_with(Punctuated::<Argument, Token![,]>::parse_terminated) {
                    Ok(args) => Annotation {
                        name,
                        args: args.into_iter().collect(),
                    },
                    Err(_) => Annotation {
                        name,
                        args: vec![Argument::positional(Literal::Raw(list.tokens.to_string()))],
                    },
                }
            }
            Err(_) => Self::raw_fallback(text),
        }
    }

    fn raw_fallback(text: &str) -> Annotation {
        let trimmed = text.trim();
        let end = trimmed
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == ':'))
            .unwrap_or(trimmed.len());
        let rest = trimmed[end..].trim();
        Annotation {
            name: trimmed[..end].trim_end_matches(':').to_string(),
            args: if rest.is_empty() {
                Vec::new()
            } else {
                vec![Argument::positional(Literal::Raw(rest.to_string()))]
            },
        }
    }

    pub fn parse_all(texts: &[String]) -> Vec<Annotation> {
        texts.iter().map(|t| Self::parse(t)).collect()
    }

    /// Last path segment of the name
    pub fn short_name(&self) -> &str {
        self.name.rsplit("::").next().unwrap_or(&self.name)
    }

    pub fn arg(&self, key: &str) -> Option<&Literal> {
        self.args
            .iter()
            .find(|a| a.key.as_deref() == Some(key))
            .map(|a| &a.value)
    }

    pub fn positionals(&self) -> impl Iterator<Item = &Literal> {
        self.args.iter().filter(|a| a.key.is_none()).map(|a| &a.value)
    }

    /// Bare flag (`skip`) or `flag = true`
    pub fn has_flag(&self, name: &str) -> bool {
        self.args.iter().any(|a| match (&a.key, &a.value) {
            (None, Literal::Raw(raw)) => raw == name,
            (Some(key), value) => key == name && value.as_bool().unwrap_or(true),
            _ => false,
        })
    }

    pub fn classify(&self) -> KnownAnnotation {
        let short = self.short_name();

        if let Some(method) = HttpMethod::parse(short) {
            if let Some(path) = self.positionals().next().and_then(string_value) {
                return KnownAnnotation::Route {
                    methods: vec![method],
                    path,
                    middleware: self.middleware(),
                };
            }
        }

        match short {
            "route" => self.classify_route(),
            "rules" | "rule" | "validation_rules" => KnownAnnotation::Rules(self.args.clone()),
            "validate" => KnownAnnotation::Validate(self.args.clone()),
            "serde" => self.classify_serde(),
            "api" | "openapi" => self.classify_api(),
            "deprecated" => KnownAnnotation::Deprecated(
                self.arg("note")
                    .or_else(|| self.positionals().next())
                    .and_then(Literal::to_text),
            ),
            "relation" | "diesel" | "sea_orm" => {
                let specs = self.nested_relations();
                if specs.is_empty() {
                    KnownAnnotation::Opaque(self.name.clone())
                } else {
                    KnownAnnotation::Relation(specs)
                }
            }
            other => match RelationKind::parse(other) {
                Some(kind) => KnownAnnotation::Relation(vec![relation_from_args(
                    kind,
                    &self.args,
                )]),
                None => KnownAnnotation::Opaque(self.name.clone()),
            },
        }
    }

    fn classify_route(&self) -> KnownAnnotation {
        let Some(path) = self.positionals().next().and_then(string_value) else {
            return KnownAnnotation::Opaque(self.name.clone());
        };

        let mut methods = Vec::new();
        for arg in &self.args {
            if !matches!(arg.key.as_deref(), Some("method") | Some("methods")) {
                continue;
            }
            let values = match &arg.value {
                Literal::Array(items) => items.clone(),
                other => vec![other.clone()],
            };
            methods.extend(
                values
                    .iter()
                    .filter_map(Literal::to_text)
                    .filter_map(|m| HttpMethod::parse(&m)),
            );
        }
        // Rocket style: `#[route(GET, uri = "/x")]`
        methods.extend(
            self.positionals()
                .skip(1)
                .filter_map(Literal::to_text)
                .filter_map(|m| HttpMethod::parse(&m)),
        );
        if methods.is_empty() {
            methods.push(HttpMethod::Get);
        }

        KnownAnnotation::Route {
            methods,
            path,
            middleware: self.middleware(),
        }
    }

    fn middleware(&self) -> Vec<String> {
        self.args
            .iter()
            .filter(|a| matches!(a.key.as_deref(), Some("wrap") | Some("middleware") | Some("guard")))
            .flat_map(|a| match &a.value {
                Literal::Array(items) => items.iter().filter_map(Literal::to_text).collect(),
                other => other.to_text().into_iter().collect::<Vec<_>>(),
            })
            .map(|m| middleware_name(&m))
            .collect()
    }

    fn classify_serde(&self) -> KnownAnnotation {
        let default = if let Some(Literal::Str(func)) = self.arg("default") {
            Some(SerdeDefault::Function(func.clone()))
        } else if self.has_flag("default") {
            Some(SerdeDefault::Trait)
        } else {
            None
        };
        KnownAnnotation::Serde {
            rename: self.arg("rename").and_then(string_value),
            rename_all: self.arg("rename_all").and_then(string_value),
            skip: self.has_flag("skip"),
            flatten: self.has_flag("flatten"),
            default,
        }
    }

    fn classify_api(&self) -> KnownAnnotation {
        let list = |key: &str| -> Vec<String> {
            match self.arg(key) {
                Some(Literal::Array(items)) => items.iter().filter_map(Literal::to_text).collect(),
                Some(other) => other.to_text().into_iter().collect(),
                None => Vec::new(),
            }
        };
        let mut tags = list("tag");
        tags.extend(list("tags"));
        KnownAnnotation::Api {
            summary: self.arg("summary").and_then(Literal::to_text),
            description: self.arg("description").and_then(Literal::to_text),
            tags,
            deprecated: self.has_flag("deprecated"),
            security: list("security"),
            default: self.arg("default").cloned(),
            example: self.arg("example").cloned(),
        }
    }

    fn nested_relations(&self) -> Vec<RelationSpec> {
        let mut specs = Vec::new();
        // `#[relation(has_many, Post)]`
        if let Some(kind) = self
            .positionals()
            .next()
            .and_then(Literal::to_text)
            .and_then(|k| RelationKind::parse(&k))
        {
            let rest: Vec<Argument> = self.args.iter().skip(1).cloned().collect();
            specs.push(relation_from_args(kind, &rest));
        }
        for arg in &self.args {
            let Some(kind) = arg.key.as_deref().and_then(RelationKind::parse) else {
                continue;
            };
            let spec = match &arg.value {
                // `belongs_to(User, foreign_key = user_id)`
                Literal::Map(entries) => {
                    let nested: Vec<Argument> = entries
                        .iter()
                        .map(|(k, v)| {
                            if k.parse::<usize>().is_ok() {
                                Argument::positional(v.clone())
                            } else {
                                Argument::named(k.clone(), v.clone())
                            }
                        })
                        .collect();
                    relation_from_args(kind, &nested)
                }
                // `has_many = "super::post::Entity"`
                other => RelationSpec {
                    kind,
                    target: other.to_text().map(|t| normalize_target(&t)),
                    foreign_key: None,
                },
            };
            specs.push(spec);
        }
        specs
    }
}

fn relation_from_args(kind: RelationKind, args: &[Argument]) -> RelationSpec {
    let target = args
        .iter()
        .find(|a| a.key.is_none() || a.key.as_deref() == Some("target") || a.key.as_deref() == Some("model"))
        .and_then(|a| a.value.to_text())
        .map(|t| normalize_target(&t));
    let foreign_key = args
        .iter()
        .find(|a| matches!(a.key.as_deref(), Some("foreign_key") | Some("fk") | Some("from")))
        .and_then(|a| a.value.to_text())
        .map(|fk| fk.rsplit("::").next().unwrap_or(&fk).trim().to_string());
    RelationSpec {
        kind,
        target,
        foreign_key,
    }
}

/// `super::post::Entity` names the `Post` model; `crate::models::User` names `User`
fn normalize_target(text: &str) -> String {
    let segments: Vec<&str> = text
        .split("::")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    match segments.as_slice() {
        [.., module, last] if *last == "Entity" || *last == "Model" => pascal_case(module),
        [.., last] => last.to_string(),
        [] => text.trim().to_string(),
    }
}

fn pascal_case(s: &str) -> String {
    s.split('_')
        .filter(|p| !p.is_empty())
        .map(|p| {
            let mut chars = p.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// `from_fn(auth)` and `AuthLayer::new()` both name their middleware by identifier
pub(crate) fn middleware_name(text: &str) -> String {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let head = compact.split('(').next().unwrap_or(&compact);
    let inner = compact
        .find('(')
        .and_then(|start| compact.rfind(')').map(|end| &compact[start + 1..end]));
    let last_segment = |s: &str| s.rsplit("::").next().unwrap_or(s).to_string();
    match inner {
        Some(arg) if head.ends_with("from_fn") && !arg.is_empty() => last_segment(arg),
        _ => {
            let head = head.trim_end_matches("::new").trim_end_matches("::default");
            last_segment(head)
        }
    }
}

fn string_value(lit: &Literal) -> Option<String> {
    match lit {
        Literal::Str(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_name_value_arguments() {
        let ann = Annotation::parse(r#"serde (rename = "userName", default)"#);
        assert_eq!(ann.name, "serde");
        assert_eq!(ann.arg("rename"), Some(&Literal::Str("userName".to_string())));
        assert!(ann.has_flag("default"));
    }

    #[test]
    fn test_parse_nested_mapping() {
        let ann = Annotation::parse("validate (email, length (min = 1, max = 20))");
        assert_eq!(ann.args.len(), 2);
        assert_eq!(
            ann.arg("length"),
            Some(&Literal::Map(vec![
                ("min".to_string(), Literal::Int(1)),
                ("max".to_string(), Literal::Int(20)),
            ]))
        );
    }

    #[test]
    fn test_parse_array_argument() {
        let ann = Annotation::parse(r#"rules (age = ["integer", "min:1"])"#);
        assert_eq!(
            ann.arg("age"),
            Some(&Literal::Array(vec![
                Literal::Str("integer".to_string()),
                Literal::Str("min:1".to_string()),
            ]))
        );
    }

    #[test]
    fn test_unparseable_falls_back_to_raw() {
        let ann = Annotation::parse("weird (a => b)");
        assert_eq!(ann.name, "weird");
        assert_eq!(ann.args.len(), 1);
        assert!(ann.args[0].value.is_raw());
    }

    #[test]
    fn test_unknown_annotation_is_opaque() {
        let ann = Annotation::parse("derive (Debug, Clone)");
        assert_eq!(ann.classify(), KnownAnnotation::Opaque("derive".to_string()));
    }

    #[test]
    fn test_classify_route() {
        let ann = Annotation::parse(r#"get ("/users/{id}", wrap = "from_fn(auth)")"#);
        assert_eq!(
            ann.classify(),
            KnownAnnotation::Route {
                methods: vec![HttpMethod::Get],
                path: "/users/{id}".to_string(),
                middleware: vec!["auth".to_string()],
            }
        );

        let ann = Annotation::parse(r#"route ("/x", method = "POST", method = "PUT")"#);
        match ann.classify() {
            KnownAnnotation::Route { methods, .. } => {
                assert_eq!(methods, vec![HttpMethod::Post, HttpMethod::Put])
            }
            other => panic!("Expected route, got {:?}", other),
        }
    }

    #[test]
    fn test_test_attribute_is_not_a_route() {
        assert_eq!(
            Annotation::parse("test").classify(),
            KnownAnnotation::Opaque("test".to_string())
        );
    }

    #[test]
    fn test_classify_relations() {
        let ann = Annotation::parse(r#"has_many (Post, foreign_key = "author_id")"#);
        assert_eq!(
            ann.classify(),
            KnownAnnotation::Relation(vec![RelationSpec {
                kind: RelationKind::OneToMany,
                target: Some("Post".to_string()),
                foreign_key: Some("author_id".to_string()),
            }])
        );

        let ann = Annotation::parse("diesel (belongs_to (User, foreign_key = user_id))");
        assert_eq!(
            ann.classify(),
            KnownAnnotation::Relation(vec![RelationSpec {
                kind: RelationKind::BelongsTo,
                target: Some("User".to_string()),
                foreign_key: Some("user_id".to_string()),
            }])
        );

        let ann = Annotation::parse(r#"sea_orm (has_many = "super::blog_post::Entity")"#);
        match ann.classify() {
            KnownAnnotation::Relation(specs) => {
                assert_eq!(specs[0].target.as_deref(), Some("BlogPost"))
            }
            other => panic!("Expected relation, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_serde_default_function() {
        let ann = Annotation::parse(r#"serde (default = "default_page")"#);
        match ann.classify() {
            KnownAnnotation::Serde { default, .. } => {
                assert_eq!(default, Some(SerdeDefault::Function("default_page".to_string())))
            }
            other => panic!("Expected serde, got {:?}", other),
        }
    }

    #[test]
    fn test_middleware_names() {
        assert_eq!(middleware_name("from_fn(require_auth)"), "require_auth");
        assert_eq!(middleware_name("middleware::from_fn(auth::check)"), "check");
        assert_eq!(middleware_name("TraceLayer::new()"), "TraceLayer");
        assert_eq!(middleware_name("AuthGuard"), "AuthGuard");
    }
}
