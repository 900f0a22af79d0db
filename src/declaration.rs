//! Structural model of a parsed source file.
//!
//! The parser lowers the `syn` tree into [`Declaration`]s, a small owned tree that keeps
//! exactly what the analyzers need (names, docs, attribute text, type text, default
//! literals, positions). Unlike the `syn` tree it is serializable, which lets the cache
//! store a whole file's analysis and replay it without re-parsing.

use quote::ToTokens;
use serde::{Deserialize, Serialize};
use syn::punctuated::Punctuated;
use syn::{Expr, Lit, Token, UnOp};

/// Source position range (1-based lines, 0-based columns)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start_line: usize,
    pub start_column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

impl Span {
    pub fn from_span(span: proc_macro2::Span) -> Self {
        let start = span.start();
        let end = span.end();
        Self {
            start_line: start.line,
            start_column: start.column,
            end_line: end.line,
            end_column: end.column,
        }
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.start_line, self.start_column + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeclarationKind {
    Module,
    Struct,
    Enum,
    Variant,
    Field,
    Function,
    Impl,
    Method,
    Param,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Restricted,
    Private,
}

impl From<&syn::Visibility> for Visibility {
    fn from(vis: &syn::Visibility) -> Self {
        match vis {
            syn::Visibility::Public(_) => Visibility::Public,
            syn::Visibility::Restricted(_) => Visibility::Restricted,
            syn::Visibility::Inherited => Visibility::Private,
        }
    }
}

/// A declaration found in a source unit. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    pub kind: DeclarationKind,
    pub name: String,
    pub visibility: Visibility,
    /// Joined documentation comment text, one line per `///` line
    pub docs: Option<String>,
    /// Raw text of every non-doc attribute, e.g. `serde (rename = "userName")`
    pub annotations: Vec<String>,
    /// Explicit type text: field/param type, function return type, impl self type
    pub type_decl: Option<String>,
    /// Default-value literal for fields (from `impl Default`)
    pub default_value: Option<Literal>,
    /// Literal value of a function's tail expression, when it is one
    pub return_value: Option<Literal>,
    /// Generic type parameter names in scope of this declaration
    pub generics: Vec<String>,
    /// Names bound by a parameter pattern (`Path((a, b))` binds `a` and `b`)
    pub bindings: Vec<String>,
    pub children: Vec<Declaration>,
    pub span: Span,
}

impl Declaration {
    pub fn new(kind: DeclarationKind, name: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            name: name.into(),
            visibility: Visibility::Private,
            docs: None,
            annotations: Vec::new(),
            type_decl: None,
            default_value: None,
            return_value: None,
            generics: Vec::new(),
            bindings: Vec::new(),
            children: Vec::new(),
            span,
        }
    }

    /// Children of the given kind, in declaration order
    pub fn children_of(&self, kind: DeclarationKind) -> impl Iterator<Item = &Declaration> {
        self.children.iter().filter(move |c| c.kind == kind)
    }

    pub fn child(&self, kind: DeclarationKind, name: &str) -> Option<&Declaration> {
        self.children.iter().find(|c| c.kind == kind && c.name == name)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self.kind, DeclarationKind::Function | DeclarationKind::Method)
    }
}

/// A literal value recovered from source: defaults, annotation arguments, return values.
///
/// Anything that is not a recognizable literal is kept as `Raw` token text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Literal>),
    Map(Vec<(String, Literal)>),
    Raw(String),
}

impl Literal {
    /// Convert an expression into a literal, falling back to raw token text
    pub fn from_expr(expr: &Expr) -> Literal {
        match expr {
            Expr::Lit(expr_lit) => Self::from_lit(&expr_lit.lit),
            Expr::Unary(unary) if matches!(unary.op, UnOp::Neg(_)) => {
                match Self::from_expr(&unary.expr) {
                    Literal::Int(v) => Literal::Int(-v),
                    Literal::Float(v) => Literal::Float(-v),
                    _ => Self::raw(expr),
                }
            }
            Expr::Array(array) => Literal::Array(array.elems.iter().map(Self::from_expr).collect()),
            Expr::Tuple(tuple) => Literal::Array(tuple.elems.iter().map(Self::from_expr).collect()),
            Expr::Reference(reference) => Self::from_expr(&reference.expr),
            Expr::Paren(paren) => Self::from_expr(&paren.expr),
            Expr::Group(group) => Self::from_expr(&group.expr),
            Expr::Cast(cast) => Self::from_expr(&cast.expr),
            Expr::Path(path) if path.path.is_ident("None") => Literal::Null,
            Expr::Macro(mac) if mac.mac.path.is_ident("vec") => {
                match mac
                    .mac
                    .parse_body_with(Punctuated::<Expr, Token![,]>::parse_terminated)
                {
                    Ok(items) => Literal::Array(items.iter().map(Self::from_expr).collect()),
                    Err(_) => Self::raw(expr),
                }
            }
            Expr::Call(call) => {
                let func = match &*call.func {
                    Expr::Path(path) => path.path.segments.last().map(|s| s.ident.to_string()),
                    _ => None,
                };
                // `Some(x)`, `String::from("x")`, `HashMap::from([...])`
                match func.as_deref() {
                    Some("Some") | Some("from") | Some("new") if call.args.len() == 1 => {
                        Self::from_expr(&call.args[0])
                    }
                    _ => Self::raw(expr),
                }
            }
            Expr::MethodCall(call) => match call.method.to_string().as_str() {
                "to_string" | "to_owned" | "into" | "to_vec" | "clone" | "collect"
                | "into_iter" | "iter" => {
                    let inner = Self::from_expr(&call.receiver);
                    if inner.is_raw() {
                        Self::raw(expr)
                    } else {
                        inner
                    }
                }
                _ => Self::raw(expr),
            },
            Expr::Struct(expr_struct) => Literal::Map(
                expr_struct
                    .fields
                    .iter()
                    .filter_map(|field| match &field.member {
                        syn::Member::Named(ident) => {
                            Some((ident.to_string(), Self::from_expr(&field.expr)))
                        }
                        syn::Member::Unnamed(_) => None,
                    })
                    .collect(),
            ),
            _ => Self::raw(expr),
        }
    }

    pub fn from_lit(lit: &Lit) -> Literal {
        match lit {
            Lit::Str(s) => Literal::Str(s.value()),
            Lit::Char(c) => Literal::Str(c.value().to_string()),
            Lit::Bool(b) => Literal::Bool(b.value),
            Lit::Int(i) => i
                .base10_parse::<i64>()
                .map(Literal::Int)
                .unwrap_or_else(|_| Literal::Raw(i.to_string())),
            Lit::Float(f) => f
                .base10_parse::<f64>()
                .map(Literal::Float)
                .unwrap_or_else(|_| Literal::Raw(f.to_string())),
            other => Literal::Raw(other.to_token_stream().to_string()),
        }
    }

    fn raw(expr: &Expr) -> Literal {
        Literal::Raw(expr.to_token_stream().to_string())
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Literal::Raw(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::Str(s) | Literal::Raw(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Literal::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Render scalars as text; used where annotation arguments are read as names
    pub fn to_text(&self) -> Option<String> {
        match self {
            Literal::Str(s) | Literal::Raw(s) => Some(s.clone()),
            Literal::Int(i) => Some(i.to_string()),
            Literal::Float(f) => Some(f.to_string()),
            Literal::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::from(*i),
            Literal::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Literal::Str(s) | Literal::Raw(s) => Value::String(s.clone()),
            Literal::Array(items) => Value::Array(items.iter().map(Literal::to_json).collect()),
            Literal::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(code: &str) -> Literal {
        Literal::from_expr(&syn::parse_str::<Expr>(code).unwrap())
    }

    #[test]
    fn test_primitive_literals() {
        assert_eq!(lit("42"), Literal::Int(42));
        assert_eq!(lit("-3"), Literal::Int(-3));
        assert_eq!(lit("1.5"), Literal::Float(1.5));
        assert_eq!(lit("true"), Literal::Bool(true));
        assert_eq!(lit("\"abc\""), Literal::Str("abc".to_string()));
        assert_eq!(lit("None"), Literal::Null);
    }

    #[test]
    fn test_wrapped_literals() {
        assert_eq!(lit("\"abc\".to_string()"), Literal::Str("abc".to_string()));
        assert_eq!(lit("String::from(\"x\")"), Literal::Str("x".to_string()));
        assert_eq!(lit("Some(10)"), Literal::Int(10));
        assert_eq!(
            lit("vec![1, 2]"),
            Literal::Array(vec![Literal::Int(1), Literal::Int(2)])
        );
    }

    #[test]
    fn test_tuple_pairs() {
        let value = lit(r#"[("name", "required"), ("age", "integer")]"#);
        match value {
            Literal::Array(items) => {
                assert_eq!(items.len(), 2);
                assert_eq!(
                    items[0],
                    Literal::Array(vec![
                        Literal::Str("name".to_string()),
                        Literal::Str("required".to_string())
                    ])
                );
            }
            other => panic!("Expected array, got {:?}", other),
        }
    }

    #[test]
    fn test_unrecognized_falls_back_to_raw() {
        assert!(lit("compute(1, 2)").is_raw());
        assert!(lit("a + b").is_raw());
    }

    #[test]
    fn test_to_json() {
        let value = Literal::Map(vec![
            ("page".to_string(), Literal::Int(1)),
            ("tags".to_string(), Literal::Array(vec![Literal::Str("a".to_string())])),
        ]);
        assert_eq!(value.to_json(), serde_json::json!({"page": 1, "tags": ["a"]}));
    }
}
