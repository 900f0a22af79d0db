use crate::declaration::Literal;
use crate::type_ref::{ScalarKind, TypeRef};
use log::debug;
use quote::ToTokens;
use serde::{Deserialize, Serialize};
use syn::{GenericArgument, PathArguments, Type};

/// Type inference engine.
///
/// Unifies the three type signals a declaration can carry, in precedence order:
///
/// 1. the explicit Rust type, when it maps to a TypeRef without `unknown` in it
/// 2. a documentation tag type (`@var`, `@param`, `@return`)
/// 3. the kind of a default-value literal
/// 4. `unknown`
///
/// When an unambiguous explicit type and a documentation tag disagree, the explicit
/// type wins and the disagreement is reported back in [`Inferred::conflict`].
pub struct TypeResolver;

/// Where an inferred type came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeSource {
    Explicit,
    DocTag,
    Default,
    Unknown,
}

/// Signals available for one declaration
#[derive(Debug, Clone, Copy, Default)]
pub struct InferenceInput<'a> {
    pub explicit: Option<&'a str>,
    pub doc_hint: Option<&'a str>,
    pub default: Option<&'a Literal>,
    /// Generic parameters in scope; they never resolve to a concrete type
    pub generics: &'a [String],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Inferred {
    pub ty: TypeRef,
    pub source: TypeSource,
    /// Human-readable description of an explicit/doc disagreement
    pub conflict: Option<String>,
}

impl TypeResolver {
    /// Resolve one TypeRef from all available signals
    pub fn infer(input: InferenceInput<'_>) -> Inferred {
        let explicit = input
            .explicit
            .map(|text| Self::from_rust_type_str(text, input.generics));
        let documented = input
            .doc_hint
            .map(Self::parse_doc_type)
            .filter(|ty| !ty.is_unknown());

        if let Some(ty) = explicit.as_ref().filter(|ty| !ty.contains_unknown()) {
            let conflict = documented
                .as_ref()
                .filter(|doc| !Self::compatible(ty, doc))
                .map(|doc| {
                    format!(
                        "explicit type `{}` conflicts with documented type `{}`; using `{}`",
                        ty, doc, ty
                    )
                });
            return Inferred {
                ty: ty.clone(),
                source: TypeSource::Explicit,
                conflict,
            };
        }

        // The explicit type is absent or ambiguous; its nullability still holds
        let explicit_nullable = explicit.as_ref().is_some_and(TypeRef::is_nullable);
        let keep_nullability = |ty: TypeRef| {
            if explicit_nullable {
                TypeRef::nullable(ty)
            } else {
                ty
            }
        };

        if let Some(doc) = documented {
            return Inferred {
                ty: keep_nullability(doc),
                source: TypeSource::DocTag,
                conflict: None,
            };
        }

        if let Some(ty) = input
            .default
            .map(Self::from_literal)
            .filter(|ty| !ty.strip_nullable().is_unknown())
        {
            return Inferred {
                ty: keep_nullability(ty),
                source: TypeSource::Default,
                conflict: None,
            };
        }

        match explicit {
            // Partially known (e.g. `Vec<T>` or `Option<Value>`) still beats nothing
            Some(ty) if !ty.is_unknown() => Inferred {
                ty,
                source: TypeSource::Explicit,
                conflict: None,
            },
            _ => Inferred {
                ty: TypeRef::Unknown,
                source: TypeSource::Unknown,
                conflict: None,
            },
        }
    }

    /// Parse Rust type text and map it; unparseable text is `unknown`
    pub fn from_rust_type_str(text: &str, generics: &[String]) -> TypeRef {
        match syn::parse_str::<Type>(text) {
            Ok(ty) => Self::from_rust_type(&ty, generics),
            Err(e) => {
                debug!("Could not parse type `{}`: {}", text, e);
                TypeRef::Unknown
            }
        }
    }

    /// Map a Rust type to a TypeRef
    pub fn from_rust_type(ty: &Type, generics: &[String]) -> TypeRef {
        match ty {
            Type::Path(type_path) => {
                let Some(segment) = type_path.path.segments.last() else {
                    return TypeRef::Unknown;
                };
                let name = segment.ident.to_string();

                if type_path.qself.is_none()
                    && type_path.path.segments.len() == 1
                    && generics.iter().any(|g| *g == name)
                {
                    return TypeRef::Unknown;
                }

                let first_arg = || {
                    first_type_argument(&segment.arguments)
                        .map(|inner| Self::from_rust_type(inner, generics))
                        .unwrap_or(TypeRef::Unknown)
                };

                match name.as_str() {
                    "i8" | "i16" | "i32" | "u8" | "u16" | "u32" => {
                        TypeRef::scalar(ScalarKind::Int32)
                    }
                    "i64" | "u64" | "i128" | "u128" | "isize" | "usize" => {
                        TypeRef::scalar(ScalarKind::Int64)
                    }
                    "f32" => TypeRef::scalar(ScalarKind::Float),
                    "f64" => TypeRef::scalar(ScalarKind::Double),
                    "Decimal" | "BigDecimal" => TypeRef::scalar(ScalarKind::Number),
                    "bool" => TypeRef::scalar(ScalarKind::Boolean),
                    "String" | "str" | "char" | "NaiveTime" | "Url" => {
                        TypeRef::scalar(ScalarKind::String)
                    }
                    "Uuid" => TypeRef::scalar(ScalarKind::Uuid),
                    "DateTime" | "NaiveDateTime" | "OffsetDateTime" | "PrimitiveDateTime"
                    | "SystemTime" | "Timestamp" => TypeRef::scalar(ScalarKind::DateTime),
                    "NaiveDate" | "Date" => TypeRef::scalar(ScalarKind::Date),
                    "Bytes" | "ByteBuf" => TypeRef::scalar(ScalarKind::Binary),
                    "Option" => TypeRef::nullable(first_arg()),
                    "Vec" | "VecDeque" | "HashSet" | "BTreeSet" | "IndexSet" | "LinkedList" => {
                        TypeRef::array(first_arg())
                    }
                    "Box" | "Arc" | "Rc" | "Cow" | "Json" | "Form" | "Data" | "Cell"
                    | "RefCell" | "Result" => first_arg(),
                    "HashMap" | "BTreeMap" | "IndexMap" | "Map" | "Value" | "JsonValue"
                    | "Self" => TypeRef::Unknown,
                    _ => TypeRef::object(name),
                }
            }
            Type::Reference(reference) => Self::from_rust_type(&reference.elem, generics),
            Type::Slice(slice) if is_u8(&slice.elem) => TypeRef::scalar(ScalarKind::Binary),
            Type::Slice(slice) => TypeRef::array(Self::from_rust_type(&slice.elem, generics)),
            Type::Array(array) => TypeRef::array(Self::from_rust_type(&array.elem, generics)),
            Type::Paren(paren) => Self::from_rust_type(&paren.elem, generics),
            Type::Group(group) => Self::from_rust_type(&group.elem, generics),
            Type::Tuple(tuple) => {
                // `(StatusCode, Json<T>)` responds with `T`
                if let Some(json) = tuple
                    .elems
                    .iter()
                    .find(|elem| matches!(wrapper_of(elem), Some((name, _)) if name == "Json"))
                {
                    return Self::from_rust_type(json, generics);
                }
                match tuple.elems.len() {
                    1 => Self::from_rust_type(&tuple.elems[0], generics),
                    _ => TypeRef::Unknown,
                }
            }
            _ => TypeRef::Unknown,
        }
    }

    /// Parse a documentation type hint (`int|null`, `?string`, `User[]`, `array<int>`)
    pub fn parse_doc_type(text: &str) -> TypeRef {
        let tokens = tokenize_doc_type(text);
        let mut parser = DocTypeParser { tokens, pos: 0 };
        let ty = parser.parse_union();
        if parser.pos < parser.tokens.len() {
            debug!("Trailing input in doc type `{}`", text);
        }
        ty
    }

    /// Runtime kind of a default-value literal
    pub fn from_literal(literal: &Literal) -> TypeRef {
        match literal {
            Literal::Null => TypeRef::nullable(TypeRef::Unknown),
            Literal::Bool(_) => TypeRef::scalar(ScalarKind::Boolean),
            Literal::Int(_) => TypeRef::scalar(ScalarKind::Integer),
            Literal::Float(_) => TypeRef::scalar(ScalarKind::Number),
            Literal::Str(_) => TypeRef::scalar(ScalarKind::String),
            Literal::Array(items) if items.is_empty() => TypeRef::array(TypeRef::Unknown),
            Literal::Array(items) => {
                TypeRef::array(TypeRef::union(items.iter().map(Self::from_literal)))
            }
            Literal::Map(_) | Literal::Raw(_) => TypeRef::Unknown,
        }
    }

    /// Structural compatibility used for conflict detection; nullability is ignored
    pub fn compatible(a: &TypeRef, b: &TypeRef) -> bool {
        let (a, b) = (a.strip_nullable(), b.strip_nullable());
        match (a, b) {
            (TypeRef::Unknown, _) | (_, TypeRef::Unknown) => true,
            (TypeRef::Scalar(x), TypeRef::Scalar(y)) => {
                let (tx, ty) = (x.schema_type(), y.schema_type());
                // every integer is a number
                tx == ty
                    || (tx == "integer" && *y == ScalarKind::Number)
                    || (ty == "integer" && *x == ScalarKind::Number)
            }
            (TypeRef::Array(x), TypeRef::Array(y)) => Self::compatible(x, y),
            (TypeRef::Object(x), TypeRef::Object(y)) => x == y,
            (TypeRef::Union(members), other) => members.iter().any(|m| Self::compatible(m, other)),
            (other, TypeRef::Union(members)) => members.iter().any(|m| Self::compatible(other, m)),
            _ => false,
        }
    }
}

/// Parse type text into a syn type
pub fn parse_type(text: &str) -> Option<Type> {
    syn::parse_str::<Type>(text).ok()
}

/// For `Wrapper<Inner>` (any path prefix), return `("Wrapper", Inner)`
pub fn wrapper_of(ty: &Type) -> Option<(String, &Type)> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    let inner = first_type_argument(&segment.arguments)?;
    Some((segment.ident.to_string(), inner))
}

/// Last path segment of a type, without generics
pub fn type_name(ty: &Type) -> Option<String> {
    match ty {
        Type::Path(type_path) => type_path.path.segments.last().map(|s| s.ident.to_string()),
        Type::Reference(reference) => type_name(&reference.elem),
        _ => None,
    }
}

/// Token text of a type with the token-stream spacing removed (`Option<User>`)
pub fn type_text(ty: &Type) -> String {
    let spaced = ty.to_token_stream().to_string();
    let chars: Vec<char> = spaced.chars().collect();
    let word = |c: char| c.is_alphanumeric() || c == '_';
    let mut out = String::with_capacity(spaced.len());
    for (i, c) in chars.iter().enumerate() {
        if c.is_whitespace() {
            let keep = matches!(
                (out.chars().last(), chars.get(i + 1)),
                (Some(prev), Some(next)) if word(prev) && word(*next)
            );
            if keep {
                out.push(' ');
            }
            continue;
        }
        out.push(*c);
    }
    out
}

fn first_type_argument(arguments: &PathArguments) -> Option<&Type> {
    match arguments {
        PathArguments::AngleBracketed(args) => args.args.iter().find_map(|arg| match arg {
            GenericArgument::Type(ty) => Some(ty),
            _ => None,
        }),
        _ => None,
    }
}

fn is_u8(ty: &Type) -> bool {
    matches!(ty, Type::Path(p) if p.path.is_ident("u8"))
}

#[derive(Debug, Clone, PartialEq)]
enum DocToken {
    Ident(String),
    Pipe,
    Question,
    Brackets,
    LAngle,
    RAngle,
    LParen,
    RParen,
    Comma,
}

fn tokenize_doc_type(text: &str) -> Vec<DocToken> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            '|' => {
                tokens.push(DocToken::Pipe);
                chars.next();
            }
            '?' => {
                tokens.push(DocToken::Question);
                chars.next();
            }
            '[' => {
                chars.next();
                if chars.peek() == Some(&']') {
                    chars.next();
                }
                tokens.push(DocToken::Brackets);
            }
            '<' => {
                tokens.push(DocToken::LAngle);
                chars.next();
            }
            '>' => {
                tokens.push(DocToken::RAngle);
                chars.next();
            }
            '(' => {
                tokens.push(DocToken::LParen);
                chars.next();
            }
            ')' => {
                tokens.push(DocToken::RParen);
                chars.next();
            }
            ',' => {
                tokens.push(DocToken::Comma);
                chars.next();
            }
            c if c.is_alphanumeric() || c == '_' || c == ':' || c == '\\' || c == '-' || c == '.' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == ':' || c == '\\' || c == '-' || c == '.'
                    {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(DocToken::Ident(ident));
            }
            _ => {
                chars.next();
            }
        }
    }
    tokens
}

/// Recursive-descent parser over doc type tokens.
///
/// `null` members are tracked separately from the union so that `int|null` becomes
/// `nullable(int)` instead of a union containing an unknown member.
struct DocTypeParser {
    tokens: Vec<DocToken>,
    pos: usize,
}

enum DocTerm {
    Null,
    Type(TypeRef),
}

impl DocTypeParser {
    fn peek(&self) -> Option<&DocToken> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, token: &DocToken) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_union(&mut self) -> TypeRef {
        let mut members = Vec::new();
        let mut nullable = false;
        loop {
            match self.parse_term() {
                Some(DocTerm::Null) => nullable = true,
                Some(DocTerm::Type(ty)) => members.push(ty),
                None => break,
            }
            if !self.eat(&DocToken::Pipe) {
                break;
            }
        }
        let base = if members.is_empty() {
            TypeRef::Unknown
        } else {
            TypeRef::union(members)
        };
        if nullable {
            TypeRef::nullable(base)
        } else {
            base
        }
    }

    fn parse_term(&mut self) -> Option<DocTerm> {
        if self.eat(&DocToken::Question) {
            return match self.parse_term()? {
                DocTerm::Null => Some(DocTerm::Null),
                DocTerm::Type(ty) => Some(DocTerm::Type(TypeRef::nullable(ty))),
            };
        }

        let mut term = if self.eat(&DocToken::LParen) {
            let inner = self.parse_union();
            self.eat(&DocToken::RParen);
            DocTerm::Type(inner)
        } else {
            let DocToken::Ident(name) = self.peek()?.clone() else {
                return None;
            };
            self.pos += 1;
            let mut args = Vec::new();
            if self.eat(&DocToken::LAngle) {
                loop {
                    args.push(self.parse_union());
                    if !self.eat(&DocToken::Comma) {
                        break;
                    }
                }
                self.eat(&DocToken::RAngle);
            }
            doc_base_type(&name, args)
        };

        while self.eat(&DocToken::Brackets) {
            term = match term {
                DocTerm::Null => DocTerm::Type(TypeRef::array(TypeRef::Unknown)),
                DocTerm::Type(ty) => DocTerm::Type(TypeRef::array(ty)),
            };
        }
        Some(term)
    }
}

fn doc_base_type(name: &str, mut args: Vec<TypeRef>) -> DocTerm {
    let last = name
        .rsplit(|c: char| c == '\\' || c == '.')
        .next()
        .unwrap_or(name);
    let last = last.rsplit("::").next().unwrap_or(last);
    let lower = last.to_ascii_lowercase();
    let first_arg = |args: &mut Vec<TypeRef>| {
        if args.is_empty() {
            TypeRef::Unknown
        } else {
            args.remove(0)
        }
    };

    let ty = match lower.as_str() {
        "null" | "none" | "void" => return DocTerm::Null,
        "int" | "integer" => TypeRef::scalar(ScalarKind::Integer),
        "i8" | "i16" | "i32" | "u8" | "u16" | "u32" | "int32" => TypeRef::scalar(ScalarKind::Int32),
        "i64" | "u64" | "isize" | "usize" | "long" | "int64" => TypeRef::scalar(ScalarKind::Int64),
        "float" | "f32" => TypeRef::scalar(ScalarKind::Float),
        "double" | "f64" => TypeRef::scalar(ScalarKind::Double),
        "number" | "numeric" | "decimal" => TypeRef::scalar(ScalarKind::Number),
        "string" | "str" | "char" | "text" => TypeRef::scalar(ScalarKind::String),
        "bool" | "boolean" | "true" | "false" => TypeRef::scalar(ScalarKind::Boolean),
        "date" => TypeRef::scalar(ScalarKind::Date),
        "datetime" | "date-time" | "timestamp" => TypeRef::scalar(ScalarKind::DateTime),
        "uuid" => TypeRef::scalar(ScalarKind::Uuid),
        "binary" | "file" | "bytes" => TypeRef::scalar(ScalarKind::Binary),
        "array" | "list" | "vec" | "iterable" => match args.len() {
            // `array<K, V>` is keyed: the value type is what matters
            2 => TypeRef::array(args.remove(1)),
            _ => TypeRef::array(first_arg(&mut args)),
        },
        "option" => TypeRef::nullable(first_arg(&mut args)),
        "mixed" | "any" | "object" | "value" | "map" | "hashmap" | "self" | "static" => {
            TypeRef::Unknown
        }
        _ if last.chars().next().is_some_and(char::is_uppercase) => TypeRef::object(last),
        _ => TypeRef::Unknown,
    };
    DocTerm::Type(ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rust(text: &str) -> TypeRef {
        TypeResolver::from_rust_type_str(text, &[])
    }

    #[test]
    fn test_rust_primitives() {
        assert_eq!(rust("i32"), TypeRef::scalar(ScalarKind::Int32));
        assert_eq!(rust("u64"), TypeRef::scalar(ScalarKind::Int64));
        assert_eq!(rust("f64"), TypeRef::scalar(ScalarKind::Double));
        assert_eq!(rust("bool"), TypeRef::scalar(ScalarKind::Boolean));
        assert_eq!(rust("&'static str"), TypeRef::scalar(ScalarKind::String));
        assert_eq!(rust("chrono::DateTime<Utc>"), TypeRef::scalar(ScalarKind::DateTime));
        assert_eq!(rust("uuid::Uuid"), TypeRef::scalar(ScalarKind::Uuid));
    }

    #[test]
    fn test_rust_containers() {
        assert_eq!(
            rust("Option<Vec<User>>"),
            TypeRef::nullable(TypeRef::array(TypeRef::object("User")))
        );
        assert_eq!(rust("Arc<Box<String>>"), TypeRef::scalar(ScalarKind::String));
        assert_eq!(
            rust("Result<Json<Vec<Item>>, AppError>"),
            TypeRef::array(TypeRef::object("Item"))
        );
        assert_eq!(rust("(StatusCode, Json<User>)"), TypeRef::object("User"));
        assert_eq!(rust("&[u8]"), TypeRef::scalar(ScalarKind::Binary));
    }

    #[test]
    fn test_rust_ambiguous_types() {
        assert_eq!(rust("serde_json::Value"), TypeRef::Unknown);
        assert_eq!(rust("HashMap<String, i32>"), TypeRef::Unknown);
        assert_eq!(rust("impl IntoResponse"), TypeRef::Unknown);
        assert_eq!(rust("()"), TypeRef::Unknown);
        assert_eq!(
            TypeResolver::from_rust_type_str("Vec<T>", &["T".to_string()]),
            TypeRef::array(TypeRef::Unknown)
        );
    }

    #[test]
    fn test_doc_type_nullable_normalization() {
        assert_eq!(
            TypeResolver::parse_doc_type("int|null"),
            TypeRef::nullable(TypeRef::scalar(ScalarKind::Integer))
        );
        assert_eq!(
            TypeResolver::parse_doc_type("?string"),
            TypeRef::nullable(TypeRef::scalar(ScalarKind::String))
        );
        assert_eq!(
            TypeResolver::parse_doc_type("null|int|null"),
            TypeRef::nullable(TypeRef::scalar(ScalarKind::Integer))
        );
    }

    #[test]
    fn test_doc_type_arrays_and_unions() {
        assert_eq!(
            TypeResolver::parse_doc_type("User[]"),
            TypeRef::array(TypeRef::object("User"))
        );
        assert_eq!(
            TypeResolver::parse_doc_type("array<int>"),
            TypeRef::array(TypeRef::scalar(ScalarKind::Integer))
        );
        assert_eq!(
            TypeResolver::parse_doc_type("(int|string)[]"),
            TypeRef::array(TypeRef::union(vec![
                TypeRef::scalar(ScalarKind::Integer),
                TypeRef::scalar(ScalarKind::String),
            ]))
        );
        assert_eq!(
            TypeResolver::parse_doc_type("string|int|string"),
            TypeResolver::parse_doc_type("int|string")
        );
        assert_eq!(
            TypeResolver::parse_doc_type("\\App\\Models\\User"),
            TypeRef::object("User")
        );
    }

    #[test]
    fn test_explicit_wins_with_conflict() {
        let inferred = TypeResolver::infer(InferenceInput {
            explicit: Some("i32"),
            doc_hint: Some("string"),
            ..Default::default()
        });
        assert_eq!(inferred.ty, TypeRef::scalar(ScalarKind::Int32));
        assert_eq!(inferred.source, TypeSource::Explicit);
        assert!(inferred.conflict.is_some());
    }

    #[test]
    fn test_compatible_doc_hint_is_not_a_conflict() {
        let inferred = TypeResolver::infer(InferenceInput {
            explicit: Some("Option<i64>"),
            doc_hint: Some("int"),
            ..Default::default()
        });
        assert_eq!(
            inferred.ty,
            TypeRef::nullable(TypeRef::scalar(ScalarKind::Int64))
        );
        assert!(inferred.conflict.is_none());
    }

    #[test]
    fn test_doc_tag_used_when_explicit_ambiguous() {
        let inferred = TypeResolver::infer(InferenceInput {
            explicit: Some("Option<serde_json::Value>"),
            doc_hint: Some("User[]"),
            ..Default::default()
        });
        assert_eq!(
            inferred.ty,
            TypeRef::nullable(TypeRef::array(TypeRef::object("User")))
        );
        assert_eq!(inferred.source, TypeSource::DocTag);
    }

    #[test]
    fn test_default_literal_fallback() {
        let default = Literal::Int(20);
        let inferred = TypeResolver::infer(InferenceInput {
            default: Some(&default),
            ..Default::default()
        });
        assert_eq!(inferred.ty, TypeRef::scalar(ScalarKind::Integer));
        assert_eq!(inferred.source, TypeSource::Default);

        let inferred = TypeResolver::infer(InferenceInput::default());
        assert_eq!(inferred.ty, TypeRef::Unknown);
        assert_eq!(inferred.source, TypeSource::Unknown);
    }

    #[test]
    fn test_partial_explicit_beats_unknown() {
        let inferred = TypeResolver::infer(InferenceInput {
            explicit: Some("Vec<serde_json::Value>"),
            ..Default::default()
        });
        assert_eq!(inferred.ty, TypeRef::array(TypeRef::Unknown));
        assert_eq!(inferred.source, TypeSource::Explicit);
    }

    #[test]
    fn test_compatibility() {
        let int = TypeRef::scalar(ScalarKind::Int32);
        assert!(TypeResolver::compatible(&int, &TypeRef::scalar(ScalarKind::Integer)));
        assert!(TypeResolver::compatible(&int, &TypeRef::scalar(ScalarKind::Number)));
        assert!(!TypeResolver::compatible(&int, &TypeRef::scalar(ScalarKind::String)));
        assert!(TypeResolver::compatible(
            &int,
            &TypeRef::union(vec![int.clone(), TypeRef::scalar(ScalarKind::String)])
        ));
        assert!(!TypeResolver::compatible(
            &TypeRef::object("A"),
            &TypeRef::object("B")
        ));
    }
}
