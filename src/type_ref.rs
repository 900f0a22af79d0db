//! Canonical type representation shared by inference, models and schema generation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Scalar kinds, each mapping to an OpenAPI `type`/`format` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    Integer,
    Int32,
    Int64,
    Number,
    Float,
    Double,
    String,
    Boolean,
    Date,
    DateTime,
    Uuid,
    Binary,
}

impl ScalarKind {
    pub fn schema_type(&self) -> &'static str {
        match self {
            ScalarKind::Integer | ScalarKind::Int32 | ScalarKind::Int64 => "integer",
            ScalarKind::Number | ScalarKind::Float | ScalarKind::Double => "number",
            ScalarKind::Boolean => "boolean",
            ScalarKind::String
            | ScalarKind::Date
            | ScalarKind::DateTime
            | ScalarKind::Uuid
            | ScalarKind::Binary => "string",
        }
    }

    pub fn format(&self) -> Option<&'static str> {
        match self {
            ScalarKind::Int32 => Some("int32"),
            ScalarKind::Int64 => Some("int64"),
            ScalarKind::Float => Some("float"),
            ScalarKind::Double => Some("double"),
            ScalarKind::Date => Some("date"),
            ScalarKind::DateTime => Some("date-time"),
            ScalarKind::Uuid => Some("uuid"),
            ScalarKind::Binary => Some("binary"),
            _ => None,
        }
    }
}

/// An inferred type.
///
/// `Union` members are kept in a `BTreeSet` so equal unions compare and serialize
/// identically regardless of the order their members were discovered in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TypeRef {
    Scalar(ScalarKind),
    Array(Box<TypeRef>),
    /// Named model reference, resolved against the model registry lazily
    Object(String),
    Union(BTreeSet<TypeRef>),
    Nullable(Box<TypeRef>),
    Unknown,
}

impl TypeRef {
    pub fn scalar(kind: ScalarKind) -> Self {
        TypeRef::Scalar(kind)
    }

    pub fn array(element: TypeRef) -> Self {
        TypeRef::Array(Box::new(element))
    }

    pub fn object(name: impl Into<String>) -> Self {
        TypeRef::Object(name.into())
    }

    /// Wrap in `Nullable` unless already nullable; `Nullable(Unknown)` stays as is
    pub fn nullable(inner: TypeRef) -> Self {
        match inner {
            TypeRef::Nullable(_) => inner,
            other => TypeRef::Nullable(Box::new(other)),
        }
    }

    /// Build a normalized union from arbitrary members.
    ///
    /// Nested unions are flattened, nullable members are unwrapped and turn the whole
    /// union nullable, duplicates collapse, and a single remaining member is returned
    /// bare. `Unknown` stays a member: it is never silently absorbed by a concrete type.
    pub fn union<I: IntoIterator<Item = TypeRef>>(members: I) -> Self {
        let mut set = BTreeSet::new();
        let mut nullable = false;
        for member in members {
            Self::collect_member(member, &mut set, &mut nullable);
        }
        let base = match set.len() {
            0 => None,
            1 => set.into_iter().next(),
            _ => Some(TypeRef::Union(set)),
        };
        match (base, nullable) {
            (Some(ty), true) => TypeRef::nullable(ty),
            (Some(ty), false) => ty,
            // `null` alone: nothing is known about the value besides nullability
            (None, _) => TypeRef::nullable(TypeRef::Unknown),
        }
    }

    fn collect_member(member: TypeRef, set: &mut BTreeSet<TypeRef>, nullable: &mut bool) {
        match member {
            TypeRef::Union(inner) => {
                for m in inner {
                    Self::collect_member(m, set, nullable);
                }
            }
            TypeRef::Nullable(inner) => {
                *nullable = true;
                Self::collect_member(*inner, set, nullable);
            }
            other => {
                set.insert(other);
            }
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, TypeRef::Unknown)
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, TypeRef::Nullable(_))
    }

    /// Whether `Unknown` appears anywhere inside this type
    pub fn contains_unknown(&self) -> bool {
        match self {
            TypeRef::Unknown => true,
            TypeRef::Scalar(_) | TypeRef::Object(_) => false,
            TypeRef::Array(inner) | TypeRef::Nullable(inner) => inner.contains_unknown(),
            TypeRef::Union(members) => members.iter().any(TypeRef::contains_unknown),
        }
    }

    pub fn strip_nullable(&self) -> &TypeRef {
        match self {
            TypeRef::Nullable(inner) => inner.strip_nullable(),
            other => other,
        }
    }

    /// Names of every model this type points at, in sorted order
    pub fn referenced_models(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_models(&mut names);
        names
    }

    fn collect_models(&self, names: &mut BTreeSet<String>) {
        match self {
            TypeRef::Object(name) => {
                names.insert(name.clone());
            }
            TypeRef::Array(inner) | TypeRef::Nullable(inner) => inner.collect_models(names),
            TypeRef::Union(members) => members.iter().for_each(|m| m.collect_models(names)),
            TypeRef::Scalar(_) | TypeRef::Unknown => {}
        }
    }

    /// The OpenAPI base `type` this TypeRef renders as, if it has a single one
    pub fn schema_type(&self) -> Option<&'static str> {
        match self.strip_nullable() {
            TypeRef::Scalar(kind) => Some(kind.schema_type()),
            TypeRef::Array(_) => Some("array"),
            TypeRef::Object(_) => Some("object"),
            TypeRef::Union(_) | TypeRef::Unknown | TypeRef::Nullable(_) => None,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Scalar(kind) => write!(f, "{:?}", kind),
            TypeRef::Array(inner) => write!(f, "{}[]", inner),
            TypeRef::Object(name) => f.write_str(name),
            TypeRef::Union(members) => {
                let parts: Vec<String> = members.iter().map(|m| m.to_string()).collect();
                f.write_str(&parts.join("|"))
            }
            TypeRef::Nullable(inner) => write!(f, "?{}", inner),
            TypeRef::Unknown => f.write_str("unknown"),
        }
    }
}
