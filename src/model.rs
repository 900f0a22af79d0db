//! Data models and the model registry.
//!
//! Models are stored in an arena ([`ModelRegistry`]) and address each other by
//! [`ModelId`] or by name, never by direct reference, so cyclic relation graphs need
//! no special ownership handling.

use crate::annotation::{Annotation, KnownAnnotation, RelationSpec, SerdeDefault};
use crate::declaration::{Declaration, DeclarationKind, Literal};
use crate::diagnostics::{Diagnostic, DiagnosticSink, Severity};
use crate::docblock::{DocBlock, DocTag};
use crate::relation::{Relation, RelationKind};
use crate::type_ref::TypeRef;
use crate::type_resolver::{InferenceInput, TypeResolver};
use crate::validation::{Constraint, RuleSet};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Serialized property name (after serde renames)
    pub name: String,
    /// Name as written in the source
    pub rust_name: String,
    pub ty: TypeRef,
    pub required: bool,
    pub description: Option<String>,
    pub default: Option<Literal>,
    pub example: Option<Literal>,
    pub deprecated: bool,
    /// `#[serde(flatten)]`: the referenced model's fields are inlined
    pub flatten: bool,
    pub constraints: Vec<Constraint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    pub description: Option<String>,
    pub fields: Vec<Field>,
    pub relations: Vec<Relation>,
    /// Set for enums: serialized variant names
    pub enum_values: Option<Vec<String>>,
    pub path: PathBuf,
    pub deprecated: bool,
}

impl Model {
    pub fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            description: None,
            fields: Vec::new(),
            relations: Vec::new(),
            enum_values: None,
            path,
            deprecated: false,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_enum(&self) -> bool {
        self.enum_values.is_some()
    }
}

/// Stable index of a model in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModelId(usize);

/// Arena of every model discovered in a build
#[derive(Debug, Default, Clone)]
pub struct ModelRegistry {
    models: Vec<Model>,
    index: BTreeMap<String, ModelId>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model. A duplicate name keeps the first registration.
    pub fn insert(&mut self, model: Model, sink: &mut dyn DiagnosticSink) -> Option<ModelId> {
        if let Some(existing) = self.index.get(&model.name) {
            let first = &self.models[existing.0];
            sink.emit(
                Diagnostic::resolution(format!(
                    "duplicate model `{}`; keeping the one from {}",
                    model.name,
                    first.path.display()
                ))
                .at(&model.path)
                .for_declaration(model.name.clone()),
            );
            return None;
        }
        let id = ModelId(self.models.len());
        self.index.insert(model.name.clone(), id);
        self.models.push(model);
        Some(id)
    }

    pub fn get(&self, id: ModelId) -> &Model {
        &self.models[id.0]
    }

    pub fn get_mut(&mut self, id: ModelId) -> &mut Model {
        &mut self.models[id.0]
    }

    pub fn id_of(&self, name: &str) -> Option<ModelId> {
        self.index.get(name).copied()
    }

    pub fn by_name(&self, name: &str) -> Option<&Model> {
        self.id_of(name).map(|id| self.get(id))
    }

    pub fn ids(&self) -> impl Iterator<Item = ModelId> {
        (0..self.models.len()).map(ModelId)
    }

    /// Models in name order
    pub fn iter(&self) -> impl Iterator<Item = (ModelId, &Model)> {
        self.index.values().map(move |id| (*id, &self.models[id.0]))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Fold validation rule-sets (keyed by model name) into model fields.
    ///
    /// A `required` rule forces the field required; a `nullable` rule makes its type
    /// nullable. All constraints are attached for schema output.
    pub fn apply_rule_sets(&mut self, rule_sets: &BTreeMap<String, RuleSet>) {
        for model in &mut self.models {
            let Some(set) = rule_sets.get(&model.name) else {
                continue;
            };
            for field in &mut model.fields {
                let Some(rule) = set.get(&field.rust_name).or_else(|| set.get(&field.name)) else {
                    continue;
                };
                for constraint in &rule.constraints {
                    if !field.constraints.contains(constraint) {
                        field.constraints.push(constraint.clone());
                    }
                }
                if rule.is_nullable() {
                    field.ty = TypeRef::nullable(field.ty.clone());
                    field.required = false;
                }
                if rule.is_required() {
                    field.required = true;
                }
            }
            debug!("Applied {} rules to model {}", set.rules.len(), model.name);
        }
    }
}

/// Turns struct and enum declarations into [`Model`]s
pub struct ModelAnalyzer<'a> {
    path: &'a Path,
    /// Literal results of functions in the same file, for `#[serde(default = "f")]`
    function_defaults: &'a HashMap<String, Literal>,
}

impl<'a> ModelAnalyzer<'a> {
    pub fn new(path: &'a Path, function_defaults: &'a HashMap<String, Literal>) -> Self {
        Self {
            path,
            function_defaults,
        }
    }

    pub fn analyze(&self, decl: &Declaration, sink: &mut dyn DiagnosticSink) -> Option<Model> {
        match decl.kind {
            // tuple and unit structs keep their shape in `type_decl` and are not models
            DeclarationKind::Struct if decl.type_decl.is_none() => {
                Some(self.analyze_struct(decl, sink))
            }
            DeclarationKind::Enum => Some(self.analyze_enum(decl)),
            _ => None,
        }
    }

    fn analyze_struct(&self, decl: &Declaration, sink: &mut dyn DiagnosticSink) -> Model {
        debug!("Analyzing model {}", decl.name);
        let mut model = Model::new(decl.name.clone(), self.path.to_path_buf());
        let docs = decl.docs.as_deref().map(DocBlock::parse).unwrap_or_default();
        model.description = docs.full_description();
        model.deprecated = docs.is_deprecated();

        let mut rename_all = None;
        for ann in Annotation::parse_all(&decl.annotations) {
            match ann.classify() {
                KnownAnnotation::Serde { rename_all: Some(rule), .. } => rename_all = Some(rule),
                KnownAnnotation::Deprecated(_) => model.deprecated = true,
                KnownAnnotation::Relation(specs) => {
                    for spec in specs {
                        match spec.target {
                            Some(target) => model.relations.push(
                                Relation::new(spec.kind, target).with_foreign_key(spec.foreign_key),
                            ),
                            None => sink.emit(
                                Diagnostic::resolution(format!(
                                    "relation {:?} on `{}` has no target",
                                    spec.kind, decl.name
                                ))
                                .at(self.path)
                                .for_declaration(decl.name.clone())
                                .with_span(decl.span),
                            ),
                        }
                    }
                }
                _ => {}
            }
        }

        for tag in docs.relations() {
            if let DocTag::Relation {
                kind,
                target,
                foreign_key,
            } = tag
            {
                match RelationKind::parse(kind) {
                    Some(kind) => model.relations.push(
                        Relation::new(kind, target.clone()).with_foreign_key(foreign_key.clone()),
                    ),
                    None => sink.emit(
                        Diagnostic::resolution(format!("unknown relation kind `{}`", kind))
                            .with_severity(Severity::Info)
                            .at(self.path)
                            .for_declaration(decl.name.clone()),
                    ),
                }
            }
        }

        for field_decl in decl.children_of(DeclarationKind::Field) {
            if let Some((field, relations)) =
                self.analyze_field(decl, field_decl, rename_all.as_deref(), sink)
            {
                model.relations.extend(relations);
                model.fields.push(field);
            }
        }

        model
    }

    fn analyze_field(
        &self,
        owner: &Declaration,
        decl: &Declaration,
        rename_all: Option<&str>,
        sink: &mut dyn DiagnosticSink,
    ) -> Option<(Field, Vec<Relation>)> {
        let mut rename = None;
        let mut flatten = false;
        let mut serde_default = None;
        let mut api_default = None;
        let mut example = None;
        let mut deprecated = false;
        let mut relation_specs: Vec<RelationSpec> = Vec::new();

        for ann in Annotation::parse_all(&decl.annotations) {
            match ann.classify() {
                KnownAnnotation::Serde {
                    rename: r,
                    skip,
                    flatten: f,
                    default,
                    ..
                } => {
                    if skip {
                        debug!("Skipping field {}.{}", owner.name, decl.name);
                        return None;
                    }
                    rename = r.or(rename);
                    flatten |= f;
                    serde_default = default.or(serde_default);
                }
                KnownAnnotation::Api {
                    default,
                    example: e,
                    deprecated: d,
                    ..
                } => {
                    api_default = default.or(api_default);
                    example = e.or(example);
                    deprecated |= d;
                }
                KnownAnnotation::Deprecated(_) => deprecated = true,
                KnownAnnotation::Relation(specs) => relation_specs.extend(specs),
                _ => {}
            }
        }

        let docs = decl.docs.as_deref().map(DocBlock::parse).unwrap_or_default();
        deprecated |= docs.is_deprecated();
        if example.is_none() {
            example = docs.example().map(literal_from_text);
        }

        let default = api_default.or_else(|| match &serde_default {
            Some(SerdeDefault::Function(func)) => {
                let name = func.rsplit("::").next().unwrap_or(func);
                self.function_defaults
                    .get(name)
                    .cloned()
                    .or_else(|| decl.default_value.clone())
            }
            _ => decl.default_value.clone(),
        });

        let inferred = TypeResolver::infer(InferenceInput {
            explicit: decl.type_decl.as_deref(),
            doc_hint: docs.var_type(),
            default: default.as_ref(),
            generics: &owner.generics,
        });
        if let Some(conflict) = &inferred.conflict {
            sink.emit(
                Diagnostic::type_conflict(conflict.clone())
                    .at(self.path)
                    .for_declaration(format!("{}.{}", owner.name, decl.name))
                    .with_span(decl.span),
            );
        }

        let name = match (rename, rename_all) {
            (Some(name), _) => name,
            (None, Some(rule)) => rename_case(&decl.name, rule),
            (None, None) => decl.name.clone(),
        };

        let relations = relation_specs
            .into_iter()
            .filter_map(|spec| {
                let target = spec
                    .target
                    .or_else(|| inferred.ty.referenced_models().into_iter().next());
                match target {
                    Some(target) => Some(
                        Relation::new(spec.kind, target)
                            .with_foreign_key(spec.foreign_key)
                            .on_field(name.clone()),
                    ),
                    None => {
                        sink.emit(
                            Diagnostic::resolution(format!(
                                "relation on `{}.{}` has no resolvable target",
                                owner.name, decl.name
                            ))
                            .at(self.path)
                            .with_span(decl.span),
                        );
                        None
                    }
                }
            })
            .collect();

        let field = Field {
            required: !inferred.ty.is_nullable() && default.is_none() && serde_default.is_none(),
            name,
            rust_name: decl.name.clone(),
            ty: inferred.ty,
            description: docs.full_description(),
            default,
            example,
            deprecated,
            flatten,
            constraints: Vec::new(),
        };
        Some((field, relations))
    }

    fn analyze_enum(&self, decl: &Declaration) -> Model {
        debug!("Analyzing enum model {}", decl.name);
        let mut model = Model::new(decl.name.clone(), self.path.to_path_buf());
        let docs = decl.docs.as_deref().map(DocBlock::parse).unwrap_or_default();
        model.description = docs.full_description();
        model.deprecated = docs.is_deprecated();

        let rename_all = Annotation::parse_all(&decl.annotations)
            .into_iter()
            .find_map(|ann| match ann.classify() {
                KnownAnnotation::Serde { rename_all, .. } => rename_all,
                _ => None,
            });

        let values = decl
            .children_of(DeclarationKind::Variant)
            .filter_map(|variant| {
                let mut rename = None;
                for ann in Annotation::parse_all(&variant.annotations) {
                    if let KnownAnnotation::Serde { rename: r, skip, .. } = ann.classify() {
                        if skip {
                            return None;
                        }
                        rename = r.or(rename);
                    }
                }
                Some(match (rename, rename_all.as_deref()) {
                    (Some(name), _) => name,
                    (None, Some(rule)) => rename_case(&variant.name, rule),
                    (None, None) => variant.name.clone(),
                })
            })
            .collect();
        model.enum_values = Some(values);
        model
    }
}

/// Interpret an `@example` body as a literal when it looks like one
fn literal_from_text(text: &str) -> Literal {
    let trimmed = text.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Literal::Int(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return Literal::Float(f);
    }
    match trimmed {
        "true" => Literal::Bool(true),
        "false" => Literal::Bool(false),
        "null" => Literal::Null,
        _ => Literal::Str(trimmed.trim_matches('"').to_string()),
    }
}

fn split_words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in name.chars() {
        if c == '_' || c == '-' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn capitalize(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Apply a `#[serde(rename_all = "...")]` rule
pub fn rename_case(name: &str, rule: &str) -> String {
    let words = split_words(name);
    let lower = |sep: &str| {
        words
            .iter()
            .map(|w| w.to_lowercase())
            .collect::<Vec<_>>()
            .join(sep)
    };
    let upper = |sep: &str| {
        words
            .iter()
            .map(|w| w.to_uppercase())
            .collect::<Vec<_>>()
            .join(sep)
    };
    match rule {
        "lowercase" => lower(""),
        "UPPERCASE" => upper(""),
        "snake_case" => lower("_"),
        "SCREAMING_SNAKE_CASE" => upper("_"),
        "kebab-case" => lower("-"),
        "SCREAMING-KEBAB-CASE" => upper("-"),
        "PascalCase" => words.iter().map(|w| capitalize(w)).collect(),
        "camelCase" => words
            .iter()
            .enumerate()
            .map(|(i, w)| if i == 0 { w.to_lowercase() } else { capitalize(w) })
            .collect(),
        _ => name.to_string(),
    }
}
