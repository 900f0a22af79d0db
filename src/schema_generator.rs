use crate::model::{Field, Model, ModelRegistry};
use crate::parameter::Parameter;
use crate::type_ref::TypeRef;
use crate::validation::Constraint;
use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// OpenAPI 3.0 Schema object.
///
/// `Schema::default()` is the empty schema `{}`, used for `unknown` types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Reference to a component schema
    #[serde(rename = "$ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<IndexMap<String, Schema>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(rename = "allOf", skip_serializing_if = "Option::is_none")]
    pub all_of: Option<Vec<Schema>>,
    #[serde(rename = "oneOf", skip_serializing_if = "Option::is_none")]
    pub one_of: Option<Vec<Schema>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<Value>,
    #[serde(rename = "minLength", skip_serializing_if = "Option::is_none")]
    pub min_length: Option<Value>,
    #[serde(rename = "maxLength", skip_serializing_if = "Option::is_none")]
    pub max_length: Option<Value>,
    #[serde(rename = "minItems", skip_serializing_if = "Option::is_none")]
    pub min_items: Option<Value>,
    #[serde(rename = "maxItems", skip_serializing_if = "Option::is_none")]
    pub max_items: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Validation rules without an OpenAPI keyword
    #[serde(rename = "x-rules", skip_serializing_if = "Option::is_none")]
    pub x_rules: Option<Vec<String>>,
    /// Model name of a dangling reference
    #[serde(rename = "x-unresolved", skip_serializing_if = "Option::is_none")]
    pub x_unresolved: Option<String>,
}

pub const COMPONENT_PREFIX: &str = "#/components/schemas/";

impl Schema {
    pub fn of_type(schema_type: &str) -> Self {
        Self {
            schema_type: Some(schema_type.to_string()),
            ..Self::default()
        }
    }

    pub fn reference(name: &str) -> Self {
        Self {
            reference: Some(format!("{}{}", COMPONENT_PREFIX, name)),
            ..Self::default()
        }
    }

    pub fn array(items: Schema) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::of_type("array")
        }
    }

    fn unresolved(name: &str) -> Self {
        Self {
            x_unresolved: Some(name.to_string()),
            ..Self::default()
        }
    }

    /// Component name this schema points at, if it is a reference
    pub fn referenced_name(&self) -> Option<&str> {
        self.reference
            .as_deref()
            .and_then(|r| r.strip_prefix(COMPONENT_PREFIX))
    }

    /// Add sibling keywords to a `$ref` by moving it into `allOf`
    fn wrap_reference(self) -> Self {
        if self.reference.is_none() {
            return self;
        }
        Self {
            all_of: Some(vec![self]),
            ..Self::default()
        }
    }

    /// Copy with every description removed, for structural comparison
    fn without_descriptions(&self) -> Self {
        let mut out = self.clone();
        out.description = None;
        if let Some(props) = out.properties.as_mut() {
            for schema in props.values_mut() {
                *schema = schema.without_descriptions();
            }
        }
        if let Some(items) = out.items.as_mut() {
            **items = items.without_descriptions();
        }
        for list in [out.all_of.as_mut(), out.one_of.as_mut()].into_iter().flatten() {
            for schema in list.iter_mut() {
                *schema = schema.without_descriptions();
            }
        }
        out
    }
}

/// Schema generator - turns TypeRefs and models into OpenAPI schemas.
///
/// Object types are emitted as references to component schemas. Components are
/// deduplicated by a structural hash of their content (descriptions excluded): a
/// model identical to one generated earlier becomes an alias of it.
pub struct SchemaGenerator<'a> {
    registry: &'a ModelRegistry,
    include_relations: bool,
    /// Component name -> schema, in generation order
    components: IndexMap<String, Schema>,
    /// Model name -> component name it is emitted as
    aliases: HashMap<String, String>,
    by_hash: HashMap<String, String>,
    in_progress: BTreeSet<String>,
    /// Models referenced while their own fragment was being generated
    self_referenced: BTreeSet<String>,
    /// Visited models while flattening; `None` outside of flattening
    inline: Option<BTreeSet<String>>,
}

impl<'a> SchemaGenerator<'a> {
    pub fn new(registry: &'a ModelRegistry, include_relations: bool) -> Self {
        debug!("Initializing SchemaGenerator");
        Self {
            registry,
            include_relations,
            components: IndexMap::new(),
            aliases: HashMap::new(),
            by_hash: HashMap::new(),
            in_progress: BTreeSet::new(),
            self_referenced: BTreeSet::new(),
            inline: None,
        }
    }

    /// Schema for a type; objects become references
    pub fn schema_for(&mut self, ty: &TypeRef) -> Schema {
        match ty {
            TypeRef::Scalar(kind) => Schema {
                format: kind.format().map(str::to_string),
                ..Schema::of_type(kind.schema_type())
            },
            TypeRef::Array(inner) => Schema::array(self.schema_for(inner)),
            TypeRef::Object(name) => self.object_schema(name),
            TypeRef::Union(members) => Schema {
                one_of: Some(members.iter().map(|m| self.schema_for(m)).collect()),
                ..Schema::default()
            },
            TypeRef::Nullable(inner) => {
                let mut schema = self.schema_for(inner).wrap_reference();
                schema.nullable = Some(true);
                schema
            }
            TypeRef::Unknown => Schema::default(),
        }
    }

    fn object_schema(&mut self, name: &str) -> Schema {
        let registry = self.registry;
        let Some(model) = registry.by_name(name) else {
            debug!("Type `{}` is not a known model", name);
            return Schema::unresolved(name);
        };
        if let Some(visited) = self.inline.as_mut() {
            if visited.insert(name.to_string()) {
                return self.model_schema(model);
            }
        }
        Schema::reference(&self.ensure_model(name))
    }

    /// Generate the component for a model if needed; returns the component name
    pub fn ensure_model(&mut self, name: &str) -> String {
        if let Some(existing) = self.aliases.get(name) {
            return existing.clone();
        }
        if self.in_progress.contains(name) {
            self.self_referenced.insert(name.to_string());
            return name.to_string();
        }
        let registry = self.registry;
        let Some(model) = registry.by_name(name) else {
            return name.to_string();
        };

        debug!("Generating schema for model {}", name);
        let saved_inline = self.inline.take();
        self.in_progress.insert(name.to_string());
        let schema = self.model_schema(model);
        self.in_progress.remove(name);
        self.inline = saved_inline;

        let hash = structural_hash(&schema);
        if !self.self_referenced.contains(name) {
            if let Some(existing) = hash.as_ref().and_then(|h| self.by_hash.get(h)) {
                debug!("Model {} is structurally identical to {}", name, existing);
                let existing = existing.clone();
                self.aliases.insert(name.to_string(), existing.clone());
                return existing;
            }
        }
        if let Some(hash) = hash {
            self.by_hash.entry(hash).or_insert_with(|| name.to_string());
        }
        self.aliases.insert(name.to_string(), name.to_string());
        self.components.insert(name.to_string(), schema);
        name.to_string()
    }

    fn model_schema(&mut self, model: &Model) -> Schema {
        if let Some(values) = &model.enum_values {
            return Schema {
                enum_values: Some(values.iter().cloned().map(Value::String).collect()),
                description: model.description.clone(),
                deprecated: model.deprecated.then_some(true),
                ..Schema::of_type("string")
            };
        }

        let mut properties = IndexMap::new();
        let mut required = Vec::new();
        let mut flattening = BTreeSet::from([model.name.clone()]);
        self.collect_properties(model, &mut properties, &mut required, &mut flattening);

        Schema {
            description: model.description.clone(),
            deprecated: model.deprecated.then_some(true),
            properties: Some(properties),
            required: (!required.is_empty()).then_some(required),
            ..Schema::of_type("object")
        }
    }

    fn collect_properties(
        &mut self,
        model: &Model,
        properties: &mut IndexMap<String, Schema>,
        required: &mut Vec<String>,
        flattening: &mut BTreeSet<String>,
    ) {
        let registry = self.registry;
        for field in &model.fields {
            if field.flatten {
                if let TypeRef::Object(inner) = field.ty.strip_nullable() {
                    if let Some(inner_model) = registry.by_name(inner) {
                        if flattening.insert(inner.clone()) {
                            self.collect_properties(inner_model, properties, required, flattening);
                        }
                        continue;
                    }
                }
            }
            let schema = self.field_schema(field);
            properties.insert(field.name.clone(), schema);
            if field.required && !required.contains(&field.name) {
                required.push(field.name.clone());
            }
        }

        if !self.include_relations {
            return;
        }
        for relation in model.relations.iter().filter(|r| r.field.is_none()) {
            let name = relation.property_name();
            if properties.contains_key(&name) {
                continue;
            }
            let target = self.schema_for(&TypeRef::object(relation.target.clone()));
            let schema = if relation.kind.is_to_many() {
                Schema::array(target)
            } else {
                target
            };
            properties.insert(name, schema);
        }
    }

    fn field_schema(&mut self, field: &Field) -> Schema {
        let mut schema = self.schema_for(&field.ty);
        let decorated = field.description.is_some()
            || field.default.is_some()
            || field.example.is_some()
            || field.deprecated
            || !field.constraints.is_empty();
        if decorated {
            schema = schema.wrap_reference();
        }
        schema.description = field.description.clone();
        schema.default = field.default.as_ref().map(|d| d.to_json());
        schema.example = field.example.as_ref().map(|e| e.to_json());
        schema.deprecated = field.deprecated.then_some(true);
        apply_constraints(&mut schema, &field.constraints);
        schema
    }

    /// Schema for a request parameter
    pub fn parameter_schema(&mut self, param: &Parameter) -> Schema {
        let mut schema = self.schema_for(&param.ty);
        if param.default.is_some() || !param.constraints.is_empty() {
            schema = schema.wrap_reference();
        }
        schema.default = param.default.as_ref().map(|d| d.to_json());
        apply_constraints(&mut schema, &param.constraints);
        schema
    }

    /// Inline object schema for loose body fields
    pub fn object_from_parameters(&mut self, fields: &[Parameter]) -> Schema {
        let mut properties = IndexMap::new();
        let mut required = Vec::new();
        for field in fields {
            let mut schema = self.parameter_schema(field);
            if field.description.is_some() {
                schema = schema.wrap_reference();
                schema.description = field.description.clone();
            }
            properties.insert(field.name.clone(), schema);
            if field.required {
                required.push(field.name.clone());
            }
        }
        Schema {
            properties: Some(properties),
            required: (!required.is_empty()).then_some(required),
            ..Schema::of_type("object")
        }
    }

    /// Schema of a type with every model inlined.
    ///
    /// Traversal carries a visited set: a model met a second time is emitted as a
    /// reference instead of being inlined again, so cyclic relation graphs terminate.
    pub fn flatten_type(&mut self, ty: &TypeRef) -> Schema {
        let saved = self.inline.replace(BTreeSet::new());
        let schema = self.schema_for(ty);
        self.inline = saved;
        schema
    }

    pub fn flatten_model(&mut self, name: &str) -> Option<Schema> {
        self.registry.by_name(name)?;
        Some(self.flatten_type(&TypeRef::object(name)))
    }

    /// Generated components, in generation order
    pub fn components(&self) -> &IndexMap<String, Schema> {
        &self.components
    }

    /// Generated components, sorted by name
    pub fn into_components(self) -> BTreeMap<String, Schema> {
        self.components.into_iter().collect()
    }
}

fn structural_hash(schema: &Schema) -> Option<String> {
    let bytes = serde_json::to_vec(&schema.without_descriptions()).ok()?;
    Some(blake3::hash(&bytes).to_hex().to_string())
}

/// Whole numbers render without a fraction
fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        Value::from(value as i64)
    } else {
        serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// Map validation constraints onto schema keywords
pub fn apply_constraints(schema: &mut Schema, constraints: &[Constraint]) {
    let base = schema
        .schema_type
        .clone()
        .or_else(|| constraints.iter().find_map(rule_schema_type));
    if schema.schema_type.is_none() && schema.all_of.is_none() && schema.one_of.is_none() {
        schema.schema_type = base.clone();
    }

    for constraint in constraints {
        match constraint {
            Constraint::Required | Constraint::Nullable | Constraint::Type(_) => {}
            Constraint::Format(format) => {
                if schema.format.is_none() {
                    schema.format = Some(format.clone());
                }
            }
            Constraint::Enum(values) => {
                schema.enum_values = Some(values.iter().cloned().map(Value::String).collect());
            }
            Constraint::Min(v) => match base.as_deref() {
                Some("string") => schema.min_length = Some(number(*v)),
                Some("array") => schema.min_items = Some(number(*v)),
                _ => schema.minimum = Some(number(*v)),
            },
            Constraint::Max(v) => match base.as_deref() {
                Some("string") => schema.max_length = Some(number(*v)),
                Some("array") => schema.max_items = Some(number(*v)),
                _ => schema.maximum = Some(number(*v)),
            },
            Constraint::Pattern(pattern) => schema.pattern = Some(pattern.clone()),
            Constraint::Opaque { name, params } => {
                let rule = if params.is_empty() {
                    name.clone()
                } else {
                    format!("{}:{}", name, params.join(","))
                };
                schema.x_rules.get_or_insert_with(Vec::new).push(rule);
            }
        }
    }
}

fn rule_schema_type(constraint: &Constraint) -> Option<String> {
    use crate::validation::RuleType;
    match constraint {
        Constraint::Type(rule) => Some(
            match rule {
                RuleType::String | RuleType::Date | RuleType::File => "string",
                RuleType::Integer => "integer",
                RuleType::Number => "number",
                RuleType::Boolean => "boolean",
                RuleType::Array => "array",
            }
            .to_string(),
        ),
        Constraint::Format(_) | Constraint::Pattern(_) => Some("string".to_string()),
        _ => None,
    }
}
