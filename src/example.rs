//! Example values computed from schemas.

use crate::schema_generator::Schema;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Builds example values for schemas.
///
/// A value comes from, in order: the schema's `example`, its `default`, its first
/// enum value, or a placeholder chosen by type and format. `$ref`s are followed
/// through the component map; a reference already being expanded yields `null`.
pub struct ExampleGenerator<'a> {
    components: &'a BTreeMap<String, Schema>,
}

impl<'a> ExampleGenerator<'a> {
    pub fn new(components: &'a BTreeMap<String, Schema>) -> Self {
        Self { components }
    }

    pub fn example(&self, schema: &Schema) -> Value {
        self.walk(schema, &mut BTreeSet::new())
    }

    fn walk(&self, schema: &Schema, expanding: &mut BTreeSet<String>) -> Value {
        if let Some(example) = &schema.example {
            return example.clone();
        }
        if let Some(default) = &schema.default {
            return default.clone();
        }
        if let Some(first) = schema.enum_values.as_ref().and_then(|v| v.first()) {
            return first.clone();
        }

        if let Some(name) = schema.referenced_name() {
            let Some(target) = self.components.get(name) else {
                return Value::Null;
            };
            if !expanding.insert(name.to_string()) {
                return Value::Null;
            }
            let value = self.walk(target, expanding);
            expanding.remove(name);
            return value;
        }
        if let Some(first) = schema
            .all_of
            .as_ref()
            .or(schema.one_of.as_ref())
            .and_then(|list| list.first())
        {
            return self.walk(first, expanding);
        }

        match schema.schema_type.as_deref() {
            Some("object") => {
                let mut map = Map::new();
                for (name, property) in schema.properties.iter().flatten() {
                    map.insert(name.clone(), self.walk(property, expanding));
                }
                Value::Object(map)
            }
            Some("array") => match &schema.items {
                Some(items) => Value::Array(vec![self.walk(items, expanding)]),
                None => Value::Array(Vec::new()),
            },
            Some("integer") => schema.minimum.clone().unwrap_or(Value::from(0)),
            Some("number") => schema.minimum.clone().unwrap_or(Value::from(0.0)),
            Some("boolean") => Value::Bool(true),
            Some("string") => Value::String(string_placeholder(schema.format.as_deref())),
            _ => Value::Null,
        }
    }
}

fn string_placeholder(format: Option<&str>) -> String {
    match format {
        Some("email") => "user@example.com",
        Some("uri") | Some("url") => "https://example.com",
        Some("uuid") => "3fa85f64-5717-4562-b3fc-2c963f66afa6",
        Some("date") => "2024-01-01",
        Some("date-time") => "2024-01-01T00:00:00Z",
        Some("ipv4") => "192.168.0.1",
        Some("ipv6") => "::1",
        Some("binary") | Some("byte") => "",
        _ => "string",
    }
    .to_string()
}
