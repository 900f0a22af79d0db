use crate::config::{Config, ServerConfig};
use crate::example::ExampleGenerator;
use crate::extractor::HttpMethod;
use crate::model::ModelRegistry;
use crate::operation::ResolvedOperation;
use crate::parameter::ParameterLocation;
use crate::schema_generator::{Schema, SchemaGenerator};
use crate::security::{SecurityScheme, SecuritySchemeGenerator};
use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

pub const OPENAPI_VERSION: &str = "3.0.3";

/// OpenAPI document builder
pub struct OpenApiBuilder<'a> {
    info: Info,
    servers: Vec<ServerConfig>,
    /// URL path -> PathItem, sorted
    paths: BTreeMap<String, PathItem>,
    schemas: SchemaGenerator<'a>,
    models: &'a ModelRegistry,
    security_schemes: IndexMap<String, SecurityScheme>,
    operation_ids: HashSet<String>,
    include_all_models: bool,
    /// Flattened request-body schemas whose examples are filled in at build time
    pending_examples: Vec<(String, HttpMethod, Schema)>,
}

/// OpenAPI Info object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Info {
    pub title: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// OpenAPI PathItem object - all operations for a single path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub get: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub put: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Operation>,
}

impl PathItem {
    pub fn operation(&self, method: HttpMethod) -> Option<&Operation> {
        match method {
            HttpMethod::Get => self.get.as_ref(),
            HttpMethod::Put => self.put.as_ref(),
            HttpMethod::Post => self.post.as_ref(),
            HttpMethod::Delete => self.delete.as_ref(),
            HttpMethod::Options => self.options.as_ref(),
            HttpMethod::Head => self.head.as_ref(),
            HttpMethod::Patch => self.patch.as_ref(),
            HttpMethod::Trace => self.trace.as_ref(),
        }
    }

    fn slot(&mut self, method: HttpMethod) -> &mut Option<Operation> {
        match method {
            HttpMethod::Get => &mut self.get,
            HttpMethod::Put => &mut self.put,
            HttpMethod::Post => &mut self.post,
            HttpMethod::Delete => &mut self.delete,
            HttpMethod::Options => &mut self.options,
            HttpMethod::Head => &mut self.head,
            HttpMethod::Patch => &mut self.patch,
            HttpMethod::Trace => &mut self.trace,
        }
    }

    /// Present operations in document order
    pub fn operations(&self) -> impl Iterator<Item = (HttpMethod, &Operation)> {
        HttpMethod::ALL
            .iter()
            .filter_map(move |m| self.operation(*m).map(|op| (*m, op)))
    }
}

/// OpenAPI Operation object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "operationId")]
    pub operation_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    #[serde(rename = "requestBody", skip_serializing_if = "Option::is_none")]
    pub request_body: Option<RequestBody>,
    pub responses: BTreeMap<String, Response>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<bool>,
    /// One requirement naming every scheme the operation needs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<Vec<BTreeMap<String, Vec<String>>>>,
    /// Qualified id of the handler
    #[serde(rename = "x-handler", skip_serializing_if = "Option::is_none")]
    pub x_handler: Option<String>,
}

/// OpenAPI Parameter object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "in")]
    pub location: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schema: Schema,
}

/// OpenAPI RequestBody object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
    pub content: BTreeMap<String, MediaType>,
}

/// OpenAPI MediaType object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaType {
    pub schema: Schema,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
}

/// OpenAPI Response object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<BTreeMap<String, MediaType>>,
}

/// OpenAPI Components object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Components {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub schemas: BTreeMap<String, Schema>,
    #[serde(
        rename = "securitySchemes",
        default,
        skip_serializing_if = "IndexMap::is_empty"
    )]
    pub security_schemes: IndexMap<String, SecurityScheme>,
}

/// Complete OpenAPI document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenApiDocument {
    pub openapi: String,
    pub info: Info,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<ServerConfig>,
    pub paths: BTreeMap<String, PathItem>,
    pub components: Components,
}

impl OpenApiDocument {
    /// Every operation as `(path, method, operation)`, paths sorted
    pub fn operations(&self) -> impl Iterator<Item = (&str, HttpMethod, &Operation)> {
        self.paths.iter().flat_map(|(path, item)| {
            item.operations()
                .map(move |(method, op)| (path.as_str(), method, op))
        })
    }

    pub fn operation_count(&self) -> usize {
        self.operations().count()
    }
}

const JSON: &str = "application/json";

impl<'a> OpenApiBuilder<'a> {
    pub fn new(config: &Config, models: &'a ModelRegistry) -> Self {
        debug!("Initializing OpenApiBuilder");
        Self {
            info: Info {
                title: config.info.title.clone(),
                version: config.info.version.clone(),
                description: config.info.description.clone(),
            },
            servers: config.servers.clone(),
            paths: BTreeMap::new(),
            schemas: SchemaGenerator::new(models, config.schema.include_relations),
            models,
            security_schemes: SecuritySchemeGenerator::generate(&config.security),
            operation_ids: HashSet::new(),
            include_all_models: config.schema.include_all_models,
            pending_examples: Vec::new(),
        }
    }

    /// Add an operation to the document
    pub fn add_operation(&mut self, op: &ResolvedOperation) {
        debug!("Adding operation: {} {}", op.method, op.path);

        let parameters = op
            .parameters
            .iter()
            .map(|p| Parameter {
                name: p.name.clone(),
                location: p.location.as_str().to_string(),
                required: p.required || p.location == ParameterLocation::Path,
                description: p.description.clone(),
                schema: self.schemas.parameter_schema(p),
            })
            .collect();

        let request_body = op.request_body.as_ref().map(|body| {
            let (schema, flattened) = match &body.ty {
                Some(ty) if body.fields.is_empty() => {
                    (self.schemas.schema_for(ty), self.schemas.flatten_type(ty))
                }
                // handler rules refine the body type through an overlay
                Some(ty) => {
                    let overlay = self.schemas.object_from_parameters(&body.fields);
                    let mut flattened = self.schemas.flatten_type(ty);
                    merge_overlay(&mut flattened, &overlay);
                    let schema = Schema {
                        all_of: Some(vec![self.schemas.schema_for(ty), overlay]),
                        ..Schema::default()
                    };
                    (schema, flattened)
                }
                None => {
                    let schema = self.schemas.object_from_parameters(&body.fields);
                    (schema.clone(), schema)
                }
            };
            self.pending_examples
                .push((op.path.clone(), op.method, flattened));
            RequestBody {
                description: None,
                required: body.required,
                content: BTreeMap::from([(
                    body.content_type.clone(),
                    MediaType {
                        schema,
                        example: None,
                    },
                )]),
            }
        });

        let responses = op
            .responses
            .iter()
            .map(|spec| {
                let content = spec.ty.as_ref().map(|ty| {
                    BTreeMap::from([(
                        JSON.to_string(),
                        MediaType {
                            schema: self.schemas.schema_for(ty),
                            example: None,
                        },
                    )])
                });
                (
                    spec.status.clone(),
                    Response {
                        description: spec.description.clone(),
                        content,
                    },
                )
            })
            .collect();

        let security = (!op.security.is_empty()).then(|| {
            vec![op
                .security
                .iter()
                .map(|name| (name.clone(), Vec::new()))
                .collect()]
        });

        let operation = Operation {
            tags: op.tags.clone(),
            summary: op.summary.clone(),
            description: op.description.clone(),
            operation_id: self.unique_operation_id(&op.operation_id),
            parameters,
            request_body,
            responses,
            deprecated: op.deprecated.then_some(true),
            security,
            x_handler: Some(op.handler.clone()),
        };

        let slot = self.paths.entry(op.path.clone()).or_default().slot(op.method);
        if slot.is_some() {
            debug!("Replacing existing operation {} {}", op.method, op.path);
        }
        *slot = Some(operation);
    }

    fn unique_operation_id(&mut self, wanted: &str) -> String {
        let mut id = wanted.to_string();
        let mut n = 2;
        while !self.operation_ids.insert(id.clone()) {
            id = format!("{}_{}", wanted, n);
            n += 1;
        }
        id
    }

    /// Build the final OpenAPI document
    pub fn build(mut self) -> OpenApiDocument {
        debug!("Building final OpenAPI document");

        if self.include_all_models {
            let names: Vec<String> = self.models.iter().map(|(_, m)| m.name.clone()).collect();
            for name in names {
                self.schemas.ensure_model(&name);
            }
        }
        let schemas = self.schemas.into_components();

        let examples = ExampleGenerator::new(&schemas);
        for (path, method, flattened) in &self.pending_examples {
            let Some(item) = self.paths.get_mut(path) else {
                continue;
            };
            let Some(body) = item
                .slot(*method)
                .as_mut()
                .and_then(|op| op.request_body.as_mut())
            else {
                continue;
            };
            let example = examples.example(flattened);
            for media in body.content.values_mut() {
                media.example = Some(example.clone());
            }
        }

        OpenApiDocument {
            openapi: OPENAPI_VERSION.to_string(),
            info: self.info,
            servers: self.servers,
            paths: self.paths,
            components: Components {
                schemas,
                security_schemes: self.security_schemes,
            },
        }
    }
}

/// Fold overlay properties and required names into an inlined object schema
fn merge_overlay(target: &mut Schema, overlay: &Schema) {
    if let Some(extra) = &overlay.properties {
        let properties = target.properties.get_or_insert_with(IndexMap::new);
        for (name, schema) in extra {
            properties.insert(name.clone(), schema.clone());
        }
    }
    if let Some(extra) = &overlay.required {
        let required = target.required.get_or_insert_with(Vec::new);
        for name in extra {
            if !required.contains(name) {
                required.push(name.clone());
            }
        }
    }
}
