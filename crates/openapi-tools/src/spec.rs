//! OpenAPI document loading and endpoint extraction.
//!
//! The extractor walks every path x verb pair in the document and produces one
//! [`EndpointDescriptor`] per operation. Schemas are converted into the tagged
//! [`SchemaNode`] tree; only direct object/array/enum shapes and internal
//! `#/components/schemas` references are followed.

use crate::error::{OpenApiToolsError, Result};
use openapiv3::{
    MediaType, OpenAPI, Operation, Parameter, ParameterSchemaOrContent, PathItem, ReferenceOr,
    RequestBody, Response, Schema, StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Upper bound on `$ref` chains while resolving internal schema references.
const MAX_REF_DEPTH: usize = 16;

const JSON_CONTENT_TYPE: &str = "application/json";

/// Where a parameter is carried in the HTTP request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Body,
}

impl std::fmt::Display for ParamLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ParamLocation::Path => "path",
            ParamLocation::Query => "query",
            ParamLocation::Header => "header",
            ParamLocation::Body => "body",
        };
        f.write_str(s)
    }
}

/// Scalar schema kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    String,
    Number,
    Integer,
    Boolean,
}

impl ScalarKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ScalarKind::String => "string",
            ScalarKind::Number => "number",
            ScalarKind::Integer => "integer",
            ScalarKind::Boolean => "boolean",
        }
    }
}

/// Tagged schema tree extracted from the OpenAPI document.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SchemaNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub shape: SchemaShape,
}

/// The structural part of a [`SchemaNode`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SchemaShape {
    Object {
        properties: BTreeMap<String, SchemaNode>,
        required: Vec<String>,
        additional: bool,
    },
    Array {
        items: Option<Box<SchemaNode>>,
    },
    Scalar {
        scalar: ScalarKind,
        enum_values: Vec<String>,
    },
    /// No usable type information; rendered as `{"type": "string"}`.
    Any,
}

impl SchemaNode {
    #[must_use]
    pub fn scalar(kind: ScalarKind) -> Self {
        Self {
            description: None,
            shape: SchemaShape::Scalar {
                scalar: kind,
                enum_values: Vec::new(),
            },
        }
    }

    #[must_use]
    pub fn any() -> Self {
        Self {
            description: None,
            shape: SchemaShape::Any,
        }
    }

    /// Render as a JSON-Schema-like value for tool input schemas.
    ///
    /// A node without type information defaults to `string`, matching the
    /// behavior expected by tool clients.
    #[must_use]
    pub fn to_json_schema(&self) -> Value {
        let mut result = json!({});

        if let Some(desc) = &self.description {
            result["description"] = json!(desc);
        }

        match &self.shape {
            SchemaShape::Object {
                properties,
                required,
                additional,
            } => {
                result["type"] = json!("object");
                if !properties.is_empty() {
                    let mut props = json!({});
                    for (name, node) in properties {
                        props[name] = node.to_json_schema();
                    }
                    result["properties"] = props;
                }
                if !required.is_empty() {
                    result["required"] = json!(required);
                }
                if *additional {
                    result["additionalProperties"] = json!(true);
                }
            }
            SchemaShape::Array { items } => {
                result["type"] = json!("array");
                if let Some(items) = items {
                    result["items"] = items.to_json_schema();
                }
            }
            SchemaShape::Scalar {
                scalar,
                enum_values,
            } => {
                result["type"] = json!(scalar.as_str());
                if !enum_values.is_empty() {
                    result["enum"] = json!(enum_values);
                }
            }
            SchemaShape::Any => {
                result["type"] = json!("string");
            }
        }

        result
    }
}

/// One declared parameter of a REST operation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParameterDescriptor {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    pub schema: SchemaNode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One REST operation extracted from the OpenAPI document.
///
/// Identity is `(path, method)`; immutable once extracted.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointDescriptor {
    /// Path template with `{name}` placeholders.
    pub path: String,
    /// Lowercase HTTP method.
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: Vec<ParameterDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<SchemaNode>,
}

/// Load an OpenAPI document from a URL, a filesystem path, or inline text.
///
/// # Errors
///
/// Returns [`OpenApiToolsError::SpecFetch`] / [`OpenApiToolsError::SpecReadFile`]
/// when the location cannot be read, and [`OpenApiToolsError::SpecInvalid`]
/// when the content does not parse as an OpenAPI document.
pub async fn load_spec(location: &str) -> Result<OpenAPI> {
    let content = if location.starts_with("http://") || location.starts_with("https://") {
        let resp = reqwest::get(location)
            .await
            .map_err(|e| OpenApiToolsError::SpecFetch {
                url: location.to_string(),
                message: e.to_string(),
            })?;
        resp.text().await.map_err(|e| OpenApiToolsError::SpecFetch {
            url: location.to_string(),
            message: e.to_string(),
        })?
    } else if std::path::Path::new(location).exists() {
        std::fs::read_to_string(location).map_err(|source| OpenApiToolsError::SpecReadFile {
            path: location.to_string(),
            source,
        })?
    } else {
        location.to_string()
    };

    parse_spec(&content)
}

/// Parse spec content (JSON or YAML) into an OpenAPI document.
///
/// # Errors
///
/// Returns [`OpenApiToolsError::SpecInvalid`] on structural parse failure.
pub fn parse_spec(content: &str) -> Result<OpenAPI> {
    // serde_yaml handles both YAML and JSON input.
    serde_yaml::from_str(content).map_err(|e| OpenApiToolsError::SpecInvalid(e.to_string()))
}

/// Extract one [`EndpointDescriptor`] per path x verb in the document.
///
/// A document with zero paths yields an empty result, not an error.
#[must_use]
pub fn extract_endpoints(doc: &OpenAPI) -> Vec<EndpointDescriptor> {
    let mut endpoints = Vec::new();

    for (path, item) in &doc.paths.paths {
        let item = match item {
            ReferenceOr::Item(item) => item,
            ReferenceOr::Reference { reference } => {
                tracing::warn!(path = %path, reference = %reference, "skipping referenced path item");
                continue;
            }
        };

        for (method, op) in operations_of(item) {
            let Some(op) = op else { continue };
            endpoints.push(extract_operation(doc, path, method, item, op));
        }
    }

    endpoints
}

fn operations_of(item: &PathItem) -> [(&'static str, Option<&Operation>); 5] {
    [
        ("get", item.get.as_ref()),
        ("post", item.post.as_ref()),
        ("put", item.put.as_ref()),
        ("delete", item.delete.as_ref()),
        ("patch", item.patch.as_ref()),
    ]
}

fn extract_operation(
    doc: &OpenAPI,
    path: &str,
    method: &'static str,
    item: &PathItem,
    op: &Operation,
) -> EndpointDescriptor {
    let mut parameters = Vec::new();

    // Path-item-level parameters first; operation-level declarations override.
    for p in item.parameters.iter().chain(op.parameters.iter()) {
        let Some(param) = resolve_parameter(doc, p) else {
            continue;
        };
        if let Some(descriptor) = parameter_descriptor(doc, param) {
            parameters.retain(|existing: &ParameterDescriptor| {
                !(existing.name == descriptor.name && existing.location == descriptor.location)
            });
            parameters.push(descriptor);
        }
    }

    // JSON request body becomes a single synthetic `body` parameter.
    if matches!(method, "post" | "put" | "patch")
        && let Some(body) = op.request_body.as_ref().and_then(|b| resolve_request_body(doc, b))
        && let Some(media) = body.content.get(JSON_CONTENT_TYPE)
    {
        parameters.push(ParameterDescriptor {
            name: "body".to_string(),
            location: ParamLocation::Body,
            required: body.required,
            schema: media_schema(doc, media),
            description: body.description.clone(),
        });
    }

    EndpointDescriptor {
        path: path.to_string(),
        method: method.to_string(),
        operation_id: op.operation_id.clone(),
        summary: op.summary.clone(),
        description: op.description.clone(),
        parameters,
        response_schema: extract_response_schema(doc, op),
    }
}

fn parameter_descriptor(doc: &OpenAPI, param: &Parameter) -> Option<ParameterDescriptor> {
    let (data, location) = match param {
        Parameter::Path { parameter_data, .. } => (parameter_data, ParamLocation::Path),
        Parameter::Query { parameter_data, .. } => (parameter_data, ParamLocation::Query),
        Parameter::Header { parameter_data, .. } => (parameter_data, ParamLocation::Header),
        Parameter::Cookie { parameter_data, .. } => {
            tracing::warn!(name = %parameter_data.name, "skipping cookie parameter");
            return None;
        }
    };

    let schema = match &data.format {
        ParameterSchemaOrContent::Schema(schema_ref) => schema_ref_to_node(doc, schema_ref, 0),
        ParameterSchemaOrContent::Content(_) => SchemaNode::scalar(ScalarKind::String),
    };

    Some(ParameterDescriptor {
        name: data.name.clone(),
        location,
        required: data.required,
        schema,
        description: data.description.clone(),
    })
}

/// Response schema from the 200 response, falling back to 201.
fn extract_response_schema(doc: &OpenAPI, op: &Operation) -> Option<SchemaNode> {
    for code in [200u16, 201] {
        let Some(resp) = op.responses.responses.get(&StatusCode::Code(code)) else {
            continue;
        };
        let Some(resp) = resolve_response(doc, resp) else {
            continue;
        };
        if let Some(media) = resp.content.get(JSON_CONTENT_TYPE) {
            return Some(media_schema(doc, media));
        }
    }
    None
}

fn media_schema(doc: &OpenAPI, media: &MediaType) -> SchemaNode {
    media
        .schema
        .as_ref()
        .map(|s| schema_ref_to_node(doc, s, 0))
        .unwrap_or_else(SchemaNode::any)
}

fn resolve_parameter<'a>(
    doc: &'a OpenAPI,
    param: &'a ReferenceOr<Parameter>,
) -> Option<&'a Parameter> {
    match param {
        ReferenceOr::Item(p) => Some(p),
        ReferenceOr::Reference { reference } => {
            let name = reference.strip_prefix("#/components/parameters/")?;
            match doc.components.as_ref()?.parameters.get(name)? {
                ReferenceOr::Item(p) => Some(p),
                ReferenceOr::Reference { .. } => None,
            }
        }
    }
}

fn resolve_request_body<'a>(
    doc: &'a OpenAPI,
    body: &'a ReferenceOr<RequestBody>,
) -> Option<&'a RequestBody> {
    match body {
        ReferenceOr::Item(b) => Some(b),
        ReferenceOr::Reference { reference } => {
            let name = reference.strip_prefix("#/components/requestBodies/")?;
            match doc.components.as_ref()?.request_bodies.get(name)? {
                ReferenceOr::Item(b) => Some(b),
                ReferenceOr::Reference { .. } => None,
            }
        }
    }
}

fn resolve_response<'a>(doc: &'a OpenAPI, resp: &'a ReferenceOr<Response>) -> Option<&'a Response> {
    match resp {
        ReferenceOr::Item(r) => Some(r),
        ReferenceOr::Reference { reference } => {
            let name = reference.strip_prefix("#/components/responses/")?;
            match doc.components.as_ref()?.responses.get(name)? {
                ReferenceOr::Item(r) => Some(r),
                ReferenceOr::Reference { .. } => None,
            }
        }
    }
}

fn lookup_schema<'a>(doc: &'a OpenAPI, reference: &str) -> Option<&'a ReferenceOr<Schema>> {
    let name = reference.strip_prefix("#/components/schemas/")?;
    doc.components.as_ref()?.schemas.get(name)
}

fn schema_ref_to_node<S>(doc: &OpenAPI, schema_ref: &ReferenceOr<S>, depth: usize) -> SchemaNode
where
    S: std::borrow::Borrow<Schema>,
{
    if depth > MAX_REF_DEPTH {
        return SchemaNode::any();
    }

    match schema_ref {
        ReferenceOr::Item(schema) => schema_to_node(doc, schema.borrow(), depth),
        ReferenceOr::Reference { reference } => match lookup_schema(doc, reference) {
            Some(ReferenceOr::Item(schema)) => schema_to_node(doc, schema, depth + 1),
            Some(inner @ ReferenceOr::Reference { .. }) => {
                schema_ref_to_node::<Schema>(doc, inner, depth + 1)
            }
            None => {
                tracing::warn!(reference = %reference, "unresolvable schema reference");
                SchemaNode::any()
            }
        },
    }
}

/// Convert an `openapiv3` schema into the tagged [`SchemaNode`] tree.
fn schema_to_node(doc: &OpenAPI, schema: &Schema, depth: usize) -> SchemaNode {
    let description = schema.schema_data.description.clone();

    let shape = match &schema.schema_kind {
        openapiv3::SchemaKind::Type(t) => match t {
            openapiv3::Type::String(s) => SchemaShape::Scalar {
                scalar: ScalarKind::String,
                enum_values: s.enumeration.iter().filter_map(Clone::clone).collect(),
            },
            openapiv3::Type::Number(_) => SchemaShape::Scalar {
                scalar: ScalarKind::Number,
                enum_values: Vec::new(),
            },
            openapiv3::Type::Integer(_) => SchemaShape::Scalar {
                scalar: ScalarKind::Integer,
                enum_values: Vec::new(),
            },
            openapiv3::Type::Boolean(_) => SchemaShape::Scalar {
                scalar: ScalarKind::Boolean,
                enum_values: Vec::new(),
            },
            openapiv3::Type::Array(a) => SchemaShape::Array {
                items: a
                    .items
                    .as_ref()
                    .map(|items| Box::new(schema_ref_to_node(doc, items, depth + 1))),
            },
            openapiv3::Type::Object(o) => {
                let mut properties = BTreeMap::new();
                for (name, prop) in &o.properties {
                    properties.insert(name.clone(), schema_ref_to_node(doc, prop, depth + 1));
                }
                SchemaShape::Object {
                    properties,
                    required: o.required.clone(),
                    additional: matches!(
                        o.additional_properties,
                        Some(openapiv3::AdditionalProperties::Any(true))
                            | Some(openapiv3::AdditionalProperties::Schema(_))
                    ),
                }
            }
        },
        // oneOf/allOf/anyOf and friends are out of scope; fall back to Any.
        _ => SchemaShape::Any,
    };

    SchemaNode { description, shape }
}
