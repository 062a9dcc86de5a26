//! Endpoint -> tool compilation.
//!
//! Compilation is best-effort per endpoint: a single endpoint that fails to
//! compile is recorded in [`CompileOutcome::skipped`] and excluded, never
//! failing the whole document.

use crate::error::{OpenApiToolsError, Result};
use crate::spec::{EndpointDescriptor, ParamLocation};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::fmt::Write as _;

const MAX_TOOL_NAME_LEN: usize = 64;

/// One parameter of a compiled tool, carrying enough routing information for
/// the invocation proxy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolParameter {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    pub schema: Value,
}

/// One compiled tool: name, description, input schema, and the endpoint data
/// needed to execute it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompiledTool {
    pub name: String,
    pub description: String,
    /// JSON-Schema-like object for the tool inputs.
    pub input_schema: Value,
    /// Lowercase HTTP method.
    pub method: String,
    /// Path template with `{name}` placeholders.
    pub path: String,
    pub parameters: Vec<ToolParameter>,
}

/// A per-endpoint compilation failure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SkippedEndpoint {
    pub method: String,
    pub path: String,
    pub reason: String,
}

/// Explicit best-effort compilation outcome: what compiled, and what was
/// skipped with its reason. Callers can inspect partial failures instead of
/// only reading logs.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CompileOutcome {
    pub compiled: Vec<CompiledTool>,
    pub skipped: Vec<SkippedEndpoint>,
}

/// Compile endpoint descriptors into tool descriptors.
///
/// Tool names are unique within one outcome; a name collision is a
/// compile-time error for the colliding endpoint (recorded as skipped), never
/// masked by last-wins.
#[must_use]
pub fn compile(endpoints: &[EndpointDescriptor], name_prefix: Option<&str>) -> CompileOutcome {
    let mut outcome = CompileOutcome::default();
    let mut names: HashSet<String> = HashSet::new();

    for endpoint in endpoints {
        match compile_endpoint(endpoint, name_prefix, &mut names) {
            Ok(tool) => outcome.compiled.push(tool),
            Err(e) => {
                tracing::warn!(
                    method = %endpoint.method,
                    path = %endpoint.path,
                    error = %e,
                    "skipping endpoint that failed to compile"
                );
                outcome.skipped.push(SkippedEndpoint {
                    method: endpoint.method.clone(),
                    path: endpoint.path.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    outcome
}

fn compile_endpoint(
    endpoint: &EndpointDescriptor,
    name_prefix: Option<&str>,
    names: &mut HashSet<String>,
) -> Result<CompiledTool> {
    let name = tool_name(endpoint, name_prefix)?;
    if !names.insert(name.clone()) {
        return Err(OpenApiToolsError::Runtime(format!(
            "duplicate tool name: {name}"
        )));
    }

    let parameters: Vec<ToolParameter> = endpoint
        .parameters
        .iter()
        .map(|p| ToolParameter {
            name: p.name.clone(),
            location: p.location,
            required: p.required,
            schema: p.schema.to_json_schema(),
        })
        .collect();

    Ok(CompiledTool {
        name,
        description: tool_description(endpoint),
        input_schema: build_input_schema(&parameters),
        method: endpoint.method.clone(),
        path: endpoint.path.clone(),
        parameters,
    })
}

/// Derive a tool name: prefix + operationId when present, otherwise a
/// canonical name synthesized from method and path.
fn tool_name(endpoint: &EndpointDescriptor, prefix: Option<&str>) -> Result<String> {
    let base = match endpoint.operation_id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => id.to_string(),
        None => generate_canonical_name(&endpoint.method, &endpoint.path),
    };

    if base.is_empty() {
        return Err(OpenApiToolsError::Runtime(
            "endpoint yields an empty tool name".to_string(),
        ));
    }

    Ok(match prefix {
        Some(p) if !p.is_empty() => format!("{p}{base}"),
        _ => base,
    })
}

/// Generate a canonical tool name from method and path.
fn generate_canonical_name(method: &str, path: &str) -> String {
    let mut name = format!("{}_{}", method.to_lowercase(), path);

    // Replace path params {param} with _param
    let re = Regex::new(r"\{([^}]+)\}").expect("static regex");
    name = re.replace_all(&name, "_$1").to_string();

    // Replace non-alphanumeric runs with a single underscore
    let re = Regex::new(r"[^a-zA-Z0-9]+").expect("static regex");
    name = re.replace_all(&name, "_").to_string();

    // Trim underscores
    name = name.trim_matches('_').to_string();

    // Cap length
    if name.len() > MAX_TOOL_NAME_LEN {
        name = name[..MAX_TOOL_NAME_LEN].to_string();
    }

    name
}

/// Assemble the human-readable description: method and path, summary and
/// description when present, then a parameter bullet list.
fn tool_description(endpoint: &EndpointDescriptor) -> String {
    let mut out = format!("{} {}", endpoint.method.to_uppercase(), endpoint.path);

    if let Some(summary) = endpoint.summary.as_deref().filter(|s| !s.is_empty()) {
        let _ = write!(out, "\n\n{summary}");
    }
    if let Some(desc) = endpoint.description.as_deref().filter(|s| !s.is_empty()) {
        let _ = write!(out, "\n\n{desc}");
    }

    if !endpoint.parameters.is_empty() {
        out.push_str("\n\nParameters:");
        for param in &endpoint.parameters {
            let requirement = if param.required { "required" } else { "optional" };
            let _ = write!(out, "\n- {} ({}, {})", param.name, param.location, requirement);
            if let Some(desc) = param.description.as_deref().filter(|s| !s.is_empty()) {
                let _ = write!(out, ": {desc}");
            }
        }
    }

    out
}

/// Build the tool input schema from its parameter list.
fn build_input_schema(parameters: &[ToolParameter]) -> Value {
    let mut properties = json!({});
    let mut required: Vec<String> = Vec::new();

    for param in parameters {
        properties[&param.name] = param.schema.clone();
        if param.required {
            required.push(param.name.clone());
        }
    }

    let mut schema = json!({
        "type": "object",
        "properties": properties,
    });

    if !required.is_empty() {
        schema["required"] = json!(required);
    }

    schema
}
