//! REST invocation proxy.
//!
//! [`RestToolSource`] owns one compiled tool set plus its backend
//! configuration, and turns tool calls back into HTTP requests. Per-call
//! failures (unknown tool, missing parameters, non-2xx responses, transport
//! errors) are returned as tool results with `is_error` set, so callers
//! always receive a well-formed result.

use crate::compiler::{CompileOutcome, CompiledTool, compile};
use crate::config::{ApiKeyLocation, AuthConfig, BackendConfig};
use crate::error::{OpenApiToolsError, Result};
use crate::spec::{ParamLocation, extract_endpoints, load_spec};
use reqwest::Method;
use rmcp::model::{CallToolResult, Content, JsonObject, Tool};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// One tenant's compiled tool set bound to one REST backend.
#[derive(Debug, Clone)]
pub struct RestToolSource {
    name: String,
    config: BackendConfig,
    tools: Vec<CompiledTool>,
    skipped: usize,
    client: reqwest::Client,
}

#[derive(Debug)]
struct RequestParts {
    path: String,
    query_params: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<Value>,
}

impl RestToolSource {
    /// Load a spec, extract its endpoints and compile them into a tool source.
    ///
    /// # Errors
    ///
    /// Returns an error when the spec cannot be loaded or parsed, or when the
    /// backend config is invalid. Per-endpoint compile failures do not fail
    /// the source; they are logged and counted.
    pub async fn from_spec(
        name: impl Into<String>,
        spec_location: &str,
        config: BackendConfig,
        name_prefix: Option<&str>,
    ) -> Result<(Self, CompileOutcome)> {
        let doc = load_spec(spec_location).await?;
        let endpoints = extract_endpoints(&doc);
        let outcome = compile(&endpoints, name_prefix);
        let source = Self::from_outcome(name, config, &outcome)?;
        Ok((source, outcome))
    }

    /// Build a source from an already-compiled outcome.
    ///
    /// # Errors
    ///
    /// Returns [`OpenApiToolsError::Config`] when the base URL is not a valid
    /// absolute URL or the HTTP client cannot be constructed.
    pub fn from_outcome(
        name: impl Into<String>,
        config: BackendConfig,
        outcome: &CompileOutcome,
    ) -> Result<Self> {
        let name = name.into();
        Url::parse(&config.normalized_base_url()).map_err(|e| {
            OpenApiToolsError::Config(format!("invalid base URL '{}': {e}", config.base_url))
        })?;

        let timeout = match config.timeout {
            Some(0) => None, // explicit disable
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(DEFAULT_TIMEOUT),
        };
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t).connect_timeout(t);
        }
        let client = builder
            .build()
            .map_err(|e| OpenApiToolsError::Config(format!("HTTP client: {e}")))?;

        tracing::info!(
            source = %name,
            tools = outcome.compiled.len(),
            skipped = outcome.skipped.len(),
            "compiled REST tool source"
        );

        Ok(Self {
            name,
            config,
            tools: outcome.compiled.clone(),
            skipped: outcome.skipped.len(),
            client,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.skipped
    }

    #[must_use]
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }

    /// Replace the backend credential material (token/credential rotation).
    pub fn update_auth(&mut self, auth: Option<AuthConfig>) {
        self.config.auth = auth;
    }

    /// List the MCP `Tool`s exposed by this source.
    #[must_use]
    pub fn list_tools(&self) -> Vec<Tool> {
        self.tools
            .iter()
            .map(|t| {
                let schema_obj = t
                    .input_schema
                    .as_object()
                    .cloned()
                    .unwrap_or_else(JsonObject::new);
                Tool::new(t.name.clone(), t.description.clone(), Arc::new(schema_obj))
            })
            .collect()
    }

    /// Execute a tool call against the backend.
    ///
    /// Always returns a tool result; failures carry `is_error: Some(true)`.
    pub async fn call_tool(&self, name: &str, arguments: &Value) -> CallToolResult {
        let Some(tool) = self.tools.iter().find(|t| t.name == name) else {
            return error_result(format!("Error: unknown tool: {name}"));
        };

        let missing = missing_required(tool, arguments);
        if !missing.is_empty() {
            return error_result(format!(
                "Error: missing required parameters: {}",
                missing.join(", ")
            ));
        }

        let parts = match build_request_parts(tool, arguments, &self.config) {
            Ok(parts) => parts,
            Err(e) => return error_result(format!("Error: {e}")),
        };

        match self.execute_request(tool, parts).await {
            Ok(body) => {
                let text = match body {
                    Value::String(s) => s,
                    other => serde_json::to_string(&other).unwrap_or_else(|_| other.to_string()),
                };
                CallToolResult::success(vec![Content::text(text)])
            }
            // Backend rejections surface as "Error: {status} - {body}".
            Err(OpenApiToolsError::Http(detail)) => {
                tracing::warn!(source = %self.name, tool = %name, error = %detail, "backend rejected call");
                error_result(format!("Error: {detail}"))
            }
            Err(e) => {
                tracing::warn!(source = %self.name, tool = %name, error = %e, "tool call failed");
                error_result(format!("Error: {e}"))
            }
        }
    }

    async fn execute_request(&self, tool: &CompiledTool, parts: RequestParts) -> Result<Value> {
        let url = build_url(
            &self.config.normalized_base_url(),
            &parts.path,
            &parts.query_params,
        )?;

        let method = resolve_http_method(&tool.method)?;
        let mut request = self.client.request(method, url);
        request = self.apply_auth(request);
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }
        for (key, value) in &parts.headers {
            request = request.header(key, value);
        }
        if let Some(body) = &parts.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| OpenApiToolsError::Request(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| OpenApiToolsError::Request(e.to_string()))?;

        if status.is_success() {
            let body: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));
            Ok(body)
        } else {
            Err(OpenApiToolsError::Http(format!(
                "{} - {text}",
                status.as_u16()
            )))
        }
    }

    /// Apply authentication to the HTTP request.
    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth {
            Some(AuthConfig::Bearer { token }) => request.bearer_auth(token),
            Some(AuthConfig::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            }
            Some(AuthConfig::ApiKey {
                name,
                value,
                location: ApiKeyLocation::Header,
            }) => request.header(name, value),
            Some(AuthConfig::ApiKey {
                name,
                value,
                location: ApiKeyLocation::Cookie,
            }) => request.header(reqwest::header::COOKIE, format!("{name}={value}")),
            Some(AuthConfig::Custom { token }) => {
                request.header(reqwest::header::AUTHORIZATION, token)
            }
            // Query-located API keys are applied during URL building.
            Some(AuthConfig::ApiKey { .. } | AuthConfig::None) | None => request,
        }
    }
}

/// Required parameters absent from the arguments, all of them, in declaration
/// order. Body sub-fields are not inspected.
fn missing_required(tool: &CompiledTool, arguments: &Value) -> Vec<String> {
    tool.parameters
        .iter()
        .filter(|p| p.required)
        .filter(|p| {
            matches!(arguments.get(&p.name), None | Some(Value::Null))
        })
        .map(|p| p.name.clone())
        .collect()
}

fn build_request_parts(
    tool: &CompiledTool,
    arguments: &Value,
    config: &BackendConfig,
) -> Result<RequestParts> {
    let mut path = tool.path.clone();
    let mut query_params: Vec<(String, String)> = Vec::new();
    let mut headers: Vec<(String, String)> = Vec::new();
    let mut body_fields: serde_json::Map<String, Value> = serde_json::Map::new();
    let mut body_payload: Option<Value> = None;
    let mut consumed: Vec<&str> = Vec::new();

    for param in &tool.parameters {
        let Some(value) = arguments.get(&param.name).filter(|v| !v.is_null()) else {
            continue;
        };
        consumed.push(param.name.as_str());

        match param.location {
            ParamLocation::Path => {
                let placeholder = format!("{{{}}}", param.name);
                path = path.replace(&placeholder, &value_to_string(value));
            }
            ParamLocation::Query => {
                query_params.push((param.name.clone(), value_to_string(value)));
            }
            ParamLocation::Header => {
                headers.push((param.name.clone(), value_to_string(value)));
            }
            ParamLocation::Body => {
                if param.name == "body" {
                    // A single synthetic body parameter is sent verbatim,
                    // wrapped when it is not itself an object.
                    body_payload = Some(if value.is_object() {
                        value.clone()
                    } else {
                        json!({ "value": value })
                    });
                } else {
                    body_fields.insert(param.name.clone(), value.clone());
                }
            }
        }
    }

    if let Some(placeholder) = remaining_placeholder(&path) {
        return Err(OpenApiToolsError::Runtime(format!(
            "missing path parameter: {placeholder}"
        )));
    }

    // Arguments not consumed by a declared parameter: query string for
    // body-less methods, request body otherwise.
    let carries_body = matches!(tool.method.as_str(), "post" | "put" | "patch");
    if let Some(args) = arguments.as_object() {
        for (key, value) in args {
            if consumed.contains(&key.as_str()) || value.is_null() {
                continue;
            }
            if carries_body {
                body_fields.insert(key.clone(), value.clone());
            } else {
                query_params.push((key.clone(), value_to_string(value)));
            }
        }
    }

    if let Some(AuthConfig::ApiKey {
        name,
        value,
        location: ApiKeyLocation::Query,
    }) = &config.auth
    {
        query_params.push((name.clone(), value.clone()));
    }

    let body = if carries_body {
        match body_payload {
            Some(payload) => Some(payload),
            None if !body_fields.is_empty() => Some(Value::Object(body_fields)),
            None => None,
        }
    } else {
        None
    };

    if !path.starts_with('/') {
        path = format!("/{path}");
    }

    Ok(RequestParts {
        path,
        query_params,
        headers,
        body,
    })
}

fn remaining_placeholder(path: &str) -> Option<&str> {
    let start = path.find('{')?;
    let end = path[start..].find('}')? + start;
    Some(&path[start + 1..end])
}

fn build_url(base_url: &str, path: &str, query_params: &[(String, String)]) -> Result<Url> {
    let joined = format!("{}{}", base_url.trim_end_matches('/'), path);
    let mut url = Url::parse(&joined)
        .map_err(|e| OpenApiToolsError::Runtime(format!("invalid URL '{joined}': {e}")))?;

    if !query_params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in query_params {
            pairs.append_pair(key, value);
        }
    }

    Ok(url)
}

fn resolve_http_method(method: &str) -> Result<Method> {
    match method {
        "get" => Ok(Method::GET),
        "post" => Ok(Method::POST),
        "put" => Ok(Method::PUT),
        "delete" => Ok(Method::DELETE),
        "patch" => Ok(Method::PATCH),
        other => Err(OpenApiToolsError::Runtime(format!(
            "unsupported HTTP method: {other}"
        ))),
    }
}

/// Convert a JSON value to a string for URL/header parameters.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => value.to_string(),
    }
}

fn error_result(message: String) -> CallToolResult {
    CallToolResult {
        content: vec![Content::text(message)],
        structured_content: None,
        is_error: Some(true),
        meta: None,
    }
}
