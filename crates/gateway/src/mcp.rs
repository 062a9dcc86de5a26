//! MCP protocol handling for one tenant: session tracking and JSON-RPC
//! message dispatch.
//!
//! The gateway speaks JSON-RPC over SSE itself rather than running one MCP
//! server task per tenant. Incoming messages are parsed here and answered
//! with typed protocol responses; `tools/call` forwards to the tenant's REST
//! tool source.

use crate::registry::TenantEntry;
use parking_lot::RwLock;
use rmcp::model::{
    CallToolResult, Content, EmptyObject, ErrorCode, ErrorData, Implementation, InitializeResult,
    JsonRpcError, JsonRpcResponse, JsonRpcVersion2_0, ListToolsResult, ProtocolVersion, RequestId,
    ServerCapabilities, ServerJsonRpcMessage, ServerResult,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

const SERVER_NAME: &str = "restgate";

/// Incoming JSON-RPC request or notification.
#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    #[allow(dead_code)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// What the message endpoint should do with the outcome.
#[derive(Debug)]
pub enum McpReply {
    /// A response to deliver to the caller.
    Message(ServerJsonRpcMessage),
    /// Notification consumed, nothing to send.
    Accepted,
}

/// Live SSE sessions for one tenant, keyed by session id.
#[derive(Default)]
pub struct SessionMap {
    senders: RwLock<HashMap<String, mpsc::Sender<ServerJsonRpcMessage>>>,
}

impl SessionMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, session_id: &str, tx: mpsc::Sender<ServerJsonRpcMessage>) {
        self.senders.write().insert(session_id.to_string(), tx);
    }

    pub fn close(&self, session_id: &str) {
        self.senders.write().remove(session_id);
    }

    /// Drop all senders so every connected stream ends.
    pub fn close_all(&self) {
        self.senders.write().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.senders.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.senders.read().is_empty()
    }

    /// Deliver a message to one session. Returns false when the session is
    /// unknown or its stream is gone.
    pub async fn send(&self, session_id: &str, message: ServerJsonRpcMessage) -> bool {
        let tx = self.senders.read().get(session_id).cloned();
        match tx {
            Some(tx) => tx.send(message).await.is_ok(),
            None => false,
        }
    }
}

fn request_id(raw: Option<&Value>) -> RequestId {
    raw.and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or(RequestId::Number(0))
}

fn response(id: RequestId, result: ServerResult) -> ServerJsonRpcMessage {
    ServerJsonRpcMessage::Response(JsonRpcResponse {
        jsonrpc: JsonRpcVersion2_0,
        id,
        result,
    })
}

fn error(id: RequestId, code: ErrorCode, message: String) -> ServerJsonRpcMessage {
    ServerJsonRpcMessage::Error(JsonRpcError {
        jsonrpc: JsonRpcVersion2_0,
        id,
        error: ErrorData::new(code, message, None),
    })
}

fn initialize_result(entry: &TenantEntry) -> InitializeResult {
    InitializeResult {
        protocol_version: ProtocolVersion::LATEST,
        capabilities: ServerCapabilities::builder().enable_tools().build(),
        server_info: Implementation {
            name: format!("{SERVER_NAME}-{}", entry.name),
            version: entry.version.clone(),
            ..Default::default()
        },
        instructions: Some(format!(
            "Tools for the '{}' REST backend, served through {SERVER_NAME}.",
            entry.name
        )),
    }
}

/// Handle one JSON-RPC message addressed to a tenant.
pub async fn handle_message(entry: &TenantEntry, raw: Value) -> McpReply {
    let message: IncomingMessage = match serde_json::from_value(raw) {
        Ok(message) => message,
        Err(err) => {
            return McpReply::Message(error(
                RequestId::Number(0),
                ErrorCode::PARSE_ERROR,
                format!("invalid JSON-RPC message: {err}"),
            ));
        }
    };

    // Notifications carry no id and get no reply.
    if message.id.is_none() {
        tracing::debug!(tenant = %entry.id, method = %message.method, "notification consumed");
        return McpReply::Accepted;
    }
    let id = request_id(message.id.as_ref());

    match message.method.as_str() {
        "initialize" => McpReply::Message(response(
            id,
            ServerResult::InitializeResult(initialize_result(entry)),
        )),
        "ping" => McpReply::Message(response(id, ServerResult::EmptyResult(EmptyObject {}))),
        "tools/list" => McpReply::Message(response(
            id,
            ServerResult::ListToolsResult(ListToolsResult {
                tools: entry.source.list_tools(),
                ..Default::default()
            }),
        )),
        "tools/call" => McpReply::Message(handle_tool_call(entry, id, message.params).await),
        other => McpReply::Message(error(
            id,
            ErrorCode::METHOD_NOT_FOUND,
            format!("method not found: {other}"),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

async fn handle_tool_call(
    entry: &TenantEntry,
    id: RequestId,
    params: Option<Value>,
) -> ServerJsonRpcMessage {
    let params: ToolCallParams = match params.map(serde_json::from_value).transpose() {
        Ok(Some(params)) => params,
        Ok(None) | Err(_) => {
            return error(
                id,
                ErrorCode::INVALID_PARAMS,
                "tools/call requires a tool name".to_string(),
            );
        }
    };

    let timeout = Duration::from_millis(entry.policy.rate_limit.request_timeout_ms);
    let result = match tokio::time::timeout(
        timeout,
        entry.source.call_tool(&params.name, &params.arguments),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(tenant = %entry.id, tool = %params.name, "tool call timed out");
            CallToolResult {
                content: vec![Content::text(format!(
                    "Error: request timed out after {}ms",
                    timeout.as_millis()
                ))],
                structured_content: None,
                is_error: Some(true),
                meta: None,
            }
        }
    };

    response(id, ServerResult::CallToolResult(result))
}
