//! HTTP surface of the gateway: per-tenant SSE streams and message posts.
//!
//! Every request walks the same pipeline: resolve the tenant id (path first,
//! `serverId` query as fallback), look the tenant up, authenticate the
//! caller, then pass admission control. Each stage maps to its own status
//! code so clients can tell the failures apart.

use crate::admission::AdmissionGuard;
use crate::mcp::{self, McpReply};
use crate::registry::TenantEntry;
use crate::service::GatewayService;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use axum::routing::{get, post};
use futures::StreamExt;
use rmcp::model::ServerJsonRpcMessage;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

const SESSION_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct GatewayState {
    pub service: Arc<GatewayService>,
}

/// Build the tenant-facing MCP routes.
pub fn mcp_routes(service: Arc<GatewayService>) -> Router {
    Router::new()
        .route("/mcp/{tenant_id}/sse", get(sse_with_path))
        .route("/mcp/{tenant_id}/message", post(message_with_path))
        .route("/mcp/sse", get(sse_with_query))
        .route("/mcp/message", post(message_with_query))
        .with_state(GatewayState { service })
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Stable admission key for one caller: auth identity, remote address, and
/// a short hash of the user agent.
fn client_key(
    state: &GatewayState,
    headers: &HeaderMap,
    addr: SocketAddr,
) -> String {
    let identity = state.service.registry().authenticator().identity(headers);
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    let digest = Sha256::digest(user_agent.as_bytes());
    format!("{identity}-{}-{}", addr.ip(), &hex::encode(digest)[..8])
}

/// Shared pre-dispatch pipeline. Returns the tenant and an admission guard,
/// or the error response to send back.
async fn admit(
    state: &GatewayState,
    tenant_id: Option<&str>,
    headers: &HeaderMap,
    addr: SocketAddr,
) -> std::result::Result<(Arc<TenantEntry>, AdmissionGuard), Response> {
    let Some(tenant_id) = tenant_id.filter(|id| !id.is_empty()) else {
        return Err(error_body(
            StatusCode::BAD_REQUEST,
            "missing tenant id: use /mcp/{serverId}/... or the serverId query parameter",
        ));
    };

    let Some(entry) = state.service.registry().get(tenant_id) else {
        return Err(error_body(
            StatusCode::NOT_FOUND,
            &format!("unknown server: {tenant_id}"),
        ));
    };

    let authenticator = state.service.registry().authenticator();
    if !authenticator.authenticate(headers, &entry.policy.auth) {
        tracing::debug!(tenant = %entry.id, scheme = %authenticator.scheme(), "authentication failed");
        return Err(error_body(StatusCode::UNAUTHORIZED, "authentication failed"));
    }

    let key = client_key(state, headers, addr);
    let Some(guard) = entry.admission.try_acquire(&key).await else {
        tracing::debug!(tenant = %entry.id, client = %key, "request rate limited");
        return Err(error_body(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded"));
    };

    Ok((entry, guard))
}

async fn sse_with_path(
    State(state): State<GatewayState>,
    Path(tenant_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    open_sse(&state, Some(&tenant_id), &headers, addr).await
}

async fn sse_with_query(
    State(state): State<GatewayState>,
    Query(query): Query<HashMap<String, String>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    open_sse(&state, query.get("serverId").map(String::as_str), &headers, addr).await
}

/// Ends the session when the SSE stream is dropped.
struct SessionCleanup {
    entry: Arc<TenantEntry>,
    session_id: String,
}

impl Drop for SessionCleanup {
    fn drop(&mut self) {
        self.entry.sessions.close(&self.session_id);
        tracing::debug!(tenant = %self.entry.id, session = %self.session_id, "session closed");
    }
}

async fn open_sse(
    state: &GatewayState,
    tenant_id: Option<&str>,
    headers: &HeaderMap,
    addr: SocketAddr,
) -> Response {
    let (entry, guard) = match admit(state, tenant_id, headers, addr).await {
        Ok(admitted) => admitted,
        Err(response) => return response,
    };

    let session_id = Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::channel::<ServerJsonRpcMessage>(SESSION_CHANNEL_CAPACITY);
    entry.sessions.open(&session_id, tx);
    tracing::info!(tenant = %entry.id, session = %session_id, "session opened");

    // Admission covers the handshake only; a long-lived idle stream must not
    // pin a concurrency slot.
    guard.release();

    let endpoint = Event::default().event("endpoint").data(format!(
        "/mcp/{}/message?sessionId={session_id}",
        entry.id
    ));

    let cleanup = SessionCleanup {
        entry: Arc::clone(&entry),
        session_id,
    };
    let messages = ReceiverStream::new(rx).map(move |message| {
        let _owns = &cleanup;
        let data = serde_json::to_string(&message).unwrap_or_default();
        Ok::<Event, Infallible>(Event::default().event("message").data(data))
    });
    let stream = futures::stream::once(async move { Ok(endpoint) }).chain(messages);

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

async fn message_with_path(
    State(state): State<GatewayState>,
    Path(tenant_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    handle_post(&state, Some(&tenant_id), &query, &headers, addr, payload).await
}

async fn message_with_query(
    State(state): State<GatewayState>,
    Query(query): Query<HashMap<String, String>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    let tenant_id = query.get("serverId").cloned();
    handle_post(&state, tenant_id.as_deref(), &query, &headers, addr, payload).await
}

async fn handle_post(
    state: &GatewayState,
    tenant_id: Option<&str>,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
    addr: SocketAddr,
    payload: Value,
) -> Response {
    let (entry, guard) = match admit(state, tenant_id, headers, addr).await {
        Ok(admitted) => admitted,
        Err(response) => return response,
    };

    let reply = mcp::handle_message(&entry, payload).await;
    guard.release();

    match reply {
        McpReply::Accepted => StatusCode::ACCEPTED.into_response(),
        McpReply::Message(message) => match query.get("sessionId") {
            Some(session_id) => {
                if entry.sessions.send(session_id, message).await {
                    StatusCode::ACCEPTED.into_response()
                } else {
                    error_body(
                        StatusCode::NOT_FOUND,
                        &format!("unknown session: {session_id}"),
                    )
                }
            }
            // No established stream: answer inline.
            None => Json(message).into_response(),
        },
    }
}
