//! Management API for registering and retiring virtual servers.

use crate::error::GatewayError;
use crate::service::{CreateServerRequest, GatewayService};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;

/// Build the management routes.
pub fn admin_routes(service: Arc<GatewayService>) -> Router {
    Router::new()
        .route(
            "/servers",
            get(list_servers).post(create_server).delete(stop_all_servers),
        )
        .route("/servers/{id}", get(get_server).delete(stop_server))
        .route("/servers/{id}/usage", get(server_usage))
        .route("/health", get(health))
        .with_state(service)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn create_server(
    State(service): State<Arc<GatewayService>>,
    Json(request): Json<CreateServerRequest>,
) -> Response {
    match service.create_server(request).await {
        Ok(info) => (StatusCode::CREATED, Json(info)).into_response(),
        Err(err) => {
            let status = match &err {
                GatewayError::Config(_) | GatewayError::Tools(_) => StatusCode::BAD_REQUEST,
                GatewayError::Registry(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            tracing::warn!(error = %err, "server creation failed");
            (status, Json(json!({ "error": err.to_string() }))).into_response()
        }
    }
}

async fn list_servers(State(service): State<Arc<GatewayService>>) -> Response {
    Json(service.list_servers()).into_response()
}

async fn get_server(
    State(service): State<Arc<GatewayService>>,
    Path(id): Path<String>,
) -> Response {
    match service.get_server(&id) {
        Some(info) => Json(info).into_response(),
        None => not_found(&id),
    }
}

async fn server_usage(
    State(service): State<Arc<GatewayService>>,
    Path(id): Path<String>,
) -> Response {
    match service.usage_rate(&id) {
        Some(rate) => Json(json!({ "id": id, "usageRate": rate })).into_response(),
        None => not_found(&id),
    }
}

async fn stop_server(
    State(service): State<Arc<GatewayService>>,
    Path(id): Path<String>,
) -> Response {
    if service.stop_server(&id) {
        Json(json!({ "id": id, "stopped": true })).into_response()
    } else {
        not_found(&id)
    }
}

async fn stop_all_servers(State(service): State<Arc<GatewayService>>) -> Response {
    let stopped = service.stop_all();
    Json(json!({ "stopped": stopped })).into_response()
}

fn not_found(id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("unknown server: {id}") })),
    )
        .into_response()
}
