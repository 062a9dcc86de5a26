use anyhow::Context as _;
use axum::extract::{Path, Query};
use axum::routing::get;
use axum::{Json, Router};
use restgate_gateway::auth::CustomHandlerRegistry;
use restgate_gateway::config::TenantPolicy;
use restgate_gateway::registry::TenantRegistry;
use restgate_gateway::service::{CreateServerRequest, GatewayService, ServerInfo};
use restgate_gateway::{admin, router};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

pub const ITEMS_SPEC: &str = r#"
openapi: 3.0.0
info: { title: Items, version: "1.0.0" }
paths:
  /items/{id}:
    get:
      operationId: getItem
      summary: Fetch one item
      parameters:
        - name: id
          in: path
          required: true
          schema: { type: string }
      responses:
        "200": { description: ok }
"#;

/// REST backend the gateway proxies to in tests.
pub async fn spawn_backend() -> anyhow::Result<SocketAddr> {
    async fn get_item(
        Path(id): Path<String>,
        Query(query): Query<HashMap<String, String>>,
    ) -> Json<Value> {
        Json(json!({ "id": id, "query": query }))
    }

    let app = Router::new().route("/items/{id}", get(get_item));
    restgate_test_support::spawn_router(app).await
}

pub struct TestGateway {
    pub addr: SocketAddr,
    pub service: Arc<GatewayService>,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub async fn create_server(
        &self,
        name: &str,
        backend: SocketAddr,
        policy: Option<TenantPolicy>,
    ) -> anyhow::Result<ServerInfo> {
        self.service
            .create_server(CreateServerRequest {
                name: name.to_string(),
                version: "1.0.0".to_string(),
                spec: ITEMS_SPEC.to_string(),
                base_url: format!("http://{backend}"),
                auth: None,
                tool_prefix: None,
                policy,
            })
            .await
            .context("create test server")
    }
}

/// In-process gateway with both the MCP routes and the admin API mounted.
pub async fn spawn_gateway() -> anyhow::Result<TestGateway> {
    spawn_gateway_with(Arc::new(CustomHandlerRegistry::new())).await
}

pub async fn spawn_gateway_with(
    custom_handlers: Arc<CustomHandlerRegistry>,
) -> anyhow::Result<TestGateway> {
    let registry = Arc::new(TenantRegistry::new(custom_handlers));
    // Placeholder base URL, replaced once the listener port is known.
    let service = Arc::new(GatewayService::new(
        registry,
        TenantPolicy::default(),
        "http://gateway.test",
    ));
    let app = router::mcp_routes(Arc::clone(&service))
        .merge(admin::admin_routes(Arc::clone(&service)));
    let addr = restgate_test_support::spawn_router(app).await?;
    Ok(TestGateway { addr, service })
}

pub fn rpc(id: u64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}
