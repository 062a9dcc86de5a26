//! Tenant lifecycle management: create, list, stop.

use crate::config::{GatewayConfig, PreregisteredBackend, TenantPolicy};
use crate::error::Result;
use crate::registry::{LifecycleState, TenantEntry, TenantRegistry};
use restgate_openapi_tools::compiler::CompileOutcome;
use restgate_openapi_tools::config::BackendConfig;
use restgate_openapi_tools::runtime::RestToolSource;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Request to expose one REST backend as a virtual MCP server.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateServerRequest {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// OpenAPI spec location: URL, file path, or inline content.
    pub spec: String,
    pub base_url: String,
    #[serde(default)]
    pub auth: Option<restgate_openapi_tools::config::AuthConfig>,
    #[serde(default)]
    pub tool_prefix: Option<String>,
    #[serde(default)]
    pub policy: Option<TenantPolicy>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Public description of one tenant.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub access_url: String,
    pub tool_count: usize,
    pub skipped_endpoints: usize,
    pub active_sessions: usize,
}

impl ServerInfo {
    fn from_entry(entry: &TenantEntry) -> Self {
        Self {
            id: entry.id.clone(),
            name: entry.name.clone(),
            version: entry.version.clone(),
            access_url: entry.access_url.clone(),
            tool_count: entry.source.tool_count(),
            skipped_endpoints: entry.source.skipped_count(),
            active_sessions: entry.sessions.len(),
        }
    }
}

/// Creates and retires tenants against the registry.
pub struct GatewayService {
    registry: Arc<TenantRegistry>,
    default_policy: TenantPolicy,
    public_base_url: String,
}

impl GatewayService {
    #[must_use]
    pub fn new(
        registry: Arc<TenantRegistry>,
        default_policy: TenantPolicy,
        public_base_url: &str,
    ) -> Self {
        Self {
            registry,
            default_policy,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<TenantRegistry> {
        &self.registry
    }

    /// Register every backend listed in the startup configuration.
    ///
    /// # Errors
    ///
    /// Fails on the first backend whose spec cannot be loaded or whose
    /// policy is invalid.
    pub async fn register_from_config(&self, config: &GatewayConfig) -> Result<Vec<ServerInfo>> {
        let mut created = Vec::with_capacity(config.backends.len());
        for backend in &config.backends {
            let info = self.create_server(Self::request_from_backend(backend)).await?;
            created.push(info);
        }
        Ok(created)
    }

    fn request_from_backend(backend: &PreregisteredBackend) -> CreateServerRequest {
        CreateServerRequest {
            name: backend.name.clone(),
            version: backend.version.clone(),
            spec: backend.spec.clone(),
            base_url: backend.base_url.clone(),
            auth: backend.auth.clone(),
            tool_prefix: backend.tool_prefix.clone(),
            policy: backend.policy.clone(),
        }
    }

    /// Compile a backend's spec and register it as a new tenant.
    ///
    /// # Errors
    ///
    /// Returns an error when the policy is invalid, the spec cannot be
    /// loaded or compiled, or the generated id collides.
    pub async fn create_server(&self, request: CreateServerRequest) -> Result<ServerInfo> {
        let policy = request
            .policy
            .unwrap_or_else(|| self.default_policy.clone());
        policy.validate()?;

        let mut backend_config = BackendConfig::new(&request.base_url);
        backend_config.auth = request.auth;

        let (source, outcome) = RestToolSource::from_spec(
            &request.name,
            &request.spec,
            backend_config,
            request.tool_prefix.as_deref(),
        )
        .await?;
        log_compile_outcome(&request.name, &outcome);

        let id = format!("server-{}", &Uuid::new_v4().simple().to_string()[..12]);
        let access_url = format!("{}/mcp/{id}/sse", self.public_base_url);

        let entry = Arc::new(TenantEntry::new(
            id,
            request.name,
            request.version,
            access_url,
            source,
            policy,
        ));
        self.registry.insert(Arc::clone(&entry))?;

        tracing::info!(
            tenant = %entry.id,
            name = %entry.name,
            tools = entry.source.tool_count(),
            "virtual server registered"
        );
        Ok(ServerInfo::from_entry(&entry))
    }

    #[must_use]
    pub fn list_servers(&self) -> Vec<ServerInfo> {
        self.registry
            .list()
            .iter()
            .map(|entry| ServerInfo::from_entry(entry))
            .collect()
    }

    #[must_use]
    pub fn get_server(&self, tenant_id: &str) -> Option<ServerInfo> {
        self.registry
            .get(tenant_id)
            .map(|entry| ServerInfo::from_entry(&entry))
    }

    #[must_use]
    pub fn usage_rate(&self, tenant_id: &str) -> Option<f64> {
        self.registry
            .get(tenant_id)
            .map(|entry| entry.admission.usage_rate())
    }

    /// Stop one tenant: hide it from routing, drop it from the registry,
    /// then end its sessions.
    pub fn stop_server(&self, tenant_id: &str) -> bool {
        let Some(entry) = self.registry.get(tenant_id) else {
            return false;
        };
        entry.set_state(LifecycleState::Stopping);
        self.registry.remove(tenant_id);
        entry.sessions.close_all();
        entry.set_state(LifecycleState::Stopped);
        tracing::info!(tenant = %tenant_id, "virtual server stopped");
        true
    }

    /// Stop every tenant. Used by the admin API and at shutdown.
    pub fn stop_all(&self) -> usize {
        let ids: Vec<_> = self
            .registry
            .list()
            .iter()
            .map(|entry| entry.id.clone())
            .collect();
        let mut stopped = 0;
        for id in ids {
            if self.stop_server(&id) {
                stopped += 1;
            }
        }
        stopped
    }
}

fn log_compile_outcome(name: &str, outcome: &CompileOutcome) {
    for skipped in &outcome.skipped {
        tracing::warn!(
            backend = %name,
            method = %skipped.method,
            path = %skipped.path,
            reason = %skipped.reason,
            "endpoint skipped during tool compilation"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CustomHandlerRegistry;
    use crate::config::{AuthType, TenantAuthPolicy};

    const SPEC: &str = r#"
openapi: 3.0.0
info: { title: Ping, version: "1.0.0" }
paths:
  /ping:
    get:
      operationId: ping
      responses:
        "200": { description: ok }
"#;

    fn service() -> GatewayService {
        let registry = Arc::new(TenantRegistry::new(Arc::new(CustomHandlerRegistry::new())));
        GatewayService::new(registry, TenantPolicy::default(), "http://localhost:8080/")
    }

    fn request(name: &str) -> CreateServerRequest {
        CreateServerRequest {
            name: name.to_string(),
            version: "2.0.0".to_string(),
            spec: SPEC.to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            auth: None,
            tool_prefix: None,
            policy: None,
        }
    }

    #[tokio::test]
    async fn create_assigns_id_and_access_url() {
        let service = service();
        let info = service.create_server(request("petstore")).await.unwrap();
        assert!(info.id.starts_with("server-"));
        assert_eq!(
            info.access_url,
            format!("http://localhost:8080/mcp/{}/sse", info.id)
        );
        assert_eq!(info.tool_count, 1);
        assert_eq!(service.list_servers().len(), 1);
    }

    #[tokio::test]
    async fn invalid_policy_is_rejected_before_registration() {
        let service = service();
        let mut req = request("petstore");
        req.policy = Some(TenantPolicy {
            auth: TenantAuthPolicy {
                auth_type: AuthType::Jwt,
                ..Default::default()
            },
            ..Default::default()
        });
        assert!(service.create_server(req).await.is_err());
        assert!(service.list_servers().is_empty());
    }

    #[tokio::test]
    async fn zero_path_spec_registers_a_server_without_tools() {
        let service = service();
        let mut req = request("empty");
        req.spec = r#"
openapi: 3.0.0
info: { title: Empty, version: "1.0.0" }
paths: {}
"#
        .to_string();
        let info = service.create_server(req).await.unwrap();
        assert_eq!(info.tool_count, 0);
    }

    #[tokio::test]
    async fn stop_removes_tenant_and_reports_absent_ids() {
        let service = service();
        let info = service.create_server(request("petstore")).await.unwrap();
        assert!(service.stop_server(&info.id));
        assert!(service.get_server(&info.id).is_none());
        assert!(!service.stop_server(&info.id));
    }

    #[tokio::test]
    async fn stop_all_clears_the_registry() {
        let service = service();
        service.create_server(request("a")).await.unwrap();
        service.create_server(request("b")).await.unwrap();
        assert_eq!(service.stop_all(), 2);
        assert!(service.registry().is_empty());
    }
}
