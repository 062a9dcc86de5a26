//! Tenant registry: the live table of virtual MCP servers.
//!
//! Every mutation rebuilds the shared authenticator so the gateway always
//! enforces the strongest scheme any registered tenant demands.

use crate::admission::TenantAdmission;
use crate::auth::{CustomHandlerRegistry, GatewayAuthenticator, select_authenticator};
use crate::config::TenantPolicy;
use crate::error::{GatewayError, Result};
use crate::mcp::SessionMap;
use parking_lot::RwLock;
use restgate_openapi_tools::runtime::RestToolSource;
use std::collections::HashMap;
use std::sync::Arc;

/// Tenant lifecycle. `get` only hands out `Active` tenants, so a tenant
/// being stopped disappears from routing before its sessions are closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Active,
    Stopping,
    Stopped,
}

/// One registered tenant and everything the request path needs for it.
pub struct TenantEntry {
    pub id: String,
    pub name: String,
    pub version: String,
    pub access_url: String,
    pub source: RestToolSource,
    pub policy: TenantPolicy,
    pub admission: Arc<TenantAdmission>,
    pub sessions: SessionMap,
    state: RwLock<LifecycleState>,
}

impl TenantEntry {
    #[must_use]
    pub fn new(
        id: String,
        name: String,
        version: String,
        access_url: String,
        source: RestToolSource,
        policy: TenantPolicy,
    ) -> Self {
        let admission = TenantAdmission::new(&policy.rate_limit);
        Self {
            id,
            name,
            version,
            access_url,
            source,
            policy,
            admission,
            sessions: SessionMap::new(),
            state: RwLock::new(LifecycleState::Active),
        }
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    pub fn set_state(&self, state: LifecycleState) {
        *self.state.write() = state;
    }

    #[cfg(test)]
    pub fn for_tests(
        id: &str,
        name: &str,
        version: &str,
        source: RestToolSource,
        policy: TenantPolicy,
    ) -> Self {
        Self::new(
            id.to_string(),
            name.to_string(),
            version.to_string(),
            format!("http://localhost/mcp/{id}/sse"),
            source,
            policy,
        )
    }
}

/// The live tenant table plus the shared authenticator derived from it.
pub struct TenantRegistry {
    tenants: RwLock<HashMap<String, Arc<TenantEntry>>>,
    authenticator: RwLock<Arc<dyn GatewayAuthenticator>>,
    custom_handlers: Arc<CustomHandlerRegistry>,
}

impl TenantRegistry {
    #[must_use]
    pub fn new(custom_handlers: Arc<CustomHandlerRegistry>) -> Self {
        let authenticator = select_authenticator(std::iter::empty(), &custom_handlers);
        Self {
            tenants: RwLock::new(HashMap::new()),
            authenticator: RwLock::new(authenticator),
            custom_handlers,
        }
    }

    /// Register a tenant under its id.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Registry`] when the id is already taken.
    pub fn insert(&self, entry: Arc<TenantEntry>) -> Result<()> {
        {
            let mut tenants = self.tenants.write();
            if tenants.contains_key(&entry.id) {
                return Err(GatewayError::Registry(format!(
                    "tenant '{}' already registered",
                    entry.id
                )));
            }
            tenants.insert(entry.id.clone(), entry);
        }
        self.rebuild_authenticator();
        Ok(())
    }

    /// Remove and return a tenant. The caller owns session teardown.
    pub fn remove(&self, tenant_id: &str) -> Option<Arc<TenantEntry>> {
        let removed = self.tenants.write().remove(tenant_id);
        if removed.is_some() {
            self.rebuild_authenticator();
        }
        removed
    }

    /// Look up a tenant for routing. Tenants being stopped are invisible.
    #[must_use]
    pub fn get(&self, tenant_id: &str) -> Option<Arc<TenantEntry>> {
        self.tenants
            .read()
            .get(tenant_id)
            .filter(|entry| entry.state() == LifecycleState::Active)
            .cloned()
    }

    #[must_use]
    pub fn list(&self) -> Vec<Arc<TenantEntry>> {
        let mut entries: Vec<_> = self.tenants.read().values().cloned().collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tenants.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tenants.read().is_empty()
    }

    /// The shared authenticator covering the current tenant set.
    #[must_use]
    pub fn authenticator(&self) -> Arc<dyn GatewayAuthenticator> {
        Arc::clone(&self.authenticator.read())
    }

    #[must_use]
    pub fn custom_handlers(&self) -> &Arc<CustomHandlerRegistry> {
        &self.custom_handlers
    }

    fn rebuild_authenticator(&self) {
        let tenants = self.tenants.read();
        let policies: Vec<_> = tenants.values().map(|e| &e.policy.auth).collect();
        let selected = select_authenticator(policies, &self.custom_handlers);
        drop(tenants);
        tracing::debug!(scheme = %selected.scheme(), "gateway authenticator rebuilt");
        *self.authenticator.write() = selected;
    }
}
