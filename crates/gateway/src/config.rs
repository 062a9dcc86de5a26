//! Gateway and per-tenant policy configuration.

use crate::error::{GatewayError, Result};
use restgate_openapi_tools::config::AuthConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level gateway configuration, loadable from YAML.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Default policy applied to tenants registered without one.
    #[serde(default)]
    pub default_policy: TenantPolicy,

    /// Backends registered at startup.
    #[serde(default)]
    pub backends: Vec<PreregisteredBackend>,
}

impl GatewayConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

/// One backend to expose at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreregisteredBackend {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// OpenAPI spec location: URL, file path, or inline content.
    pub spec: String,
    pub base_url: String,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub tool_prefix: Option<String>,
    #[serde(default)]
    pub policy: Option<TenantPolicy>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Per-tenant gateway policy: how callers authenticate and how much traffic
/// they may push. Replaced atomically on tenant update.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantPolicy {
    #[serde(default)]
    pub auth: TenantAuthPolicy,
    #[serde(default)]
    pub rate_limit: RateLimitPolicy,
}

impl TenantPolicy {
    /// Reject policies whose credential material is incomplete.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when required material is missing.
    pub fn validate(&self) -> Result<()> {
        match self.auth.auth_type {
            AuthType::Jwt if self.auth.jwt_secret.as_deref().is_none_or(str::is_empty) => {
                Err(GatewayError::Config(
                    "authType 'jwt' requires a jwtSecret".to_string(),
                ))
            }
            AuthType::ApiKey if self.auth.api_keys.is_empty() => Err(GatewayError::Config(
                "authType 'apikey' requires a non-empty apiKeys table".to_string(),
            )),
            AuthType::Custom if self.auth.custom_handler.as_deref().is_none_or(str::is_empty) => {
                Err(GatewayError::Config(
                    "authType 'custom' requires a customHandler name".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// How callers of one tenant authenticate.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantAuthPolicy {
    #[serde(default)]
    pub auth_type: AuthType,

    /// keyId -> secret table for `apikey` auth.
    #[serde(default)]
    pub api_keys: HashMap<String, String>,

    /// HS256 secret for `jwt` auth.
    #[serde(default)]
    pub jwt_secret: Option<String>,

    /// Registered handler name for `custom` auth.
    #[serde(default)]
    pub custom_handler: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    None,
    #[serde(rename = "apikey")]
    ApiKey,
    Jwt,
    Custom,
}

/// Per-tenant admission policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitPolicy {
    #[serde(default)]
    pub enabled: bool,

    /// Token bucket capacity and refill rate, per second.
    #[serde(default = "default_max_tps")]
    pub max_tps: u32,

    /// Bounded concurrency per tenant.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,

    /// Forwarded tool-call timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_max_tps() -> u32 {
    10
}

fn default_max_concurrent() -> u32 {
    10
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_tps: default_max_tps(),
            max_concurrent: default_max_concurrent(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}
