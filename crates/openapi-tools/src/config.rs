use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-backend REST call configuration.
///
/// Immutable for the lifetime of a tenant except through explicit update
/// operations (credential rotation).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Base URL of the wrapped REST API.
    pub base_url: String,

    /// Authentication applied to every outbound request.
    #[serde(default)]
    pub auth: Option<AuthConfig>,

    /// Extra static headers sent with every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Request timeout in seconds. `0` disables the timeout.
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl BackendConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth: None,
            headers: HashMap::new(),
            timeout: None,
        }
    }

    /// Base URL normalized to end with exactly one `/`.
    #[must_use]
    pub fn normalized_base_url(&self) -> String {
        let trimmed = self.base_url.trim_end_matches('/');
        format!("{trimmed}/")
    }
}

/// Authentication scheme for outbound requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    /// No authentication.
    None,

    /// `Authorization: Bearer <token>`.
    Bearer { token: String },

    /// HTTP basic auth.
    Basic { username: String, password: String },

    /// Fixed API key placed in a header, query parameter or cookie.
    #[serde(rename = "apikey")]
    ApiKey {
        name: String,
        value: String,
        #[serde(default, rename = "in")]
        location: ApiKeyLocation,
    },

    /// Raw value sent verbatim as the `Authorization` header.
    Custom { token: String },
}

/// Where an API key is injected.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyLocation {
    #[default]
    Header,
    Query,
    Cookie,
}
