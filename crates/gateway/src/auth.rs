//! Pluggable per-tenant caller authentication.
//!
//! One shared authenticator instance serves all tenants; each call receives
//! the tenant's own policy, so no per-tenant authenticator state exists. The
//! registry rebuilds the shared instance whenever the tenant set changes,
//! picking the strongest scheme any tenant demands: custom over jwt over
//! apikey over none.

use crate::config::{AuthType, TenantAuthPolicy};
use axum::http::HeaderMap;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Verifies a caller against one tenant's auth policy.
pub trait GatewayAuthenticator: Send + Sync {
    /// Scheme name, for logging and scheme selection.
    fn scheme(&self) -> &'static str;

    /// Whether the request may proceed under `policy`.
    fn authenticate(&self, headers: &HeaderMap, policy: &TenantAuthPolicy) -> bool;

    /// Stable caller identity used for admission-control client keys.
    /// Falls back to `"anonymous"` when the request carries none.
    fn identity(&self, headers: &HeaderMap) -> String {
        let _ = headers;
        "anonymous".to_string()
    }
}

/// Custom verification logic registered by name.
pub type CustomAuthFn = dyn Fn(&HeaderMap, &TenantAuthPolicy) -> bool + Send + Sync;

/// Named table of custom auth handlers. Handlers are registered up front;
/// a tenant policy references one by name.
#[derive(Default)]
pub struct CustomHandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<CustomAuthFn>>>,
}

impl CustomHandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, name: &str, handler: F)
    where
        F: Fn(&HeaderMap, &TenantAuthPolicy) -> bool + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .insert(name.to_string(), Arc::new(handler));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<CustomAuthFn>> {
        self.handlers.read().get(name).cloned()
    }
}

/// Open access.
pub struct NoneAuthenticator;

impl GatewayAuthenticator for NoneAuthenticator {
    fn scheme(&self) -> &'static str {
        "none"
    }

    fn authenticate(&self, _headers: &HeaderMap, _policy: &TenantAuthPolicy) -> bool {
        true
    }
}

/// `x-api-key: keyId:secret` checked against the tenant's key table.
pub struct ApiKeyAuthenticator;

const API_KEY_HEADER: &str = "x-api-key";

impl ApiKeyAuthenticator {
    fn parse(headers: &HeaderMap) -> Option<(&str, &str)> {
        let raw = headers.get(API_KEY_HEADER)?.to_str().ok()?;
        raw.split_once(':')
    }
}

impl GatewayAuthenticator for ApiKeyAuthenticator {
    fn scheme(&self) -> &'static str {
        "apikey"
    }

    fn authenticate(&self, headers: &HeaderMap, policy: &TenantAuthPolicy) -> bool {
        if policy.auth_type == AuthType::None {
            return true;
        }
        match Self::parse(headers) {
            Some((key_id, secret)) => policy
                .api_keys
                .get(key_id)
                .is_some_and(|expected| expected == secret),
            None => false,
        }
    }

    fn identity(&self, headers: &HeaderMap) -> String {
        Self::parse(headers)
            .map(|(key_id, _)| key_id.to_string())
            .unwrap_or_else(|| "anonymous".to_string())
    }
}

/// Bearer JWT verified as HS256 against the tenant's secret.
pub struct JwtAuthenticator;

#[derive(Deserialize)]
struct JwtClaims {
    #[serde(default)]
    sub: Option<String>,
}

impl JwtAuthenticator {
    fn bearer_token(headers: &HeaderMap) -> Option<&str> {
        headers
            .get(axum::http::header::AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")
    }
}

impl GatewayAuthenticator for JwtAuthenticator {
    fn scheme(&self) -> &'static str {
        "jwt"
    }

    fn authenticate(&self, headers: &HeaderMap, policy: &TenantAuthPolicy) -> bool {
        if policy.auth_type == AuthType::None {
            return true;
        }
        let Some(token) = Self::bearer_token(headers) else {
            return false;
        };
        let Some(secret) = policy.jwt_secret.as_deref() else {
            return false;
        };
        let mut validation = Validation::new(Algorithm::HS256);
        // Claims beyond signature and expiry are tenant business, not ours.
        validation.required_spec_claims.clear();
        validation.validate_exp = true;
        jsonwebtoken::decode::<serde_json::Value>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .is_ok()
    }

    /// Structural `sub` extraction, without signature verification. Identity
    /// is only used to key admission control; authenticate() decides access.
    fn identity(&self, headers: &HeaderMap) -> String {
        let sub = Self::bearer_token(headers)
            .and_then(|token| token.split('.').nth(1))
            .and_then(|payload| URL_SAFE_NO_PAD.decode(payload).ok())
            .and_then(|bytes| serde_json::from_slice::<JwtClaims>(&bytes).ok())
            .and_then(|claims| claims.sub);
        sub.unwrap_or_else(|| "anonymous".to_string())
    }
}

/// Delegates to a named handler from the registry.
pub struct CustomAuthenticator {
    handlers: Arc<CustomHandlerRegistry>,
}

impl CustomAuthenticator {
    #[must_use]
    pub fn new(handlers: Arc<CustomHandlerRegistry>) -> Self {
        Self { handlers }
    }
}

impl GatewayAuthenticator for CustomAuthenticator {
    fn scheme(&self) -> &'static str {
        "custom"
    }

    fn authenticate(&self, headers: &HeaderMap, policy: &TenantAuthPolicy) -> bool {
        if policy.auth_type == AuthType::None {
            return true;
        }
        let Some(name) = policy.custom_handler.as_deref() else {
            return false;
        };
        match self.handlers.get(name) {
            Some(handler) => handler(headers, policy),
            None => {
                tracing::warn!(handler = %name, "custom auth handler not registered, denying");
                false
            }
        }
    }
}

/// Pick the shared authenticator for the given tenant policies.
///
/// Scans in priority order custom > jwt > apikey and falls back to open
/// access when no tenant demands authentication. A custom demand whose
/// handler is not registered is skipped so the remaining tenants still get
/// the strongest scheme they can actually use.
pub fn select_authenticator<'a, I>(
    policies: I,
    handlers: &Arc<CustomHandlerRegistry>,
) -> Arc<dyn GatewayAuthenticator>
where
    I: IntoIterator<Item = &'a TenantAuthPolicy> + Clone,
{
    let wants = |auth_type: AuthType| {
        policies
            .clone()
            .into_iter()
            .any(|p| p.auth_type == auth_type)
    };

    let custom_resolvable = policies.clone().into_iter().any(|p| {
        p.auth_type == AuthType::Custom
            && p.custom_handler
                .as_deref()
                .is_some_and(|name| handlers.get(name).is_some())
    });

    if custom_resolvable {
        Arc::new(CustomAuthenticator::new(Arc::clone(handlers)))
    } else if wants(AuthType::Jwt) {
        Arc::new(JwtAuthenticator)
    } else if wants(AuthType::ApiKey) {
        Arc::new(ApiKeyAuthenticator)
    } else {
        Arc::new(NoneAuthenticator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header};

    fn api_key_policy(key_id: &str, secret: &str) -> TenantAuthPolicy {
        TenantAuthPolicy {
            auth_type: AuthType::ApiKey,
            api_keys: HashMap::from([(key_id.to_string(), secret.to_string())]),
            ..Default::default()
        }
    }

    fn jwt_policy(secret: &str) -> TenantAuthPolicy {
        TenantAuthPolicy {
            auth_type: AuthType::Jwt,
            jwt_secret: Some(secret.to_string()),
            ..Default::default()
        }
    }

    fn headers_with(name: &str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
            value.parse().unwrap(),
        );
        headers
    }

    fn sign_jwt(secret: &str, claims: &serde_json::Value) -> String {
        jsonwebtoken::encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn api_key_accepts_matching_pair() {
        let auth = ApiKeyAuthenticator;
        let policy = api_key_policy("alice", "s3cret");
        let headers = headers_with("x-api-key", "alice:s3cret");
        assert!(auth.authenticate(&headers, &policy));
        assert_eq!(auth.identity(&headers), "alice");
    }

    #[test]
    fn api_key_rejects_wrong_secret_and_missing_header() {
        let auth = ApiKeyAuthenticator;
        let policy = api_key_policy("alice", "s3cret");
        assert!(!auth.authenticate(&headers_with("x-api-key", "alice:wrong"), &policy));
        assert!(!auth.authenticate(&HeaderMap::new(), &policy));
        assert_eq!(auth.identity(&HeaderMap::new()), "anonymous");
    }

    #[test]
    fn api_key_passes_open_tenants_through() {
        let auth = ApiKeyAuthenticator;
        let open = TenantAuthPolicy::default();
        assert!(auth.authenticate(&HeaderMap::new(), &open));
    }

    #[test]
    fn jwt_accepts_valid_token_and_extracts_sub() {
        let auth = JwtAuthenticator;
        let policy = jwt_policy("topsecret");
        let token = sign_jwt("topsecret", &serde_json::json!({ "sub": "alice" }));
        let headers = headers_with("authorization", &format!("Bearer {token}"));
        assert!(auth.authenticate(&headers, &policy));
        assert_eq!(auth.identity(&headers), "alice");
    }

    #[test]
    fn jwt_rejects_bad_signature() {
        let auth = JwtAuthenticator;
        let policy = jwt_policy("topsecret");
        let token = sign_jwt("othersecret", &serde_json::json!({ "sub": "alice" }));
        let headers = headers_with("authorization", &format!("Bearer {token}"));
        assert!(!auth.authenticate(&headers, &policy));
    }

    #[test]
    fn jwt_rejects_garbage_and_missing_header() {
        let auth = JwtAuthenticator;
        let policy = jwt_policy("topsecret");
        assert!(!auth.authenticate(&headers_with("authorization", "Bearer not.a.jwt"), &policy));
        assert!(!auth.authenticate(&HeaderMap::new(), &policy));
    }

    #[test]
    fn custom_delegates_to_registered_handler() {
        let handlers = Arc::new(CustomHandlerRegistry::new());
        handlers.register("header-check", |headers, _policy| {
            headers.contains_key("x-custom-pass")
        });
        let auth = CustomAuthenticator::new(Arc::clone(&handlers));
        let policy = TenantAuthPolicy {
            auth_type: AuthType::Custom,
            custom_handler: Some("header-check".to_string()),
            ..Default::default()
        };
        assert!(auth.authenticate(&headers_with("x-custom-pass", "1"), &policy));
        assert!(!auth.authenticate(&HeaderMap::new(), &policy));
    }

    #[test]
    fn custom_denies_when_handler_unregistered() {
        let handlers = Arc::new(CustomHandlerRegistry::new());
        let auth = CustomAuthenticator::new(handlers);
        let policy = TenantAuthPolicy {
            auth_type: AuthType::Custom,
            custom_handler: Some("missing".to_string()),
            ..Default::default()
        };
        assert!(!auth.authenticate(&headers_with("x-custom-pass", "1"), &policy));
    }

    #[test]
    fn selection_prefers_strongest_demanded_scheme() {
        let handlers = Arc::new(CustomHandlerRegistry::new());
        handlers.register("h", |_, _| true);

        let none = TenantAuthPolicy::default();
        let apikey = api_key_policy("a", "b");
        let jwt = jwt_policy("s");
        let custom = TenantAuthPolicy {
            auth_type: AuthType::Custom,
            custom_handler: Some("h".to_string()),
            ..Default::default()
        };

        let selected = select_authenticator(vec![&none], &handlers);
        assert_eq!(selected.scheme(), "none");

        let selected = select_authenticator(vec![&none, &apikey], &handlers);
        assert_eq!(selected.scheme(), "apikey");

        let selected = select_authenticator(vec![&none, &apikey, &jwt], &handlers);
        assert_eq!(selected.scheme(), "jwt");

        let selected = select_authenticator(vec![&none, &apikey, &jwt, &custom], &handlers);
        assert_eq!(selected.scheme(), "custom");
    }

    #[test]
    fn selection_skips_unresolvable_custom_demand() {
        let handlers = Arc::new(CustomHandlerRegistry::new());
        let jwt = jwt_policy("s");
        let custom = TenantAuthPolicy {
            auth_type: AuthType::Custom,
            custom_handler: Some("never-registered".to_string()),
            ..Default::default()
        };
        let selected = select_authenticator(vec![&custom, &jwt], &handlers);
        assert_eq!(selected.scheme(), "jwt");
    }
}
