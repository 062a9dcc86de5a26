//! Error types for the gateway.

use thiserror::Error;

/// Main error type for gateway operations.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration errors (invalid policy, missing credential material).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Registry errors (duplicate or unknown tenant).
    #[error("Registry error: {0}")]
    Registry(String),

    /// Tool source errors (spec load/compile failures).
    #[error(transparent)]
    Tools(#[from] restgate_openapi_tools::error::OpenApiToolsError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
