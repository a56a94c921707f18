//! Error types for the Cape RLS engine

use thiserror::Error;

/// Cape error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration Errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unsupported query shape: {0}")]
    UnsupportedQuery(String),

    // Authorization Errors
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Missing security context: {0}")]
    MissingContext(String),

    #[error("Decision authority unavailable: {0}")]
    AuthorityUnavailable(String),

    // General Errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type alias for Cape operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build a configuration error for an attribute that does not exist on a resource
    pub fn missing_field(resource: &str, field: &str) -> Self {
        Self::Configuration(format!(
            "field '{field}' is not an attribute of resource '{resource}'"
        ))
    }

    /// Whether this error signals a programming or configuration mistake
    /// rather than a runtime access decision
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::UnsupportedQuery(_)
                | Self::Toml(_)
        )
    }

    /// HTTP status code for each error type
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MissingContext(_) => 401,
            Self::PermissionDenied(_) => 403,
            Self::AuthorityUnavailable(_) => 503,
            Self::Configuration(_)
            | Self::UnsupportedQuery(_)
            | Self::Json(_)
            | Self::Toml(_) => 500,
        }
    }

    /// Stable error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "config_error",
            Self::UnsupportedQuery(_) => "unsupported_query",
            Self::PermissionDenied(_) => "rls_violation",
            Self::MissingContext(_) => "missing_context",
            Self::AuthorityUnavailable(_) => "authority_unavailable",
            Self::Json(_) => "json_error",
            Self::Toml(_) => "toml_error",
        }
    }
}
