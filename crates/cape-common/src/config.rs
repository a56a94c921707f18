//! Configuration types for the Cape RLS engine

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Role value that makes a policy apply to every subject
pub const DEFAULT_WILDCARD: &str = "*";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapeConfig {
    /// Row level security behaviour
    pub rls: RlsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl CapeConfig {
    /// Load configuration from a TOML or JSON file, chosen by extension
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Configuration(format!("Failed to read config file: {e}")))?;

        if path.extension().is_some_and(|ext| ext == "json") {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(toml::from_str(&content)?)
        }
    }
}

/// Row level security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RlsConfig {
    /// Role string matching every subject
    pub wildcard_role: String,
    /// Deny queries against resources that have no registered policy
    /// instead of passing them through unfiltered
    pub deny_unregistered: bool,
    /// Reject flushes from sessions opened without a subject context
    pub require_context: bool,
}

impl Default for RlsConfig {
    fn default() -> Self {
        Self {
            wildcard_role: DEFAULT_WILDCARD.to_string(),
            deny_unregistered: false,
            require_context: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (trace, debug, info, warn, error)
    pub level: String,
    /// Emit JSON formatted log lines
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
