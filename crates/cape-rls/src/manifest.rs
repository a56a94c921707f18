//! Declarative policy manifests
//!
//! ```toml
//! [[models]]
//! name = "documents"
//! fields = ["id", "title", "owner_id", "org_id"]
//!
//! [[permissions]]
//! resource = "documents"
//! role = "admin"
//! actions = ["*"]
//!
//! [[permissions]]
//! resource = "documents"
//! actions = ["read", "update"]
//! owner_field = "owner_id"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use cape_common::config::DEFAULT_WILDCARD;
use cape_common::{Action, Error, Result};

use crate::engine::RowLevelSecurity;
use crate::policy::Policy;
use crate::record::Model;

/// A permission covering several actions at once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub resource: String,
    #[serde(default = "default_role")]
    pub role: String,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub owner_field: Option<String>,
    #[serde(default)]
    pub context_fields: Vec<String>,
}

fn default_role() -> String {
    DEFAULT_WILDCARD.to_string()
}

impl Permission {
    /// One policy per listed action
    pub fn expand(&self) -> Vec<Policy> {
        self.actions
            .iter()
            .map(|action| {
                let mut policy = Policy::new(&self.resource, *action)
                    .for_role(&self.role)
                    .with_context_fields(self.context_fields.iter().cloned());
                policy.owner_field.clone_from(&self.owner_field);
                policy
            })
            .collect()
    }
}

/// Models and permissions loaded at startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyManifest {
    pub models: Vec<Model>,
    pub permissions: Vec<Permission>,
}

impl PolicyManifest {
    /// Load a manifest from a TOML or JSON file, chosen by extension
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read policy manifest {}: {e}", path.display()))
        })?;

        if path.extension().is_some_and(|ext| ext == "json") {
            Ok(serde_json::from_str(&content)?)
        } else {
            Self::from_toml(&content)
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Every policy the manifest declares, in file order
    pub fn policies(&self) -> Vec<Policy> {
        self.permissions.iter().flat_map(Permission::expand).collect()
    }

    /// Register models and policies with an engine
    pub fn apply(&self, rls: &RowLevelSecurity) {
        for model in &self.models {
            rls.register_model(model.clone());
        }
        for policy in self.policies() {
            rls.register_policy(policy);
        }
    }
}
