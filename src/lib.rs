//! Cape: row level security for relational data access
//!
//! This crate wires the RLS engine into an application:
//!
//! - **Declarative permissions** - one call or manifest entry per resource and role
//! - **Query rewriting** - statements narrowed to the rows a subject may touch
//! - **Secure sessions** - writes checked against policies before they commit

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub use cape_common as common;
pub use cape_rls as rls;

use std::path::Path;

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cape_common::config::{CapeConfig, LoggingConfig};
use cape_common::{Action, Result, Subject, SubjectContext};
use cape_rls::{MemoryDatabase, Model, Permission, PolicyManifest, RowLevelSecurity, SecureSession};

/// Application handle owning the policy engine and the data it guards
pub struct Cape {
    config: CapeConfig,
    rls: RowLevelSecurity,
    db: MemoryDatabase,
}

impl Cape {
    pub fn new(config: CapeConfig) -> Self {
        info!("Initializing Cape row level security");
        Self {
            rls: RowLevelSecurity::new(config.rls.clone()),
            db: MemoryDatabase::new(),
            config,
        }
    }

    /// Build from a configuration file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_config_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(CapeConfig::load(path)?))
    }

    pub fn config(&self) -> &CapeConfig {
        &self.config
    }

    pub fn rls(&self) -> &RowLevelSecurity {
        &self.rls
    }

    pub fn database(&self) -> &MemoryDatabase {
        &self.db
    }

    pub fn database_mut(&mut self) -> &mut MemoryDatabase {
        &mut self.db
    }

    /// Replace the data set
    pub fn with_database(mut self, db: MemoryDatabase) -> Self {
        self.db = db;
        self
    }

    /// Declare a model with the engine and the store
    pub fn define(&mut self, model: Model) {
        self.rls.register_model(model.clone());
        self.db.define(model);
    }

    /// Protect a resource: one policy per action. `role` defaults to the
    /// configured wildcard.
    pub fn permission_required(
        &self,
        resource: &str,
        role: Option<&str>,
        actions: &[Action],
        owner_field: Option<&str>,
        context_fields: &[&str],
    ) {
        let permission = Permission {
            resource: resource.to_string(),
            role: role.unwrap_or(&self.config.rls.wildcard_role).to_string(),
            actions: actions.to_vec(),
            owner_field: owner_field.map(str::to_string),
            context_fields: context_fields.iter().map(|f| (*f).to_string()).collect(),
        };
        for policy in permission.expand() {
            self.rls.register_policy(policy);
        }
    }

    /// Register everything a manifest file declares
    ///
    /// # Errors
    /// Returns an error if the manifest cannot be read or parsed.
    pub fn load_manifest<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let manifest = PolicyManifest::load(path)?;
        for model in &manifest.models {
            self.db.define(model.clone());
        }
        manifest.apply(&self.rls);
        info!(
            models = manifest.models.len(),
            permissions = manifest.permissions.len(),
            "Loaded policy manifest"
        );
        Ok(())
    }

    /// Open a session with security context
    pub fn session(
        &mut self,
        subject: Option<Subject>,
        context: Option<SubjectContext>,
    ) -> SecureSession<'_> {
        SecureSession::new(&self.rls, &mut self.db, subject, context)
    }
}

impl Default for Cape {
    fn default() -> Self {
        Self::new(CapeConfig::default())
    }
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the configured level.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
