//! RLS Policy definitions and storage

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use cape_common::config::DEFAULT_WILDCARD;
use cape_common::{Action, Error, Result, Subject};

use crate::record::Model;

/// RLS Policy definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Unique policy ID
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Protected resource (table) name
    pub resource: String,
    /// Action this policy grants
    pub action: Action,
    /// Role this policy applies to, or the wildcard for every subject
    #[serde(default = "default_role")]
    pub role: String,
    /// Attribute that grants access when it equals the acting subject
    #[serde(default)]
    pub owner_field: Option<String>,
    /// Attributes matched against the request supplied context
    #[serde(default)]
    pub context_fields: Vec<String>,
}

fn default_role() -> String {
    DEFAULT_WILDCARD.to_string()
}

impl Policy {
    /// Create a policy granting `action` on `resource` to every subject
    pub fn new(resource: &str, action: Action) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource: resource.to_string(),
            action,
            role: default_role(),
            owner_field: None,
            context_fields: vec![],
        }
    }

    /// Restrict to a role
    pub fn for_role(mut self, role: &str) -> Self {
        self.role = role.to_string();
        self
    }

    /// Set the owner field
    pub fn owned_by(mut self, field: &str) -> Self {
        self.owner_field = Some(field.to_string());
        self
    }

    /// Set the context fields
    pub fn with_context_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// A policy without owner or context conditions grants access outright
    pub fn is_unconditional(&self) -> bool {
        self.owner_field.is_none() && self.context_fields.is_empty()
    }

    /// Every field the policy reads must be an attribute of the model
    pub fn validate(&self, model: &Model) -> Result<()> {
        let unknown = self
            .owner_field
            .iter()
            .chain(&self.context_fields)
            .find(|field| !model.has_field(field));
        match unknown {
            Some(field) => Err(Error::missing_field(&self.resource, field)),
            None => Ok(()),
        }
    }

    /// Check if policy applies to a requested action and subject
    pub fn applies_to(&self, action: Action, subject: &Subject, wildcard: &str) -> bool {
        self.action.covers(action) && subject.has_role(&self.role, wildcard)
    }
}

/// Policy store for managing RLS policies and the models they protect
#[derive(Debug, Default)]
pub struct PolicyStore {
    /// Policies by resource, in registration order
    policies: Arc<RwLock<HashMap<String, Vec<Policy>>>>,
    /// Declared models by resource
    models: Arc<RwLock<HashMap<String, Model>>>,
}

impl PolicyStore {
    /// Create a new policy store
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a policy. Overlapping policies are legal and widen access.
    pub fn register(&self, policy: Policy) {
        debug!(
            resource = %policy.resource,
            action = %policy.action,
            role = %policy.role,
            owner_field = ?policy.owner_field,
            context_fields = ?policy.context_fields,
            "Registering RLS policy"
        );
        self.policies
            .write()
            .entry(policy.resource.clone())
            .or_default()
            .push(policy);
    }

    /// Get all policies for a resource, empty if none are registered
    pub fn policies_for(&self, resource: &str) -> Vec<Policy> {
        self.policies
            .read()
            .get(resource)
            .cloned()
            .unwrap_or_default()
    }

    /// Check whether any policy protects a resource
    pub fn is_protected(&self, resource: &str) -> bool {
        self.policies
            .read()
            .get(resource)
            .is_some_and(|p| !p.is_empty())
    }

    /// Protected resource names, sorted
    pub fn resources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.policies.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove a policy by ID, returning it if it existed
    pub fn remove(&self, id: Uuid) -> Option<Policy> {
        let mut policies = self.policies.write();
        for table_policies in policies.values_mut() {
            if let Some(pos) = table_policies.iter().position(|p| p.id == id) {
                return Some(table_policies.remove(pos));
            }
        }
        None
    }

    /// Declare the attribute set of a resource
    pub fn register_model(&self, model: Model) {
        debug!(model = %model.name, fields = ?model.fields, "Registering model");
        self.models.write().insert(model.name.clone(), model);
    }

    pub fn model(&self, resource: &str) -> Option<Model> {
        self.models.read().get(resource).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_against_model() {
        let model = Model::new("documents", ["id", "owner_id", "org_id"]);
        let good = Policy::new("documents", Action::Read)
            .owned_by("owner_id")
            .with_context_fields(["org_id"]);
        assert!(good.validate(&model).is_ok());

        let bad_owner = Policy::new("documents", Action::Read).owned_by("author_id");
        assert!(bad_owner.validate(&model).unwrap_err().is_configuration());

        let bad_context = Policy::new("documents", Action::Read).with_context_fields(["org_id", "team"]);
        let err = bad_context.validate(&model).unwrap_err();
        assert!(err.to_string().contains("'team'"));
    }

    #[test]
    fn test_policy_creation() {
        let policy = Policy::new("documents", Action::Read)
            .owned_by("owner_id")
            .with_context_fields(["org_id"]);

        assert_eq!(policy.role, "*");
        assert_eq!(policy.owner_field.as_deref(), Some("owner_id"));
        assert_eq!(policy.context_fields, vec!["org_id".to_string()]);
        assert!(!policy.is_unconditional());
        assert!(Policy::new("documents", Action::Any).is_unconditional());
    }

    #[test]
    fn test_policy_applies() {
        let admin = Policy::new("documents", Action::Any).for_role("admin");
        assert!(admin.applies_to(Action::Delete, &Subject::new("admin"), "*"));
        assert!(admin.applies_to(
            Action::Read,
            &Subject::new("carol").with_roles(["admin"]),
            "*"
        ));
        assert!(!admin.applies_to(Action::Read, &Subject::new("alice"), "*"));

        let reader = Policy::new("documents", Action::Read);
        assert!(reader.applies_to(Action::Read, &Subject::new("alice"), "*"));
        assert!(!reader.applies_to(Action::Update, &Subject::new("alice"), "*"));
    }

    #[test]
    fn test_policy_store_order() {
        let store = PolicyStore::new();
        assert!(store.policies_for("documents").is_empty());
        assert!(!store.is_protected("documents"));

        store.register(Policy::new("documents", Action::Read).owned_by("owner_id"));
        store.register(Policy::new("documents", Action::Read).with_context_fields(["org_id"]));
        store.register(Policy::new("documents", Action::Read).owned_by("owner_id"));

        let policies = store.policies_for("documents");
        assert_eq!(policies.len(), 3);
        assert_eq!(policies[0].owner_field.as_deref(), Some("owner_id"));
        assert_eq!(policies[1].context_fields, vec!["org_id".to_string()]);
        assert!(store.is_protected("documents"));
        assert_eq!(store.resources(), vec!["documents".to_string()]);
    }

    #[test]
    fn test_remove_policy() {
        let store = PolicyStore::new();
        let policy = Policy::new("documents", Action::Read);
        let id = policy.id;
        store.register(policy);

        assert!(store.remove(id).is_some());
        assert!(store.remove(id).is_none());
        assert!(!store.is_protected("documents"));
    }

    #[test]
    fn test_concurrent_registration() {
        let store = Arc::new(PolicyStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        store.register(Policy::new(&format!("t{}", i % 2), Action::Read));
                        let _ = store.policies_for("t0");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.policies_for("t0").len(), 200);
        assert_eq!(store.policies_for("t1").len(), 200);
    }

    #[test]
    fn test_models() {
        let store = PolicyStore::new();
        store.register_model(Model::new("documents", ["id", "owner_id"]));

        assert!(store.model("documents").unwrap().has_field("owner_id"));
        assert!(store.model("users").is_none());
    }
}
