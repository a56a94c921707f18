//! Common types shared by the policy engine and its callers

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Attribute value read from a row or supplied as a claim
pub type Value = serde_json::Value;

// ============================================================================
// Actions
// ============================================================================

/// Data access action guarded by a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
    /// Wildcard covering every action
    #[serde(rename = "*")]
    Any,
}

impl Action {
    /// Concrete actions, in the order they are usually listed
    pub const ALL: [Action; 4] = [Action::Read, Action::Create, Action::Update, Action::Delete];

    /// Check if a policy declared for `self` covers a request for `requested`
    pub fn covers(self, requested: Action) -> bool {
        self == Action::Any || self == requested
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Any => "*",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(Action::Read),
            "create" => Ok(Action::Create),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            "*" => Ok(Action::Any),
            other => Err(Error::Configuration(format!("unknown action '{other}'"))),
        }
    }
}

// ============================================================================
// Subjects
// ============================================================================

/// Identity performing an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// User or service identifier
    pub id: String,
    /// Roles resolved for this identity
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Subject {
    /// Subject known only by its identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: vec![],
        }
    }

    /// Attach resolved roles
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Check whether a policy role applies to this subject.
    ///
    /// A role matches on the wildcard, on the subject identifier itself, or on
    /// any resolved role.
    pub fn has_role(&self, role: &str, wildcard: &str) -> bool {
        role == wildcard || role == self.id || self.roles.iter().any(|r| r == role)
    }

    /// Identifier as a comparable attribute value
    pub fn id_value(&self) -> Value {
        Value::String(self.id.clone())
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

// ============================================================================
// Subject context
// ============================================================================

/// Request supplied claims about the subject, e.g. `{"org_id": "org1"}`.
///
/// An array value stands for "any of these values".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectContext {
    claims: HashMap<String, Value>,
}

impl SubjectContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a claim
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.claims.insert(field.into(), value.into());
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.claims.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.claims.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Check whether the claim for `field` matches a row value
    pub fn matches(&self, field: &str, row_value: &Value) -> bool {
        match self.claims.get(field) {
            Some(Value::Array(values)) => values.contains(row_value),
            Some(value) => value == row_value,
            None => false,
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for SubjectContext {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            claims: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
