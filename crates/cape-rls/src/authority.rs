//! Decision authority: turns a subject, resource, action and contexts into allow or deny

use std::sync::Arc;

use tracing::trace;

use cape_common::config::DEFAULT_WILDCARD;
use cape_common::{Action, Result, Subject, SubjectContext};

use crate::context::ResourceContext;
use crate::policy::{Policy, PolicyStore};

/// Input tuple of an access decision
#[derive(Debug, Clone, Copy)]
pub struct DecisionRequest<'a> {
    pub subject: &'a Subject,
    pub resource: &'a str,
    pub action: Action,
    pub subject_context: &'a SubjectContext,
    pub resource_context: &'a ResourceContext,
}

/// Pluggable policy evaluator.
///
/// Implementations must be deterministic and side-effect free for a given
/// request. An empty resource context means no constraints beyond the role,
/// action and resource match. A failure to decide is reported as
/// [`cape_common::Error::AuthorityUnavailable`] and never as an allow.
pub trait DecisionAuthority: Send + Sync {
    fn decide(&self, request: &DecisionRequest<'_>) -> Result<bool>;
}

/// Attribute based evaluator over the policies of a [`PolicyStore`]
pub struct AccessControl {
    store: Arc<PolicyStore>,
    wildcard: String,
}

impl AccessControl {
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self {
            store,
            wildcard: DEFAULT_WILDCARD.to_string(),
        }
    }

    /// Use a different role wildcard
    pub fn with_wildcard(mut self, wildcard: &str) -> Self {
        self.wildcard = wildcard.to_string();
        self
    }

    fn satisfies(policy: &Policy, request: &DecisionRequest<'_>) -> bool {
        if request.resource_context.is_empty() {
            return true;
        }

        let owner_ok = policy.owner_field.as_ref().map_or(true, |field| {
            request.resource_context.get(field) == Some(&request.subject.id_value())
        });

        let context_ok = policy.context_fields.is_empty()
            || policy.context_fields.iter().any(|field| {
                request
                    .resource_context
                    .get(field)
                    .is_some_and(|value| request.subject_context.matches(field, value))
            });

        trace!(policy = %policy.id, owner_ok, context_ok, "Evaluated policy conditions");
        owner_ok && context_ok
    }
}

impl DecisionAuthority for AccessControl {
    fn decide(&self, request: &DecisionRequest<'_>) -> Result<bool> {
        let allowed = self
            .store
            .policies_for(request.resource)
            .iter()
            .filter(|p| p.applies_to(request.action, request.subject, &self.wildcard))
            .any(|p| Self::satisfies(p, request));

        Ok(allowed)
    }
}
