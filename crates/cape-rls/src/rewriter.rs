//! Query rewriter for RLS enforcement
//!
//! Narrows any statement so that it can only touch rows the subject is
//! authorized for. The rewrite is a pure function of the statement, the
//! subject, the action, the request context and the current policy snapshot.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use cape_common::{Action, Result, RlsConfig, Subject, SubjectContext};

use crate::policy::{Policy, PolicyStore};
use crate::query::{Predicate, Query};

/// Query rewriter that injects RLS conditions into statements
pub struct QueryRewriter {
    store: Arc<PolicyStore>,
    config: RlsConfig,
}

impl QueryRewriter {
    /// Create a new query rewriter
    pub fn new(store: Arc<PolicyStore>, config: RlsConfig) -> Self {
        Self { store, config }
    }

    /// Constrain `query` to rows `subject` may access for `action`.
    ///
    /// Resources without policies pass through unchanged unless
    /// `deny_unregistered` is set. Errors on an unsupported query shape or on a
    /// policy naming a field the registered model does not have.
    pub fn filter_query(
        &self,
        mut query: Query,
        subject: &Subject,
        action: Action,
        context: &SubjectContext,
    ) -> Result<Query> {
        let resource = query.target()?.to_string();

        let policies = self.store.policies_for(&resource);
        if policies.is_empty() {
            if self.config.deny_unregistered {
                debug!(%resource, "No RLS policies, denying unregistered resource");
                query.push_filter(Predicate::Literal(false));
            } else {
                warn!(%resource, "No RLS policies registered, query passes unfiltered");
            }
            return Ok(query);
        }

        if let Some(model) = self.store.model(&resource) {
            for policy in &policies {
                policy.validate(&model)?;
            }
        }

        match self.access_predicate(&policies, subject, action, context) {
            None => {
                debug!(%resource, %subject, %action, "No policy condition applies, query unchanged");
            }
            Some(predicate) => {
                debug!(%resource, %subject, %action, %predicate, "Applying RLS filter");
                query.push_filter(predicate);
            }
        }

        Ok(query)
    }

    /// Build the OR of every matching policy's condition.
    ///
    /// Returns `None` when a matching policy is unconditional or when no
    /// matching policy yields a condition, and a `FALSE` literal when no policy
    /// matches.
    pub fn access_predicate(
        &self,
        policies: &[Policy],
        subject: &Subject,
        action: Action,
        context: &SubjectContext,
    ) -> Option<Predicate> {
        let matching: Vec<&Policy> = policies
            .iter()
            .filter(|p| p.applies_to(action, subject, &self.config.wildcard_role))
            .collect();

        if matching.is_empty() {
            return Some(Predicate::Literal(false));
        }

        let mut alternatives = Vec::with_capacity(matching.len());
        for policy in matching {
            if policy.is_unconditional() {
                return None;
            }
            match policy_condition(policy, subject, context) {
                Some(condition) => {
                    trace!(policy = %policy.id, %condition, "Policy condition");
                    alternatives.push(condition);
                }
                None => {
                    trace!(policy = %policy.id, "No context supplied for policy, skipped");
                }
            }
        }

        if alternatives.is_empty() {
            return None;
        }
        Some(Predicate::or(alternatives))
    }
}

/// Conjunction of a policy's context and ownership conditions, or `None` when
/// neither a supplied context field nor an owner field constrains it
fn policy_condition(
    policy: &Policy,
    subject: &Subject,
    context: &SubjectContext,
) -> Option<Predicate> {
    let mut conditions = Vec::with_capacity(2);

    let per_field: Vec<Predicate> = policy
        .context_fields
        .iter()
        .filter_map(|field| {
            context
                .get(field)
                .map(|value| Predicate::matching(field.as_str(), value))
        })
        .collect();
    if !per_field.is_empty() {
        conditions.push(Predicate::or(per_field));
    }

    if let Some(owner) = &policy.owner_field {
        conditions.push(Predicate::eq(owner.as_str(), subject.id_value()));
    }

    if conditions.is_empty() {
        None
    } else {
        Some(Predicate::and(conditions))
    }
}
