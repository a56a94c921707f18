//! Row level security facade tying the store, authority, rewriter and authorizer together

use std::sync::Arc;

use cape_common::{Action, Result, RlsConfig, Subject, SubjectContext};

use crate::authority::{AccessControl, DecisionAuthority};
use crate::authorizer::{CreateTarget, RowAuthorizer};
use crate::policy::{Policy, PolicyStore};
use crate::query::Query;
use crate::record::{Model, Record};
use crate::rewriter::QueryRewriter;

/// Entry point used by the ORM integration hooks
pub struct RowLevelSecurity {
    store: Arc<PolicyStore>,
    rewriter: QueryRewriter,
    authorizer: RowAuthorizer,
    config: RlsConfig,
}

impl RowLevelSecurity {
    /// Engine backed by the built-in [`AccessControl`] authority
    pub fn new(config: RlsConfig) -> Self {
        let store = Arc::new(PolicyStore::new());
        let authority =
            Arc::new(AccessControl::new(store.clone()).with_wildcard(&config.wildcard_role));
        Self::with_authority(store, authority, config)
    }

    /// Engine over an existing store and a custom decision authority
    pub fn with_authority(
        store: Arc<PolicyStore>,
        authority: Arc<dyn DecisionAuthority>,
        config: RlsConfig,
    ) -> Self {
        Self {
            rewriter: QueryRewriter::new(store.clone(), config.clone()),
            authorizer: RowAuthorizer::new(store.clone(), authority),
            store,
            config,
        }
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    pub fn config(&self) -> &RlsConfig {
        &self.config
    }

    pub fn authorizer(&self) -> &RowAuthorizer {
        &self.authorizer
    }

    pub fn register_policy(&self, policy: Policy) {
        self.store.register(policy);
    }

    pub fn register_model(&self, model: Model) {
        self.store.register_model(model);
    }

    /// See [`QueryRewriter::filter_query`]
    pub fn filter_query(
        &self,
        query: Query,
        subject: &Subject,
        action: Action,
        context: &SubjectContext,
    ) -> Result<Query> {
        self.rewriter.filter_query(query, subject, action, context)
    }

    pub fn can_read<R: Record + ?Sized>(
        &self,
        subject: &Subject,
        context: &SubjectContext,
        row: &R,
    ) -> Result<bool> {
        self.authorizer.can_read(subject, context, row)
    }

    pub fn can_update<R: Record + ?Sized>(
        &self,
        subject: &Subject,
        context: &SubjectContext,
        row: &R,
    ) -> Result<bool> {
        self.authorizer.can_update(subject, context, row)
    }

    pub fn can_delete<R: Record + ?Sized>(
        &self,
        subject: &Subject,
        context: &SubjectContext,
        row: &R,
    ) -> Result<bool> {
        self.authorizer.can_delete(subject, context, row)
    }

    pub fn can_create(
        &self,
        subject: &Subject,
        context: &SubjectContext,
        target: CreateTarget<'_>,
    ) -> Result<bool> {
        self.authorizer.can_create(subject, context, target)
    }
}

impl Default for RowLevelSecurity {
    fn default() -> Self {
        Self::new(RlsConfig::default())
    }
}
