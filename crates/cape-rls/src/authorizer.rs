//! Per-row authorization for read, create, update and delete

use std::sync::Arc;

use tracing::{debug, warn};

use cape_common::{Action, Error, Result, Subject, SubjectContext};

use crate::authority::{DecisionAuthority, DecisionRequest};
use crate::context::build_resource_context;
use crate::policy::PolicyStore;
use crate::query::InsertStatement;
use crate::record::{Record, Row};

/// What a create check is evaluated against
#[derive(Clone, Copy)]
pub enum CreateTarget<'a> {
    /// Already constructed candidate row
    Record(&'a dyn Record),
    /// Insert that has not touched storage yet
    Insert(&'a InsertStatement),
}

/// Decides per-row access by combining extracted resource context with the
/// decision authority
pub struct RowAuthorizer {
    store: Arc<PolicyStore>,
    authority: Arc<dyn DecisionAuthority>,
}

impl RowAuthorizer {
    pub fn new(store: Arc<PolicyStore>, authority: Arc<dyn DecisionAuthority>) -> Self {
        Self { store, authority }
    }

    /// Check whether `subject` may perform `action` on `row`
    pub fn can_perform<R>(
        &self,
        subject: &Subject,
        subject_context: &SubjectContext,
        row: &R,
        action: Action,
    ) -> Result<bool>
    where
        R: Record + ?Sized,
    {
        let resource = row.resource();
        let policies = self.store.policies_for(resource);
        let resource_context = build_resource_context(row, &policies)?;

        let allowed = self.authority.decide(&DecisionRequest {
            subject,
            resource,
            action,
            subject_context,
            resource_context: &resource_context,
        })?;

        debug!(%resource, %subject, %action, allowed, "Row access decision");
        Ok(allowed)
    }

    pub fn can_read<R: Record + ?Sized>(
        &self,
        subject: &Subject,
        subject_context: &SubjectContext,
        row: &R,
    ) -> Result<bool> {
        self.can_perform(subject, subject_context, row, Action::Read)
    }

    pub fn can_update<R: Record + ?Sized>(
        &self,
        subject: &Subject,
        subject_context: &SubjectContext,
        row: &R,
    ) -> Result<bool> {
        self.can_perform(subject, subject_context, row, Action::Update)
    }

    pub fn can_delete<R: Record + ?Sized>(
        &self,
        subject: &Subject,
        subject_context: &SubjectContext,
        row: &R,
    ) -> Result<bool> {
        self.can_perform(subject, subject_context, row, Action::Delete)
    }

    /// Check a create, either for a candidate row or before an insert runs
    pub fn can_create(
        &self,
        subject: &Subject,
        subject_context: &SubjectContext,
        target: CreateTarget<'_>,
    ) -> Result<bool> {
        match target {
            CreateTarget::Record(row) => {
                self.can_perform(subject, subject_context, row, Action::Create)
            }
            CreateTarget::Insert(statement) => {
                let row = self.materialize(statement)?;
                self.can_perform(subject, subject_context, &row, Action::Create)
            }
        }
    }

    /// Build the transient row an insert would store
    pub fn materialize(&self, statement: &InsertStatement) -> Result<Row> {
        match self.store.model(&statement.table) {
            Some(model) => model.instantiate(&statement.values),
            None => Ok(Row {
                resource: statement.table.clone(),
                values: statement.values.clone(),
            }),
        }
    }

    /// Like [`RowAuthorizer::can_perform`] but a denial is an error
    pub fn ensure<R>(
        &self,
        subject: &Subject,
        subject_context: &SubjectContext,
        row: &R,
        action: Action,
    ) -> Result<()>
    where
        R: Record + ?Sized,
    {
        if self.can_perform(subject, subject_context, row, action)? {
            Ok(())
        } else {
            warn!(resource = row.resource(), %subject, %action, "RLS policy violation");
            Err(Error::PermissionDenied(format!(
                "{subject} may not {action} this {} row",
                row.resource()
            )))
        }
    }
}
