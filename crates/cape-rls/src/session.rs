//! Secure session: request-scoped unit of work with RLS enforced on every
//! statement and on flush

use tracing::{debug, warn};

use cape_common::{Action, Error, Result, Subject, SubjectContext, Value};

use crate::authorizer::CreateTarget;
use crate::engine::RowLevelSecurity;
use crate::memory::{MemoryDatabase, QueryOutput};
use crate::query::{Predicate, Query};
use crate::record::{Record, Row};

/// Persistent row loaded into the session with its pre-mutation state
#[derive(Debug, Clone)]
struct Tracked {
    original: Row,
    current: Row,
}

impl Tracked {
    fn is_dirty(&self) -> bool {
        self.original != self.current
    }
}

/// Unit of work bound to a subject and request context
pub struct SecureSession<'a> {
    rls: &'a RowLevelSecurity,
    db: &'a mut MemoryDatabase,
    subject: Option<Subject>,
    context: Option<SubjectContext>,
    identity: Vec<Tracked>,
    new: Vec<Row>,
    deleted: Vec<Row>,
}

impl<'a> SecureSession<'a> {
    pub fn new(
        rls: &'a RowLevelSecurity,
        db: &'a mut MemoryDatabase,
        subject: Option<Subject>,
        context: Option<SubjectContext>,
    ) -> Self {
        Self {
            rls,
            db,
            subject,
            context,
            identity: vec![],
            new: vec![],
            deleted: vec![],
        }
    }

    fn subject(&self) -> Result<&Subject> {
        self.subject
            .as_ref()
            .ok_or_else(|| Error::MissingContext("no subject bound to session".to_string()))
    }

    /// Subject and context for a write. The context may only be absent when
    /// `require_context` is off.
    fn write_scope(&self) -> Result<(&Subject, SubjectContext)> {
        let subject = self.subject()?;
        let context = match &self.context {
            Some(context) => context.clone(),
            None if self.rls.config().require_context => {
                return Err(Error::MissingContext(
                    "no request context bound to session".to_string(),
                ))
            }
            None => SubjectContext::new(),
        };
        Ok((subject, context))
    }

    /// Run a statement with RLS applied.
    ///
    /// Inserts are checked before they touch storage; selects, updates and
    /// deletes are narrowed to authorized rows. Writes need a bound context.
    pub fn execute(&mut self, query: Query) -> Result<QueryOutput> {
        let (subject, context) = match &query {
            Query::Select(_) => (
                self.subject()?.clone(),
                self.context.clone().unwrap_or_default(),
            ),
            _ => {
                let (subject, context) = self.write_scope()?;
                (subject.clone(), context)
            }
        };

        let action = match &query {
            Query::Insert(stmt) => {
                if !self
                    .rls
                    .can_create(&subject, &context, CreateTarget::Insert(stmt))?
                {
                    warn!(resource = %stmt.table, %subject, "Insert rejected by RLS");
                    return Err(Error::PermissionDenied(format!(
                        "{subject} may not create this {} row",
                        stmt.table
                    )));
                }
                return self.db.execute(&query);
            }
            Query::Select(_) => Action::Read,
            Query::Update(_) => Action::Update,
            Query::Delete(_) => Action::Delete,
        };

        let filtered = self.rls.filter_query(query, &subject, action, &context)?;
        self.db.execute(&filtered)
    }

    /// Load a row by primary key through the read filter
    pub fn get(&mut self, resource: &str, key: impl Into<Value>) -> Result<Option<Row>> {
        let key = key.into();
        if let Some(tracked) = self.tracked(resource, &key) {
            return Ok(Some(self.identity[tracked].current.clone()));
        }

        let pk = self.db.primary_key(resource);
        let query = Query::select(resource).filter(Predicate::eq(pk, key)).limit(1);
        let Some(row) = self.execute(query)?.rows().into_iter().next() else {
            return Ok(None);
        };

        self.identity.push(Tracked {
            original: row.clone(),
            current: row.clone(),
        });
        Ok(Some(row))
    }

    fn tracked(&self, resource: &str, key: &Value) -> Option<usize> {
        let pk = self.db.primary_key(resource);
        self.identity
            .iter()
            .position(|t| t.current.resource == resource && t.current.field(&pk) == Some(key))
    }

    /// Change a row previously loaded with [`SecureSession::get`]
    pub fn modify<F>(&mut self, resource: &str, key: impl Into<Value>, f: F) -> Result<()>
    where
        F: FnOnce(&mut Row),
    {
        let key = key.into();
        if self.get(resource, key.clone())?.is_none() {
            return Err(Error::PermissionDenied(format!(
                "{resource} row {key} is not visible"
            )));
        }
        if let Some(index) = self.tracked(resource, &key) {
            f(&mut self.identity[index].current);
        }
        Ok(())
    }

    /// Stage a row. A row whose key already exists in storage is an update of
    /// the stored row; otherwise it is a create.
    pub fn add(&mut self, row: Row) {
        let pk = self.db.primary_key(&row.resource);
        let stored = row
            .field(&pk)
            .and_then(|key| self.db.find(&row.resource, key))
            .cloned();

        match stored {
            Some(original) => {
                if let Some(index) = self.identity.iter().position(|t| t.original == original) {
                    self.identity[index].current = row;
                } else {
                    self.identity.push(Tracked {
                        original,
                        current: row,
                    });
                }
            }
            None => self.new.push(row),
        }
    }

    /// Stage deletion of a visible row
    pub fn delete(&mut self, resource: &str, key: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let Some(row) = self.get(resource, key.clone())? else {
            return Err(Error::PermissionDenied(format!(
                "{resource} row {key} is not visible"
            )));
        };
        if let Some(index) = self.tracked(resource, &key) {
            self.identity.remove(index);
        }
        self.deleted.push(row);
        Ok(())
    }

    /// Verify every pending change against the policies.
    ///
    /// Loaded rows must be readable in their pre-mutation state, dirty rows
    /// updatable in that state, new rows creatable and deleted rows deletable.
    pub fn flush_check(&self) -> Result<()> {
        let (subject, context) = self.write_scope()?;
        let authorizer = self.rls.authorizer();

        for tracked in &self.identity {
            authorizer.ensure(subject, &context, &tracked.original, Action::Read)?;
        }
        for deleted in &self.deleted {
            authorizer.ensure(subject, &context, deleted, Action::Read)?;
        }
        for tracked in self.identity.iter().filter(|t| t.is_dirty()) {
            authorizer.ensure(subject, &context, &tracked.original, Action::Update)?;
        }
        for row in &self.new {
            if !authorizer.can_create(subject, &context, CreateTarget::Record(row))? {
                return Err(Error::PermissionDenied(format!(
                    "{subject} may not create this {} row",
                    row.resource
                )));
            }
        }
        for row in &self.deleted {
            authorizer.ensure(subject, &context, row, Action::Delete)?;
        }
        Ok(())
    }

    /// Check and write every pending change. On failure nothing is written and
    /// the pending state is discarded.
    pub fn commit(&mut self) -> Result<()> {
        if !self.has_pending() {
            self.identity.clear();
            return Ok(());
        }
        if let Err(e) = self.flush_check() {
            self.rollback();
            return Err(e);
        }

        let dirty = self.identity.iter().filter(|t| t.is_dirty()).count();
        debug!(
            dirty,
            new = self.new.len(),
            deleted = self.deleted.len(),
            "Committing session"
        );

        for tracked in self.identity.drain(..) {
            if tracked.is_dirty() {
                self.db.upsert(tracked.current);
            }
        }
        for row in self.new.drain(..) {
            self.db.upsert(row);
        }
        for row in self.deleted.drain(..) {
            let pk = self.db.primary_key(&row.resource);
            if let Some(key) = row.field(&pk) {
                self.db.remove(&row.resource, key);
            }
        }
        Ok(())
    }

    /// Whether a commit would write anything
    pub fn has_pending(&self) -> bool {
        !self.new.is_empty()
            || !self.deleted.is_empty()
            || self.identity.iter().any(Tracked::is_dirty)
    }

    /// Discard pending changes and the identity map
    pub fn rollback(&mut self) {
        self.identity.clear();
        self.new.clear();
        self.deleted.clear();
    }
}
