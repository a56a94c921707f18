//! In-memory reference executor for statements
//!
//! Runs [`Query`] values against tables of [`Row`]s so that the row sets a
//! rewritten statement selects can be observed without a database.

use std::collections::HashMap;

use tracing::trace;

use cape_common::{Error, Result, Value};

use crate::query::Query;
use crate::record::{Model, Record, Row};

/// Result of executing a statement
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Rows(Vec<Row>),
    Affected(usize),
}

impl QueryOutput {
    /// Selected rows, empty for writes
    pub fn rows(self) -> Vec<Row> {
        match self {
            QueryOutput::Rows(rows) => rows,
            QueryOutput::Affected(_) => vec![],
        }
    }

    /// Number of rows selected or written
    pub fn count(&self) -> usize {
        match self {
            QueryOutput::Rows(rows) => rows.len(),
            QueryOutput::Affected(n) => *n,
        }
    }
}

/// Tables of rows keyed by resource name
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    tables: HashMap<String, Vec<Row>>,
    models: HashMap<String, Model>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `{"table": [{..row..}, ..], ..}`
    pub fn from_json(value: Value) -> Result<Self> {
        let Value::Object(tables) = value else {
            return Err(Error::Configuration(
                "data file must be an object of tables".to_string(),
            ));
        };

        let mut db = Self::new();
        for (table, rows) in tables {
            let Value::Array(rows) = rows else {
                return Err(Error::Configuration(format!(
                    "table '{table}' must be an array of rows"
                )));
            };
            for row in rows {
                db.seed(Row::from_json(table.as_str(), row)?);
            }
        }
        Ok(db)
    }

    /// Declare a model, used for primary keys and insert materialization
    pub fn define(&mut self, model: Model) {
        self.tables.entry(model.name.clone()).or_default();
        self.models.insert(model.name.clone(), model);
    }

    /// Store a row directly, bypassing any checks
    pub fn seed(&mut self, row: Row) {
        self.tables.entry(row.resource.clone()).or_default().push(row);
    }

    /// All rows of a table, unfiltered
    pub fn rows(&self, table: &str) -> &[Row] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn primary_key(&self, table: &str) -> String {
        self.models
            .get(table)
            .map_or_else(|| "id".to_string(), |m| m.primary_key.clone())
    }

    /// Find a row by primary key, unfiltered
    pub fn find(&self, table: &str, key: &Value) -> Option<&Row> {
        let pk = self.primary_key(table);
        self.rows(table).iter().find(|r| r.field(&pk) == Some(key))
    }

    /// Insert or replace a row by primary key
    pub fn upsert(&mut self, row: Row) {
        let pk = self.primary_key(&row.resource);
        let key = row.field(&pk).cloned();
        let rows = self.tables.entry(row.resource.clone()).or_default();
        match rows.iter_mut().find(|r| key.is_some() && r.field(&pk) == key.as_ref()) {
            Some(existing) => *existing = row,
            None => rows.push(row),
        }
    }

    /// Remove a row by primary key
    pub fn remove(&mut self, table: &str, key: &Value) -> bool {
        let pk = self.primary_key(table);
        let Some(rows) = self.tables.get_mut(table) else {
            return false;
        };
        let before = rows.len();
        rows.retain(|r| r.field(&pk) != Some(key));
        rows.len() != before
    }

    fn materialize(&self, table: &str, values: &serde_json::Map<String, Value>) -> Result<Row> {
        match self.models.get(table) {
            Some(model) => model.instantiate(values),
            None => Ok(Row {
                resource: table.to_string(),
                values: values.clone(),
            }),
        }
    }

    /// Execute a statement
    pub fn execute(&mut self, query: &Query) -> Result<QueryOutput> {
        let table = query.target()?.to_string();
        trace!(%query, "Executing statement");

        match query {
            Query::Select(stmt) => {
                let rows = self
                    .rows(&table)
                    .iter()
                    .filter(|r| query.admits(*r))
                    .take(stmt.limit.unwrap_or(usize::MAX))
                    .map(|r| project(r, &stmt.columns))
                    .collect();
                Ok(QueryOutput::Rows(rows))
            }
            Query::Insert(stmt) => {
                let row = self.materialize(&table, &stmt.values)?;
                if !query.admits(&row) {
                    return Ok(QueryOutput::Affected(0));
                }
                self.seed(row);
                Ok(QueryOutput::Affected(1))
            }
            Query::Update(stmt) => {
                let model = self.models.get(&table).cloned();
                if let Some(model) = &model {
                    if let Some(unknown) = stmt.assignments.keys().find(|k| !model.has_field(k)) {
                        return Err(Error::missing_field(&table, unknown));
                    }
                }
                let mut affected = 0;
                for row in self.tables.entry(table).or_default() {
                    if query.admits(&*row) {
                        for (column, value) in &stmt.assignments {
                            row.values.insert(column.clone(), value.clone());
                        }
                        affected += 1;
                    }
                }
                Ok(QueryOutput::Affected(affected))
            }
            Query::Delete(_) => {
                let rows = self.tables.entry(table).or_default();
                let before = rows.len();
                rows.retain(|r| !query.admits(r));
                Ok(QueryOutput::Affected(before - rows.len()))
            }
        }
    }
}

fn project(row: &Row, columns: &[String]) -> Row {
    if columns.is_empty() {
        return row.clone();
    }
    let mut out = Row::new(&row.resource);
    for column in columns {
        if let Some(value) = row.field(column) {
            out.values.insert(column.clone(), value.clone());
        }
    }
    out
}
