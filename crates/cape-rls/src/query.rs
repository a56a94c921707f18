//! Query representation the rewriter operates on
//!
//! Every statement shape carries its target resource and an extendable list of
//! predicates that are AND'ed together when the statement runs.

use serde_json::Map;
use std::fmt;

use cape_common::{Error, Result, Value};

use crate::record::Record;

// ============================================================================
// Predicates
// ============================================================================

/// Boolean condition over the attributes of a single row
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Literal(bool),
    Eq { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    Not(Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    /// `field = value`
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// `field IN (values)`
    pub fn is_in<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Equality for a scalar, membership for an array
    pub fn matching(field: impl Into<String>, value: &Value) -> Self {
        match value {
            Value::Array(values) => Self::is_in(field, values.iter().cloned()),
            other => Self::eq(field, other.clone()),
        }
    }

    /// Conjunction. An empty conjunction is `true`.
    pub fn and<I: IntoIterator<Item = Predicate>>(parts: I) -> Self {
        let mut parts: Vec<Predicate> = parts.into_iter().collect();
        match parts.len() {
            0 => Self::Literal(true),
            1 => parts.remove(0),
            _ => Self::And(parts),
        }
    }

    /// Disjunction. An empty disjunction is `false`.
    pub fn or<I: IntoIterator<Item = Predicate>>(parts: I) -> Self {
        let mut parts: Vec<Predicate> = parts.into_iter().collect();
        match parts.len() {
            0 => Self::Literal(false),
            1 => parts.remove(0),
            _ => Self::Or(parts),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Predicate) -> Self {
        Self::Not(Box::new(inner))
    }

    /// Evaluate against a row. A field missing from the row compares as null.
    pub fn matches<R: Record + ?Sized>(&self, row: &R) -> bool {
        match self {
            Self::Literal(b) => *b,
            Self::Eq { field, value } => row.field(field).unwrap_or(&Value::Null) == value,
            Self::In { field, values } => {
                values.contains(row.field(field).unwrap_or(&Value::Null))
            }
            Self::Not(inner) => !inner.matches(row),
            Self::And(parts) => parts.iter().all(|p| p.matches(row)),
            Self::Or(parts) => parts.iter().any(|p| p.matches(row)),
        }
    }

    /// Fields referenced anywhere in this predicate
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Literal(_) => {}
            Self::Eq { field, .. } | Self::In { field, .. } => {
                if !out.contains(&field.as_str()) {
                    out.push(field);
                }
            }
            Self::Not(inner) => inner.collect_fields(out),
            Self::And(parts) | Self::Or(parts) => {
                for p in parts {
                    p.collect_fields(out);
                }
            }
        }
    }
}

fn write_literal(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::Null => f.write_str("NULL"),
        Value::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
        Value::Number(n) => write!(f, "{n}"),
        Value::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
        other => write!(f, "'{}'", other.to_string().replace('\'', "''")),
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, parts: &[Predicate], sep: &str) -> fmt::Result {
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "({part})")?;
    }
    Ok(())
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(true) => f.write_str("TRUE"),
            Self::Literal(false) => f.write_str("FALSE"),
            Self::Eq { field, value } if value.is_null() => write!(f, "{field} IS NULL"),
            Self::Eq { field, value } => {
                write!(f, "{field} = ")?;
                write_literal(f, value)
            }
            Self::In { values, .. } if values.is_empty() => f.write_str("FALSE"),
            Self::In { field, values } => {
                write!(f, "{field} IN (")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_literal(f, value)?;
                }
                f.write_str(")")
            }
            Self::Not(inner) => write!(f, "NOT ({inner})"),
            Self::And(parts) => write_joined(f, parts, " AND "),
            Self::Or(parts) => write_joined(f, parts, " OR "),
        }
    }
}

// ============================================================================
// Statements
// ============================================================================

/// `SELECT columns FROM tables WHERE filters LIMIT n`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectStatement {
    pub from: Vec<String>,
    /// Projected columns, empty for all
    pub columns: Vec<String>,
    pub filters: Vec<Predicate>,
    pub limit: Option<usize>,
}

/// `INSERT INTO table (..) VALUES (..)`
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table: String,
    pub values: Map<String, Value>,
    /// Conditions the inserted row must satisfy
    pub checks: Vec<Predicate>,
}

/// `UPDATE table SET .. WHERE filters`
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table: String,
    pub assignments: Map<String, Value>,
    pub filters: Vec<Predicate>,
}

/// `DELETE FROM table WHERE filters`
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub table: String,
    pub filters: Vec<Predicate>,
}

impl InsertStatement {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            values: Map::new(),
            checks: vec![],
        }
    }

    pub fn value(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.values.insert(column.to_string(), value.into());
        self
    }
}

/// Statement shapes the rewriter understands
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Select(SelectStatement),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
}

impl Query {
    /// `SELECT * FROM table`
    pub fn select(table: &str) -> Self {
        Self::Select(SelectStatement {
            from: vec![table.to_string()],
            ..Default::default()
        })
    }

    /// `INSERT INTO table`, values added with [`Query::value`]
    pub fn insert(table: &str) -> Self {
        Self::Insert(InsertStatement::new(table))
    }

    /// `UPDATE table`, assignments added with [`Query::value`]
    pub fn update(table: &str) -> Self {
        Self::Update(UpdateStatement {
            table: table.to_string(),
            assignments: Map::new(),
            filters: vec![],
        })
    }

    /// `DELETE FROM table`
    pub fn delete(table: &str) -> Self {
        Self::Delete(DeleteStatement {
            table: table.to_string(),
            filters: vec![],
        })
    }

    /// Add a column value (insert) or assignment (update); ignored otherwise
    pub fn value(mut self, column: &str, value: impl Into<Value>) -> Self {
        match &mut self {
            Self::Insert(stmt) => {
                stmt.values.insert(column.to_string(), value.into());
            }
            Self::Update(stmt) => {
                stmt.assignments.insert(column.to_string(), value.into());
            }
            Self::Select(_) | Self::Delete(_) => {}
        }
        self
    }

    /// Builder form of [`Query::push_filter`]
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.push_filter(predicate);
        self
    }

    /// Narrow the statement with another condition, keeping existing ones
    pub fn push_filter(&mut self, predicate: Predicate) {
        self.predicates_mut().push(predicate);
    }

    /// Limit a select; ignored for other statements
    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        if let Self::Select(stmt) = &mut self {
            stmt.limit = Some(n);
        }
        self
    }

    /// The resource this statement targets
    pub fn target(&self) -> Result<&str> {
        match self {
            Self::Select(stmt) => stmt.from.first().map(String::as_str).ok_or_else(|| {
                Error::UnsupportedQuery("select without a FROM clause".to_string())
            }),
            Self::Insert(stmt) => Ok(&stmt.table),
            Self::Update(stmt) => Ok(&stmt.table),
            Self::Delete(stmt) => Ok(&stmt.table),
        }
    }

    /// Conditions currently attached to the statement
    pub fn predicates(&self) -> &[Predicate] {
        match self {
            Self::Select(stmt) => &stmt.filters,
            Self::Insert(stmt) => &stmt.checks,
            Self::Update(stmt) => &stmt.filters,
            Self::Delete(stmt) => &stmt.filters,
        }
    }

    fn predicates_mut(&mut self) -> &mut Vec<Predicate> {
        match self {
            Self::Select(stmt) => &mut stmt.filters,
            Self::Insert(stmt) => &mut stmt.checks,
            Self::Update(stmt) => &mut stmt.filters,
            Self::Delete(stmt) => &mut stmt.filters,
        }
    }

    /// Check whether a row satisfies every attached condition
    pub fn admits<R: Record + ?Sized>(&self, row: &R) -> bool {
        self.predicates().iter().all(|p| p.matches(row))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Select(_) => "select",
            Self::Insert(_) => "insert",
            Self::Update(_) => "update",
            Self::Delete(_) => "delete",
        }
    }
}

fn write_where(f: &mut fmt::Formatter<'_>, filters: &[Predicate]) -> fmt::Result {
    if filters.is_empty() {
        return Ok(());
    }
    f.write_str(" WHERE ")?;
    write_joined(f, filters, " AND ")
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Select(stmt) => {
                let columns = if stmt.columns.is_empty() {
                    "*".to_string()
                } else {
                    stmt.columns.join(", ")
                };
                write!(f, "SELECT {columns} FROM {}", stmt.from.join(", "))?;
                write_where(f, &stmt.filters)?;
                if let Some(limit) = stmt.limit {
                    write!(f, " LIMIT {limit}")?;
                }
                Ok(())
            }
            Self::Insert(stmt) => {
                let columns: Vec<&str> = stmt.values.keys().map(String::as_str).collect();
                write!(f, "INSERT INTO {} ({}) VALUES (", stmt.table, columns.join(", "))?;
                for (i, value) in stmt.values.values().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_literal(f, value)?;
                }
                f.write_str(")")?;
                if !stmt.checks.is_empty() {
                    f.write_str(" CHECK ")?;
                    write_joined(f, &stmt.checks, " AND ")?;
                }
                Ok(())
            }
            Self::Update(stmt) => {
                write!(f, "UPDATE {} SET ", stmt.table)?;
                for (i, (column, value)) in stmt.assignments.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{column} = ")?;
                    write_literal(f, value)?;
                }
                write_where(f, &stmt.filters)
            }
            Self::Delete(stmt) => {
                write!(f, "DELETE FROM {}", stmt.table)?;
                write_where(f, &stmt.filters)
            }
        }
    }
}
