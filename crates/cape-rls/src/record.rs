//! Row abstraction the engine introspects

use serde::{Deserialize, Serialize};
use serde_json::Map;

use cape_common::{Error, Result, Value};

/// A materialized row of some protected resource
pub trait Record {
    /// Name of the resource (table) this row belongs to
    fn resource(&self) -> &str;

    /// Read an attribute by name.
    ///
    /// Returns `None` when the attribute does not exist on the row type; a
    /// null attribute is `Some(Value::Null)`.
    fn field(&self, name: &str) -> Option<&Value>;
}

/// Generic row backed by a JSON object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub resource: String,
    pub values: Map<String, Value>,
}

impl Row {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            values: Map::new(),
        }
    }

    /// Set an attribute
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(field.into(), value.into());
    }

    /// Build a row from a JSON object
    pub fn from_json(resource: impl Into<String>, value: Value) -> Result<Self> {
        let resource = resource.into();
        match value {
            Value::Object(values) => Ok(Self { resource, values }),
            other => Err(Error::Configuration(format!(
                "row for '{resource}' must be a JSON object, got {other}"
            ))),
        }
    }
}

impl Record for Row {
    fn resource(&self) -> &str {
        &self.resource
    }

    fn field(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

/// Declared attribute set of a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    pub fields: Vec<String>,
}

fn default_primary_key() -> String {
    "id".to_string()
}

impl Model {
    pub fn new<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            primary_key: default_primary_key(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = key.into();
        self
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f == name)
    }

    /// Materialize a transient row from proposed column values.
    ///
    /// Declared fields missing from `values` are null; undeclared columns are
    /// rejected.
    pub fn instantiate(&self, values: &Map<String, Value>) -> Result<Row> {
        if let Some(unknown) = values.keys().find(|k| !self.has_field(k)) {
            return Err(Error::missing_field(&self.name, unknown));
        }

        let mut row = Row::new(&self.name);
        for field in &self.fields {
            let value = values.get(field).cloned().unwrap_or(Value::Null);
            row.values.insert(field.clone(), value);
        }
        Ok(row)
    }
}
