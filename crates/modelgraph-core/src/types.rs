use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A plain application object: the JSON-shaped record that is saved and read.
pub type Object = serde_json::Map<String, Value>;

/// Database-assigned node identifier.
pub type NodeId = i64;

/// Extracts a node identifier from a bare id (`12`, `"12"`) or from an object's id field.
pub fn node_id(value: &Value, id_field: &str) -> Option<NodeId> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(object) => object_id(object, id_field),
        _ => None,
    }
}

pub fn object_id(object: &Object, id_field: &str) -> Option<NodeId> {
    match object.get(id_field) {
        Some(Value::Object(_)) | None => None,
        Some(value) => node_id(value, id_field),
    }
}

/// One parametrized statement, executed atomically by the database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub text: String,
    pub params: Object,
}

impl Statement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Object::new(),
        }
    }

    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Tabular statement result: named columns and one value per column per row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Consumes the table, turning each row into a column-name keyed map.
    pub fn into_records(self) -> Vec<Object> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|row| columns.iter().cloned().zip(row).collect())
            .collect()
    }
}
