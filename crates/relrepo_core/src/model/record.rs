//! Flat row model.
//!
//! # Invariants
//! - `key` is `None` only for records that were never persisted.
//! - `fields` never contains the primary-key column; it lives in `key`.

use crate::model::value::{FieldValues, RecordKey, Value};
use serde::{Deserialize, Serialize};

/// One row of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub entity: String,
    pub key: Option<RecordKey>,
    pub fields: FieldValues,
}

impl Record {
    /// Creates an unpersisted record.
    pub fn new(entity: impl Into<String>, fields: FieldValues) -> Self {
        Self {
            entity: entity.into(),
            key: None,
            fields,
        }
    }

    /// Creates a record for a row that already exists in storage.
    pub fn persisted(entity: impl Into<String>, key: RecordKey, fields: FieldValues) -> Self {
        Self {
            entity: entity.into(),
            key: Some(key),
            fields,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.key.is_some()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Returns a text field, or `None` when absent, null or not text.
    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_text)
    }

    /// Returns an integer field, or `None` when absent, null or not integer.
    pub fn integer(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_integer)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.set(field, value);
    }
}
