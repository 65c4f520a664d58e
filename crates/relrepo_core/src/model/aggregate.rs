//! Aggregate read model: one record plus explicitly loaded relationships.
//!
//! # Responsibility
//! - Hold nested records produced by aggregate fetches and nested creates.
//! - Fail loudly when code touches a relationship that was never loaded.
//!
//! # Invariants
//! - A relationship is present in `relations` iff the caller requested it.
//! - Reading or mutating an absent relationship returns
//!   `RepoError::AccessToUnloadedRelationship` at the call site; it never
//!   yields an empty placeholder.

use crate::model::record::Record;
use crate::model::value::{RecordKey, Value};
use crate::repo::error::{RepoError, RepoResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Loaded state of one relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Loaded {
    /// `has_one` / `belongs_to`; `None` when no related row exists.
    One(Option<Box<AggregateRecord>>),
    /// `has_many`, ordered by ascending key.
    Many(Vec<AggregateRecord>),
}

/// Record plus requested nested relationships.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub record: Record,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    relations: BTreeMap<String, Loaded>,
}

impl AggregateRecord {
    /// Wraps a record with no relationships loaded.
    pub fn new(record: Record) -> Self {
        Self {
            record,
            relations: BTreeMap::new(),
        }
    }

    /// Marks `relationship` as loaded with the given value.
    pub fn attach(&mut self, relationship: impl Into<String>, loaded: Loaded) {
        self.relations.insert(relationship.into(), loaded);
    }

    pub fn entity(&self) -> &str {
        &self.record.entity
    }

    pub fn key(&self) -> Option<RecordKey> {
        self.record.key
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.record.get(field)
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.record.text(field)
    }

    pub fn integer(&self, field: &str) -> Option<i64> {
        self.record.integer(field)
    }

    /// Sets a plain field on the root record. Relationships are untouched.
    pub fn set_field(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.record.set(field, value);
    }

    pub fn is_loaded(&self, relationship: &str) -> bool {
        self.relations.contains_key(relationship)
    }

    pub fn loaded_relationships(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }

    /// Returns the loaded state of a relationship.
    ///
    /// # Errors
    /// - `AccessToUnloadedRelationship` when it was not requested.
    pub fn relation(&self, relationship: &str) -> RepoResult<&Loaded> {
        self.relations
            .get(relationship)
            .ok_or_else(|| self.unloaded(relationship))
    }

    /// Returns a singular relationship.
    ///
    /// # Errors
    /// - `AccessToUnloadedRelationship` when it was not requested.
    /// - `RelationshipShapeMismatch` when it holds a collection.
    pub fn one(&self, relationship: &str) -> RepoResult<Option<&AggregateRecord>> {
        match self.relation(relationship)? {
            Loaded::One(value) => Ok(value.as_deref()),
            Loaded::Many(_) => Err(self.shape_mismatch(relationship, "one")),
        }
    }

    /// Returns a collection relationship.
    ///
    /// # Errors
    /// - `AccessToUnloadedRelationship` when it was not requested.
    /// - `RelationshipShapeMismatch` when it holds a single record.
    pub fn many(&self, relationship: &str) -> RepoResult<&[AggregateRecord]> {
        match self.relation(relationship)? {
            Loaded::Many(values) => Ok(values.as_slice()),
            Loaded::One(_) => Err(self.shape_mismatch(relationship, "many")),
        }
    }

    pub fn one_mut(&mut self, relationship: &str) -> RepoResult<Option<&mut AggregateRecord>> {
        let entity = self.record.entity.clone();
        match self.relations.get_mut(relationship) {
            Some(Loaded::One(value)) => Ok(value.as_deref_mut()),
            Some(Loaded::Many(_)) => Err(RepoError::RelationshipShapeMismatch {
                entity,
                relationship: relationship.to_string(),
                expected: "one",
            }),
            None => Err(RepoError::AccessToUnloadedRelationship {
                entity,
                relationship: relationship.to_string(),
            }),
        }
    }

    pub fn many_mut(&mut self, relationship: &str) -> RepoResult<&mut Vec<AggregateRecord>> {
        let entity = self.record.entity.clone();
        match self.relations.get_mut(relationship) {
            Some(Loaded::Many(values)) => Ok(values),
            Some(Loaded::One(_)) => Err(RepoError::RelationshipShapeMismatch {
                entity,
                relationship: relationship.to_string(),
                expected: "many",
            }),
            None => Err(RepoError::AccessToUnloadedRelationship {
                entity,
                relationship: relationship.to_string(),
            }),
        }
    }

    /// Drops all loaded relationships and returns the flat record.
    pub fn into_record(self) -> Record {
        self.record
    }

    fn unloaded(&self, relationship: &str) -> RepoError {
        RepoError::AccessToUnloadedRelationship {
            entity: self.record.entity.clone(),
            relationship: relationship.to_string(),
        }
    }

    fn shape_mismatch(&self, relationship: &str, expected: &'static str) -> RepoError {
        RepoError::RelationshipShapeMismatch {
            entity: self.record.entity.clone(),
            relationship: relationship.to_string(),
            expected,
        }
    }
}
