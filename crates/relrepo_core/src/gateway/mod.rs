//! Storage gateway contract and the SQLite implementation.
//!
//! # Responsibility
//! - Define the synchronous row-level interface repositories call into.
//! - Keep SQL details behind that interface.
//!
//! # Invariants
//! - Every operation is side-effecting only on success.
//! - `atomically` scopes nest; an error anywhere inside a scope rolls back
//!   everything the scope wrote.
//! - Selects return rows in ascending primary-key order, which is insertion
//!   order for store-assigned keys.

mod sqlite;

use crate::model::aggregate::AggregateRecord;
use crate::model::path::RelationPath;
use crate::model::record::Record;
use crate::model::value::{Conditions, FieldValues, RecordKey, Value};
use crate::repo::aggregate_loader::AggregateLoader;
use crate::repo::error::RepoResult;
use crate::schema::SchemaRegistry;

pub use sqlite::SqliteGateway;

/// Row-level access to a backing relational store.
pub trait StorageGateway {
    /// Registry the gateway validates against.
    fn registry(&self) -> &SchemaRegistry;

    /// Inserts one row and returns it with its assigned key.
    ///
    /// # Errors
    /// - `ConstraintViolation` for missing required fields, mistyped values
    ///   or foreign keys that reference missing rows.
    /// - `UnknownField` for fields the entity does not declare.
    fn insert(&self, entity: &str, values: &FieldValues) -> RepoResult<Record>;

    /// Updates the given fields of one row and returns the stored row.
    ///
    /// # Errors
    /// - `NotFound` when `key` does not exist.
    fn update_by_key(
        &self,
        entity: &str,
        key: RecordKey,
        values: &FieldValues,
    ) -> RepoResult<Record>;

    /// Deletes one row, applying on-delete policies to dependents
    /// recursively, and returns the row as it was before deletion.
    ///
    /// # Errors
    /// - `NotFound` when `key` does not exist.
    /// - `ConstraintViolation` when a `restrict` dependent exists.
    fn delete_by_key(&self, entity: &str, key: RecordKey) -> RepoResult<Record>;

    /// Exact-match select. Empty conditions return all rows.
    fn select_where(&self, entity: &str, conditions: &Conditions) -> RepoResult<Vec<Record>>;

    /// Selects rows whose `field` equals any of `values`.
    fn select_in(&self, entity: &str, field: &str, values: &[Value]) -> RepoResult<Vec<Record>>;

    /// Runs `work` as one atomic unit named `scope` (used in logs).
    fn atomically<T, F>(&self, scope: &str, work: F) -> RepoResult<T>
    where
        F: FnOnce() -> RepoResult<T>;

    /// Loads one row plus the relationships named in `path`.
    ///
    /// # Errors
    /// - `NotFound` when the root row does not exist.
    /// - `UnknownRelationship` when a path segment is not declared.
    fn select_joined(
        &self,
        entity: &str,
        key: RecordKey,
        path: &RelationPath,
    ) -> RepoResult<AggregateRecord>
    where
        Self: Sized,
    {
        AggregateLoader::new(self).load(entity, key, path)
    }
}
