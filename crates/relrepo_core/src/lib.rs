//! Core of relrepo: a typed relational repository layer over SQLite.
//! Entities and relationships are declared once in a schema registry; the
//! repositories, aggregate loader and DDL renderer all read from it.

pub mod db;
pub mod gateway;
pub mod logging;
pub mod model;
pub mod repo;
pub mod schema;

pub use db::{open_db, open_db_in_memory, open_store, DbError, DbLocation, DbResult, StoreConfig};
pub use gateway::{SqliteGateway, StorageGateway};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::aggregate::{AggregateRecord, Loaded};
pub use model::path::{NestedChildren, NestedCreate, RelationPath};
pub use model::record::Record;
pub use model::value::{Conditions, FieldValues, RecordKey, Value};
pub use repo::aggregate_loader::AggregateLoader;
pub use repo::entity_repo::Repository;
pub use repo::error::{RepoError, RepoResult};
pub use schema::{
    EntityDef, FieldDef, FieldType, OnDelete, RelationKind, RelationshipDef, SchemaError,
    SchemaRegistry, SchemaRegistryBuilder,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
