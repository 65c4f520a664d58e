//! Per-entity repository over a storage gateway.
//!
//! # Responsibility
//! - Provide CRUD, nested create and aggregate fetch for one entity.
//! - Validate nested input against the registry before writing anything.
//!
//! # Invariants
//! - `create_with_nested` is all-or-nothing: any child failure rolls back
//!   the parent too.
//! - `get_by_key` distinguishes zero rows (`NotFound`) from several rows
//!   (`MultipleRowsForKey`).

use crate::gateway::StorageGateway;
use crate::model::aggregate::{AggregateRecord, Loaded};
use crate::model::path::{NestedChildren, NestedCreate, RelationPath};
use crate::model::record::Record;
use crate::model::value::{Conditions, FieldValues, RecordKey, Value};
use crate::repo::aggregate_loader::{validate_path, AggregateLoader};
use crate::repo::error::{RepoError, RepoResult};
use crate::schema::{EntityDef, RelationKind, SchemaRegistry};
use log::{info, warn};
use std::time::Instant;

/// Typed facade for one entity.
pub struct Repository<'g, G: StorageGateway> {
    gateway: &'g G,
    entity: &'g EntityDef,
}

impl<'g, G: StorageGateway> Repository<'g, G> {
    /// Binds a repository to one registered entity.
    ///
    /// # Errors
    /// - `UnknownEntity` when the registry does not declare `entity`.
    pub fn try_new(gateway: &'g G, entity: &str) -> RepoResult<Self> {
        let entity = gateway.registry().resolve(entity)?;
        Ok(Self { gateway, entity })
    }

    pub fn definition(&self) -> &EntityDef {
        self.entity
    }

    pub fn name(&self) -> &str {
        &self.entity.name
    }

    /// Inserts one row.
    pub fn create(&self, values: &FieldValues) -> RepoResult<Record> {
        let started_at = Instant::now();
        let result = self.gateway.insert(self.name(), values);
        self.log_write("repo_create", started_at, result.as_ref().map(|row| row.key));
        result
    }

    /// Updates the given fields; other fields keep their stored values.
    pub fn update(&self, key: RecordKey, values: &FieldValues) -> RepoResult<Record> {
        let started_at = Instant::now();
        let result = self.gateway.update_by_key(self.name(), key, values);
        self.log_write("repo_update", started_at, result.as_ref().map(|_| Some(key)));
        result
    }

    /// Deletes one row (cascading per policy) and returns it.
    pub fn delete(&self, key: RecordKey) -> RepoResult<Record> {
        let started_at = Instant::now();
        let result = self.gateway.delete_by_key(self.name(), key);
        self.log_write("repo_delete", started_at, result.as_ref().map(|_| Some(key)));
        result
    }

    /// Loads exactly one row by primary key.
    pub fn get_by_key(&self, key: RecordKey) -> RepoResult<Record> {
        let conditions = Conditions::new().with(self.entity.primary_key.clone(), key);
        let mut rows = self.gateway.select_where(self.name(), &conditions)?;
        match rows.len() {
            0 => Err(RepoError::not_found(self.name(), key)),
            1 => Ok(rows.remove(0)),
            count => Err(RepoError::MultipleRowsForKey {
                entity: self.name().to_string(),
                key,
                count,
            }),
        }
    }

    /// Lists rows matching every condition, in insertion order.
    pub fn list_by(&self, conditions: &Conditions) -> RepoResult<Vec<Record>> {
        self.gateway.select_where(self.name(), conditions)
    }

    pub fn count_by(&self, conditions: &Conditions) -> RepoResult<usize> {
        Ok(self.list_by(conditions)?.len())
    }

    /// Creates the parent row and every nested child in one atomic scope.
    ///
    /// # Errors
    /// - `UnknownRelationship`, `UnsupportedNestedCreate` or
    ///   `RelationshipShapeMismatch` for malformed input (nothing written).
    /// - `ConstraintViolation` from any row; nothing stays written.
    pub fn create_with_nested(&self, input: &NestedCreate) -> RepoResult<AggregateRecord> {
        let started_at = Instant::now();
        let registry = self.gateway.registry();
        validate_nested(registry, self.entity, input)?;

        let result = self.gateway.atomically("create_with_nested", || {
            create_tree(self.gateway, registry, self.entity, input, None)
        });
        self.log_write(
            "repo_create_nested",
            started_at,
            result.as_ref().map(AggregateRecord::key),
        );
        result
    }

    /// Loads one row with the relationships named in `path`.
    pub fn aggregate(&self, key: RecordKey, path: &RelationPath) -> RepoResult<AggregateRecord> {
        self.gateway.select_joined(self.name(), key, path)
    }

    /// Loads every matching row with the relationships named in `path`.
    pub fn aggregates_by(
        &self,
        conditions: &Conditions,
        path: &RelationPath,
    ) -> RepoResult<Vec<AggregateRecord>> {
        validate_path(self.gateway.registry(), self.name(), path)?;
        let roots = self.list_by(conditions)?;
        AggregateLoader::new(self.gateway).load_all(self.name(), roots, path)
    }

    fn log_write(
        &self,
        event: &str,
        started_at: Instant,
        outcome: Result<Option<RecordKey>, &RepoError>,
    ) {
        match outcome {
            Ok(key) => info!(
                "event={} module=repo status=ok entity={} key={} duration_ms={}",
                event,
                self.name(),
                key.map_or_else(|| "none".to_string(), |key| key.to_string()),
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event={} module=repo status=error entity={} duration_ms={} error_code={} error={}",
                event,
                self.name(),
                started_at.elapsed().as_millis(),
                err.code(),
                err
            ),
        }
    }
}

fn validate_nested(
    registry: &SchemaRegistry,
    def: &EntityDef,
    input: &NestedCreate,
) -> RepoResult<()> {
    for (name, children) in &input.children {
        let rel = registry.relationship(&def.name, name)?;
        if !rel.kind.is_inbound() {
            return Err(RepoError::UnsupportedNestedCreate {
                entity: def.name.clone(),
                relationship: name.clone(),
            });
        }

        let target = registry.resolve(&rel.target)?;
        match (rel.kind, children) {
            (RelationKind::HasOne, NestedChildren::One(child)) => {
                validate_nested(registry, target, child)?;
            }
            (RelationKind::HasMany, NestedChildren::Many(items)) => {
                for child in items {
                    validate_nested(registry, target, child)?;
                }
            }
            _ => {
                return Err(RepoError::RelationshipShapeMismatch {
                    entity: def.name.clone(),
                    relationship: name.clone(),
                    expected: if rel.kind == RelationKind::HasOne {
                        "one"
                    } else {
                        "many"
                    },
                });
            }
        }
    }
    Ok(())
}

fn create_tree<G: StorageGateway>(
    gateway: &G,
    registry: &SchemaRegistry,
    def: &EntityDef,
    input: &NestedCreate,
    parent_link: Option<(&str, RecordKey)>,
) -> RepoResult<AggregateRecord> {
    let mut values = input.fields.clone();
    if let Some((foreign_key, parent_key)) = parent_link {
        match values.get(foreign_key) {
            None => {}
            Some(Value::Integer(given)) if *given == parent_key => {}
            Some(other) => {
                return Err(RepoError::constraint(
                    &def.name,
                    format!(
                        "foreign key `{foreign_key}` = {other} conflicts with parent key {parent_key}"
                    ),
                ));
            }
        }
        values.set(foreign_key, parent_key);
    }

    let record = gateway.insert(&def.name, &values)?;
    let key = record
        .key
        .ok_or_else(|| RepoError::InvalidData(format!("{} insert returned no key", def.name)))?;
    let mut node = AggregateRecord::new(record);

    for (name, children) in &input.children {
        let rel = registry.relationship(&def.name, name)?;
        let target = registry.resolve(&rel.target)?;
        let link = Some((rel.foreign_key.as_str(), key));
        let loaded = match children {
            NestedChildren::One(child) => Loaded::One(Some(Box::new(create_tree(
                gateway, registry, target, child, link,
            )?))),
            NestedChildren::Many(items) => Loaded::Many(
                items
                    .iter()
                    .map(|child| create_tree(gateway, registry, target, child, link))
                    .collect::<RepoResult<Vec<_>>>()?,
            ),
        };
        node.attach(name.clone(), loaded);
    }
    Ok(node)
}
