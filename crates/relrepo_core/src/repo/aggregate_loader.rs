//! Aggregate loader: hydrates declared relationship trees.
//!
//! # Responsibility
//! - Turn a `RelationPath` into batched gateway selects.
//! - Assemble nested `AggregateRecord`s, attaching only requested relations.
//!
//! # Invariants
//! - The whole path is checked against the registry before any query runs.
//! - Exactly one select per path edge per parent set; never one per row.
//! - Children keep ascending-key order under each parent.
//! - Stateless between calls.

use crate::gateway::StorageGateway;
use crate::model::aggregate::{AggregateRecord, Loaded};
use crate::model::path::RelationPath;
use crate::model::record::Record;
use crate::model::value::{Conditions, RecordKey, Value};
use crate::repo::error::{RepoError, RepoResult};
use crate::schema::{RelationKind, RelationshipDef, SchemaRegistry};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// Loads aggregates through one gateway.
pub struct AggregateLoader<'g, G: StorageGateway> {
    gateway: &'g G,
}

impl<'g, G: StorageGateway> AggregateLoader<'g, G> {
    pub fn new(gateway: &'g G) -> Self {
        Self { gateway }
    }

    /// Loads one root row and the relationships named in `path`.
    ///
    /// # Errors
    /// - `UnknownRelationship` when a segment is not declared on its entity.
    /// - `NotFound` when the root row does not exist.
    /// - `MultipleRowsForKey` when the key answers more than one row.
    pub fn load(
        &self,
        entity: &str,
        key: RecordKey,
        path: &RelationPath,
    ) -> RepoResult<AggregateRecord> {
        let registry = self.gateway.registry();
        validate_path(registry, entity, path)?;

        let def = registry.resolve(entity)?;
        let conditions = Conditions::new().with(def.primary_key.clone(), key);
        let roots = self.gateway.select_where(entity, &conditions)?;
        match roots.len() {
            0 => return Err(RepoError::not_found(entity, key)),
            1 => {}
            count => {
                return Err(RepoError::MultipleRowsForKey {
                    entity: entity.to_string(),
                    key,
                    count,
                })
            }
        }

        let mut loaded = self.hydrate(entity, roots, path)?;
        loaded
            .pop()
            .ok_or_else(|| RepoError::not_found(entity, key))
    }

    /// Hydrates already-fetched root rows of one entity.
    pub fn load_all(
        &self,
        entity: &str,
        roots: Vec<Record>,
        path: &RelationPath,
    ) -> RepoResult<Vec<AggregateRecord>> {
        validate_path(self.gateway.registry(), entity, path)?;
        self.hydrate(entity, roots, path)
    }

    fn hydrate(
        &self,
        entity: &str,
        records: Vec<Record>,
        path: &RelationPath,
    ) -> RepoResult<Vec<AggregateRecord>> {
        let registry = self.gateway.registry();
        let mut nodes: Vec<AggregateRecord> =
            records.into_iter().map(AggregateRecord::new).collect();

        for (name, nested) in path.iter() {
            let rel = registry.relationship(entity, name)?;
            if rel.kind.is_inbound() {
                self.attach_inbound(entity, rel, &mut nodes, nested)?;
            } else {
                self.attach_belongs_to(rel, &mut nodes, nested)?;
            }
        }
        Ok(nodes)
    }

    /// `has_one`/`has_many`: children carry the parent key in `foreign_key`.
    fn attach_inbound(
        &self,
        entity: &str,
        rel: &RelationshipDef,
        nodes: &mut [AggregateRecord],
        nested: &RelationPath,
    ) -> RepoResult<()> {
        let parent_keys: BTreeSet<RecordKey> = nodes.iter().filter_map(|node| node.key()).collect();
        let rows = self.select_batch(&rel.target, &rel.foreign_key, &parent_keys)?;
        debug!(
            "event=aggregate_edge module=loader entity={} relationship={} parents={} rows={}",
            entity,
            rel.name,
            parent_keys.len(),
            rows.len()
        );

        let mut groups: BTreeMap<RecordKey, Vec<AggregateRecord>> = BTreeMap::new();
        for child in self.hydrate(&rel.target, rows, nested)? {
            if let Some(parent_key) = child.integer(&rel.foreign_key) {
                groups.entry(parent_key).or_default().push(child);
            }
        }

        for node in nodes.iter_mut() {
            let Some(key) = node.key() else {
                continue;
            };
            let mut children = groups.remove(&key).unwrap_or_default();
            let loaded = match rel.kind {
                RelationKind::HasMany => Loaded::Many(children),
                _ if children.len() > 1 => {
                    return Err(RepoError::MultipleRowsForKey {
                        entity: rel.target.clone(),
                        key,
                        count: children.len(),
                    });
                }
                _ => Loaded::One(children.pop().map(Box::new)),
            };
            node.attach(rel.name.clone(), loaded);
        }
        Ok(())
    }

    /// `belongs_to`: parents carry the target key in `foreign_key`.
    fn attach_belongs_to(
        &self,
        rel: &RelationshipDef,
        nodes: &mut [AggregateRecord],
        nested: &RelationPath,
    ) -> RepoResult<()> {
        let target = self.gateway.registry().resolve(&rel.target)?;
        let target_keys: BTreeSet<RecordKey> = nodes
            .iter()
            .filter_map(|node| node.integer(&rel.foreign_key))
            .collect();
        let rows = self.select_batch(&target.name, &target.primary_key, &target_keys)?;
        debug!(
            "event=aggregate_edge module=loader relationship={} targets={} rows={}",
            rel.name,
            target_keys.len(),
            rows.len()
        );

        let by_key: BTreeMap<RecordKey, AggregateRecord> = self
            .hydrate(&target.name, rows, nested)?
            .into_iter()
            .filter_map(|record| record.key().map(|key| (key, record)))
            .collect();

        for node in nodes.iter_mut() {
            let related = node
                .integer(&rel.foreign_key)
                .and_then(|key| by_key.get(&key))
                .cloned()
                .map(Box::new);
            node.attach(rel.name.clone(), Loaded::One(related));
        }
        Ok(())
    }

    fn select_batch(
        &self,
        entity: &str,
        field: &str,
        keys: &BTreeSet<RecordKey>,
    ) -> RepoResult<Vec<Record>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let values: Vec<Value> = keys.iter().copied().map(Value::Integer).collect();
        self.gateway.select_in(entity, field, &values)
    }
}

/// Checks every segment of `path` against the registry.
pub fn validate_path(
    registry: &SchemaRegistry,
    entity: &str,
    path: &RelationPath,
) -> RepoResult<()> {
    registry.resolve(entity)?;
    for (name, nested) in path.iter() {
        let rel = registry.relationship(entity, name)?;
        validate_path(registry, &rel.target, nested)?;
    }
    Ok(())
}
