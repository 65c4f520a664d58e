//! Schema registry: validated, read-only entity definitions.
//!
//! # Responsibility
//! - Collect entity definitions and validate the relationship graph once.
//! - Answer entity/relationship lookups for gateways, repositories and loaders.
//!
//! # Invariants
//! - Registration is two-phase: `register` rejects duplicates and malformed
//!   names, `build` rejects dangling relationships. Mutually referencing
//!   entities can therefore be registered in any order.
//! - Every `has_one`/`has_many` on A naming B has a `belongs_to` on B naming A
//!   with the same foreign key and on-delete policy.
//! - A built registry is never mutated and can be shared across threads.

use crate::schema::{EntityDef, FieldType, OnDelete, RelationKind, RelationshipDef};
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("valid identifier regex"));

/// Startup-time schema errors. These abort initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Name cannot be used as a SQL identifier.
    InvalidIdentifier {
        context: &'static str,
        value: String,
    },
    DuplicateEntity(String),
    DuplicateField {
        entity: String,
        field: String,
    },
    DuplicateRelationship {
        entity: String,
        relationship: String,
    },
    /// Relationship points at something that does not exist or does not
    /// match its inverse.
    DanglingRelationship {
        entity: String,
        relationship: String,
        reason: String,
    },
    UnknownEntity(String),
    UnknownRelationship {
        entity: String,
        relationship: String,
    },
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidIdentifier { context, value } => {
                write!(f, "invalid {context} name `{value}`; expected [a-z_][a-z0-9_]*")
            }
            Self::DuplicateEntity(name) => write!(f, "entity already registered: {name}"),
            Self::DuplicateField { entity, field } => {
                write!(f, "field `{field}` declared twice on entity `{entity}`")
            }
            Self::DuplicateRelationship {
                entity,
                relationship,
            } => write!(
                f,
                "relationship `{relationship}` declared twice on entity `{entity}`"
            ),
            Self::DanglingRelationship {
                entity,
                relationship,
                reason,
            } => write!(
                f,
                "dangling relationship `{entity}.{relationship}`: {reason}"
            ),
            Self::UnknownEntity(name) => write!(f, "unknown entity: {name}"),
            Self::UnknownRelationship {
                entity,
                relationship,
            } => write!(f, "unknown relationship `{relationship}` on entity `{entity}`"),
        }
    }
}

impl Error for SchemaError {}

/// A `belongs_to` edge pointing at some entity, seen from the referenced side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependent {
    /// Entity that holds the foreign key.
    pub entity: String,
    pub foreign_key: String,
    pub on_delete: OnDelete,
}

/// Collects definitions before validation.
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    entities: Vec<EntityDef>,
}

impl SchemaRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one entity definition.
    ///
    /// # Errors
    /// - `DuplicateEntity` when the name is already registered.
    /// - `InvalidIdentifier`, `DuplicateField`, `DuplicateRelationship` for
    ///   malformed definitions.
    pub fn register(&mut self, def: EntityDef) -> Result<&mut Self, SchemaError> {
        check_identifier("entity", &def.name)?;
        if self.entities.iter().any(|existing| existing.name == def.name) {
            return Err(SchemaError::DuplicateEntity(def.name));
        }
        check_identifier("primary key", &def.primary_key)?;

        let mut field_names = BTreeSet::new();
        field_names.insert(def.primary_key.as_str());
        for field in &def.fields {
            check_identifier("field", &field.name)?;
            if !field_names.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    entity: def.name.clone(),
                    field: field.name.clone(),
                });
            }
        }

        let mut relationship_names = BTreeSet::new();
        for rel in &def.relationships {
            check_identifier("relationship", &rel.name)?;
            check_identifier("entity", &rel.target)?;
            check_identifier("field", &rel.foreign_key)?;
            if !relationship_names.insert(rel.name.as_str()) {
                return Err(SchemaError::DuplicateRelationship {
                    entity: def.name.clone(),
                    relationship: rel.name.clone(),
                });
            }
        }

        self.entities.push(def);
        Ok(self)
    }

    /// Validates the relationship graph and freezes the registry.
    ///
    /// # Errors
    /// - `DanglingRelationship` for unknown targets, missing or mistyped
    ///   foreign-key fields, and missing or mismatching inverses.
    pub fn build(self) -> Result<SchemaRegistry, SchemaError> {
        let entities: BTreeMap<String, EntityDef> = self
            .entities
            .iter()
            .map(|def| (def.name.clone(), def.clone()))
            .collect();

        for def in &self.entities {
            for rel in &def.relationships {
                if let Err(err) = validate_relationship(&entities, def, rel) {
                    warn!(
                        "event=schema_build module=schema status=error entity={} relationship={} error={}",
                        def.name, rel.name, err
                    );
                    return Err(err);
                }
            }
        }

        let mut dependents: BTreeMap<String, Vec<Dependent>> = BTreeMap::new();
        for def in &self.entities {
            for rel in &def.relationships {
                if rel.kind == RelationKind::BelongsTo {
                    dependents
                        .entry(rel.target.clone())
                        .or_default()
                        .push(Dependent {
                            entity: def.name.clone(),
                            foreign_key: rel.foreign_key.clone(),
                            on_delete: rel.on_delete,
                        });
                }
            }
        }

        let order = dependency_order(&self.entities);
        let relationship_count: usize = self
            .entities
            .iter()
            .map(|def| def.relationships.len())
            .sum();
        info!(
            "event=schema_build module=schema status=ok entities={} relationships={}",
            order.len(),
            relationship_count
        );

        Ok(SchemaRegistry {
            entities,
            order,
            dependents,
        })
    }
}

/// Validated, read-only entity definitions.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    entities: BTreeMap<String, EntityDef>,
    order: Vec<String>,
    dependents: BTreeMap<String, Vec<Dependent>>,
}

impl SchemaRegistry {
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::new()
    }

    /// Registers and validates definitions in one call.
    pub fn from_definitions(
        defs: impl IntoIterator<Item = EntityDef>,
    ) -> Result<Self, SchemaError> {
        let mut builder = Self::builder();
        for def in defs {
            builder.register(def)?;
        }
        builder.build()
    }

    /// Looks up one entity definition.
    pub fn resolve(&self, entity: &str) -> Result<&EntityDef, SchemaError> {
        self.entities
            .get(entity)
            .ok_or_else(|| SchemaError::UnknownEntity(entity.to_string()))
    }

    pub fn relationships_of(&self, entity: &str) -> Result<&[RelationshipDef], SchemaError> {
        Ok(self.resolve(entity)?.relationships.as_slice())
    }

    /// Looks up one named relationship on an entity.
    pub fn relationship(
        &self,
        entity: &str,
        relationship: &str,
    ) -> Result<&RelationshipDef, SchemaError> {
        self.resolve(entity)?
            .relationship_def(relationship)
            .ok_or_else(|| SchemaError::UnknownRelationship {
                entity: entity.to_string(),
                relationship: relationship.to_string(),
            })
    }

    /// Returns every `belongs_to` edge that references `entity`.
    pub fn dependents_of(&self, entity: &str) -> &[Dependent] {
        self.dependents
            .get(entity)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Entity names with referenced entities before referencing ones.
    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Definitions in the same order as `entity_names`.
    pub fn entities(&self) -> impl Iterator<Item = &EntityDef> {
        self.order.iter().filter_map(|name| self.entities.get(name))
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.entities.contains_key(entity)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

fn check_identifier(context: &'static str, value: &str) -> Result<(), SchemaError> {
    if IDENTIFIER_RE.is_match(value) {
        return Ok(());
    }
    Err(SchemaError::InvalidIdentifier {
        context,
        value: value.to_string(),
    })
}

fn validate_relationship(
    entities: &BTreeMap<String, EntityDef>,
    owner: &EntityDef,
    rel: &RelationshipDef,
) -> Result<(), SchemaError> {
    let dangling = |reason: String| SchemaError::DanglingRelationship {
        entity: owner.name.clone(),
        relationship: rel.name.clone(),
        reason,
    };

    let target = entities
        .get(&rel.target)
        .ok_or_else(|| dangling(format!("target entity `{}` is not registered", rel.target)))?;

    // The foreign key always lives on the belongs_to side.
    let fk_holder = if rel.kind.is_inbound() { target } else { owner };
    let fk_field = fk_holder.field_def(&rel.foreign_key).ok_or_else(|| {
        dangling(format!(
            "foreign key `{}` is not a field of `{}`",
            rel.foreign_key, fk_holder.name
        ))
    })?;
    if fk_field.field_type != FieldType::Integer {
        return Err(dangling(format!(
            "foreign key `{}.{}` must be integer, found {}",
            fk_holder.name,
            fk_field.name,
            fk_field.field_type.as_str()
        )));
    }
    if rel.on_delete == OnDelete::SetNull && !fk_field.nullable {
        return Err(dangling(format!(
            "on_delete set_null requires nullable foreign key `{}.{}`",
            fk_holder.name, fk_field.name
        )));
    }

    if rel.kind.is_inbound() {
        let inverse = target
            .relationships
            .iter()
            .find(|candidate| {
                candidate.kind == RelationKind::BelongsTo
                    && candidate.target == owner.name
                    && candidate.foreign_key == rel.foreign_key
            })
            .ok_or_else(|| {
                dangling(format!(
                    "`{}` has no belongs_to `{}` through `{}`",
                    target.name, owner.name, rel.foreign_key
                ))
            })?;
        if inverse.on_delete != rel.on_delete {
            return Err(dangling(format!(
                "on_delete differs from inverse `{}.{}`",
                target.name, inverse.name
            )));
        }
    }

    Ok(())
}

/// Kahn ordering over belongs_to edges, stable on registration order.
/// Entities caught in a cycle are appended in registration order.
fn dependency_order(defs: &[EntityDef]) -> Vec<String> {
    let mut placed: BTreeSet<&str> = BTreeSet::new();
    let mut order = Vec::with_capacity(defs.len());

    loop {
        let ready: Vec<&EntityDef> = defs
            .iter()
            .filter(|def| !placed.contains(def.name.as_str()))
            .filter(|def| {
                def.relationships.iter().all(|rel| {
                    rel.kind != RelationKind::BelongsTo
                        || rel.target == def.name
                        || placed.contains(rel.target.as_str())
                })
            })
            .collect();
        if ready.is_empty() {
            break;
        }
        for def in ready {
            placed.insert(def.name.as_str());
            order.push(def.name.clone());
        }
    }

    for def in defs {
        if !placed.contains(def.name.as_str()) {
            order.push(def.name.clone());
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::{dependency_order, SchemaError, SchemaRegistry};
    use crate::schema::EntityDef;

    #[test]
    fn dependency_order_places_parents_first_regardless_of_registration() {
        let defs = vec![
            EntityDef::new("comments").belongs_to("post", "posts", "post_id"),
            EntityDef::new("posts").belongs_to("user", "users", "user_id"),
            EntityDef::new("users").text("user_name"),
        ];
        assert_eq!(dependency_order(&defs), vec!["users", "posts", "comments"]);
    }

    #[test]
    fn self_reference_does_not_block_ordering() {
        let defs = vec![EntityDef::new("comments")
            .field(crate::schema::FieldDef::optional(
                "parent_id",
                crate::schema::FieldType::Integer,
            ))
            .belongs_to("parent", "comments", "parent_id")
            .has_many("replies", "comments", "parent_id")];
        let registry = SchemaRegistry::from_definitions(defs).expect("self reference is valid");
        assert_eq!(registry.entity_names().collect::<Vec<_>>(), vec!["comments"]);
    }

    #[test]
    fn rejects_uppercase_and_quoted_identifiers() {
        let mut builder = SchemaRegistry::builder();
        let err = builder
            .register(EntityDef::new("Users"))
            .expect_err("uppercase entity names are rejected");
        assert!(matches!(err, SchemaError::InvalidIdentifier { context: "entity", .. }));

        let err = builder
            .register(EntityDef::new("users").text("name\"; DROP TABLE x"))
            .expect_err("quoted field names are rejected");
        assert!(matches!(err, SchemaError::InvalidIdentifier { context: "field", .. }));
    }
}
