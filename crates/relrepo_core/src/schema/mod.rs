//! Statically declared entity and relationship definitions.
//!
//! # Responsibility
//! - Describe entities, their fields and foreign-key relationships.
//! - Provide the registry that validates definitions once at startup.
//!
//! # Invariants
//! - Definitions are immutable after registration.
//! - No runtime type discovery: tables are described here, never inferred.

pub mod blog;
pub mod registry;

use serde::{Deserialize, Serialize};

pub use registry::{SchemaError, SchemaRegistry, SchemaRegistryBuilder};

/// Default primary-key column name.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// Semantic field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Integer,
    Real,
    Text,
    /// Stored as `0`/`1` integers.
    Boolean,
}

impl FieldType {
    /// SQLite column affinity used in generated DDL.
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Integer | Self::Boolean => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Text => "text",
            Self::Boolean => "boolean",
        }
    }
}

/// One non-key column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub nullable: bool,
}

impl FieldDef {
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
        }
    }

    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: true,
        }
    }
}

/// Relationship cardinality, seen from the declaring entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Target holds the foreign key; at most one target row.
    HasOne,
    /// Target holds the foreign key; any number of target rows.
    HasMany,
    /// Declaring entity holds the foreign key.
    BelongsTo,
}

impl RelationKind {
    /// Whether the foreign key lives on the target entity.
    pub fn is_inbound(self) -> bool {
        matches!(self, Self::HasOne | Self::HasMany)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::HasOne => "has_one",
            Self::HasMany => "has_many",
            Self::BelongsTo => "belongs_to",
        }
    }
}

/// What happens to dependent rows when the referenced row is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    #[default]
    Cascade,
    Restrict,
    SetNull,
}

impl OnDelete {
    pub fn sql_clause(self) -> &'static str {
        match self {
            Self::Cascade => "ON DELETE CASCADE",
            Self::Restrict => "ON DELETE RESTRICT",
            Self::SetNull => "ON DELETE SET NULL",
        }
    }
}

/// Named foreign-key-backed link between two entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDef {
    pub name: String,
    pub kind: RelationKind,
    pub target: String,
    pub foreign_key: String,
    #[serde(default)]
    pub on_delete: OnDelete,
}

/// Entity (table) definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDef {
    pub name: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDef>,
}

fn default_primary_key() -> String {
    DEFAULT_PRIMARY_KEY.to_string()
}

impl EntityDef {
    /// Starts a definition with the default `id` primary key.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: default_primary_key(),
            fields: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = name.into();
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Shorthand for a non-nullable text field.
    pub fn text(self, name: impl Into<String>) -> Self {
        self.field(FieldDef::required(name, FieldType::Text))
    }

    pub fn has_one(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.relationship(RelationKind::HasOne, name, target, foreign_key)
    }

    pub fn has_many(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.relationship(RelationKind::HasMany, name, target, foreign_key)
    }

    /// Declares a `belongs_to` and the non-nullable integer foreign-key field
    /// backing it, unless a field of that name was already declared.
    pub fn belongs_to(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        let foreign_key = foreign_key.into();
        if self.field_def(&foreign_key).is_none() {
            self.fields
                .push(FieldDef::required(foreign_key.clone(), FieldType::Integer));
        }
        self.relationship(RelationKind::BelongsTo, name, target, foreign_key)
    }

    /// Overrides the on-delete policy of the most recently added relationship.
    pub fn on_delete(mut self, policy: OnDelete) -> Self {
        if let Some(last) = self.relationships.last_mut() {
            last.on_delete = policy;
        }
        self
    }

    fn relationship(
        mut self,
        kind: RelationKind,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.relationships.push(RelationshipDef {
            name: name.into(),
            kind,
            target: target.into(),
            foreign_key: foreign_key.into(),
            on_delete: OnDelete::Cascade,
        });
        self
    }

    pub fn field_def(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn relationship_def(&self, name: &str) -> Option<&RelationshipDef> {
        self.relationships.iter().find(|rel| rel.name == name)
    }

    /// Column names in select order: primary key first, then fields.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary_key.as_str())
            .chain(self.fields.iter().map(|field| field.name.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::{EntityDef, FieldType, OnDelete, RelationKind};

    #[test]
    fn belongs_to_declares_integer_foreign_key_once() {
        let def = EntityDef::new("posts")
            .field(super::FieldDef::optional("blog_id", FieldType::Integer))
            .belongs_to("blog", "blogs", "blog_id")
            .belongs_to("user", "users", "user_id");

        let fk_fields: Vec<_> = def
            .fields
            .iter()
            .filter(|field| field.name.ends_with("_id"))
            .collect();
        assert_eq!(fk_fields.len(), 2);
        assert!(def.field_def("blog_id").expect("declared").nullable);
        assert!(!def.field_def("user_id").expect("declared").nullable);
    }

    #[test]
    fn on_delete_applies_to_last_relationship() {
        let def = EntityDef::new("users")
            .has_many("blogs", "blogs", "user_id")
            .has_many("posts", "posts", "user_id")
            .on_delete(OnDelete::Restrict);

        assert_eq!(def.relationships[0].on_delete, OnDelete::Cascade);
        assert_eq!(def.relationships[1].on_delete, OnDelete::Restrict);
        assert_eq!(def.relationships[1].kind, RelationKind::HasMany);
    }

    #[test]
    fn definitions_deserialize_from_json_with_defaults() {
        let def: EntityDef = serde_json::from_str(
            r#"{
                "name": "tasks",
                "fields": [
                    {"name": "user_id", "type": "integer"},
                    {"name": "title", "type": "text"}
                ],
                "relationships": [
                    {"name": "user", "kind": "belongs_to", "target": "users", "foreign_key": "user_id"}
                ]
            }"#,
        )
        .expect("definition should parse");

        assert_eq!(def.primary_key, "id");
        assert!(!def.fields[1].nullable);
        assert_eq!(def.relationships[0].on_delete, OnDelete::Cascade);
    }
}
