//! Per-call repository errors.
//!
//! # Invariants
//! - Errors are surfaced to the caller unchanged; nothing here retries.
//! - `NotFound` (zero rows) and `MultipleRowsForKey` (integrity fault) are
//!   never folded into one another.

use crate::db::DbError;
use crate::model::value::RecordKey;
use crate::schema::SchemaError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Error for gateway, repository and loader operations.
#[derive(Debug)]
pub enum RepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Schema lookup failed in a way other than an unknown entity.
    Schema(SchemaError),
    UnknownEntity(String),
    UnknownField {
        entity: String,
        field: String,
    },
    UnknownRelationship {
        entity: String,
        relationship: String,
    },
    NotFound {
        entity: String,
        key: RecordKey,
    },
    /// More than one row answered to a primary key.
    MultipleRowsForKey {
        entity: String,
        key: RecordKey,
        count: usize,
    },
    /// Missing required field, type mismatch, broken foreign key, or a
    /// restrict policy that blocks a delete.
    ConstraintViolation {
        entity: String,
        reason: String,
    },
    /// Relationship was not requested when the aggregate was built.
    AccessToUnloadedRelationship {
        entity: String,
        relationship: String,
    },
    /// A singular relationship was used as a collection or vice versa.
    RelationshipShapeMismatch {
        entity: String,
        relationship: String,
        expected: &'static str,
    },
    /// Nested create through a relationship whose foreign key lives on the
    /// parent (`belongs_to`).
    UnsupportedNestedCreate {
        entity: String,
        relationship: String,
    },
    /// Persisted data cannot be converted to a valid record.
    InvalidData(String),
}

impl RepoError {
    pub(crate) fn constraint(entity: &str, reason: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            entity: entity.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(entity: &str, key: RecordKey) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            key,
        }
    }

    /// Stable snake_case code for log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Db(_) => "db_error",
            Self::Schema(_) => "schema_error",
            Self::UnknownEntity(_) => "unknown_entity",
            Self::UnknownField { .. } => "unknown_field",
            Self::UnknownRelationship { .. } => "unknown_relationship",
            Self::NotFound { .. } => "not_found",
            Self::MultipleRowsForKey { .. } => "multiple_rows_for_key",
            Self::ConstraintViolation { .. } => "constraint_violation",
            Self::AccessToUnloadedRelationship { .. } => "unloaded_relationship",
            Self::RelationshipShapeMismatch { .. } => "relationship_shape_mismatch",
            Self::UnsupportedNestedCreate { .. } => "unsupported_nested_create",
            Self::InvalidData(_) => "invalid_data",
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Schema(err) => write!(f, "{err}"),
            Self::UnknownEntity(name) => write!(f, "unknown entity: {name}"),
            Self::UnknownField { entity, field } => {
                write!(f, "unknown field `{field}` on entity `{entity}`")
            }
            Self::UnknownRelationship {
                entity,
                relationship,
            } => write!(f, "unknown relationship `{relationship}` on entity `{entity}`"),
            Self::NotFound { entity, key } => write!(f, "{entity} not found: {key}"),
            Self::MultipleRowsForKey { entity, key, count } => {
                write!(f, "{count} rows of {entity} share key {key}")
            }
            Self::ConstraintViolation { entity, reason } => {
                write!(f, "constraint violation on {entity}: {reason}")
            }
            Self::AccessToUnloadedRelationship {
                entity,
                relationship,
            } => write!(
                f,
                "relationship `{relationship}` of {entity} was not loaded"
            ),
            Self::RelationshipShapeMismatch {
                entity,
                relationship,
                expected,
            } => write!(
                f,
                "relationship `{relationship}` of {entity} used as `{expected}`"
            ),
            Self::UnsupportedNestedCreate {
                entity,
                relationship,
            } => write!(
                f,
                "cannot nest create through belongs_to `{relationship}` of {entity}"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Schema(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SchemaError> for RepoError {
    fn from(value: SchemaError) -> Self {
        match value {
            SchemaError::UnknownEntity(name) => Self::UnknownEntity(name),
            SchemaError::UnknownRelationship {
                entity,
                relationship,
            } => Self::UnknownRelationship {
                entity,
                relationship,
            },
            other => Self::Schema(other),
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}
