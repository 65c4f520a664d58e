//! SQLite storage bootstrap.
//!
//! # Responsibility
//! - Open and configure SQLite connections.
//! - Install the tables a schema registry declares and verify them.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`.
//! - Core code must not read/write rows before the declared tables exist.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod ddl;
mod open;

pub use open::{open_db, open_db_in_memory, open_store, DbLocation, StoreConfig};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// Connection lacks a table the registry declares.
    MissingRequiredTable(String),
    /// Table exists but lacks a declared column.
    MissingRequiredColumn {
        table: String,
        column: String,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::MissingRequiredTable(table) => {
                write!(f, "database is missing required table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "database is missing required column `{column}` in table `{table}`"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::MissingRequiredTable(_) | Self::MissingRequiredColumn { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
