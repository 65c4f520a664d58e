//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure connection pragmas required by the gateway.
//! - Install declared tables before returning a usable connection.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`.
//! - Returned connections carry every table the registry declares.

use super::ddl::{ensure_connection_ready, install_schema};
use super::DbResult;
use crate::schema::SchemaRegistry;
use log::{error, info};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DbLocation {
    #[default]
    Memory,
    File(PathBuf),
}

/// Connection settings for `open_store`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub location: DbLocation,
    pub busy_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            location: DbLocation::Memory,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: DbLocation::File(path.into()),
            ..Self::default()
        }
    }

    fn mode(&self) -> &'static str {
        match self.location {
            DbLocation::Memory => "memory",
            DbLocation::File(_) => "file",
        }
    }
}

/// Opens a SQLite database file and installs the declared tables.
///
/// # Side effects
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(path: impl AsRef<Path>, registry: &SchemaRegistry) -> DbResult<Connection> {
    open_store(&StoreConfig::file(path.as_ref()), registry)
}

/// Opens an in-memory SQLite database and installs the declared tables.
pub fn open_db_in_memory(registry: &SchemaRegistry) -> DbResult<Connection> {
    open_store(&StoreConfig::in_memory(), registry)
}

/// Opens a connection per `config`, configures it and installs the schema.
pub fn open_store(config: &StoreConfig, registry: &SchemaRegistry) -> DbResult<Connection> {
    let started_at = Instant::now();
    let mode = config.mode();
    info!("event=db_open module=db status=start mode={mode}");

    let opened = match &config.location {
        DbLocation::Memory => Connection::open_in_memory(),
        DbLocation::File(path) => Connection::open(path),
    };
    let mut conn = match opened {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_open_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match bootstrap_connection(&mut conn, config, registry) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={} duration_ms={}",
                mode,
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_bootstrap_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(
    conn: &mut Connection,
    config: &StoreConfig,
    registry: &SchemaRegistry,
) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(config.busy_timeout)?;
    install_schema(conn, registry)?;
    ensure_connection_ready(conn, registry)?;
    Ok(())
}
