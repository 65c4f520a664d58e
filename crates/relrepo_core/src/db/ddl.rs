//! DDL rendering and table verification for a schema registry.
//!
//! # Responsibility
//! - Render `CREATE TABLE` statements mirroring entity definitions.
//! - Install them atomically and check that a connection carries them.
//!
//! # Invariants
//! - Primary keys are `INTEGER PRIMARY KEY AUTOINCREMENT`, so keys grow with
//!   insertion order and are never reused.
//! - Foreign-key clauses carry the on-delete policy of their `belongs_to`.

use crate::db::{DbError, DbResult};
use crate::schema::{EntityDef, RelationKind, SchemaRegistry};
use log::info;
use rusqlite::Connection;

/// Renders the full DDL script for a registry, parents first.
pub fn render_schema(registry: &SchemaRegistry) -> String {
    registry
        .entities()
        .map(|def| render_entity(registry, def))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders table and foreign-key index statements for one entity.
///
/// Foreign keys backing a `has_one` get a unique index.
pub fn render_entity(registry: &SchemaRegistry, def: &EntityDef) -> String {
    let table = quote_ident(&def.name);
    let mut columns = vec![format!(
        "    {} INTEGER PRIMARY KEY AUTOINCREMENT",
        quote_ident(&def.primary_key)
    )];
    for field in &def.fields {
        let null = if field.nullable { "" } else { " NOT NULL" };
        columns.push(format!(
            "    {} {}{}",
            quote_ident(&field.name),
            field.field_type.sql_type(),
            null
        ));
    }

    let mut indexes = Vec::new();
    for rel in &def.relationships {
        if rel.kind != RelationKind::BelongsTo {
            continue;
        }
        let target_key = registry
            .resolve(&rel.target)
            .map_or("id", |target| target.primary_key.as_str());
        let fk = quote_ident(&rel.foreign_key);
        columns.push(format!(
            "    FOREIGN KEY ({}) REFERENCES {}({}) {}",
            fk,
            quote_ident(&rel.target),
            quote_ident(target_key),
            rel.on_delete.sql_clause()
        ));

        let (unique, prefix) = if backs_has_one(registry, def, &rel.foreign_key) {
            ("UNIQUE ", "uidx")
        } else {
            ("", "idx")
        };
        indexes.push(format!(
            "CREATE {unique}INDEX IF NOT EXISTS {} ON {table}({fk});",
            quote_ident(&format!("{prefix}_{}_{}", def.name, rel.foreign_key))
        ));
    }

    let mut sql = format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n{}\n);",
        columns.join(",\n")
    );
    for index in indexes {
        sql.push('\n');
        sql.push_str(&index);
    }
    sql
}

/// Wraps a registry-validated name in double quotes for use in SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}

fn backs_has_one(registry: &SchemaRegistry, def: &EntityDef, foreign_key: &str) -> bool {
    registry.entities().any(|owner| {
        owner.relationships.iter().any(|rel| {
            rel.kind == RelationKind::HasOne
                && rel.target == def.name
                && rel.foreign_key == foreign_key
        })
    })
}

/// Creates every declared table that does not exist yet, in one transaction.
pub fn install_schema(conn: &mut Connection, registry: &SchemaRegistry) -> DbResult<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(&render_schema(registry))?;
    tx.commit()?;

    info!(
        "event=schema_install module=db status=ok tables={}",
        registry.len()
    );
    Ok(())
}

/// Verifies that every declared table and column is present.
pub fn ensure_connection_ready(conn: &Connection, registry: &SchemaRegistry) -> DbResult<()> {
    for def in registry.entities() {
        if !table_exists(conn, &def.name)? {
            return Err(DbError::MissingRequiredTable(def.name.clone()));
        }
        let present = table_columns(conn, &def.name)?;
        for column in def.column_names() {
            if !present.iter().any(|name| name == column) {
                return Err(DbError::MissingRequiredColumn {
                    table: def.name.clone(),
                    column: column.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> DbResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_columns(conn: &Connection, table: &str) -> DbResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", quote_ident(table)))?;
    let mut rows = stmt.query([])?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        columns.push(row.get(1)?);
    }
    Ok(columns)
}
