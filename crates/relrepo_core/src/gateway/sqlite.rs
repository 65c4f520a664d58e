//! SQLite-backed storage gateway.
//!
//! # Responsibility
//! - Translate row-level gateway calls into parameterized SQL.
//! - Validate field sets against entity definitions before touching SQL.
//! - Walk on-delete policies for cascading deletes.
//!
//! # Invariants
//! - Only registry-validated identifiers are interpolated into SQL; every
//!   value is bound as a parameter.
//! - Cascading deletes run inside one savepoint.

use crate::db::ddl::{ensure_connection_ready, quote_ident};
use crate::gateway::StorageGateway;
use crate::model::record::Record;
use crate::model::value::{Conditions, FieldValues, RecordKey, Value};
use crate::repo::error::{RepoError, RepoResult};
use crate::schema::{EntityDef, FieldDef, FieldType, OnDelete, RelationKind, SchemaRegistry};
use log::{debug, error, trace, warn};
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection, ErrorCode, Row};
use std::collections::BTreeSet;

const SAVEPOINT_NAME: &str = "relrepo_atomic";
// Well below SQLITE_MAX_VARIABLE_NUMBER on every supported build.
const SELECT_IN_CHUNK: usize = 500;

/// Gateway over one borrowed SQLite connection.
pub struct SqliteGateway<'conn> {
    conn: &'conn Connection,
    registry: &'conn SchemaRegistry,
}

impl<'conn> SqliteGateway<'conn> {
    /// Creates a gateway after checking the connection carries every
    /// declared table and column.
    pub fn try_new(conn: &'conn Connection, registry: &'conn SchemaRegistry) -> RepoResult<Self> {
        ensure_connection_ready(conn, registry)?;
        Ok(Self { conn, registry })
    }

    pub fn connection(&self) -> &Connection {
        self.conn
    }

    fn fetch_by_key(&self, def: &EntityDef, key: RecordKey) -> RepoResult<Record> {
        let sql = format!(
            "{} WHERE {} = ?1;",
            select_clause(def),
            quote_ident(&def.primary_key)
        );
        log_sql(&sql);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([key])?;
        let mut found = Vec::new();
        while let Some(row) = rows.next()? {
            found.push(parse_row(def, row)?);
        }

        match found.len() {
            0 => Err(RepoError::not_found(&def.name, key)),
            1 => Ok(found.remove(0)),
            count => Err(RepoError::MultipleRowsForKey {
                entity: def.name.clone(),
                key,
                count,
            }),
        }
    }

    fn keys_referencing(
        &self,
        entity: &str,
        foreign_key: &str,
        key: RecordKey,
    ) -> RepoResult<Vec<RecordKey>> {
        let def = self.registry.resolve(entity)?;
        let sql = format!(
            "SELECT {pk} FROM {table} WHERE {fk} = ?1 ORDER BY {pk} ASC;",
            pk = quote_ident(&def.primary_key),
            table = quote_ident(&def.name),
            fk = quote_ident(foreign_key)
        );
        log_sql(&sql);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([key])?;
        let mut keys = Vec::new();
        while let Some(row) = rows.next()? {
            keys.push(row.get(0)?);
        }
        Ok(keys)
    }

    fn row_exists(&self, def: &EntityDef, key: RecordKey) -> RepoResult<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?1);",
            quote_ident(&def.name),
            quote_ident(&def.primary_key)
        );
        log_sql(&sql);
        let exists: i64 = self.conn.query_row(&sql, [key], |row| row.get(0))?;
        Ok(exists == 1)
    }

    fn check_foreign_keys(&self, def: &EntityDef, values: &FieldValues) -> RepoResult<()> {
        for rel in &def.relationships {
            if rel.kind != RelationKind::BelongsTo {
                continue;
            }
            let key = match values.get(&rel.foreign_key) {
                Some(Value::Integer(key)) => *key,
                _ => continue,
            };
            let target = self.registry.resolve(&rel.target)?;
            if !self.row_exists(target, key)? {
                return Err(RepoError::constraint(
                    &def.name,
                    format!(
                        "foreign key `{}` = {} references missing {} row",
                        rel.foreign_key, key, target.name
                    ),
                ));
            }
        }
        Ok(())
    }

    fn delete_cascading(
        &self,
        def: &EntityDef,
        key: RecordKey,
        visited: &mut BTreeSet<(String, RecordKey)>,
    ) -> RepoResult<Record> {
        let row = self.fetch_by_key(def, key)?;
        visited.insert((def.name.clone(), key));

        for dependent in self.registry.dependents_of(&def.name) {
            let child_keys = self.keys_referencing(&dependent.entity, &dependent.foreign_key, key)?;
            if child_keys.is_empty() {
                continue;
            }
            match dependent.on_delete {
                OnDelete::Cascade => {
                    let child_def = self.registry.resolve(&dependent.entity)?;
                    for child_key in child_keys {
                        if visited.contains(&(child_def.name.clone(), child_key)) {
                            continue;
                        }
                        self.delete_cascading(child_def, child_key, visited)?;
                    }
                }
                OnDelete::Restrict => {
                    return Err(RepoError::constraint(
                        &def.name,
                        format!(
                            "{} {} row(s) still reference key {} through `{}`",
                            child_keys.len(),
                            dependent.entity,
                            key,
                            dependent.foreign_key
                        ),
                    ));
                }
                OnDelete::SetNull => {
                    let sql = format!(
                        "UPDATE {table} SET {fk} = NULL WHERE {fk} = ?1;",
                        table = quote_ident(&dependent.entity),
                        fk = quote_ident(&dependent.foreign_key)
                    );
                    log_sql(&sql);
                    self.conn.execute(&sql, [key])?;
                }
            }
        }

        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1;",
            quote_ident(&def.name),
            quote_ident(&def.primary_key)
        );
        log_sql(&sql);
        self.conn
            .execute(&sql, [key])
            .map_err(|err| write_error(&def.name, err))?;
        debug!(
            "event=gateway_delete_row module=gateway status=ok entity={} key={}",
            def.name, key
        );
        Ok(row)
    }
}

impl StorageGateway for SqliteGateway<'_> {
    fn registry(&self) -> &SchemaRegistry {
        self.registry
    }

    fn insert(&self, entity: &str, values: &FieldValues) -> RepoResult<Record> {
        let def = self.registry.resolve(entity)?;
        validate_values(def, values, true)?;
        self.check_foreign_keys(def, values)?;

        let sql = if values.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES;", quote_ident(&def.name))
        } else {
            let columns: Vec<String> = values.field_names().map(quote_ident).collect();
            let placeholders: Vec<String> =
                (1..=columns.len()).map(|index| format!("?{index}")).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({});",
                quote_ident(&def.name),
                columns.join(", "),
                placeholders.join(", ")
            )
        };
        log_sql(&sql);

        self.conn
            .execute(&sql, params_from_iter(values.iter().map(|(_, value)| value)))
            .map_err(|err| write_error(&def.name, err))?;
        let key = self.conn.last_insert_rowid();
        debug!(
            "event=gateway_insert module=gateway status=ok entity={} key={}",
            def.name, key
        );
        self.fetch_by_key(def, key)
    }

    fn update_by_key(
        &self,
        entity: &str,
        key: RecordKey,
        values: &FieldValues,
    ) -> RepoResult<Record> {
        let def = self.registry.resolve(entity)?;
        validate_values(def, values, false)?;
        if values.is_empty() || !self.row_exists(def, key)? {
            return self.fetch_by_key(def, key);
        }
        self.check_foreign_keys(def, values)?;

        let assignments: Vec<String> = values
            .field_names()
            .enumerate()
            .map(|(index, field)| format!("{} = ?{}", quote_ident(field), index + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{};",
            quote_ident(&def.name),
            assignments.join(", "),
            quote_ident(&def.primary_key),
            values.len() + 1
        );
        log_sql(&sql);
        let mut params: Vec<Value> = values.iter().map(|(_, value)| value.clone()).collect();
        params.push(Value::Integer(key));

        let changed = self
            .conn
            .execute(&sql, params_from_iter(params.iter()))
            .map_err(|err| write_error(&def.name, err))?;
        if changed == 0 {
            return Err(RepoError::not_found(&def.name, key));
        }
        debug!(
            "event=gateway_update module=gateway status=ok entity={} key={} fields={}",
            def.name,
            key,
            values.len()
        );
        self.fetch_by_key(def, key)
    }

    fn delete_by_key(&self, entity: &str, key: RecordKey) -> RepoResult<Record> {
        let def = self.registry.resolve(entity)?;
        self.atomically("delete_by_key", || {
            let mut visited = BTreeSet::new();
            let row = self.delete_cascading(def, key, &mut visited)?;
            debug!(
                "event=gateway_delete module=gateway status=ok entity={} key={} rows_removed={}",
                def.name,
                key,
                visited.len()
            );
            Ok(row)
        })
    }

    fn select_where(&self, entity: &str, conditions: &Conditions) -> RepoResult<Vec<Record>> {
        let def = self.registry.resolve(entity)?;
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        for (field, value) in conditions {
            ensure_filterable(def, field)?;
            if value.is_null() {
                clauses.push(format!("{} IS NULL", quote_ident(field)));
            } else {
                params.push(value);
                clauses.push(format!("{} = ?{}", quote_ident(field), params.len()));
            }
        }

        let mut sql = select_clause(def);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY {} ASC;", quote_ident(&def.primary_key)));
        log_sql(&sql);

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_row(def, row)?);
        }
        Ok(records)
    }

    fn select_in(&self, entity: &str, field: &str, values: &[Value]) -> RepoResult<Vec<Record>> {
        let def = self.registry.resolve(entity)?;
        ensure_filterable(def, field)?;

        let mut records = Vec::new();
        for chunk in values.chunks(SELECT_IN_CHUNK) {
            let placeholders: Vec<String> =
                (1..=chunk.len()).map(|index| format!("?{index}")).collect();
            let sql = format!(
                "{} WHERE {} IN ({}) ORDER BY {} ASC;",
                select_clause(def),
                quote_ident(field),
                placeholders.join(", "),
                quote_ident(&def.primary_key)
            );
            log_sql(&sql);
            let mut stmt = self.conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(chunk.iter()))?;
            while let Some(row) = rows.next()? {
                records.push(parse_row(def, row)?);
            }
        }

        if values.len() > SELECT_IN_CHUNK {
            records.sort_by_key(|record| record.key);
            records.dedup_by_key(|record| record.key);
        }
        Ok(records)
    }

    fn atomically<T, F>(&self, scope: &str, work: F) -> RepoResult<T>
    where
        F: FnOnce() -> RepoResult<T>,
    {
        self.conn
            .execute_batch(&format!("SAVEPOINT {SAVEPOINT_NAME};"))?;

        let outcome = work().and_then(|value| {
            self.conn
                .execute_batch(&format!("RELEASE SAVEPOINT {SAVEPOINT_NAME};"))
                .map_err(|err| write_error(scope, err))?;
            Ok(value)
        });

        if let Err(err) = &outcome {
            warn!(
                "event=atomic_rollback module=gateway status=error scope={} error_code={} error={}",
                scope,
                err.code(),
                err
            );
            if let Err(rollback_err) = self.conn.execute_batch(&format!(
                "ROLLBACK TO SAVEPOINT {SAVEPOINT_NAME}; RELEASE SAVEPOINT {SAVEPOINT_NAME};"
            )) {
                error!(
                    "event=atomic_rollback module=gateway status=error scope={} error_code=rollback_failed error={}",
                    scope, rollback_err
                );
            }
        }
        outcome
    }
}

fn select_clause(def: &EntityDef) -> String {
    format!(
        "SELECT {} FROM {}",
        def.column_names()
            .map(quote_ident)
            .collect::<Vec<_>>()
            .join(", "),
        quote_ident(&def.name)
    )
}

fn log_sql(sql: &str) {
    trace!("event=sql module=gateway sql={sql}");
}

fn ensure_filterable(def: &EntityDef, field: &str) -> RepoResult<()> {
    if field == def.primary_key || def.field_def(field).is_some() {
        return Ok(());
    }
    Err(RepoError::UnknownField {
        entity: def.name.clone(),
        field: field.to_string(),
    })
}

/// Checks names, nullability and types. With `require_all`, every
/// non-nullable field must be present.
fn validate_values(def: &EntityDef, values: &FieldValues, require_all: bool) -> RepoResult<()> {
    for (name, value) in values {
        if *name == def.primary_key {
            return Err(RepoError::constraint(
                &def.name,
                format!("primary key `{name}` is assigned by the store"),
            ));
        }
        let field = def.field_def(name).ok_or_else(|| RepoError::UnknownField {
            entity: def.name.clone(),
            field: name.clone(),
        })?;
        check_value(def, field, value)?;
    }

    if require_all {
        if let Some(missing) = def
            .fields
            .iter()
            .find(|field| !field.nullable && !values.contains(&field.name))
        {
            return Err(RepoError::constraint(
                &def.name,
                format!("missing required field `{}`", missing.name),
            ));
        }
    }
    Ok(())
}

fn check_value(def: &EntityDef, field: &FieldDef, value: &Value) -> RepoResult<()> {
    let fits = match (field.field_type, value) {
        (_, Value::Null) => field.nullable,
        (FieldType::Integer, Value::Integer(_))
        | (FieldType::Real, Value::Real(_) | Value::Integer(_))
        | (FieldType::Text, Value::Text(_))
        | (FieldType::Boolean, Value::Boolean(_)) => true,
        _ => false,
    };
    if fits {
        return Ok(());
    }

    let reason = if value.is_null() {
        format!("field `{}` is not nullable", field.name)
    } else {
        format!(
            "field `{}` expects {}, got {}",
            field.name,
            field.field_type.as_str(),
            value.type_name()
        )
    };
    Err(RepoError::constraint(&def.name, reason))
}

fn parse_row(def: &EntityDef, row: &Row<'_>) -> RepoResult<Record> {
    let key: RecordKey = row.get(0)?;
    let mut fields = FieldValues::new();
    for (index, field) in def.fields.iter().enumerate() {
        let value = parse_value(def, field, row.get_ref(index + 1)?)?;
        fields.set(field.name.clone(), value);
    }
    Ok(Record::persisted(def.name.clone(), key, fields))
}

fn parse_value(def: &EntityDef, field: &FieldDef, raw: ValueRef<'_>) -> RepoResult<Value> {
    let invalid = |found: &str| {
        RepoError::InvalidData(format!(
            "invalid {} value `{}` in {}.{}",
            field.field_type.as_str(),
            found,
            def.name,
            field.name
        ))
    };

    match (field.field_type, raw) {
        (_, ValueRef::Null) if field.nullable => Ok(Value::Null),
        (_, ValueRef::Null) => Err(invalid("NULL")),
        (FieldType::Integer, ValueRef::Integer(value)) => Ok(Value::Integer(value)),
        (FieldType::Real, ValueRef::Real(value)) => Ok(Value::Real(value)),
        (FieldType::Real, ValueRef::Integer(value)) => Ok(Value::Real(value as f64)),
        (FieldType::Boolean, ValueRef::Integer(0)) => Ok(Value::Boolean(false)),
        (FieldType::Boolean, ValueRef::Integer(1)) => Ok(Value::Boolean(true)),
        (FieldType::Boolean, ValueRef::Integer(other)) => Err(invalid(&other.to_string())),
        (FieldType::Text, ValueRef::Text(bytes)) => String::from_utf8(bytes.to_vec())
            .map(Value::Text)
            .map_err(|_| invalid("<non-utf8>")),
        (_, other) => Err(invalid(&format!("{:?}", other.data_type()))),
    }
}

fn write_error(entity: &str, err: rusqlite::Error) -> RepoError {
    if err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) {
        return RepoError::constraint(entity, err.to_string());
    }
    err.into()
}
