//! Per-table write, read and delete walks over an entity graph.
//!
//! Cascades follow relationship declarations only, as a one-way tree walk.
//! Object graphs that loop back through a relationship are not detected.

use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::codec;
use crate::entity::{Entity, EntityDescriptor};
use crate::error::{OrmError, Result};
use crate::query::{placeholders, Target};
use crate::registry::Registry;
use crate::schema::quote;
use crate::storage::Storage;
use crate::transaction::TransactionGuard;
use crate::value::{Row, Value};

/// Bound parameters per `IN (...)` statement.
const KEY_CHUNK: usize = 500;

/// Auto-increment keys handed out during one write call, by entity type.
#[derive(Debug, Default)]
pub(crate) struct KeyJournal {
    assigned: RefCell<HashSet<(TypeId, i64)>>,
}

impl KeyJournal {
    fn record<E: 'static>(&self, key: i64) {
        self.assigned.borrow_mut().insert((TypeId::of::<E>(), key));
    }

    fn contains<E: 'static>(&self, key: i64) -> bool {
        self.assigned.borrow().contains(&(TypeId::of::<E>(), key))
    }
}

/// Borrowed storage plus the registry describing what is stored in it.
#[derive(Clone, Copy)]
pub(crate) struct Session<'a> {
    storage: &'a dyn Storage,
    registry: &'a Registry,
    journal: Option<&'a KeyJournal>,
}

impl<'a> Session<'a> {
    pub(crate) fn new(storage: &'a dyn Storage, registry: &'a Registry) -> Self {
        Self {
            storage,
            registry,
            journal: None,
        }
    }

    /// Record every key this session assigns in `journal`.
    pub(crate) fn with_journal(self, journal: &'a KeyJournal) -> Self {
        Self {
            journal: Some(journal),
            ..self
        }
    }

    pub(crate) fn describe<E: Entity>(&self) -> Result<Arc<EntityDescriptor<E>>> {
        self.registry.describe::<E>()
    }

    pub(crate) fn execute(&self, sql: &str, args: &[Value]) -> Result<usize> {
        Ok(self.storage.execute(sql, args)?)
    }

    pub(crate) fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>> {
        Ok(self.storage.query(sql, args)?)
    }

    pub(crate) fn transaction(&self) -> Result<TransactionGuard<'a>> {
        TransactionGuard::begin(self.storage)
    }

    /// Upsert `entity` and cascade into its relationships. Assigns a fresh
    /// auto-increment key back onto the entity.
    pub(crate) fn save<E: Entity>(&self, entity: &mut E) -> Result<()> {
        let descriptor = self.describe::<E>()?;
        let mut row = codec::encode(entity, &descriptor)?;
        let key_column = descriptor.primary_key().name();
        let key = row.get(key_column).cloned().unwrap_or(Value::Null);

        let key = if descriptor.is_auto_increment() && key.is_unassigned_key() {
            row.remove(key_column);
            self.execute(&insert_sql(descriptor.table_name(), &row), &row_args(&row))?;
            let id = self.storage.last_insert_id()?;
            descriptor.set_key(entity, Value::Integer(id))?;
            if let Some(journal) = self.journal {
                journal.record::<E>(id);
            }
            Value::Integer(id)
        } else if key.is_null() {
            return Err(OrmError::codec(format!(
                "{} has no primary key value",
                descriptor.entity_name()
            )));
        } else {
            self.execute(
                &upsert_sql(descriptor.table_name(), key_column, &row),
                &row_args(&row),
            )?;
            key
        };

        for relationship in descriptor.relationships() {
            relationship.resolver.save(self, entity, &key)?;
        }
        Ok(())
    }

    /// Clear keys this session's journal assigned to `entity` and its related
    /// entities, so a rolled-back write leaves them unsaved.
    pub(crate) fn reset_assigned_keys<E: Entity>(&self, entity: &mut E) -> Result<()> {
        let Some(journal) = self.journal else {
            return Ok(());
        };
        let descriptor = self.describe::<E>()?;
        if descriptor.is_auto_increment() {
            if let Some(key) = descriptor.key_of(entity)?.as_i64() {
                if journal.contains::<E>(key) {
                    descriptor.set_key(entity, Value::Null)?;
                }
            }
        }
        for relationship in descriptor.relationships() {
            relationship.resolver.reset_keys(self, entity)?;
        }
        Ok(())
    }

    /// Run a select and hydrate every row, relationships included.
    pub(crate) fn fetch<E: Entity>(&self, sql: &str, args: &[Value]) -> Result<Vec<E>> {
        let descriptor = self.describe::<E>()?;
        let rows = self.query(sql, args)?;
        let mut entities = Vec::with_capacity(rows.len());
        for row in rows {
            entities.push(self.hydrate(&descriptor, row)?);
        }
        Ok(entities)
    }

    /// Rows of `E` whose `column` equals `value`, in store order.
    pub(crate) fn fetch_by_column<E: Entity>(&self, column: &str, value: &Value, limit: Option<u64>) -> Result<Vec<E>> {
        let descriptor = self.describe::<E>()?;
        let target = Target::of(&descriptor);
        let mut sql = format!(
            "SELECT {} FROM {} WHERE {} = ?",
            target.columns(),
            target.table(),
            quote(column)
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        self.fetch(&sql, std::slice::from_ref(value))
    }

    fn hydrate<E: Entity>(&self, descriptor: &EntityDescriptor<E>, row: Row) -> Result<E> {
        let mut entity: E = codec::decode(row, descriptor)?;
        if descriptor.relationships().is_empty() {
            return Ok(entity);
        }
        let key = descriptor.key_of(&entity)?;
        for relationship in descriptor.relationships() {
            relationship.resolver.load(self, &mut entity, &key)?;
        }
        Ok(entity)
    }

    /// Keys of `E` rows whose `column` is one of `values`.
    pub(crate) fn keys_where<E: Entity>(
        &self,
        descriptor: &EntityDescriptor<E>,
        column: &str,
        values: &[Value],
    ) -> Result<Vec<Value>> {
        let key_column = descriptor.primary_key().name();
        let mut keys = Vec::new();
        for chunk in values.chunks(KEY_CHUNK) {
            let sql = format!(
                "SELECT {} FROM {} WHERE {} IN ({})",
                quote(key_column),
                quote(descriptor.table_name()),
                quote(column),
                placeholders(chunk.len())
            );
            keys.extend(self.query(&sql, chunk)?.into_iter().map(|mut row| take_key(&mut row, key_column)));
        }
        Ok(keys)
    }

    /// Keys returned by an arbitrary key query.
    pub(crate) fn keys<E: Entity>(&self, descriptor: &EntityDescriptor<E>, sql: &str, args: &[Value]) -> Result<Vec<Value>> {
        let key_column = descriptor.primary_key().name();
        Ok(self
            .query(sql, args)?
            .into_iter()
            .map(|mut row| take_key(&mut row, key_column))
            .collect())
    }

    /// Delete rows by key, dependents first. Returns the number of `E` rows removed.
    pub(crate) fn delete_keys<E: Entity>(&self, descriptor: &EntityDescriptor<E>, keys: &[Value]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        for relationship in descriptor.relationships() {
            relationship.resolver.delete(self, keys)?;
        }
        let mut removed = 0;
        for chunk in keys.chunks(KEY_CHUNK) {
            let sql = format!(
                "DELETE FROM {} WHERE {} IN ({})",
                quote(descriptor.table_name()),
                quote(descriptor.primary_key().name()),
                placeholders(chunk.len())
            );
            removed += self.execute(&sql, chunk)?;
        }
        Ok(removed)
    }

    /// Delete one entity and its dependents. `false` if no row held its key.
    pub(crate) fn delete_entity<E: Entity>(&self, entity: &E) -> Result<bool> {
        let descriptor = self.describe::<E>()?;
        let key = descriptor.key_of(entity)?;
        if key.is_null() {
            return Ok(false);
        }
        Ok(self.delete_keys(&descriptor, std::slice::from_ref(&key))? > 0)
    }

    /// Delete stored `C` rows linked to `parent_key` whose key is not in `keep`.
    pub(crate) fn prune_children<C: Entity>(
        &self,
        descriptor: &EntityDescriptor<C>,
        foreign_key: &str,
        parent_key: &Value,
        keep: &[Value],
    ) -> Result<usize> {
        let orphans: Vec<Value> = self
            .keys_where(descriptor, foreign_key, std::slice::from_ref(parent_key))?
            .into_iter()
            .filter(|key| !keep.contains(key))
            .collect();
        if orphans.is_empty() {
            return Ok(0);
        }
        debug!(
            table = descriptor.table_name(),
            orphans = orphans.len(),
            "removing orphaned children"
        );
        self.delete_keys(descriptor, &orphans)
    }
}

fn take_key(row: &mut Row, key_column: &str) -> Value {
    row.remove(key_column).unwrap_or(Value::Null)
}

fn row_args(row: &Row) -> Vec<Value> {
    row.values().cloned().collect()
}

fn insert_sql(table: &str, row: &Row) -> String {
    if row.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", quote(table));
    }
    let columns: Vec<String> = row.names().map(quote).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(table),
        columns.join(", "),
        placeholders(row.len())
    )
}

/// Insert, or update in place when a row with the same key exists.
fn upsert_sql(table: &str, key_column: &str, row: &Row) -> String {
    let updates: Vec<String> = row
        .names()
        .filter(|name| *name != key_column)
        .map(|name| format!("{0} = excluded.{0}", quote(name)))
        .collect();
    let action = if updates.is_empty() {
        "NOTHING".to_string()
    } else {
        format!("UPDATE SET {}", updates.join(", "))
    };
    format!(
        "{} ON CONFLICT ({}) DO {}",
        insert_sql(table, row),
        quote(key_column),
        action
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_updates_every_non_key_column() {
        let row = Row::new()
            .with_value("id", 3)
            .with_value("name", "a")
            .with_value("age", 4);
        assert_eq!(
            upsert_sql("people", "id", &row),
            "INSERT INTO \"people\" (\"id\", \"name\", \"age\") VALUES (?, ?, ?) \
             ON CONFLICT (\"id\") DO UPDATE SET \"name\" = excluded.\"name\", \"age\" = excluded.\"age\""
        );
    }

    #[test]
    fn key_only_rows_do_nothing_on_conflict() {
        let row = Row::new().with_value("code", "x");
        assert_eq!(
            upsert_sql("codes", "code", &row),
            "INSERT INTO \"codes\" (\"code\") VALUES (?) ON CONFLICT (\"code\") DO NOTHING"
        );
        assert_eq!(insert_sql("codes", &Row::new()), "INSERT INTO \"codes\" DEFAULT VALUES");
    }
}
