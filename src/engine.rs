//! The persistence facade callers work with.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::entity::{Entity, EntityDescriptor};
use crate::error::{OrmError, QueryError, Result};
use crate::query::{self, Countable, Delete, Query, Select, Target, Update};
use crate::registry::Registry;
use crate::schema::Schema;
use crate::session::{KeyJournal, Session};
use crate::sqlite::{SqliteConfig, SqliteStorage};
use crate::storage::Storage;
use crate::transaction::TransactionGuard;
use crate::value::{Row, Value};

/// Maps entities onto one storage connection.
///
/// Calls on one engine must be serialized by the caller; transaction nesting
/// is engine-wide state.
pub struct Engine<S: Storage = SqliteStorage> {
    storage: S,
    registry: Arc<Registry>,
}

impl Engine<SqliteStorage> {
    /// Open a SQLite database and create the tables of `config.schema`.
    pub fn open(config: SqliteConfig) -> Result<Self> {
        let storage = SqliteStorage::open(&config)?;
        Ok(Self::with_storage(storage))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(SqliteConfig::in_memory())
    }
}

impl<S: Storage> Engine<S> {
    /// Engine over `storage`, describing entities through the process-wide registry.
    pub fn with_storage(storage: S) -> Self {
        Self::with_registry(storage, Registry::global())
    }

    pub fn with_registry(storage: S, registry: Arc<Registry>) -> Self {
        Self { storage, registry }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn describe<E: Entity>(&self) -> Result<Arc<EntityDescriptor<E>>> {
        self.registry.describe::<E>()
    }

    fn session(&self) -> Session<'_> {
        Session::new(&self.storage, &self.registry)
    }

    // DDL

    /// Create the table of `E` and of every entity reachable through its relationships.
    pub fn create_table<E: Entity>(&self) -> Result<()> {
        let schema = Schema::new().add_entity::<E>(&self.registry)?;
        self.create_schema(&schema)
    }

    pub fn create_schema(&self, schema: &Schema) -> Result<()> {
        let session = self.session();
        let guard = session.transaction()?;
        for sql in schema.to_sql() {
            session.execute(&sql, &[])?;
        }
        guard.commit()
    }

    // Writes

    /// Upsert `entity` and cascade into its relationships, atomically.
    ///
    /// A fresh auto-increment key is written back onto the entity, and
    /// cleared again if the write fails.
    pub fn add<E: Entity>(&self, entity: &mut E) -> Result<()> {
        self.save_atomically(std::slice::from_mut(entity))
    }

    /// Add every entity inside one transaction.
    pub fn add_all<E: Entity>(&self, entities: &mut [E]) -> Result<()> {
        self.add_all_with(entities, true)
    }

    /// Add every entity. Without `use_transaction` each entity commits on its
    /// own, so entities before a failure stay stored and keep their keys.
    pub fn add_all_with<E: Entity>(&self, entities: &mut [E], use_transaction: bool) -> Result<()> {
        debug!(
            entity = std::any::type_name::<E>(),
            count = entities.len(),
            use_transaction,
            "add batch"
        );
        if use_transaction {
            return self.save_atomically(entities);
        }
        for entity in entities.iter_mut() {
            self.add(entity)?;
        }
        Ok(())
    }

    /// Save `entities` in one transaction level. On failure every key
    /// assigned during the call is reset on the entities and their children.
    fn save_atomically<E: Entity>(&self, entities: &mut [E]) -> Result<()> {
        let journal = KeyJournal::default();
        let session = self.session().with_journal(&journal);
        let result = save_all(&session, entities);
        if result.is_err() {
            for entity in entities.iter_mut() {
                if let Err(err) = session.reset_assigned_keys(entity) {
                    warn!(error = %err, "failed to reset assigned keys");
                }
            }
        }
        result
    }

    /// Delete `entity` and its dependents. `false` if it was not stored.
    pub fn delete<E: Entity>(&self, entity: &E) -> Result<bool> {
        let session = self.session();
        let guard = session.transaction()?;
        let removed = session.delete_entity(entity)?;
        guard.commit()?;
        Ok(removed)
    }

    /// Delete every entity inside one transaction. Returns how many were stored.
    pub fn delete_all<'e, E, I>(&self, entities: I) -> Result<usize>
    where
        E: Entity,
        I: IntoIterator<Item = &'e E>,
    {
        self.delete_all_with(entities, true)
    }

    pub fn delete_all_with<'e, E, I>(&self, entities: I, use_transaction: bool) -> Result<usize>
    where
        E: Entity,
        I: IntoIterator<Item = &'e E>,
    {
        let guard = self.batch_guard(use_transaction)?;
        let mut removed = 0;
        for entity in entities {
            if self.delete(entity)? {
                removed += 1;
            }
        }
        debug!(entity = std::any::type_name::<E>(), removed, "delete batch");
        if let Some(guard) = guard {
            guard.commit()?;
        }
        Ok(removed)
    }

    /// Delete every `E` matching `predicate`, dependents included.
    pub fn delete_where<E, I, V>(&self, predicate: &str, args: I) -> Result<usize>
    where
        E: Entity,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let query = Delete::<E>::builder()
            .where_clause(predicate)
            .where_args(args)
            .build();
        self.delete_query(&query)
    }

    /// Delete every `E` whose `column` holds one of `ids`, dependents included.
    pub fn delete_in<E, I, V>(&self, column: &str, ids: I) -> Result<usize>
    where
        E: Entity,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        query::check_identifier(column, "column")?;
        let descriptor = self.describe::<E>()?;
        require_column(&descriptor, column)?;
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let session = self.session();
        let guard = session.transaction()?;
        let keys = session.keys_where(&descriptor, column, &ids)?;
        let removed = session.delete_keys(&descriptor, &keys)?;
        guard.commit()?;
        Ok(removed)
    }

    /// Delete the rows a [`Delete`] matches, dependents first.
    pub fn delete_query<E: Entity>(&self, query: &Delete<E>) -> Result<usize> {
        let descriptor = self.describe::<E>()?;
        let target = Target::of(&descriptor);
        let session = self.session();

        if descriptor.relationships().is_empty() {
            let (sql, args) = query::compile_delete(query.spec(), &target)?;
            return session.execute(&sql, &args);
        }

        let (sql, args) = query::compile_keys(query.spec(), &target)?;
        let guard = session.transaction()?;
        let keys = session.keys(&descriptor, &sql, &args)?;
        let removed = session.delete_keys(&descriptor, &keys)?;
        guard.commit()?;
        Ok(removed)
    }

    /// Set `values` on the rows an [`Update`] matches. Relationships are not touched.
    pub fn update<E: Entity>(&self, query: &Update<E>, values: &Row) -> Result<usize> {
        let descriptor = self.describe::<E>()?;
        for name in values.names() {
            query::check_identifier(name, "column")?;
            require_column(&descriptor, name)?;
        }
        let (sql, args) = query::compile_update(query.spec(), &Target::of(&descriptor), values)?;
        self.session().execute(&sql, &args)
    }

    // Reads

    pub fn select<E: Entity>(&self, query: &Select<E>) -> Result<Vec<E>> {
        let descriptor = self.describe::<E>()?;
        let (sql, args) = query::compile_select(query.spec(), &Target::of(&descriptor))?;
        self.session().fetch(&sql, &args)
    }

    pub fn get_all<E: Entity>(&self) -> Result<Vec<E>> {
        self.select(&Select::<E>::builder().build())
    }

    pub fn get_all_where<E, I, V>(&self, predicate: &str, args: I) -> Result<Vec<E>>
    where
        E: Entity,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.select(
            &Select::<E>::builder()
                .where_clause(predicate)
                .where_args(args)
                .build(),
        )
    }

    /// At most `limit` entities, in store order.
    pub fn get_all_limited<E: Entity>(&self, limit: u64) -> Result<Vec<E>> {
        self.select(&Select::<E>::builder().limit(limit).build())
    }

    pub fn get_by_id<E: Entity>(&self, key: impl Into<Value>) -> Result<Option<E>> {
        let descriptor = self.describe::<E>()?;
        let mut found = self
            .session()
            .fetch_by_column::<E>(descriptor.primary_key().name(), &key.into(), Some(1))?;
        Ok(found.pop())
    }

    pub fn count<E: Entity>(&self) -> Result<u64> {
        self.count_query(&query::Count::<E>::builder().build())
    }

    pub fn count_where<E, I, V>(&self, predicate: &str, args: I) -> Result<u64>
    where
        E: Entity,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.count_query(
            &query::Count::<E>::builder()
                .where_clause(predicate)
                .where_args(args)
                .build(),
        )
    }

    /// Number of rows a [`Select`] or [`Count`](query::Count) would match, limit included.
    pub fn count_query<Q: Countable>(&self, query: &Q) -> Result<u64> {
        let descriptor = self.describe::<Q::Entity>()?;
        let (sql, args) = query::compile_count(query.spec(), &Target::of(&descriptor))?;
        let rows = self.session().query(&sql, &args)?;
        let count = rows
            .first()
            .and_then(|row| row.values().next())
            .and_then(Value::as_i64)
            .ok_or_else(|| OrmError::codec("count returned no rows"))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    // Transactions

    pub fn begin_transaction(&self) -> Result<()> {
        Ok(self.storage.begin_transaction()?)
    }

    pub fn mark_transaction_successful(&self) -> Result<()> {
        Ok(self.storage.mark_transaction_successful()?)
    }

    /// End the innermost level; rolls back unless every level was marked successful.
    pub fn end_transaction(&self) -> Result<()> {
        Ok(self.storage.end_transaction()?)
    }

    /// A scoped transaction level that rolls back unless committed.
    pub fn transaction(&self) -> Result<TransactionGuard<'_>> {
        self.session().transaction()
    }

    pub fn in_transaction(&self) -> bool {
        self.storage.transaction_depth() > 0
    }

    pub fn transaction_depth(&self) -> usize {
        self.storage.transaction_depth()
    }

    pub fn close(self) -> Result<()> {
        info!(entities = self.registry.len(), "closing engine");
        Ok(self.storage.close()?)
    }

    fn batch_guard(&self, use_transaction: bool) -> Result<Option<TransactionGuard<'_>>> {
        if use_transaction {
            self.transaction().map(Some)
        } else {
            Ok(None)
        }
    }
}

impl<S: Storage> std::fmt::Debug for Engine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("transaction_depth", &self.storage.transaction_depth())
            .finish()
    }
}

fn save_all<E: Entity>(session: &Session<'_>, entities: &mut [E]) -> Result<()> {
    let guard = session.transaction()?;
    for entity in entities.iter_mut() {
        session.save(entity)?;
    }
    guard.commit()
}

fn require_column<E: Entity>(descriptor: &EntityDescriptor<E>, column: &str) -> Result<()> {
    if descriptor.column(column).is_some() {
        return Ok(());
    }
    Err(QueryError::InvalidIdentifier {
        kind: "column",
        ident: format!("{}.{column}", descriptor.table_name()),
    }
    .into())
}
