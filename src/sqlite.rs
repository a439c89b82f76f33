use std::cell::RefCell;
use std::path::PathBuf;

use rusqlite::{params_from_iter, Connection};
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::schema::Schema;
use crate::storage::Storage;
use crate::value::{Row, Value};

/// SQLite storage configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SqliteConfig {
    /// Path to the SQLite database file; `None` opens an in-memory database
    pub db_path: Option<PathBuf>,
    /// Tables created (if missing) when the database is opened
    pub schema: Schema,
    /// Enforce foreign keys on the connection
    pub foreign_keys: bool,
}

impl SqliteConfig {
    /// Create a new SQLite config with path and schema
    pub fn new(db_path: impl Into<PathBuf>, schema: Schema) -> Self {
        Self {
            db_path: Some(db_path.into()),
            schema,
            foreign_keys: true,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            db_path: None,
            schema: Schema::new(),
            foreign_keys: true,
        }
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }
}

#[derive(Debug, Default)]
struct TransactionState {
    /// One entry per open level: whether it was marked successful.
    levels: Vec<bool>,
    /// Set once any level ends unsuccessfully.
    rollback_only: bool,
}

/// [`Storage`] over a single rusqlite connection.
pub struct SqliteStorage {
    connection: Connection,
    tx: RefCell<TransactionState>,
}

impl SqliteStorage {
    /// Open the database described by `config` and create its schema.
    pub fn open(config: &SqliteConfig) -> Result<Self, StorageError> {
        let connection = match &config.db_path {
            Some(path) => {
                info!(path = %path.display(), "opening sqlite database");
                Connection::open(path)?
            }
            None => {
                info!("opening in-memory sqlite database");
                Connection::open_in_memory()?
            }
        };
        Self::from_connection(connection, config)
    }

    /// Wrap an already open connection.
    pub fn from_connection(connection: Connection, config: &SqliteConfig) -> Result<Self, StorageError> {
        if config.foreign_keys {
            connection.execute_batch("PRAGMA foreign_keys = ON;")?;
        }
        let storage = Self {
            connection,
            tx: RefCell::new(TransactionState::default()),
        };
        storage.initialize_schema(&config.schema)?;
        Ok(storage)
    }

    /// Create every table and index of `schema` that does not exist yet.
    pub fn initialize_schema(&self, schema: &Schema) -> Result<(), StorageError> {
        for sql in schema.to_sql() {
            debug!(%sql, "initialize schema");
            self.connection.execute(&sql, [])?;
        }
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

impl Storage for SqliteStorage {
    fn execute(&self, sql: &str, args: &[Value]) -> Result<usize, StorageError> {
        debug!(%sql, args = args.len(), "execute");
        let mut stmt = self.connection.prepare_cached(sql)?;
        Ok(stmt.execute(params_from_iter(args.iter()))?)
    }

    fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>, StorageError> {
        debug!(%sql, args = args.len(), "query");
        let mut stmt = self.connection.prepare_cached(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(params_from_iter(args.iter()))?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut mapped = Row::new();
            for (idx, name) in names.iter().enumerate() {
                mapped.insert(name, Value::from(row.get_ref(idx)?));
            }
            result.push(mapped);
        }
        Ok(result)
    }

    fn last_insert_id(&self) -> Result<i64, StorageError> {
        Ok(self.connection.last_insert_rowid())
    }

    fn begin_transaction(&self) -> Result<(), StorageError> {
        let mut tx = self.tx.borrow_mut();
        if tx.levels.is_empty() {
            self.connection.execute_batch("BEGIN IMMEDIATE")?;
            tx.rollback_only = false;
        }
        tx.levels.push(false);
        Ok(())
    }

    fn mark_transaction_successful(&self) -> Result<(), StorageError> {
        match self.tx.borrow_mut().levels.last_mut() {
            Some(level) => {
                *level = true;
                Ok(())
            }
            None => Err(StorageError::msg("no transaction in progress")),
        }
    }

    fn end_transaction(&self) -> Result<(), StorageError> {
        let mut tx = self.tx.borrow_mut();
        let successful = tx
            .levels
            .pop()
            .ok_or_else(|| StorageError::msg("no transaction in progress"))?;
        if !successful {
            tx.rollback_only = true;
        }
        if !tx.levels.is_empty() {
            return Ok(());
        }
        if tx.rollback_only {
            tx.rollback_only = false;
            debug!("transaction ended without success; rolling back");
            self.connection.execute_batch("ROLLBACK")?;
            return Ok(());
        }
        if let Err(err) = self.connection.execute_batch("COMMIT") {
            warn!(error = %err, "commit failed; rolling back");
            if !self.connection.is_autocommit() {
                self.connection.execute_batch("ROLLBACK")?;
            }
            return Err(err.into());
        }
        Ok(())
    }

    fn transaction_depth(&self) -> usize {
        self.tx.borrow().levels.len()
    }

    fn close(self) -> Result<(), StorageError> {
        info!("closing sqlite database");
        self.connection.close().map_err(|(_, err)| StorageError::from(err))
    }
}
