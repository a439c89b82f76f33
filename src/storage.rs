use crate::error::StorageError;
use crate::value::{Row, Value};

/// The narrow interface to the relational store.
///
/// Transactions are reference counted: nested `begin_transaction` calls share
/// one physical transaction, which commits only when every level was marked
/// successful before its `end_transaction`.
pub trait Storage {
    /// Run a statement, returning the number of affected rows.
    fn execute(&self, sql: &str, args: &[Value]) -> Result<usize, StorageError>;

    /// Run a query, returning every row in store order.
    fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>, StorageError>;

    /// Key generated by the most recent insert on this connection.
    fn last_insert_id(&self) -> Result<i64, StorageError> {
        let rows = self.query("SELECT last_insert_rowid()", &[])?;
        rows.first()
            .and_then(|row| row.values().next())
            .and_then(|v| v.as_i64())
            .ok_or_else(|| StorageError::msg("last_insert_rowid() returned no value"))
    }

    fn begin_transaction(&self) -> Result<(), StorageError>;
    fn mark_transaction_successful(&self) -> Result<(), StorageError>;
    fn end_transaction(&self) -> Result<(), StorageError>;

    /// Current nesting depth; zero outside a transaction.
    fn transaction_depth(&self) -> usize;

    fn close(self) -> Result<(), StorageError>
    where
        Self: Sized;
}
