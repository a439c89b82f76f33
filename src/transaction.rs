use tracing::warn;

use crate::error::Result;
use crate::storage::Storage;

/// A scoped transaction level.
///
/// Commits only through [`commit`](Self::commit); dropping the guard any
/// other way ends the level unsuccessfully, which rolls back the whole
/// physical transaction once the outermost level ends.
#[must_use = "dropping the guard immediately rolls the transaction back"]
pub struct TransactionGuard<'a> {
    storage: &'a dyn Storage,
    open: bool,
}

impl<'a> TransactionGuard<'a> {
    pub(crate) fn begin(storage: &'a dyn Storage) -> Result<Self> {
        storage.begin_transaction()?;
        Ok(Self {
            storage,
            open: true,
        })
    }

    /// Mark this level successful and end it.
    pub fn commit(mut self) -> Result<()> {
        self.open = false;
        let marked = self.storage.mark_transaction_successful();
        let ended = self.storage.end_transaction();
        marked?;
        ended?;
        Ok(())
    }

    /// End this level without marking it successful.
    pub fn rollback(mut self) -> Result<()> {
        self.open = false;
        self.storage.end_transaction()?;
        Ok(())
    }

    /// Nesting depth of the underlying storage, this level included.
    pub fn depth(&self) -> usize {
        self.storage.transaction_depth()
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        warn!("transaction guard dropped without commit; rolling back");
        if let Err(err) = self.storage.end_transaction() {
            warn!(error = %err, "failed to end transaction");
        }
    }
}

impl std::fmt::Debug for TransactionGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionGuard")
            .field("open", &self.open)
            .field("depth", &self.storage.transaction_depth())
            .finish()
    }
}
