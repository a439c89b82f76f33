use thiserror::Error;

/// Errors surfaced by the persistence engine.
#[derive(Debug, Error)]
pub enum OrmError {
    /// Bad or ambiguous entity metadata.
    #[error("schema error: {0}")]
    Schema(String),

    /// Auto-increment requested on a primary key that is not an integral type.
    #[error("incorrect auto-increment type on {entity}.{column}: key must be integral")]
    IncorrectAutoIncrementType { entity: String, column: String },

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A stored value could not be converted to or from its field type.
    #[error("codec error: {0}")]
    Codec(String),
}

impl OrmError {
    pub(crate) fn schema(msg: impl Into<String>) -> Self {
        OrmError::Schema(msg.into())
    }

    pub(crate) fn codec(msg: impl Into<String>) -> Self {
        OrmError::Codec(msg.into())
    }
}

impl From<rusqlite::Error> for OrmError {
    fn from(err: rusqlite::Error) -> Self {
        OrmError::Storage(StorageError::from(err))
    }
}

/// Malformed query builders.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("having clause requires a group by clause")]
    HavingWithoutGroupBy,

    #[error("invalid {kind} identifier: {ident}")]
    InvalidIdentifier { kind: &'static str, ident: String },

    #[error("update requires at least one column value")]
    EmptyValues,
}

/// A failure reported by the storage backend, carried through unmodified.
#[derive(Debug, Error)]
#[error("storage error: {source}")]
pub struct StorageError {
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl StorageError {
    /// Wrap any backend-specific error.
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            source: Box::new(err),
        }
    }

    /// Build a storage error from a plain message, for backends without a native error type.
    pub fn msg(msg: impl Into<String>) -> Self {
        let msg: String = msg.into();
        Self { source: msg.into() }
    }

    /// The backend's native error, if it is of type `T`.
    pub fn downcast_ref<T: std::error::Error + 'static>(&self) -> Option<&T> {
        self.source.downcast_ref::<T>()
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::new(err)
    }
}

pub type Result<T, E = OrmError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_keeps_backend_error() {
        let err = OrmError::from(rusqlite::Error::InvalidQuery);
        match err {
            OrmError::Storage(inner) => {
                assert!(inner.downcast_ref::<rusqlite::Error>().is_some());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn query_error_message() {
        assert_eq!(
            OrmError::from(QueryError::HavingWithoutGroupBy).to_string(),
            "having clause requires a group by clause"
        );
    }
}
