//! Object-relational persistence over SQLite.
//!
//! # Intention
//!
//! - Map plain Rust structs onto tables through an explicit, cached schema
//!   description ([`Entity`], [`Registry`]).
//! - Keep related rows consistent: cascading upserts, collection
//!   reconciliation and cascading deletes across parent and child tables.
//! - Turn typed query specs ([`Select`], [`Count`], [`Delete`], [`Update`])
//!   into parameterized SQL and back into entities.
//! - Make multi-table writes atomic through reference-counted transactions
//!   and a scoped [`TransactionGuard`].
//!
//! # Architectural Boundaries
//!
//! - Storage is reached only through the [`Storage`] trait; [`SqliteStorage`]
//!   is the bundled backend.
//! - No migrations, no database bootstrapping, no query planning.
//! - One engine per connection; callers serialize access to an engine.
//!
//! ```ignore
//! use rust_sqlite_orm::{field, Engine, Entity, SchemaBuilder};
//!
//! #[derive(Default)]
//! struct Note {
//!     id: i64,
//!     text: String,
//! }
//!
//! impl Entity for Note {
//!     fn schema(s: &mut SchemaBuilder<Self>) {
//!         s.table("notes");
//!         field!(s, id).primary_key().auto_increment();
//!         field!(s, text);
//!     }
//! }
//!
//! let engine = Engine::open_in_memory()?;
//! engine.create_table::<Note>()?;
//! let mut note = Note { id: 0, text: "hello".into() };
//! engine.add(&mut note)?;
//! assert_eq!(note.id, 1);
//! ```

pub mod codec;
pub mod engine;
pub mod entity;
pub mod error;
mod macros;
pub mod query;
pub mod registry;
mod relation;
pub mod schema;
mod session;
pub mod sqlite;
pub mod storage;
pub mod transaction;
pub mod value;

pub use engine::Engine;
pub use entity::{
    ChildCollection, ColumnDescriptor, Entity, EntityDescriptor, FieldBuilder, RelationKind,
    RelationshipDescriptor, SchemaBuilder,
};
pub use error::{OrmError, QueryError, Result, StorageError};
pub use query::{Count, Countable, Delete, Query, QueryBuilder, QuerySpec, Select, Update};
pub use registry::Registry;
pub use schema::{
    ColumnConstraint, ColumnDefinition, DataType, DefaultValue, ForeignKey, ForeignKeyAction,
    IndexDefinition, Schema, TableDefinition,
};
pub use sqlite::{SqliteConfig, SqliteStorage};
pub use storage::Storage;
pub use transaction::TransactionGuard;
pub use value::{Row, Serialized, SqlField, Value};
