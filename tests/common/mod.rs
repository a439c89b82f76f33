#![allow(dead_code)]

use std::cell::Cell;

use rust_decimal::Decimal;
use rust_sqlite_orm::{
    field, Engine, Entity, Row, SchemaBuilder, SqliteStorage, Storage, StorageError, Value,
};
use tracing_subscriber::EnvFilter;

// Route engine logs to the test output; RUST_LOG=debug shows every statement.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// In-memory engine with the tables of `E` (and its children) created.
pub fn engine_with<E: Entity>() -> anyhow::Result<Engine> {
    init_tracing();
    let engine = Engine::open_in_memory()?;
    engine.create_table::<E>()?;
    Ok(engine)
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Author {
    pub id: i64,
    pub name: String,
    pub age: Option<i32>,
    pub books: Vec<Book>,
    pub profile: Option<Profile>,
}

impl Entity for Author {
    fn schema(s: &mut SchemaBuilder<Self>) {
        s.table("authors");
        field!(s, id).primary_key().auto_increment();
        field!(s, name);
        field!(s, age);
        s.one_to_many("books", "author_id", |a| &mut a.books);
        s.one_to_one("profile", "author_id", |a| &mut a.profile);
    }
}

impl Author {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_books(mut self, titles: &[&str]) -> Self {
        self.books = titles
            .iter()
            .enumerate()
            .map(|(i, title)| Book::new(title, 2000 + i as i32))
            .collect();
        self
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Book {
    pub id: i64,
    pub author_id: i64,
    pub title: String,
    pub year: i32,
}

impl Entity for Book {
    fn schema(s: &mut SchemaBuilder<Self>) {
        s.table("books");
        field!(s, id).primary_key().auto_increment();
        field!(s, author_id);
        field!(s, title);
        field!(s, year);
    }
}

impl Book {
    pub fn new(title: &str, year: i32) -> Self {
        Self {
            title: title.to_string(),
            year,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Profile {
    pub id: i64,
    pub author_id: i64,
    pub bio: String,
}

impl Entity for Profile {
    fn schema(s: &mut SchemaBuilder<Self>) {
        s.table("profiles");
        field!(s, id).primary_key().auto_increment();
        field!(s, author_id);
        field!(s, bio);
    }
}

// The library row holds the key of its address.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Library {
    pub id: i64,
    pub name: String,
    pub address_id: Option<i64>,
    pub address: Option<Address>,
}

impl Entity for Library {
    fn schema(s: &mut SchemaBuilder<Self>) {
        s.table("libraries");
        field!(s, id).primary_key().auto_increment();
        field!(s, name);
        field!(s, address_id);
        s.one_to_one_on_parent("address", "address_id", |l| &mut l.address);
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Address {
    pub id: i64,
    pub street: String,
}

impl Entity for Address {
    fn schema(s: &mut SchemaBuilder<Self>) {
        s.table("addresses");
        field!(s, id).primary_key().auto_increment();
        field!(s, street);
    }
}

// Shared columns composed into other entities.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Record {
    pub id: i64,
    pub created: i64,
}

impl Entity for Record {
    fn schema(s: &mut SchemaBuilder<Self>) {
        field!(s, id).primary_key().auto_increment();
        field!(s, created);
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Invoice {
    pub record: Record,
    pub total: Decimal,
    pub memo: Option<String>,
}

impl Entity for Invoice {
    fn schema(s: &mut SchemaBuilder<Self>) {
        s.table("invoices");
        s.inherit(|i| &i.record, |i| &mut i.record);
        field!(s, total);
        field!(s, memo);
    }
}

// Flat entity; its id is promoted to the auto-increment key.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Reading {
    pub id: i64,
    pub sensor: String,
    pub value: f64,
}

impl Entity for Reading {
    fn schema(s: &mut SchemaBuilder<Self>) {
        s.table("readings");
        field!(s, id);
        field!(s, sensor);
        field!(s, value);
    }
}

impl Reading {
    pub fn new(sensor: &str, value: f64) -> Self {
        Self {
            id: 0,
            sensor: sensor.to_string(),
            value,
        }
    }
}

pub fn readings(n: usize) -> Vec<Reading> {
    (0..n)
        .map(|i| Reading::new(if i % 2 == 0 { "a" } else { "b" }, i as f64))
        .collect()
}

/// Storage that fails the insert with the given zero-based index.
pub struct FailingStorage {
    inner: SqliteStorage,
    fail_at: usize,
    inserts: Cell<usize>,
}

impl FailingStorage {
    pub fn new(inner: SqliteStorage, fail_at: usize) -> Self {
        Self {
            inner,
            fail_at,
            inserts: Cell::new(0),
        }
    }
}

impl Storage for FailingStorage {
    fn execute(&self, sql: &str, args: &[Value]) -> Result<usize, StorageError> {
        if sql.starts_with("INSERT") {
            let n = self.inserts.get();
            self.inserts.set(n + 1);
            if n == self.fail_at {
                return Err(StorageError::msg(format!("injected failure at insert {n}")));
            }
        }
        self.inner.execute(sql, args)
    }

    fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>, StorageError> {
        self.inner.query(sql, args)
    }

    fn last_insert_id(&self) -> Result<i64, StorageError> {
        self.inner.last_insert_id()
    }

    fn begin_transaction(&self) -> Result<(), StorageError> {
        self.inner.begin_transaction()
    }

    fn mark_transaction_successful(&self) -> Result<(), StorageError> {
        self.inner.mark_transaction_successful()
    }

    fn end_transaction(&self) -> Result<(), StorageError> {
        self.inner.end_transaction()
    }

    fn transaction_depth(&self) -> usize {
        self.inner.transaction_depth()
    }

    fn close(self) -> Result<(), StorageError> {
        self.inner.close()
    }
}
