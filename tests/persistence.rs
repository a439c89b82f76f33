mod common;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_sqlite_orm::{
    field, Engine, Entity, OrmError, Registry, SchemaBuilder, Serialized, SqliteConfig,
    SqliteStorage, Schema,
};
use std::str::FromStr;
use std::sync::Arc;

use common::{engine_with, init_tracing, readings, Invoice, Reading, Record};

#[derive(Debug, Default, Clone, PartialEq)]
struct Gadget {
    id: i64,
    enabled: bool,
    level: i16,
    weight: f32,
    price: f64,
    label: String,
    note: Option<String>,
    released: NaiveDate,
    updated_at: Option<DateTime<Utc>>,
    cost: Decimal,
    parts: Option<Serialized<Vec<String>>>,
    firmware: Vec<u8>,
}

impl Entity for Gadget {
    fn schema(s: &mut SchemaBuilder<Self>) {
        s.table("gadgets");
        field!(s, id).primary_key().auto_increment();
        field!(s, enabled);
        field!(s, level);
        field!(s, weight);
        field!(s, price);
        field!(s, label).column_name("Label");
        field!(s, note);
        field!(s, released);
        field!(s, updated_at);
        field!(s, cost);
        field!(s, parts);
        field!(s, firmware);
    }
}

#[derive(Debug, Default)]
struct Tag {
    code: String,
    hits: u32,
}

impl Entity for Tag {
    fn schema(s: &mut SchemaBuilder<Self>) {
        s.table("tags");
        field!(s, code).primary_key();
        field!(s, hits);
    }
}

#[derive(Debug, Default)]
struct BadKey {
    code: String,
}

impl Entity for BadKey {
    fn schema(s: &mut SchemaBuilder<Self>) {
        field!(s, code).primary_key().auto_increment();
    }
}

#[test]
fn test_auto_increment_keys_follow_current_max() -> anyhow::Result<()> {
    let engine = engine_with::<Reading>()?;

    // A row with an explicit key sets the starting point
    let mut seed = Reading { id: 41, ..Reading::new("seed", 0.0) };
    engine.add(&mut seed)?;

    let mut batch = readings(5);
    engine.add_all(&mut batch)?;

    let ids: Vec<i64> = batch.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![42, 43, 44, 45, 46]);
    assert_eq!(engine.count::<Reading>()?, 6);
    Ok(())
}

#[test]
fn test_round_trip_every_field_type() -> anyhow::Result<()> {
    let engine = engine_with::<Gadget>()?;

    let mut full = Gadget {
        id: 0,
        enabled: true,
        level: -3,
        weight: 1.5,
        price: 19.99,
        label: "widget".into(),
        note: Some("fragile".into()),
        released: NaiveDate::from_ymd_opt(2021, 6, 30).unwrap(),
        updated_at: DateTime::from_timestamp_millis(1_700_000_000_123),
        cost: Decimal::from_str("1234.5678")?,
        parts: Some(Serialized(vec!["gear".into(), "spring".into()])),
        firmware: vec![0xde, 0xad, 0xbe, 0xef],
    };
    let mut empty = Gadget::default();
    engine.add(&mut full)?;
    engine.add(&mut empty)?;

    let stored = engine.get_all::<Gadget>()?;
    assert_eq!(stored, vec![full.clone(), empty]);

    let by_id = engine.get_by_id::<Gadget>(full.id)?;
    assert_eq!(by_id, Some(full));
    assert_eq!(engine.get_by_id::<Gadget>(999)?, None);
    Ok(())
}

#[test]
fn test_upsert_replaces_row_with_same_key() -> anyhow::Result<()> {
    let engine = engine_with::<Tag>()?;

    let mut tag = Tag { code: "rust".into(), hits: 1 };
    engine.add(&mut tag)?;
    tag.hits = 7;
    engine.add(&mut tag)?;

    let stored = engine.get_all::<Tag>()?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].hits, 7);
    assert_eq!(stored[0].code, "rust");
    Ok(())
}

#[test]
fn test_get_all_limited_preserves_order() -> anyhow::Result<()> {
    let engine = engine_with::<Reading>()?;
    let mut batch = readings(8);
    engine.add_all(&mut batch)?;

    let first = engine.get_all_limited::<Reading>(3)?;
    assert_eq!(first, batch[..3].to_vec());
    assert_eq!(engine.get_all_limited::<Reading>(50)?.len(), 8);
    assert!(engine.get_all_limited::<Reading>(0)?.is_empty());
    Ok(())
}

#[test]
fn test_inherited_columns_are_persisted() -> anyhow::Result<()> {
    let engine = engine_with::<Invoice>()?;
    let descriptor = engine.describe::<Invoice>()?;
    assert_eq!(descriptor.column_names(), vec!["id", "created", "total", "memo"]);
    assert!(descriptor.is_auto_increment());

    let mut invoice = Invoice {
        record: Record { id: 0, created: 1_650_000_000 },
        total: Decimal::new(9999, 2),
        memo: None,
    };
    engine.add(&mut invoice)?;
    assert_eq!(invoice.record.id, 1);

    assert_eq!(engine.get_all::<Invoice>()?, vec![invoice]);
    Ok(())
}

#[test]
fn test_schema_errors_are_not_cached() {
    let registry = Registry::new();
    for _ in 0..2 {
        assert!(matches!(
            registry.describe::<BadKey>(),
            Err(OrmError::IncorrectAutoIncrementType { .. })
        ));
    }
    assert!(!registry.is_described::<BadKey>());
    assert!(registry.describe::<Tag>().is_ok());
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_file_database_survives_reopen() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("orm.db");

    {
        let engine = Engine::open(SqliteConfig::new(&path, Schema::new()))?;
        engine.create_table::<Reading>()?;
        engine.add_all(&mut readings(4))?;
        engine.close()?;
    }

    // Reopen through a fresh registry and an explicit storage
    let storage = SqliteStorage::open(&SqliteConfig::new(&path, Schema::new()))?;
    let engine = Engine::with_registry(storage, Arc::new(Registry::new()));
    let stored = engine.get_all::<Reading>()?;
    assert_eq!(stored.len(), 4);
    assert_eq!(stored[3].value, 3.0);
    Ok(())
}
