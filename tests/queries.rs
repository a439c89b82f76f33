mod common;

use rust_sqlite_orm::{Count, Delete, OrmError, QueryError, Row, Select, Update};

use common::{engine_with, readings, Author, Book, Reading};

#[test]
fn test_count_honors_limit() -> anyhow::Result<()> {
    let engine = engine_with::<Reading>()?;
    engine.add_all(&mut readings(12))?;

    let limited = Select::<Reading>::builder().limit(5).build();
    assert_eq!(engine.count_query(&limited)?, 5);

    let beyond = Count::<Reading>::builder().limit(100).build();
    assert_eq!(engine.count_query(&beyond)?, 12);

    assert_eq!(engine.count::<Reading>()?, 12);
    assert_eq!(engine.count_where::<Reading, _, _>("sensor = ?", ["a"])?, 6);
    Ok(())
}

#[test]
fn test_count_of_grouped_query_counts_groups() -> anyhow::Result<()> {
    let engine = engine_with::<Reading>()?;
    engine.add_all(&mut readings(9))?;

    let groups = Count::<Reading>::builder().group_by("sensor").build();
    assert_eq!(engine.count_query(&groups)?, 2);

    let large = Count::<Reading>::builder()
        .group_by("sensor")
        .having("COUNT(*) > ?")
        .arg(4)
        .build();
    assert_eq!(engine.count_query(&large)?, 1);
    Ok(())
}

#[test]
fn test_select_with_every_clause() -> anyhow::Result<()> {
    let engine = engine_with::<Reading>()?;
    engine.add_all(&mut readings(10))?;

    let query = Select::<Reading>::builder()
        .where_clause("sensor = ? AND value >= ?")
        .where_args(["b"])
        .arg(3.0)
        .order_by("value DESC")
        .limit(2)
        .build();
    let values: Vec<f64> = engine.select(&query)?.iter().map(|r| r.value).collect();
    assert_eq!(values, vec![9.0, 7.0]);

    let where_only = engine.get_all_where::<Reading, _, _>("value < ?", [2.0])?;
    assert_eq!(where_only.len(), 2);
    Ok(())
}

#[test]
fn test_having_without_group_by_is_rejected() -> anyhow::Result<()> {
    let engine = engine_with::<Reading>()?;

    let query = Select::<Reading>::builder().having("COUNT(*) > 1").build();
    let err = engine.select(&query).unwrap_err();
    assert!(matches!(err, OrmError::Query(QueryError::HavingWithoutGroupBy)));

    let count = Count::<Reading>::builder().having("COUNT(*) > 1").build();
    assert!(matches!(
        engine.count_query(&count),
        Err(OrmError::Query(QueryError::HavingWithoutGroupBy))
    ));
    Ok(())
}

#[test]
fn test_update_returns_affected_rows() -> anyhow::Result<()> {
    let engine = engine_with::<Reading>()?;
    engine.add_all(&mut readings(6))?;

    let query = Update::<Reading>::builder()
        .where_clause("sensor = ?")
        .arg("a")
        .build();
    let changed = engine.update(&query, &Row::new().with_value("value", -1.0))?;
    assert_eq!(changed, 3);
    assert_eq!(engine.count_where::<Reading, _, _>("value = ?", [-1.0])?, 3);

    let err = engine
        .update(&query, &Row::new().with_value("unknown", 1))
        .unwrap_err();
    assert!(matches!(err, OrmError::Query(QueryError::InvalidIdentifier { .. })));

    let err = engine.update(&query, &Row::new()).unwrap_err();
    assert!(matches!(err, OrmError::Query(QueryError::EmptyValues)));
    Ok(())
}

#[test]
fn test_ordered_update_touches_selected_rows_only() -> anyhow::Result<()> {
    let engine = engine_with::<Reading>()?;
    engine.add_all(&mut readings(5))?;

    let query = Update::<Reading>::builder()
        .where_clause("value > ?")
        .arg(0.0)
        .order_by("value DESC")
        .build();
    let changed = engine.update(&query, &Row::new().with_value("sensor", "hot"))?;
    assert_eq!(changed, 4);
    assert_eq!(engine.count_where::<Reading, _, _>("sensor = ?", ["hot"])?, 4);
    Ok(())
}

#[test]
fn test_delete_query_without_relationships() -> anyhow::Result<()> {
    let engine = engine_with::<Reading>()?;
    engine.add_all(&mut readings(7))?;

    let query = Delete::<Reading>::builder()
        .where_clause("sensor = ?")
        .arg("b")
        .build();
    assert_eq!(engine.delete_query(&query)?, 3);
    assert_eq!(engine.count::<Reading>()?, 4);

    assert_eq!(engine.delete_where::<Reading, _, _>("value >= ?", [4.0])?, 2);
    assert_eq!(engine.count::<Reading>()?, 2);
    Ok(())
}

#[test]
fn test_delete_query_cascades() -> anyhow::Result<()> {
    let engine = engine_with::<Author>()?;

    let mut authors = vec![
        Author::new("keep").with_books(&["k1"]),
        Author::new("drop").with_books(&["d1", "d2"]),
        Author::new("drop").with_books(&["d3"]),
    ];
    engine.add_all(&mut authors)?;

    let removed = engine.delete_where::<Author, _, _>("name = ?", ["drop"])?;
    assert_eq!(removed, 2);
    assert_eq!(engine.count::<Author>()?, 1);

    let books = engine.get_all::<Book>()?;
    assert_eq!(books.len(), 1);
    assert_eq!(books[0].title, "k1");
    Ok(())
}

#[test]
fn test_grouped_delete_removes_selected_keys() -> anyhow::Result<()> {
    let engine = engine_with::<Author>()?;

    let mut authors = vec![
        Author::new("solo").with_books(&["s1"]),
        Author::new("busy").with_books(&["b1", "b2", "b3"]),
    ];
    engine.add_all(&mut authors)?;

    // Authors with more than one book, found through a grouped key query
    let query = Delete::<Author>::builder()
        .where_clause("id IN (SELECT author_id FROM books GROUP BY author_id HAVING COUNT(*) > ?)")
        .arg(1)
        .order_by("id")
        .build();
    assert_eq!(engine.delete_query(&query)?, 1);

    let left = engine.get_all::<Author>()?;
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].name, "solo");
    assert_eq!(engine.count::<Book>()?, 1);
    Ok(())
}

#[test]
fn test_grouped_delete_removes_whole_groups() -> anyhow::Result<()> {
    let engine = engine_with::<Reading>()?;
    engine.add_all(&mut readings(6))?;

    let query = Delete::<Reading>::builder()
        .group_by("sensor")
        .having("COUNT(*) > ?")
        .arg(2)
        .build();
    assert_eq!(engine.delete_query(&query)?, 6);
    assert_eq!(engine.count::<Reading>()?, 0);

    // Five rows: "a" holds three, "b" two
    engine.add_all(&mut readings(5))?;
    assert_eq!(engine.delete_query(&query)?, 3);
    let left = engine.get_all::<Reading>()?;
    assert_eq!(left.len(), 2);
    assert!(left.iter().all(|r| r.sensor == "b"));
    Ok(())
}

#[test]
fn test_grouped_update_touches_every_row_of_matching_groups() -> anyhow::Result<()> {
    let engine = engine_with::<Reading>()?;
    engine.add_all(&mut readings(6))?;

    // Above zero, "a" keeps two rows and "b" three
    let query = Update::<Reading>::builder()
        .where_clause("value >= ?")
        .arg(1.0)
        .group_by("sensor")
        .having("COUNT(*) > ?")
        .arg(2)
        .build();
    assert_eq!(engine.update(&query, &Row::new().with_value("value", -1.0))?, 3);
    let changed = engine.get_all_where::<Reading, _, _>("value = ?", [-1.0])?;
    assert_eq!(changed.len(), 3);
    assert!(changed.iter().all(|r| r.sensor == "b"));
    Ok(())
}

#[test]
fn test_grouped_delete_cascades_to_children() -> anyhow::Result<()> {
    let engine = engine_with::<Author>()?;

    let mut authors = vec![
        Author::new("twin").with_books(&["t1"]),
        Author::new("twin").with_books(&["t2", "t3"]),
        Author::new("solo").with_books(&["s1"]),
    ];
    engine.add_all(&mut authors)?;

    let query = Delete::<Author>::builder()
        .group_by("name")
        .having("COUNT(*) > 1")
        .build();
    assert_eq!(engine.delete_query(&query)?, 2);

    let left = engine.get_all::<Author>()?;
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].name, "solo");
    assert_eq!(engine.count::<Book>()?, 1);
    Ok(())
}
