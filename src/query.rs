//! Fluent query specs and their compilation to parameterized SQL.
//!
//! ```ignore
//! let adults = Select::<User>::builder()
//!     .where_clause("age >= ?")
//!     .where_args(["18"])
//!     .order_by("name ASC")
//!     .limit(10)
//!     .build();
//! let users = engine.select(&adults)?;
//! ```
//!
//! The entity is a type parameter, so a spec can never lack its target.
//! Clauses are emitted as select/count → from → where → group by → having →
//! order by → limit. Placeholders in the where text are bound left to right.

use std::marker::PhantomData;

use crate::entity::{Entity, EntityDescriptor};
use crate::error::QueryError;
use crate::schema::quote;
use crate::value::{Row, Value};

/// Clause set shared by every query kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    where_clause: Option<String>,
    where_args: Vec<Value>,
    group_by: Option<String>,
    having: Option<String>,
    order_by: Option<String>,
    limit: Option<u64>,
}

impl QuerySpec {
    pub fn where_clause(&self) -> Option<&str> {
        self.where_clause.as_deref()
    }

    pub fn where_args(&self) -> &[Value] {
        &self.where_args
    }

    pub fn group_by(&self) -> Option<&str> {
        self.group_by.as_deref()
    }

    pub fn having(&self) -> Option<&str> {
        self.having.as_deref()
    }

    pub fn order_by(&self) -> Option<&str> {
        self.order_by.as_deref()
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if self.having.is_some() && self.group_by.is_none() {
            return Err(QueryError::HavingWithoutGroupBy);
        }
        Ok(())
    }

    fn is_grouped_or_ordered(&self) -> bool {
        self.group_by.is_some() || self.having.is_some() || self.order_by.is_some()
    }

    fn append_where(&self, sql: &mut String) {
        if let Some(predicate) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(predicate);
        }
    }

    fn append_tail(&self, sql: &mut String) {
        if let Some(group_by) = &self.group_by {
            sql.push_str(" GROUP BY ");
            sql.push_str(group_by);
        }
        if let Some(having) = &self.having {
            sql.push_str(" HAVING ");
            sql.push_str(having);
        }
        if let Some(order_by) = &self.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order_by);
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
    }
}

/// A typed query over one entity.
pub trait Query {
    type Entity: crate::entity::Entity;

    fn spec(&self) -> &QuerySpec;
}

/// Queries whose matching rows can be counted.
pub trait Countable: Query {}

#[doc(hidden)]
pub trait FromSpec {
    fn from_spec(spec: QuerySpec) -> Self;
}

macro_rules! query_kind {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        pub struct $name<E> {
            spec: QuerySpec,
            _entity: PhantomData<fn() -> E>,
        }

        impl<E: Entity> $name<E> {
            pub fn builder() -> QueryBuilder<Self> {
                QueryBuilder::new()
            }
        }

        impl<E: Entity> Query for $name<E> {
            type Entity = E;

            fn spec(&self) -> &QuerySpec {
                &self.spec
            }
        }

        impl<E> FromSpec for $name<E> {
            fn from_spec(spec: QuerySpec) -> Self {
                Self {
                    spec,
                    _entity: PhantomData,
                }
            }
        }

        impl<E> Clone for $name<E> {
            fn clone(&self) -> Self {
                Self::from_spec(self.spec.clone())
            }
        }

        impl<E> std::fmt::Debug for $name<E> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("entity", &std::any::type_name::<E>())
                    .field("spec", &self.spec)
                    .finish()
            }
        }
    };
}

query_kind!(
    /// Rows of `E`, hydrated with their relationships.
    Select
);
query_kind!(
    /// Number of rows of `E` matching the query.
    Count
);
query_kind!(
    /// Removes matching rows of `E` and their dependents.
    Delete
);
query_kind!(
    /// Sets column values on matching rows of `E`.
    Update
);

impl<E: Entity> Countable for Select<E> {}
impl<E: Entity> Countable for Count<E> {}

/// Accumulates clauses for a query of kind `Q`. Building never touches storage.
pub struct QueryBuilder<Q> {
    spec: QuerySpec,
    _query: PhantomData<fn() -> Q>,
}

impl<Q: FromSpec> QueryBuilder<Q> {
    fn new() -> Self {
        Self {
            spec: QuerySpec::default(),
            _query: PhantomData,
        }
    }

    /// Raw predicate text with `?` placeholders.
    pub fn where_clause(mut self, predicate: &str) -> Self {
        self.spec.where_clause = Some(predicate.to_string());
        self
    }

    /// Replace the positional arguments.
    pub fn where_args<I, V>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.spec.where_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Append one positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.spec.where_args.push(value.into());
        self
    }

    pub fn group_by(mut self, columns: &str) -> Self {
        self.spec.group_by = Some(columns.to_string());
        self
    }

    /// Only valid together with [`group_by`](Self::group_by).
    pub fn having(mut self, predicate: &str) -> Self {
        self.spec.having = Some(predicate.to_string());
        self
    }

    /// Raw ordering text, e.g. `"name ASC, id DESC"`.
    pub fn order_by(mut self, ordering: &str) -> Self {
        self.spec.order_by = Some(ordering.to_string());
        self
    }

    pub fn build(self) -> Q {
        Q::from_spec(self.spec)
    }
}

impl<E: Entity> QueryBuilder<Select<E>> {
    pub fn limit(mut self, limit: u64) -> Self {
        self.spec.limit = Some(limit);
        self
    }
}

impl<E: Entity> QueryBuilder<Count<E>> {
    pub fn limit(mut self, limit: u64) -> Self {
        self.spec.limit = Some(limit);
        self
    }
}

/// Table, key and persisted columns of the entity a query targets.
pub(crate) struct Target {
    table: String,
    key: String,
    columns: String,
}

impl Target {
    pub(crate) fn of<E: Entity>(descriptor: &EntityDescriptor<E>) -> Self {
        let columns: Vec<String> = descriptor.column_names().into_iter().map(quote).collect();
        Self {
            table: quote(descriptor.table_name()),
            key: quote(descriptor.primary_key().name()),
            columns: columns.join(", "),
        }
    }

    pub(crate) fn table(&self) -> &str {
        &self.table
    }

    pub(crate) fn columns(&self) -> &str {
        &self.columns
    }
}

pub(crate) type Compiled = (String, Vec<Value>);

pub(crate) fn compile_select(spec: &QuerySpec, target: &Target) -> Result<Compiled, QueryError> {
    spec.validate()?;
    let mut sql = format!("SELECT {} FROM {}", target.columns, target.table);
    spec.append_where(&mut sql);
    spec.append_tail(&mut sql);
    Ok((sql, spec.where_args.clone()))
}

/// Keys of the rows a spec matches, honoring every clause.
///
/// A grouped spec selects groups, so it matches every row whose grouping
/// columns equal those of a selected group. Rows with a `NULL` grouping
/// value never match.
pub(crate) fn compile_keys(spec: &QuerySpec, target: &Target) -> Result<Compiled, QueryError> {
    spec.validate()?;
    let Some(group_by) = &spec.group_by else {
        let mut sql = format!("SELECT {} FROM {}", target.key, target.table);
        spec.append_where(&mut sql);
        spec.append_tail(&mut sql);
        return Ok((sql, spec.where_args.clone()));
    };

    let mut matched = format!("SELECT * FROM {}", target.table);
    spec.append_where(&mut matched);
    let mut groups = format!("SELECT {group_by} FROM matched");
    spec.append_tail(&mut groups);
    let sql = format!(
        "WITH matched AS ({matched}) SELECT {} FROM matched WHERE ({group_by}) IN ({groups})",
        target.key
    );
    Ok((sql, spec.where_args.clone()))
}

/// Grouped or limited specs count the rows of the grouped/limited result.
pub(crate) fn compile_count(spec: &QuerySpec, target: &Target) -> Result<Compiled, QueryError> {
    spec.validate()?;
    let sql = if spec.group_by.is_some() || spec.limit.is_some() {
        let mut inner = format!("SELECT 1 FROM {}", target.table);
        spec.append_where(&mut inner);
        spec.append_tail(&mut inner);
        format!("SELECT COUNT(*) FROM ({inner})")
    } else {
        let mut sql = format!("SELECT COUNT(*) FROM {}", target.table);
        spec.append_where(&mut sql);
        sql
    };
    Ok((sql, spec.where_args.clone()))
}

pub(crate) fn compile_delete(spec: &QuerySpec, target: &Target) -> Result<Compiled, QueryError> {
    spec.validate()?;
    let mut sql = format!("DELETE FROM {}", target.table);
    append_row_filter(spec, target, &mut sql)?;
    Ok((sql, spec.where_args.clone()))
}

pub(crate) fn compile_update(spec: &QuerySpec, target: &Target, values: &Row) -> Result<Compiled, QueryError> {
    spec.validate()?;
    if values.is_empty() {
        return Err(QueryError::EmptyValues);
    }
    let mut assignments = Vec::with_capacity(values.len());
    for name in values.names() {
        check_identifier(name, "column")?;
        assignments.push(format!("{} = ?", quote(name)));
    }
    let mut sql = format!("UPDATE {} SET {}", target.table, assignments.join(", "));
    append_row_filter(spec, target, &mut sql)?;
    let mut args: Vec<Value> = values.values().cloned().collect();
    args.extend(spec.where_args.iter().cloned());
    Ok((sql, args))
}

/// `WHERE` for statements that cannot group or order directly: such specs
/// select their keys in a subquery.
fn append_row_filter(spec: &QuerySpec, target: &Target, sql: &mut String) -> Result<(), QueryError> {
    if spec.is_grouped_or_ordered() || spec.limit.is_some() {
        let (keys, _) = compile_keys(spec, target)?;
        sql.push_str(&format!(" WHERE {} IN ({keys})", target.key));
    } else {
        spec.append_where(sql);
    }
    Ok(())
}

pub(crate) fn check_identifier(ident: &str, kind: &'static str) -> Result<(), QueryError> {
    let mut chars = ident.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(QueryError::InvalidIdentifier {
            kind,
            ident: ident.to_string(),
        })
    }
}

/// `?, ?, ?` for `n` values.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
