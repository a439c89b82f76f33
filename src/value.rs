//! Scalar values exchanged with the store and the coercions between them and
//! entity field types.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{OrmError, Result};
use crate::schema::DataType;

/// Core value types for SQLite operations
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view of the value, treating booleans as 0/1.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            Value::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// True for the values an auto-increment key holds before its first insert.
    pub(crate) fn is_unassigned_key(&self) -> bool {
        matches!(self, Value::Null | Value::Integer(0))
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::Boolean(_) => "boolean",
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(n) => ToSqlOutput::Borrowed(ValueRef::Integer(*n)),
            Value::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Boolean(b) => ToSqlOutput::Borrowed(ValueRef::Integer(i64::from(*b))),
        })
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(n) => Value::Integer(n),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

/// A single result or write row: column name to value, in column order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named value
    pub fn with_value(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set a column, replacing any previous value under the same name.
    pub fn insert(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.columns.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = value,
            None => self.columns.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let idx = self.columns.iter().position(|(n, _)| n == name)?;
        Some(self.columns.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.columns.iter().map(|(_, v)| v)
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

impl<S: Into<String>, V: Into<Value>> FromIterator<(S, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (S, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (name, value) in iter {
            row.insert(&name.into(), value);
        }
        row
    }
}

/// A Rust type that can be stored in a single column.
///
/// `from_value` receives `Value::Null` for SQL `NULL`; non-optional scalars
/// decode it to their zero value.
pub trait SqlField: Sized + Send + Sync + 'static {
    const DATA_TYPE: DataType;
    const NULLABLE: bool = false;
    /// Whether the type may back an auto-increment key.
    const INTEGRAL: bool = false;

    fn to_value(&self) -> Result<Value>;
    fn from_value(value: Value) -> Result<Self>;
}

fn mismatch<T>(value: &Value) -> OrmError {
    OrmError::codec(format!(
        "cannot decode {} value into {}",
        value.kind(),
        std::any::type_name::<T>()
    ))
}

macro_rules! integer_field {
    ($($ty:ty),*) => {$(
        impl SqlField for $ty {
            const DATA_TYPE: DataType = DataType::Integer;
            const INTEGRAL: bool = true;

            fn to_value(&self) -> Result<Value> {
                i64::try_from(*self)
                    .map(Value::Integer)
                    .map_err(|_| OrmError::codec(format!("{} out of range for INTEGER", self)))
            }

            fn from_value(value: Value) -> Result<Self> {
                let n = match value {
                    Value::Null => 0,
                    Value::Integer(n) => n,
                    Value::Boolean(b) => i64::from(b),
                    Value::Text(ref s) => s.trim().parse::<i64>().map_err(|_| mismatch::<$ty>(&value))?,
                    ref other => return Err(mismatch::<$ty>(other)),
                };
                <$ty>::try_from(n)
                    .map_err(|_| OrmError::codec(format!("{} out of range for {}", n, stringify!($ty))))
            }
        }
    )*};
}

integer_field!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

impl SqlField for bool {
    const DATA_TYPE: DataType = DataType::Integer;

    fn to_value(&self) -> Result<Value> {
        Ok(Value::Integer(i64::from(*self)))
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(false),
            Value::Integer(n) => Ok(n != 0),
            Value::Boolean(b) => Ok(b),
            other => Err(mismatch::<bool>(&other)),
        }
    }
}

macro_rules! real_field {
    ($($ty:ty),*) => {$(
        impl SqlField for $ty {
            const DATA_TYPE: DataType = DataType::Real;

            fn to_value(&self) -> Result<Value> {
                Ok(Value::Real(f64::from(*self)))
            }

            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
            fn from_value(value: Value) -> Result<Self> {
                match value {
                    Value::Null => Ok(0.0),
                    Value::Real(f) => Ok(f as $ty),
                    Value::Integer(n) => Ok(n as $ty),
                    other => Err(mismatch::<$ty>(&other)),
                }
            }
        }
    )*};
}

real_field!(f32, f64);

impl SqlField for String {
    const DATA_TYPE: DataType = DataType::Text;

    fn to_value(&self) -> Result<Value> {
        Ok(Value::Text(self.clone()))
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(String::new()),
            Value::Text(s) => Ok(s),
            Value::Integer(n) => Ok(n.to_string()),
            Value::Real(f) => Ok(f.to_string()),
            Value::Boolean(b) => Ok(b.to_string()),
            Value::Blob(b) => String::from_utf8(b).map_err(|e| OrmError::codec(e.to_string())),
        }
    }
}

impl SqlField for Vec<u8> {
    const DATA_TYPE: DataType = DataType::Blob;

    fn to_value(&self) -> Result<Value> {
        Ok(Value::Blob(self.clone()))
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Blob(b) => Ok(b),
            Value::Text(s) => Ok(s.into_bytes()),
            other => Err(mismatch::<Vec<u8>>(&other)),
        }
    }
}

impl<T: SqlField> SqlField for Option<T> {
    const DATA_TYPE: DataType = T::DATA_TYPE;
    const NULLABLE: bool = true;
    const INTEGRAL: bool = T::INTEGRAL;

    fn to_value(&self) -> Result<Value> {
        match self {
            Some(v) => v.to_value(),
            None => Ok(Value::Null),
        }
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

// Dates are stored as epoch milliseconds.

fn epoch_millis(value: Value) -> Result<i64> {
    match value {
        Value::Null => Ok(0),
        Value::Integer(n) => Ok(n),
        other => Err(mismatch::<DateTime<Utc>>(&other)),
    }
}

fn datetime_from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| OrmError::codec(format!("timestamp {millis} out of range")))
}

impl SqlField for DateTime<Utc> {
    const DATA_TYPE: DataType = DataType::Integer;

    fn to_value(&self) -> Result<Value> {
        Ok(Value::Integer(self.timestamp_millis()))
    }

    fn from_value(value: Value) -> Result<Self> {
        datetime_from_millis(epoch_millis(value)?)
    }
}

impl SqlField for NaiveDateTime {
    const DATA_TYPE: DataType = DataType::Integer;

    fn to_value(&self) -> Result<Value> {
        Ok(Value::Integer(self.and_utc().timestamp_millis()))
    }

    fn from_value(value: Value) -> Result<Self> {
        Ok(datetime_from_millis(epoch_millis(value)?)?.naive_utc())
    }
}

impl SqlField for NaiveDate {
    const DATA_TYPE: DataType = DataType::Integer;

    fn to_value(&self) -> Result<Value> {
        Ok(Value::Integer(
            self.and_time(NaiveTime::default()).and_utc().timestamp_millis(),
        ))
    }

    fn from_value(value: Value) -> Result<Self> {
        Ok(datetime_from_millis(epoch_millis(value)?)?.date_naive())
    }
}

// Decimals are stored as text so no precision is lost.
impl SqlField for Decimal {
    const DATA_TYPE: DataType = DataType::Text;

    fn to_value(&self) -> Result<Value> {
        Ok(Value::Text(self.to_string()))
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Decimal::ZERO),
            Value::Text(s) => Decimal::from_str(&s).map_err(|e| OrmError::codec(e.to_string())),
            Value::Integer(n) => Ok(Decimal::from(n)),
            Value::Real(f) => Decimal::try_from(f).map_err(|e| OrmError::codec(e.to_string())),
            other => Err(mismatch::<Decimal>(&other)),
        }
    }
}

/// An arbitrary serde payload stored as an opaque bincode blob.
///
/// Wrap in `Option` for nullable payloads; a bare `Serialized<T>` refuses to
/// decode `NULL`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Serialized<T>(pub T);

impl<T> Serialized<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> std::ops::Deref for Serialized<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> std::ops::DerefMut for Serialized<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

impl<T> SqlField for Serialized<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    const DATA_TYPE: DataType = DataType::Blob;

    fn to_value(&self) -> Result<Value> {
        bincode::serialize(&self.0)
            .map(Value::Blob)
            .map_err(|e| OrmError::codec(e.to_string()))
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Blob(bytes) => bincode::deserialize(&bytes)
                .map(Serialized)
                .map_err(|e| OrmError::codec(e.to_string())),
            other => Err(mismatch::<T>(&other)),
        }
    }
}
