//! Table definitions and their DDL.

use crate::entity::Entity;
use crate::error::Result;
use crate::registry::Registry;
use crate::relation::SchemaWalk;

/// Schema definition for the SQLite database
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    pub tables: Vec<TableDefinition>,
}

impl Schema {
    pub fn new() -> Self {
        Self { tables: Vec::new() }
    }

    pub fn add_table(mut self, table: TableDefinition) -> Self {
        self.push_table(table);
        self
    }

    /// Add or merge a table. Foreign keys and indexes of a table that is
    /// already present are appended to the existing definition.
    pub fn push_table(&mut self, table: TableDefinition) {
        match self.tables.iter_mut().find(|t| t.name == table.name) {
            Some(existing) => {
                for fk in table.foreign_keys {
                    if !existing.foreign_keys.contains(&fk) {
                        existing.foreign_keys.push(fk);
                    }
                }
                for index in table.indexes {
                    if !existing.indexes.iter().any(|i| i.name == index.name) {
                        existing.indexes.push(index);
                    }
                }
            }
            None => self.tables.push(table),
        }
    }

    /// Add the table of `E` and, recursively, the tables of its related
    /// entities with their linking foreign keys.
    pub fn add_entity<E: Entity>(mut self, registry: &Registry) -> Result<Self> {
        SchemaWalk::new(registry, &mut self).add_entity::<E>()?;
        Ok(self)
    }

    pub fn table(&self, name: &str) -> Option<&TableDefinition> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub(crate) fn table_mut(&mut self, name: &str) -> Option<&mut TableDefinition> {
        self.tables.iter_mut().find(|t| t.name == name)
    }

    /// Every statement needed to create the schema, tables in insertion order.
    pub fn to_sql(&self) -> Vec<String> {
        let mut statements = Vec::new();
        for table in &self.tables {
            statements.push(table.create_sql());
            statements.extend(table.index_sql());
        }
        statements
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<IndexDefinition>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    pub fn index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this table.
    ///
    /// A single `INTEGER` primary key column carrying the `AutoIncrement`
    /// constraint is rendered inline so it aliases the rowid.
    pub fn create_sql(&self) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(self.columns.len() + 2);
        let inline_pk = self.inline_primary_key();
        for col in &self.columns {
            let mut def = format!("{} {}", quote(&col.name), col.data_type.as_sql());
            if inline_pk == Some(col.name.as_str()) {
                def.push_str(" PRIMARY KEY");
                if col.constraints.contains(&ColumnConstraint::AutoIncrement) {
                    def.push_str(" AUTOINCREMENT");
                }
            }
            for constraint in &col.constraints {
                match constraint {
                    ColumnConstraint::NotNull => def.push_str(" NOT NULL"),
                    ColumnConstraint::Unique => def.push_str(" UNIQUE"),
                    ColumnConstraint::PrimaryKey | ColumnConstraint::AutoIncrement => {}
                }
            }
            if let Some(default) = &col.default_value {
                def.push_str(" DEFAULT ");
                def.push_str(&default.as_sql());
            }
            parts.push(def);
        }
        if inline_pk.is_none() && !self.primary_key.is_empty() {
            let cols: Vec<_> = self.primary_key.iter().map(|c| quote(c)).collect();
            parts.push(format!("PRIMARY KEY ({})", cols.join(", ")));
        }
        for fk in &self.foreign_keys {
            parts.push(format!(
                "FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
                quote(&fk.column),
                quote(&fk.foreign_table),
                quote(&fk.foreign_column),
                fk.on_delete.as_sql(),
                fk.on_update.as_sql()
            ));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote(&self.name),
            parts.join(", ")
        )
    }

    pub fn index_sql(&self) -> Vec<String> {
        self.indexes
            .iter()
            .map(|index| {
                let cols: Vec<_> = index.columns.iter().map(|c| quote(c)).collect();
                format!(
                    "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
                    if index.unique { "UNIQUE " } else { "" },
                    quote(&index.name),
                    quote(&self.name),
                    cols.join(", ")
                )
            })
            .collect()
    }

    fn inline_primary_key(&self) -> Option<&str> {
        let [pk] = self.primary_key.as_slice() else {
            return None;
        };
        self.columns
            .iter()
            .find(|c| &c.name == pk && c.data_type == DataType::Integer)
            .map(|c| c.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: DataType,
    pub constraints: Vec<ColumnConstraint>,
    pub default_value: Option<DefaultValue>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            constraints: Vec::new(),
            default_value: None,
        }
    }

    pub fn constraint(mut self, constraint: ColumnConstraint) -> Self {
        if !self.constraints.contains(&constraint) {
            self.constraints.push(constraint);
        }
        self
    }

    pub fn default_value(mut self, value: DefaultValue) -> Self {
        self.default_value = Some(value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Integer,
    Text,
    Real,
    Blob,
}

impl DataType {
    pub fn as_sql(self) -> &'static str {
        match self {
            DataType::Integer => "INTEGER",
            DataType::Text => "TEXT",
            DataType::Real => "REAL",
            DataType::Blob => "BLOB",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnConstraint {
    PrimaryKey,
    AutoIncrement,
    NotNull,
    Unique,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Integer(i64),
    Text(String),
    Real(f64),
    Null,
    CurrentTimestamp,
}

impl DefaultValue {
    fn as_sql(&self) -> String {
        match self {
            DefaultValue::Integer(n) => n.to_string(),
            DefaultValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            DefaultValue::Real(f) => f.to_string(),
            DefaultValue::Null => "NULL".to_string(),
            DefaultValue::CurrentTimestamp => "CURRENT_TIMESTAMP".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub column: String,
    pub foreign_table: String,
    pub foreign_column: String,
    pub on_delete: ForeignKeyAction,
    pub on_update: ForeignKeyAction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForeignKeyAction {
    NoAction,
    Cascade,
    SetNull,
    SetDefault,
    Restrict,
}

impl ForeignKeyAction {
    fn as_sql(&self) -> &'static str {
        match self {
            ForeignKeyAction::NoAction => "NO ACTION",
            ForeignKeyAction::Cascade => "CASCADE",
            ForeignKeyAction::SetNull => "SET NULL",
            ForeignKeyAction::SetDefault => "SET DEFAULT",
            ForeignKeyAction::Restrict => "RESTRICT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Double-quote an identifier for SQLite.
pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
