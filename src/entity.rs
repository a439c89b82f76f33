//! Entity declarations and the schema descriptors derived from them.
//!
//! An entity describes itself once through [`Entity::schema`]; the registry
//! turns that declaration into an [`EntityDescriptor`] which the codec, the
//! relationship resolver and the query executor all work from.
//!
//! ```ignore
//! #[derive(Default)]
//! struct User {
//!     id: i64,
//!     name: String,
//!     posts: Vec<Post>,
//! }
//!
//! impl Entity for User {
//!     fn schema(s: &mut SchemaBuilder<Self>) {
//!         s.table("users");
//!         field!(s, id).primary_key().auto_increment();
//!         field!(s, name);
//!         s.one_to_many("posts", "user_id", |u| &mut u.posts);
//!     }
//! }
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{OrmError, Result};
use crate::relation::{OneToMany, OneToOne, OneToOneOnParent, ProjectedRelation, Relation};
use crate::schema::{ColumnConstraint, ColumnDefinition, DataType, TableDefinition};
use crate::value::{SqlField, Value};

/// A data type mapped to a table.
pub trait Entity: Default + Send + Sync + 'static {
    /// Declare the table, primary key, columns and relationships.
    fn schema(s: &mut SchemaBuilder<Self>);
}

pub(crate) type Getter<E> = Arc<dyn Fn(&E) -> Result<Value> + Send + Sync>;
type Setter<E> = Arc<dyn Fn(&mut E, Value) -> Result<()> + Send + Sync>;

/// One mapped field of an entity.
pub struct ColumnDescriptor<E> {
    field: String,
    name: String,
    data_type: DataType,
    nullable: bool,
    integral: bool,
    ignored: bool,
    primary_key: bool,
    auto_increment: bool,
    get: Getter<E>,
    set: Setter<E>,
}

impl<E: 'static> ColumnDescriptor<E> {
    /// Declared field identifier.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Column name in the table.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_integral(&self) -> bool {
        self.integral
    }

    pub fn is_ignored(&self) -> bool {
        self.ignored
    }

    pub fn get(&self, entity: &E) -> Result<Value> {
        (self.get)(entity)
    }

    pub fn set(&self, entity: &mut E, value: Value) -> Result<()> {
        (self.set)(entity, value)
    }

    pub(crate) fn getter(&self) -> Getter<E> {
        Arc::clone(&self.get)
    }

    fn project<P: 'static>(self, project: fn(&P) -> &E, project_mut: fn(&mut P) -> &mut E) -> ColumnDescriptor<P> {
        let get = self.get;
        let set = self.set;
        ColumnDescriptor {
            field: self.field,
            name: self.name,
            data_type: self.data_type,
            nullable: self.nullable,
            integral: self.integral,
            ignored: self.ignored,
            primary_key: self.primary_key,
            auto_increment: self.auto_increment,
            get: Arc::new(move |p: &P| get(project(p))),
            set: Arc::new(move |p: &mut P, v| set(project_mut(p), v)),
        }
    }

    fn definition(&self) -> ColumnDefinition {
        let mut def = ColumnDefinition::new(self.name.clone(), self.data_type);
        if self.primary_key {
            def = def.constraint(ColumnConstraint::PrimaryKey);
        } else if !self.nullable {
            def = def.constraint(ColumnConstraint::NotNull);
        }
        def
    }
}

impl<E> std::fmt::Debug for ColumnDescriptor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnDescriptor")
            .field("name", &self.name)
            .field("data_type", &self.data_type)
            .field("nullable", &self.nullable)
            .field("ignored", &self.ignored)
            .field("primary_key", &self.primary_key)
            .field("auto_increment", &self.auto_increment)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    OneToOne,
    OneToMany,
}

/// A field holding one related entity or a collection of them.
pub struct RelationshipDescriptor<E> {
    name: String,
    kind: RelationKind,
    foreign_key: String,
    owns_foreign_key_on_parent: bool,
    child: &'static str,
    pub(crate) resolver: Box<dyn Relation<E>>,
}

impl<E: 'static> RelationshipDescriptor<E> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    /// The column holding the link. Lives on the child table unless
    /// [`owns_foreign_key_on_parent`](Self::owns_foreign_key_on_parent) is set.
    pub fn foreign_key_column(&self) -> &str {
        &self.foreign_key
    }

    pub fn owns_foreign_key_on_parent(&self) -> bool {
        self.owns_foreign_key_on_parent
    }

    /// Rust type name of the child entity.
    pub fn child_entity(&self) -> &'static str {
        self.child
    }

    fn project<P: 'static>(self, project_mut: fn(&mut P) -> &mut E) -> RelationshipDescriptor<P> {
        RelationshipDescriptor {
            name: self.name,
            kind: self.kind,
            foreign_key: self.foreign_key,
            owns_foreign_key_on_parent: self.owns_foreign_key_on_parent,
            child: self.child,
            resolver: Box::new(ProjectedRelation::new(self.resolver, project_mut)),
        }
    }
}

impl<E> std::fmt::Debug for RelationshipDescriptor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationshipDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("foreign_key", &self.foreign_key)
            .field("owns_foreign_key_on_parent", &self.owns_foreign_key_on_parent)
            .field("child", &self.child)
            .finish()
    }
}

/// A field that holds the children of a one-to-many relationship.
pub trait ChildCollection: Send + Sync + 'static {
    type Child: Entity;

    /// `None` when the collection itself is absent.
    fn children_mut(&mut self) -> Option<&mut [Self::Child]>;
    fn replace(&mut self, children: Vec<Self::Child>);
}

impl<C: Entity> ChildCollection for Vec<C> {
    type Child = C;

    fn children_mut(&mut self) -> Option<&mut [C]> {
        Some(self)
    }

    fn replace(&mut self, children: Vec<C>) {
        *self = children;
    }
}

impl<C: Entity> ChildCollection for Option<Vec<C>> {
    type Child = C;

    fn children_mut(&mut self) -> Option<&mut [C]> {
        self.as_deref_mut()
    }

    fn replace(&mut self, children: Vec<C>) {
        *self = Some(children);
    }
}

/// Collects an entity's declaration. See [`Entity::schema`].
pub struct SchemaBuilder<E> {
    table: Option<String>,
    columns: Vec<ColumnDescriptor<E>>,
    relationships: Vec<RelationshipDescriptor<E>>,
    // First failure of an `inherit` call, reported by `finish`.
    error: Option<OrmError>,
}

impl<E: Entity> SchemaBuilder<E> {
    pub(crate) fn new() -> Self {
        Self {
            table: None,
            columns: Vec::new(),
            relationships: Vec::new(),
            error: None,
        }
    }

    /// Table name. Defaults to the type name.
    pub fn table(&mut self, name: &str) -> &mut Self {
        self.table = Some(name.to_string());
        self
    }

    /// Map a scalar field. The column is named after `name` unless overridden.
    pub fn field<T: SqlField>(
        &mut self,
        name: &str,
        get: fn(&E) -> &T,
        get_mut: fn(&mut E) -> &mut T,
    ) -> FieldBuilder<'_, E> {
        self.columns.push(ColumnDescriptor {
            field: name.to_string(),
            name: name.to_string(),
            data_type: T::DATA_TYPE,
            nullable: T::NULLABLE,
            integral: T::INTEGRAL,
            ignored: false,
            primary_key: false,
            auto_increment: false,
            get: Arc::new(move |e: &E| get(e).to_value()),
            set: Arc::new(move |e: &mut E, v| {
                *get_mut(e) = T::from_value(v)?;
                Ok(())
            }),
        });
        let idx = self.columns.len() - 1;
        FieldBuilder {
            column: &mut self.columns[idx],
        }
    }

    /// A single child stored in `C`'s table, linked by `C.foreign_key = self.pk`.
    pub fn one_to_one<C: Entity>(
        &mut self,
        name: &str,
        foreign_key: &str,
        slot: fn(&mut E) -> &mut Option<C>,
    ) -> &mut Self {
        self.relationship(
            name,
            RelationKind::OneToOne,
            foreign_key,
            false,
            std::any::type_name::<C>(),
            Box::new(OneToOne::new(foreign_key, slot)),
        )
    }

    /// Children stored in the child table, linked by `child.foreign_key = self.pk`.
    pub fn one_to_many<L: ChildCollection>(
        &mut self,
        name: &str,
        foreign_key: &str,
        slot: fn(&mut E) -> &mut L,
    ) -> &mut Self {
        self.relationship(
            name,
            RelationKind::OneToMany,
            foreign_key,
            false,
            std::any::type_name::<L::Child>(),
            Box::new(OneToMany::new(foreign_key, slot)),
        )
    }

    /// A single child whose key is held by this entity's own `parent_column`.
    ///
    /// Only attached on read; writes and deletes leave the child alone.
    pub fn one_to_one_on_parent<C: Entity>(
        &mut self,
        name: &str,
        parent_column: &str,
        slot: fn(&mut E) -> &mut Option<C>,
    ) -> &mut Self {
        self.relationship(
            name,
            RelationKind::OneToOne,
            parent_column,
            true,
            std::any::type_name::<C>(),
            Box::new(OneToOneOnParent::new(parent_column, slot)),
        )
    }

    /// Compose the columns, key and relationships of base entity `B`,
    /// reached through the given projections.
    pub fn inherit<B: Entity>(&mut self, project: fn(&E) -> &B, project_mut: fn(&mut E) -> &mut B) -> &mut Self {
        let mut base = SchemaBuilder::<B>::new();
        B::schema(&mut base);
        let mut failure = base.error.take();
        for rel in base.relationships.iter_mut() {
            if failure.is_some() {
                break;
            }
            failure = rel.resolver.bind(&base.columns).err();
        }
        if self.error.is_none() {
            self.error = failure;
        }
        self.columns
            .extend(base.columns.into_iter().map(|c| c.project(project, project_mut)));
        self.relationships
            .extend(base.relationships.into_iter().map(|r| r.project(project_mut)));
        self
    }

    fn relationship(
        &mut self,
        name: &str,
        kind: RelationKind,
        foreign_key: &str,
        owns_foreign_key_on_parent: bool,
        child: &'static str,
        resolver: Box<dyn Relation<E>>,
    ) -> &mut Self {
        self.relationships.push(RelationshipDescriptor {
            name: name.to_string(),
            kind,
            foreign_key: foreign_key.to_string(),
            owns_foreign_key_on_parent,
            child,
            resolver,
        });
        self
    }

    /// Validate the declaration and produce the descriptor.
    pub(crate) fn finish(mut self) -> Result<EntityDescriptor<E>> {
        let entity = std::any::type_name::<E>();
        let table = match self.table.take() {
            Some(t) => t,
            None => short_type_name(entity).to_string(),
        };
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        if table.trim().is_empty() {
            return Err(OrmError::schema(format!("{entity}: empty table name")));
        }

        let mut seen = HashSet::new();
        for col in self.columns.iter().filter(|c| !c.ignored) {
            if col.name.trim().is_empty() {
                return Err(OrmError::schema(format!("{entity}: empty column name")));
            }
            if !seen.insert(col.name.to_ascii_lowercase()) {
                return Err(OrmError::schema(format!(
                    "{entity}: duplicate column name `{}`",
                    col.name
                )));
            }
        }
        let mut rel_names = HashSet::new();
        for rel in &self.relationships {
            if !rel_names.insert(rel.name.as_str()) {
                return Err(OrmError::schema(format!(
                    "{entity}: duplicate relationship `{}`",
                    rel.name
                )));
            }
            if seen.contains(&rel.name.to_ascii_lowercase()) {
                return Err(OrmError::schema(format!(
                    "{entity}: relationship `{}` clashes with a column",
                    rel.name
                )));
            }
        }

        let declared: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| i)
            .collect();
        let pk_idx = match declared.as_slice() {
            [idx] => *idx,
            [] => self.implicit_id(entity)?,
            _ => {
                return Err(OrmError::schema(format!(
                    "{entity}: more than one primary key declared"
                )))
            }
        };
        if let Some(col) = self.columns.iter().find(|c| c.auto_increment && !c.primary_key) {
            return Err(OrmError::schema(format!(
                "{entity}: auto-increment on non-key column `{}`",
                col.name
            )));
        }

        let primary_key = self.columns.remove(pk_idx);
        if primary_key.ignored {
            return Err(OrmError::schema(format!(
                "{entity}: primary key `{}` cannot be ignored",
                primary_key.name
            )));
        }
        if primary_key.auto_increment && !primary_key.integral {
            return Err(OrmError::IncorrectAutoIncrementType {
                entity: entity.to_string(),
                column: primary_key.name.clone(),
            });
        }

        let mut all_columns: Vec<ColumnDescriptor<E>> = Vec::with_capacity(self.columns.len() + 1);
        all_columns.push(primary_key);
        all_columns.append(&mut self.columns);
        for rel in self.relationships.iter_mut() {
            rel.resolver.bind(&all_columns)?;
        }
        let primary_key = all_columns.remove(0);

        Ok(EntityDescriptor {
            entity,
            table,
            primary_key,
            columns: all_columns,
            relationships: self.relationships,
        })
    }

    /// Without a declared key, an integral `id` column becomes the auto-increment key.
    fn implicit_id(&mut self, entity: &str) -> Result<usize> {
        let idx = self
            .columns
            .iter()
            .position(|c| !c.ignored && c.name == "id")
            .ok_or_else(|| OrmError::schema(format!("{entity}: no primary key declared and no `id` column")))?;
        let col = &mut self.columns[idx];
        if !col.integral {
            return Err(OrmError::IncorrectAutoIncrementType {
                entity: entity.to_string(),
                column: col.name.clone(),
            });
        }
        col.primary_key = true;
        col.auto_increment = true;
        Ok(idx)
    }
}

fn short_type_name(full: &str) -> &str {
    let head = full.split('<').next().unwrap_or(full);
    head.rsplit("::").next().unwrap_or(head)
}

/// Modifiers for the field just declared with [`SchemaBuilder::field`].
pub struct FieldBuilder<'a, E> {
    column: &'a mut ColumnDescriptor<E>,
}

impl<'a, E> FieldBuilder<'a, E> {
    /// Override the column name (case preserved).
    pub fn column_name(self, name: &str) -> Self {
        self.column.name = name.to_string();
        self
    }

    pub fn primary_key(self) -> Self {
        self.column.primary_key = true;
        self
    }

    pub fn auto_increment(self) -> Self {
        self.column.auto_increment = true;
        self
    }

    /// Keep the field out of every read and write.
    pub fn ignored(self) -> Self {
        self.column.ignored = true;
        self
    }
}

/// Cached schema of one entity type.
pub struct EntityDescriptor<E> {
    entity: &'static str,
    table: String,
    primary_key: ColumnDescriptor<E>,
    columns: Vec<ColumnDescriptor<E>>,
    relationships: Vec<RelationshipDescriptor<E>>,
}

impl<E: Entity> EntityDescriptor<E> {
    pub fn entity_name(&self) -> &'static str {
        self.entity
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &ColumnDescriptor<E> {
        &self.primary_key
    }

    pub fn is_auto_increment(&self) -> bool {
        self.primary_key.auto_increment
    }

    /// Ordinary columns in declaration order, ignored ones included.
    pub fn columns(&self) -> &[ColumnDescriptor<E>] {
        &self.columns
    }

    pub fn relationships(&self) -> &[RelationshipDescriptor<E>] {
        &self.relationships
    }

    /// The key followed by every persisted ordinary column.
    pub fn persisted_columns(&self) -> impl Iterator<Item = &ColumnDescriptor<E>> {
        std::iter::once(&self.primary_key).chain(self.columns.iter().filter(|c| !c.ignored))
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.persisted_columns().map(|c| c.name()).collect()
    }

    /// Persisted column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor<E>> {
        self.persisted_columns().find(|c| c.name == name)
    }

    pub fn key_of(&self, entity: &E) -> Result<Value> {
        self.primary_key.get(entity)
    }

    pub fn set_key(&self, entity: &mut E, key: Value) -> Result<()> {
        self.primary_key.set(entity, key)
    }

    /// Set a persisted column by name.
    pub fn set_value(&self, entity: &mut E, column: &str, value: Value) -> Result<()> {
        match self.column(column) {
            Some(col) => col.set(entity, value),
            None => Err(OrmError::schema(format!(
                "{} has no column `{column}`",
                self.entity
            ))),
        }
    }

    /// Table definition for this entity alone, without relationship foreign keys.
    pub fn table_definition(&self) -> TableDefinition {
        let mut table = TableDefinition::new(self.table.clone());
        for col in self.persisted_columns() {
            table = table.column(col.definition());
        }
        table.primary_key(&[self.primary_key.name()])
    }
}

impl<E> std::fmt::Debug for EntityDescriptor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("entity", &self.entity)
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("columns", &self.columns)
            .field("relationships", &self.relationships)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field;

    #[derive(Default)]
    struct Plain {
        id: i64,
        title: String,
        cached: String,
    }

    impl Entity for Plain {
        fn schema(s: &mut SchemaBuilder<Self>) {
            field!(s, id);
            field!(s, title).column_name("Title");
            field!(s, cached).ignored();
        }
    }

    #[derive(Default)]
    struct TwoKeys {
        a: i64,
        b: i64,
    }

    impl Entity for TwoKeys {
        fn schema(s: &mut SchemaBuilder<Self>) {
            field!(s, a).primary_key();
            field!(s, b).primary_key();
        }
    }

    #[derive(Default)]
    struct TextAuto {
        code: String,
    }

    impl Entity for TextAuto {
        fn schema(s: &mut SchemaBuilder<Self>) {
            field!(s, code).primary_key().auto_increment();
        }
    }

    #[derive(Default)]
    struct Dupes {
        id: i64,
        name: String,
        other: String,
    }

    impl Entity for Dupes {
        fn schema(s: &mut SchemaBuilder<Self>) {
            field!(s, id).primary_key();
            field!(s, name);
            field!(s, other).column_name("NAME");
        }
    }

    #[derive(Default)]
    struct Child {
        id: i64,
    }

    impl Entity for Child {
        fn schema(s: &mut SchemaBuilder<Self>) {
            field!(s, id);
        }
    }

    // Points its relationship at a column it never maps.
    #[derive(Default)]
    struct BrokenBase {
        id: i64,
        child: Option<Child>,
    }

    impl Entity for BrokenBase {
        fn schema(s: &mut SchemaBuilder<Self>) {
            field!(s, id);
            s.one_to_one_on_parent("child", "missing_col", |b| &mut b.child);
        }
    }

    #[derive(Default)]
    struct Derived {
        base: BrokenBase,
        note: String,
    }

    impl Entity for Derived {
        fn schema(s: &mut SchemaBuilder<Self>) {
            s.inherit(|d| &d.base, |d| &mut d.base);
            field!(s, note);
        }
    }

    #[derive(Default)]
    struct Clash {
        id: i64,
        child_id: Option<i64>,
        child: Option<Child>,
    }

    impl Entity for Clash {
        fn schema(s: &mut SchemaBuilder<Self>) {
            field!(s, id);
            field!(s, child_id);
            s.one_to_one_on_parent("CHILD_ID", "child_id", |c| &mut c.child);
        }
    }

    fn describe<E: Entity>() -> Result<EntityDescriptor<E>> {
        let mut s = SchemaBuilder::new();
        E::schema(&mut s);
        s.finish()
    }

    #[test]
    fn implicit_id_becomes_auto_increment_key() {
        let d = describe::<Plain>().unwrap();
        assert_eq!(d.table_name(), "Plain");
        assert_eq!(d.primary_key().name(), "id");
        assert!(d.is_auto_increment());
        assert_eq!(d.column_names(), vec!["id", "Title"]);
        assert_eq!(d.columns().len(), 2);
        assert!(d.columns()[1].is_ignored());
    }

    #[test]
    fn rejects_two_primary_keys() {
        assert!(matches!(describe::<TwoKeys>(), Err(OrmError::Schema(_))));
    }

    #[test]
    fn rejects_auto_increment_on_text_key() {
        assert!(matches!(
            describe::<TextAuto>(),
            Err(OrmError::IncorrectAutoIncrementType { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_column_names() {
        assert!(matches!(describe::<Dupes>(), Err(OrmError::Schema(_))));
    }

    #[test]
    fn inherited_relationship_must_bind() {
        assert!(matches!(describe::<BrokenBase>(), Err(OrmError::Schema(_))));
        match describe::<Derived>() {
            Err(OrmError::Schema(msg)) => assert!(msg.contains("missing_col"), "{msg}"),
            other => panic!("expected schema error, got ok = {}", other.is_ok()),
        }
    }

    #[test]
    fn rejects_relationship_named_like_a_column() {
        assert!(matches!(describe::<Clash>(), Err(OrmError::Schema(_))));
    }

    #[test]
    fn short_names_drop_paths_and_generics() {
        assert_eq!(short_type_name("my_crate::models::User"), "User");
        assert_eq!(short_type_name("a::Wrapper<b::Inner>"), "Wrapper");
    }
}
