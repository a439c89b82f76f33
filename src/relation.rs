//! Relationship cascades, one implementation per relationship shape.

use std::collections::HashSet;
use std::marker::PhantomData;

use crate::entity::{ChildCollection, ColumnDescriptor, Entity, Getter};
use crate::error::{OrmError, Result};
use crate::registry::Registry;
use crate::schema::{ForeignKey, ForeignKeyAction, IndexDefinition, Schema};
use crate::session::Session;
use crate::value::Value;

/// Type-erased cascade behavior for one relationship of parent `E`.
pub(crate) trait Relation<E>: Send + Sync {
    /// Resolve parent columns the relationship reads.
    fn bind(&mut self, _columns: &[ColumnDescriptor<E>]) -> Result<()> {
        Ok(())
    }

    /// Write the related rows of `parent`, whose key is `key`.
    fn save(&self, session: &Session<'_>, parent: &mut E, key: &Value) -> Result<()>;

    /// Attach the related rows of `parent`.
    fn load(&self, session: &Session<'_>, parent: &mut E, key: &Value) -> Result<()>;

    /// Undo key write-backs of a rolled-back save on the related entities.
    fn reset_keys(&self, session: &Session<'_>, parent: &mut E) -> Result<()>;

    /// Remove rows depending on the given parent keys.
    fn delete(&self, session: &Session<'_>, parent_keys: &[Value]) -> Result<()>;

    /// Add the child's tables and the linking foreign key to `schema`.
    fn extend_schema(&self, walk: &mut SchemaWalk<'_>, parent_table: &str, parent_key: &str) -> Result<()>;
}

/// `Option<C>` child carrying `foreign_key` = parent key.
pub(crate) struct OneToOne<E, C> {
    foreign_key: String,
    slot: fn(&mut E) -> &mut Option<C>,
}

impl<E, C> OneToOne<E, C> {
    pub(crate) fn new(foreign_key: &str, slot: fn(&mut E) -> &mut Option<C>) -> Self {
        Self {
            foreign_key: foreign_key.to_string(),
            slot,
        }
    }
}

impl<E: Entity, C: Entity> Relation<E> for OneToOne<E, C> {
    fn save(&self, session: &Session<'_>, parent: &mut E, key: &Value) -> Result<()> {
        let descriptor = session.describe::<C>()?;
        let keep = match (self.slot)(parent).as_mut() {
            Some(child) => {
                descriptor.set_value(child, &self.foreign_key, key.clone())?;
                session.save(child)?;
                vec![descriptor.key_of(child)?]
            }
            None => Vec::new(),
        };
        session.prune_children(&descriptor, &self.foreign_key, key, &keep)?;
        Ok(())
    }

    fn load(&self, session: &Session<'_>, parent: &mut E, key: &Value) -> Result<()> {
        let mut found = session.fetch_by_column::<C>(&self.foreign_key, key, Some(1))?;
        *(self.slot)(parent) = found.pop();
        Ok(())
    }

    fn reset_keys(&self, session: &Session<'_>, parent: &mut E) -> Result<()> {
        match (self.slot)(parent).as_mut() {
            Some(child) => session.reset_assigned_keys(child),
            None => Ok(()),
        }
    }

    fn delete(&self, session: &Session<'_>, parent_keys: &[Value]) -> Result<()> {
        delete_dependents::<C>(session, &self.foreign_key, parent_keys)
    }

    fn extend_schema(&self, walk: &mut SchemaWalk<'_>, parent_table: &str, parent_key: &str) -> Result<()> {
        walk.add_dependent::<C>(&self.foreign_key, parent_table, parent_key)
    }
}

/// Child collection whose members carry `foreign_key` = parent key.
pub(crate) struct OneToMany<E, L> {
    foreign_key: String,
    slot: fn(&mut E) -> &mut L,
}

impl<E, L> OneToMany<E, L> {
    pub(crate) fn new(foreign_key: &str, slot: fn(&mut E) -> &mut L) -> Self {
        Self {
            foreign_key: foreign_key.to_string(),
            slot,
        }
    }
}

impl<E: Entity, L: ChildCollection> Relation<E> for OneToMany<E, L> {
    /// Upserts every current member, then deletes stored children that are
    /// no longer in the collection (all of them when the collection is absent).
    fn save(&self, session: &Session<'_>, parent: &mut E, key: &Value) -> Result<()> {
        let descriptor = session.describe::<L::Child>()?;
        let mut keep = Vec::new();
        if let Some(children) = (self.slot)(parent).children_mut() {
            keep.reserve(children.len());
            for child in children.iter_mut() {
                descriptor.set_value(child, &self.foreign_key, key.clone())?;
                session.save(child)?;
                keep.push(descriptor.key_of(child)?);
            }
        }
        session.prune_children(&descriptor, &self.foreign_key, key, &keep)?;
        Ok(())
    }

    fn load(&self, session: &Session<'_>, parent: &mut E, key: &Value) -> Result<()> {
        let children = session.fetch_by_column::<L::Child>(&self.foreign_key, key, None)?;
        (self.slot)(parent).replace(children);
        Ok(())
    }

    fn reset_keys(&self, session: &Session<'_>, parent: &mut E) -> Result<()> {
        if let Some(children) = (self.slot)(parent).children_mut() {
            for child in children.iter_mut() {
                session.reset_assigned_keys(child)?;
            }
        }
        Ok(())
    }

    fn delete(&self, session: &Session<'_>, parent_keys: &[Value]) -> Result<()> {
        delete_dependents::<L::Child>(session, &self.foreign_key, parent_keys)
    }

    fn extend_schema(&self, walk: &mut SchemaWalk<'_>, parent_table: &str, parent_key: &str) -> Result<()> {
        walk.add_dependent::<L::Child>(&self.foreign_key, parent_table, parent_key)
    }
}

/// `Option<C>` child referenced by the parent's own `parent_column`.
pub(crate) struct OneToOneOnParent<E, C> {
    parent_column: String,
    reference: Option<Getter<E>>,
    slot: fn(&mut E) -> &mut Option<C>,
}

impl<E, C> OneToOneOnParent<E, C> {
    pub(crate) fn new(parent_column: &str, slot: fn(&mut E) -> &mut Option<C>) -> Self {
        Self {
            parent_column: parent_column.to_string(),
            reference: None,
            slot,
        }
    }
}

impl<E: Entity, C: Entity> Relation<E> for OneToOneOnParent<E, C> {
    fn bind(&mut self, columns: &[ColumnDescriptor<E>]) -> Result<()> {
        let column = columns
            .iter()
            .find(|c| !c.is_ignored() && c.name() == self.parent_column)
            .ok_or_else(|| {
                OrmError::schema(format!(
                    "{}: relationship column `{}` is not a mapped column",
                    std::any::type_name::<E>(),
                    self.parent_column
                ))
            })?;
        self.reference = Some(column.getter());
        Ok(())
    }

    // The child carries no link to the parent, so writes do not cascade.
    fn save(&self, _session: &Session<'_>, _parent: &mut E, _key: &Value) -> Result<()> {
        Ok(())
    }

    fn load(&self, session: &Session<'_>, parent: &mut E, _key: &Value) -> Result<()> {
        let reference = self.reference.as_ref().ok_or_else(|| {
            OrmError::schema(format!("relationship column `{}` was never bound", self.parent_column))
        })?;
        let child_key = reference(&*parent)?;
        let child = if child_key.is_null() {
            None
        } else {
            let descriptor = session.describe::<C>()?;
            session
                .fetch_by_column::<C>(descriptor.primary_key().name(), &child_key, Some(1))?
                .pop()
        };
        *(self.slot)(parent) = child;
        Ok(())
    }

    fn reset_keys(&self, _session: &Session<'_>, _parent: &mut E) -> Result<()> {
        Ok(())
    }

    fn delete(&self, _session: &Session<'_>, _parent_keys: &[Value]) -> Result<()> {
        Ok(())
    }

    fn extend_schema(&self, walk: &mut SchemaWalk<'_>, parent_table: &str, _parent_key: &str) -> Result<()> {
        let descriptor = walk.registry.describe::<C>()?;
        walk.schema.push_table(
            crate::schema::TableDefinition::new(parent_table).foreign_key(ForeignKey {
                column: self.parent_column.clone(),
                foreign_table: descriptor.table_name().to_string(),
                foreign_column: descriptor.primary_key().name().to_string(),
                on_delete: ForeignKeyAction::NoAction,
                on_update: ForeignKeyAction::NoAction,
            }),
        );
        walk.add_entity::<C>()
    }
}

/// A base entity's relationship reached through a projection of the derived entity.
pub(crate) struct ProjectedRelation<P, B> {
    inner: Box<dyn Relation<B>>,
    project_mut: fn(&mut P) -> &mut B,
    _parent: PhantomData<fn(&P)>,
}

impl<P, B> ProjectedRelation<P, B> {
    pub(crate) fn new(inner: Box<dyn Relation<B>>, project_mut: fn(&mut P) -> &mut B) -> Self {
        Self {
            inner,
            project_mut,
            _parent: PhantomData,
        }
    }
}

impl<P: 'static, B: 'static> Relation<P> for ProjectedRelation<P, B> {
    fn save(&self, session: &Session<'_>, parent: &mut P, key: &Value) -> Result<()> {
        self.inner.save(session, (self.project_mut)(parent), key)
    }

    fn load(&self, session: &Session<'_>, parent: &mut P, key: &Value) -> Result<()> {
        self.inner.load(session, (self.project_mut)(parent), key)
    }

    fn reset_keys(&self, session: &Session<'_>, parent: &mut P) -> Result<()> {
        self.inner.reset_keys(session, (self.project_mut)(parent))
    }

    fn delete(&self, session: &Session<'_>, parent_keys: &[Value]) -> Result<()> {
        self.inner.delete(session, parent_keys)
    }

    fn extend_schema(&self, walk: &mut SchemaWalk<'_>, parent_table: &str, parent_key: &str) -> Result<()> {
        self.inner.extend_schema(walk, parent_table, parent_key)
    }
}

fn delete_dependents<C: Entity>(session: &Session<'_>, foreign_key: &str, parent_keys: &[Value]) -> Result<()> {
    let descriptor = session.describe::<C>()?;
    if descriptor.column(foreign_key).is_none() {
        return Err(OrmError::schema(format!(
            "{} has no column `{foreign_key}`",
            descriptor.entity_name()
        )));
    }
    let keys = session.keys_where(&descriptor, foreign_key, parent_keys)?;
    session.delete_keys(&descriptor, &keys)?;
    Ok(())
}

/// Collects the tables reachable from an entity through its relationships.
pub(crate) struct SchemaWalk<'a> {
    registry: &'a Registry,
    schema: &'a mut Schema,
    visited: HashSet<String>,
}

impl<'a> SchemaWalk<'a> {
    pub(crate) fn new(registry: &'a Registry, schema: &'a mut Schema) -> Self {
        Self {
            registry,
            schema,
            visited: HashSet::new(),
        }
    }

    pub(crate) fn add_entity<E: Entity>(&mut self) -> Result<()> {
        let descriptor = self.registry.describe::<E>()?;
        if !self.visited.insert(descriptor.table_name().to_string()) {
            return Ok(());
        }
        self.schema.push_table(descriptor.table_definition());
        for relationship in descriptor.relationships() {
            relationship.resolver.extend_schema(
                self,
                descriptor.table_name(),
                descriptor.primary_key().name(),
            )?;
        }
        Ok(())
    }

    fn add_dependent<C: Entity>(&mut self, foreign_key: &str, parent_table: &str, parent_key: &str) -> Result<()> {
        let descriptor = self.registry.describe::<C>()?;
        if descriptor.column(foreign_key).is_none() {
            return Err(OrmError::schema(format!(
                "{} has no column `{foreign_key}`",
                descriptor.entity_name()
            )));
        }
        self.add_entity::<C>()?;
        let child_table = descriptor.table_name();
        if let Some(table) = self.schema.table_mut(child_table) {
            let fk = ForeignKey {
                column: foreign_key.to_string(),
                foreign_table: parent_table.to_string(),
                foreign_column: parent_key.to_string(),
                on_delete: ForeignKeyAction::NoAction,
                on_update: ForeignKeyAction::NoAction,
            };
            if !table.foreign_keys.contains(&fk) {
                table.foreign_keys.push(fk);
            }
            let index = format!("idx_{child_table}_{foreign_key}");
            if !table.indexes.iter().any(|i| i.name == index) {
                table.indexes.push(IndexDefinition {
                    name: index,
                    columns: vec![foreign_key.to_string()],
                    unique: false,
                });
            }
        }
        Ok(())
    }
}
