//! Conversion between entity instances and rows. Pure; never touches storage.

use crate::entity::{Entity, EntityDescriptor};
use crate::error::Result;
use crate::value::Row;

/// Key and persisted columns of `entity`, in descriptor order.
pub fn encode<E: Entity>(entity: &E, descriptor: &EntityDescriptor<E>) -> Result<Row> {
    let mut row = Row::new();
    for column in descriptor.persisted_columns() {
        row.insert(column.name(), column.get(entity)?);
    }
    Ok(row)
}

/// Build an entity from a row. Columns missing from the row keep the field's
/// default; row columns unknown to the descriptor are skipped.
pub fn decode<E: Entity>(row: Row, descriptor: &EntityDescriptor<E>) -> Result<E> {
    let mut entity = E::default();
    for (name, value) in row {
        if let Some(column) = descriptor.column(&name) {
            column.set(&mut entity, value)?;
        }
    }
    Ok(entity)
}
