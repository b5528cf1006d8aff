//! SQL text synthesis from descriptors.
//!
//! Statements which depend on the shape of a particular storage driver call (INSERT, UPDATE, SELECT) are rendered by
//! the driver itself.  What lives here is the mapper's side of things: DDL, column lists, where clauses for primary
//! keys, and gathering an entity's values for a write.
use std::sync::Arc;

use itertools::Itertools;
use lazy_static::lazy_static;
use smallvec::SmallVec;

use crate::descriptor::{DescriptorKind, EntityDescriptor, Operation};
use crate::entity::Entity;
use crate::errors::{MappingError, QueryUsageError, Result};
use crate::field::FieldDescriptor;
use crate::value::StorageValue;

lazy_static! {
    static ref IDENTIFIER: regex::Regex =
        regex::Regex::new("^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex should compile");
}

/// Whether `ident` can be spliced into SQL text as a table or column name.
pub fn is_valid_identifier(ident: &str) -> bool {
    IDENTIFIER.is_match(ident)
}

/// Ordered column to value pairs, one per column being written.
///
/// Writes happen once per record, so this is a small vector map rather than a hash map.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContentValues {
    entries: SmallVec<[(String, StorageValue); 16]>,
}

impl ContentValues {
    pub fn new() -> ContentValues {
        Default::default()
    }

    /// Set a column, replacing any previous value for it.
    pub fn put(&mut self, column: impl Into<String>, value: StorageValue) {
        let column = column.into();
        match self.entries.iter_mut().find(|(c, _)| *c == column) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&StorageValue> {
        self.entries
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v)
    }

    pub fn remove(&mut self, column: &str) -> Option<StorageValue> {
        let index = self.entries.iter().position(|(c, _)| c == column)?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StorageValue)> {
        self.entries.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(c, _)| c.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `<name> <TYPE>[ PRIMARY KEY][ AUTOINCREMENT][ NOT NULL][ UNIQUE]`.
pub fn column_definition(entity: &str, field: &FieldDescriptor) -> Result<String, MappingError> {
    let storage_type = field
        .storage_type()
        .ok_or_else(|| MappingError::NoStorageType {
            entity: entity.to_string(),
            field: field.field_name().to_string(),
        })?;

    let mut def = format!("{} {}", field.column_name(), storage_type);
    if field.is_primary_key() {
        def.push_str(" PRIMARY KEY");
    }
    if field.is_autoincrement() {
        def.push_str(" AUTOINCREMENT");
    }
    if !field.is_primary_key() {
        if !field.is_nullable() {
            def.push_str(" NOT NULL");
        }
        if field.is_unique() {
            def.push_str(" UNIQUE");
        }
    }
    Ok(def)
}

pub fn create_table_statement(
    entity: &str,
    table: &str,
    fields: &[Arc<FieldDescriptor>],
) -> Result<String, MappingError> {
    let defs = fields
        .iter()
        .map(|f| column_definition(entity, f))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        table,
        defs.join(",")
    ))
}

pub fn columns_comma_separated(fields: &[Arc<FieldDescriptor>]) -> String {
    fields.iter().map(|f| f.column_name()).join(", ")
}

/// `<pk column> = <literal>` for a key value.
pub fn key_where_clause(descriptor: &EntityDescriptor, key: &StorageValue) -> Result<String> {
    if key.is_null() {
        return Err(QueryUsageError::NullPrimaryKey {
            entity: descriptor.entity_type().name().to_string(),
        }
        .into());
    }
    Ok(format!(
        "{} = {}",
        descriptor.primary_key()?.column_name(),
        key.to_sql_literal()
    ))
}

/// The where clause selecting the row of an entity.
pub fn primary_key_where_clause<E: Entity>(
    entity: &E,
    descriptor: &EntityDescriptor,
) -> Result<String> {
    let key = descriptor.primary_key()?.read(entity)?;
    key_where_clause(descriptor, &key)
}

/// Gather the values of the columns written by `operation`.
pub fn content_values<E: Entity>(
    entity: &E,
    descriptor: &EntityDescriptor,
    operation: Operation,
) -> Result<ContentValues> {
    let superclass = matches!(descriptor.kind(), DescriptorKind::SingleTableSuperclass { .. });
    let mut values = ContentValues::new();
    for field in descriptor.fields_for(operation)?.iter() {
        if superclass && !field.is_carried_by(entity) {
            continue;
        }
        values.put(field.column_name(), field.read(entity)?);
    }
    Ok(values)
}

/// Values for an INSERT.
///
/// An autoincrement key which is still unset (null or 0) is left out so that sqlite assigns one.
pub fn insert_values<E: Entity>(entity: &E, descriptor: &EntityDescriptor) -> Result<ContentValues> {
    let mut values = content_values(entity, descriptor, Operation::Insert)?;
    let pk = descriptor.primary_key()?;
    if pk.is_autoincrement() {
        if let Some(StorageValue::Null | StorageValue::Integer(0)) = values.get(pk.column_name()) {
            values.remove(pk.column_name());
        }
    }
    Ok(values)
}

/// The rows of `descriptor`'s table linked to `owner_key` through a join table.
pub fn join_table_query(
    descriptor: &EntityDescriptor,
    join_table: &str,
    owner_key: &StorageValue,
) -> Result<String> {
    let jt = descriptor.join_table(join_table)?;
    if owner_key.is_null() {
        return Err(QueryUsageError::NullPrimaryKey {
            entity: descriptor.entity_type().name().to_string(),
        }
        .into());
    }

    let columns = descriptor
        .fields_for(Operation::Query)?
        .iter()
        .map(|f| format!("t.{c} AS {c}", c = f.column_name()))
        .join(", ");

    Ok(format!(
        "SELECT {} FROM {} AS t INNER JOIN {} AS jt ON jt.{} = t.{} AND jt.{} = {} ORDER BY t.{}",
        columns,
        descriptor.table_name(),
        jt.name(),
        jt.inverse_join_column(),
        descriptor.primary_key()?.column_name(),
        jt.join_column(),
        owner_key.to_sql_literal(),
        descriptor.primary_key()?.column_name(),
    ))
}
