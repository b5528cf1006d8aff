//! The persistence manager: CRUD and queries on entities.
//!
//! Every operation runs inside a transaction on the adapter.  If the caller already opened one, the operation joins it;
//! otherwise the operation's own transaction commits on success and rolls back on error.  Rows read inside one
//! transaction go through the identity map, so reading the same row twice yields the same [Managed] instance.
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use log::*;

use crate::adapter::DatabaseAdapter;
use crate::descriptor::{DescriptorKind, EntityDescriptor, Operation};
use crate::driver::RowCursor;
use crate::entity::{Entity, Managed};
use crate::errors::{QueryUsageError, Result};
use crate::field::FieldDescriptor;
use crate::registry::DescriptorRegistry;
use crate::sql::{self, ContentValues};
use crate::value::{FieldValue, PersistentValue, StorageValue};

pub struct PersistenceManager {
    registry: Arc<DescriptorRegistry>,
    adapter: DatabaseAdapter,
}

impl PersistenceManager {
    pub fn new(adapter: DatabaseAdapter) -> PersistenceManager {
        PersistenceManager {
            registry: adapter.registry().clone(),
            adapter,
        }
    }

    pub fn registry(&self) -> &Arc<DescriptorRegistry> {
        &self.registry
    }

    pub fn adapter(&self) -> &DatabaseAdapter {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut DatabaseAdapter {
        &mut self.adapter
    }

    pub fn start_transaction(&mut self) -> Result<()> {
        self.adapter.start_transaction()
    }

    pub fn end_transaction(&mut self, commit: bool) -> Result<()> {
        self.adapter.end_transaction(commit)
    }

    /// Run `work` in a transaction, committing only if it succeeds.
    pub fn in_transaction<R>(&mut self, work: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        self.adapter.start_transaction()?;
        let result = work(self);
        let ended = self.adapter.end_transaction(result.is_ok());
        let value = result?;
        ended?;
        Ok(value)
    }

    /// Insert an entity.
    ///
    /// If the primary key is an integer and sqlite assigned a different value, the key of `entity` is updated.
    pub fn persist<T: Entity>(&mut self, entity: &mut T) -> Result<()> {
        let registry = self.registry.clone();
        let descriptor = self.descriptor::<T>(&registry)?;
        let values = sql::insert_values(entity, descriptor)?;

        // The key is written back before the commit, so a key the field cannot hold undoes the insert.
        let row_id = self.in_transaction(|m| {
            let row_id = m
                .adapter
                .driver_mut()
                .insert(descriptor.table_name(), &values)?;
            let pk = descriptor.primary_key()?;
            if pk.declared_type().is_integer() {
                let assigned = StorageValue::Integer(row_id);
                if pk.read(entity)? != assigned {
                    pk.write(entity, assigned, &*registry)?;
                }
            }
            Ok(row_id)
        })?;
        debug!("Persisted {} with rowid {}", descriptor.entity_type(), row_id);
        Ok(())
    }

    /// Update the row of an entity from its updatable fields.  Returns the number of rows changed.
    pub fn merge<T: Entity>(&mut self, entity: &T) -> Result<usize> {
        let registry = self.registry.clone();
        let descriptor = self.descriptor::<T>(&registry)?;
        let where_clause = sql::primary_key_where_clause(entity, descriptor)?;
        let values = sql::content_values(entity, descriptor, Operation::Update)?;

        self.in_transaction(|m| {
            m.adapter
                .driver_mut()
                .update(descriptor.table_name(), &values, &where_clause)
        })
    }

    /// Delete the row of an entity.  Returns the number of rows deleted.
    pub fn remove<T: Entity>(&mut self, entity: &T) -> Result<usize> {
        let registry = self.registry.clone();
        let descriptor = self.descriptor::<T>(&registry)?;
        let where_clause = sql::primary_key_where_clause(entity, descriptor)?;

        self.in_transaction(|m| {
            m.adapter
                .driver_mut()
                .delete(descriptor.table_name(), &where_clause)
        })
    }

    /// Find an entity by primary key.
    pub fn find<T: Entity>(&mut self, key: impl PersistentValue) -> Result<Option<Managed<T>>> {
        let registry = self.registry.clone();
        let descriptor = self.descriptor::<T>(&registry)?;
        let key = descriptor.primary_key()?.to_storage(key.to_field_value())?;
        let where_clause = sql::key_where_clause(descriptor, &key)?;
        self.query_single::<T>(&where_clause)
    }

    /// The single entity matching `where_clause`, if any.
    pub fn query_single<T: Entity>(&mut self, where_clause: &str) -> Result<Option<Managed<T>>> {
        if where_clause.trim().is_empty() {
            return Err(QueryUsageError::EmptyWhereClause {
                entity: T::entity_type().name().to_string(),
            }
            .into());
        }
        single(self.query::<T>(Some(where_clause))?)
    }

    pub fn find_all<T: Entity>(&mut self) -> Result<Vec<Managed<T>>> {
        self.query::<T>(None)
    }

    /// Every entity matching `where_clause`, ordered by primary key.  An empty clause matches everything.
    pub fn query_list<T: Entity>(&mut self, where_clause: &str) -> Result<Vec<Managed<T>>> {
        self.query::<T>(Some(where_clause))
    }

    fn query<T: Entity>(&mut self, where_clause: Option<&str>) -> Result<Vec<Managed<T>>> {
        let registry = self.registry.clone();
        let descriptor = self.descriptor::<T>(&registry)?;
        let columns = descriptor.columns_for_operation(Operation::Query)?;
        let order_by = descriptor.primary_key()?.column_name();

        self.in_transaction(|m| {
            let cursor = m.adapter.driver_mut().query(
                descriptor.table_name(),
                &columns,
                where_clause,
                Some(order_by),
            )?;
            m.load_list::<T>(cursor)
        })
    }

    /// Materialize the rows of a hand-written query.  Columns without a matching field are ignored.
    pub fn raw_query_list<T: Entity>(&mut self, sql: &str) -> Result<Vec<Managed<T>>> {
        self.descriptor::<T>(&self.registry)?;
        self.in_transaction(|m| {
            let cursor = m.adapter.driver_mut().raw_query(sql)?;
            m.load_list::<T>(cursor)
        })
    }

    pub fn raw_query_single<T: Entity>(&mut self, sql: &str) -> Result<Option<Managed<T>>> {
        single(self.raw_query_list::<T>(sql)?)
    }

    /// Run a query and return its rows untouched.
    pub fn raw_query(&mut self, sql: &str) -> Result<Box<dyn RowCursor>> {
        self.in_transaction(|m| m.adapter.driver_mut().raw_query(sql))
    }

    /// Run statements which return no rows.
    pub fn exec_sql(&mut self, sql: &str) -> Result<()> {
        self.in_transaction(|m| m.adapter.driver_mut().execute(sql))
    }

    pub fn attach(&mut self, path: impl Into<PathBuf>, alias: &str) -> Result<()> {
        self.adapter.attach(path, alias)
    }

    pub fn detach(&mut self, alias: &str) -> Result<bool> {
        self.adapter.detach(alias)
    }

    /// The entities linked to `owner_key` through one of `T`'s join tables.
    pub fn query_join_table<T: Entity>(
        &mut self,
        join_table: &str,
        owner_key: i64,
    ) -> Result<Vec<Managed<T>>> {
        let registry = self.registry.clone();
        let descriptor = self.descriptor::<T>(&registry)?;
        let sql = sql::join_table_query(descriptor, join_table, &StorageValue::Integer(owner_key))?;
        self.in_transaction(|m| {
            let cursor = m.adapter.driver_mut().raw_query(&sql)?;
            m.load_list::<T>(cursor)
        })
    }

    /// Record a link from `owner_key` to `target` in one of `T`'s join tables.
    pub fn link<T: Entity>(&mut self, join_table: &str, owner_key: i64, target: &T) -> Result<()> {
        let registry = self.registry.clone();
        let descriptor = self.descriptor::<T>(&registry)?;
        let jt = descriptor.join_table(join_table)?;
        let target_key = descriptor.primary_key()?.read(target)?;

        let mut values = ContentValues::new();
        values.put(jt.join_column(), StorageValue::Integer(owner_key));
        values.put(jt.inverse_join_column(), target_key);
        self.in_transaction(|m| m.adapter.driver_mut().insert(jt.name(), &values))?;
        Ok(())
    }

    /// Remove a link recorded with [PersistenceManager::link].  Returns whether there was one.
    pub fn unlink<T: Entity>(&mut self, join_table: &str, owner_key: i64, target: &T) -> Result<bool> {
        let registry = self.registry.clone();
        let descriptor = self.descriptor::<T>(&registry)?;
        let jt = descriptor.join_table(join_table)?;
        let target_key = descriptor.primary_key()?.read(target)?;
        if target_key.is_null() {
            return Err(QueryUsageError::NullPrimaryKey {
                entity: descriptor.entity_type().name().to_string(),
            }
            .into());
        }

        let where_clause = format!(
            "{} = {} AND {} = {}",
            jt.join_column(),
            owner_key,
            jt.inverse_join_column(),
            target_key.to_sql_literal()
        );
        let deleted =
            self.in_transaction(|m| m.adapter.driver_mut().delete(jt.name(), &where_clause))?;
        Ok(deleted > 0)
    }

    /// The instance the current transaction holds for a primary key, without touching storage.
    pub fn cached<T: Entity>(&self, key: impl PersistentValue) -> Result<Option<Managed<T>>> {
        let descriptor = self.descriptor::<T>(&self.registry)?;
        let key = descriptor.primary_key()?.to_storage(key.to_field_value())?;
        Ok(self.adapter.cache().get::<T>(&key))
    }

    /// The first instance the current transaction holds whose `field` equals `value`.
    pub fn cached_by_field<T: Entity>(
        &self,
        field: &str,
        value: FieldValue,
    ) -> Result<Option<Managed<T>>> {
        self.adapter.require_mapped(T::entity_type())?;
        self.adapter.cache().get_by_field::<T>(field, value)
    }

    /// Abandon any open transaction and close the connection.
    pub fn close(&mut self) -> Result<()> {
        self.adapter.close()
    }

    /// The descriptor of `T`, provided the unit maps it.
    fn descriptor<'r, T: Entity>(&self, registry: &'r DescriptorRegistry) -> Result<&'r EntityDescriptor> {
        self.adapter.require_mapped(T::entity_type())?;
        Ok(registry.lookup_type::<T>()?)
    }

    fn load_list<T: Entity>(&mut self, mut cursor: Box<dyn RowCursor>) -> Result<Vec<Managed<T>>> {
        let registry = self.registry.clone();
        let descriptor = registry.lookup_type::<T>()?;
        let pk = descriptor.primary_key()?;
        let pk_index = cursor.column_index(pk.column_name());
        let superclass = matches!(descriptor.kind(), DescriptorKind::SingleTableSuperclass { .. });

        let bindings = cursor
            .column_names()
            .iter()
            .enumerate()
            .filter_map(|(i, c)| descriptor.field_for_column(c).map(|f| (i, f.clone())))
            .collect::<Vec<_>>();
        let bindings = if superclass {
            // Columns merged in from subclasses have nowhere to go on a superclass instance.
            let probe = T::default();
            bindings
                .into_iter()
                .filter(|(_, f)| f.is_carried_by(&probe))
                .collect()
        } else {
            bindings
        };

        let mut out = Vec::with_capacity(cursor.count());
        if !cursor.move_to_first() {
            return Ok(out);
        }
        while !cursor.is_after_last() {
            out.push(self.bind_row::<T>(&*cursor, pk, pk_index, &bindings)?);
            cursor.move_to_next();
        }
        Ok(out)
    }

    /// Turn the current row into an entity, or hand back the instance already cached for its key.
    fn bind_row<T: Entity>(
        &mut self,
        cursor: &dyn RowCursor,
        pk: &FieldDescriptor,
        pk_index: Option<usize>,
        bindings: &[(usize, Arc<FieldDescriptor>)],
    ) -> Result<Managed<T>> {
        let types = &*self.registry;

        let key = match pk_index {
            Some(i) => {
                let raw = cursor.get_value(i)?.clone();
                pk.to_storage(pk.to_native(raw, types)?)?
            }
            None => StorageValue::Null,
        };
        if !key.is_null() {
            if let Some(cached) = self.adapter.cache().get::<T>(&key) {
                return Ok(cached);
            }
        }

        let mut entity = T::default();
        for (i, field) in bindings.iter() {
            let value = cursor.get_value(*i)?;
            if !value.is_null() {
                field.write(&mut entity, value.clone(), types)?;
            }
        }

        let managed = Rc::new(RefCell::new(entity));
        if !key.is_null() {
            self.adapter.cache_mut().put(&managed)?;
        }
        Ok(managed)
    }
}

fn single<T: Entity>(mut list: Vec<Managed<T>>) -> Result<Option<Managed<T>>> {
    if list.len() > 1 {
        return Err(QueryUsageError::MultipleResults {
            entity: T::entity_type().name().to_string(),
            count: list.len(),
        }
        .into());
    }
    Ok(list.pop())
}
