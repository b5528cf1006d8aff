//! The transaction-scoped identity map.
//!
//! While a transaction is open, every entity materialized from a row is put here, keyed by its type and primary key.
//! A later read of the same row hands back the same [Managed] instance instead of building a second one.  The cache is
//! never consulted to skip a read; it only deduplicates what reads produce.
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use log::*;

use crate::entity::{Entity, Managed};
use crate::errors::{QueryUsageError, Result};
use crate::registry::DescriptorRegistry;
use crate::value::{FieldValue, StorageValue};

#[derive(Default)]
struct Bucket {
    /// Primary key, rendered as text, to the position of the instance in `entries`.
    index: HashMap<String, usize>,
    entries: Vec<Box<dyn Any>>,
}

pub struct TransactionCache {
    registry: Arc<DescriptorRegistry>,
    buckets: HashMap<TypeId, Bucket>,
}

impl TransactionCache {
    pub fn new(registry: Arc<DescriptorRegistry>) -> TransactionCache {
        TransactionCache {
            registry,
            buckets: Default::default(),
        }
    }

    /// Cache an instance under its primary key, replacing any instance already cached for that key.
    pub fn put<T: Entity>(&mut self, entity: &Managed<T>) -> Result<()> {
        let descriptor = self.registry.lookup_type::<T>()?;
        let key = descriptor.primary_key()?.read(&*entity.borrow())?;
        if key.is_null() {
            return Err(QueryUsageError::NullPrimaryKey {
                entity: T::entity_type().name().to_string(),
            }
            .into());
        }

        let bucket = self.buckets.entry(TypeId::of::<T>()).or_default();
        let value: Box<dyn Any> = Box::new(entity.clone());
        match bucket.index.get(&key.to_text()) {
            Some(&i) => bucket.entries[i] = value,
            None => {
                bucket.index.insert(key.to_text(), bucket.entries.len());
                bucket.entries.push(value);
            }
        }
        Ok(())
    }

    /// The instance cached for a primary key.
    pub fn get<T: Entity>(&self, key: &StorageValue) -> Option<Managed<T>> {
        let bucket = self.buckets.get(&TypeId::of::<T>())?;
        let i = *bucket.index.get(&key.to_text())?;
        let found = bucket.entries[i].downcast_ref::<Managed<T>>().cloned();
        if found.is_some() {
            trace!("Cache hit for {} {}", T::entity_type(), key.to_text());
        }
        found
    }

    /// The first cached instance whose `field` converts to the same text as `value`.  Instances holding null in
    /// `field` never match.
    pub fn get_by_field<T: Entity>(
        &self,
        field: &str,
        value: FieldValue,
    ) -> Result<Option<Managed<T>>> {
        let bucket = match self.buckets.get(&TypeId::of::<T>()) {
            Some(b) if !b.entries.is_empty() => b,
            _ => return Ok(None),
        };

        let field = self.registry.lookup_type::<T>()?.field(field)?;
        let wanted = field.to_storage(value)?.to_text();
        for entry in bucket.entries.iter() {
            if let Some(instance) = entry.downcast_ref::<Managed<T>>() {
                let stored = field.read(&*instance.borrow())?;
                if !stored.is_null() && stored.to_text() == wanted {
                    return Ok(Some(instance.clone()));
                }
            }
        }
        Ok(None)
    }

    pub fn clear(&mut self) {
        if !self.buckets.is_empty() {
            trace!("Clearing {} cached entities", self.len());
        }
        self.buckets.clear();
    }

    /// Number of cached instances across all types.
    pub fn len(&self) -> usize {
        self.buckets.values().map(|b| b.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for TransactionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCache")
            .field("len", &self.len())
            .finish()
    }
}
