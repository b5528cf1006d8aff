//! The database adapter: one storage connection plus reentrant transactions.
//!
//! Transactions nest.  Only the outermost `start_transaction` opens the connection and begins a physical transaction,
//! and only the matching outermost `end_transaction` finishes it.  If any level asked for a rollback, the whole thing
//! rolls back.  Closing the outermost level always clears the [TransactionCache] and closes the connection.
use std::path::PathBuf;
use std::sync::Arc;

use log::*;

use crate::cache::TransactionCache;
use crate::config::PersistenceUnit;
use crate::driver::StorageDriver;
use crate::entity::EntityType;
use crate::errors::{LookupError, QueryUsageError, Result};
use crate::registry::DescriptorRegistry;
use crate::sql;

/// A database attached under an alias.
#[derive(Clone, Debug, Eq, PartialEq)]
struct Attachment {
    path: PathBuf,
    alias: String,
}

pub struct DatabaseAdapter {
    unit: PersistenceUnit,
    registry: Arc<DescriptorRegistry>,
    /// The entities this unit maps.  Only their tables are created, and only they may be persisted.
    mapped: Vec<EntityType>,
    driver: Box<dyn StorageDriver>,
    nesting: usize,
    rollback_only: bool,
    cache: TransactionCache,
    attachments: Vec<Attachment>,
}

impl DatabaseAdapter {
    /// Wrap a driver, creating the schema of the `mapped` entities if the storage is new.
    pub fn new(
        unit: PersistenceUnit,
        registry: Arc<DescriptorRegistry>,
        mapped: Vec<EntityType>,
        driver: Box<dyn StorageDriver>,
    ) -> Result<DatabaseAdapter> {
        let mut adapter = DatabaseAdapter {
            cache: TransactionCache::new(registry.clone()),
            unit,
            registry,
            mapped,
            driver,
            nesting: 0,
            rollback_only: false,
            attachments: vec![],
        };

        adapter.driver.open()?;
        let prepared = adapter.prepare_schema();
        let closed = adapter.driver.close();
        prepared?;
        closed?;
        Ok(adapter)
    }

    fn prepare_schema(&mut self) -> Result<()> {
        let stored = self.driver.user_version()?;
        let wanted = self.unit.database_version().max(1);

        if stored == 0 {
            if self.unit.auto_create_database() {
                self.create_schema()?;
            }
            self.driver.set_user_version(wanted)?;
        } else if stored < wanted {
            // Migrations are not supported; new tables are still created.
            info!(
                "Upgrading {} from version {} to {}",
                self.unit.unit_name(),
                stored,
                wanted
            );
            if self.unit.auto_create_database() {
                self.create_schema()?;
            }
            self.driver.set_user_version(wanted)?;
        } else if stored > wanted {
            warn!(
                "Database for unit {} is at version {}, which is newer than the configured {}",
                self.unit.unit_name(),
                stored,
                wanted
            );
        }
        Ok(())
    }

    /// Run every CREATE TABLE for the mapped entities and their join tables, in one transaction.
    fn create_schema(&mut self) -> Result<()> {
        info!("Creating schema for unit {}", self.unit.unit_name());

        let mut statements = vec![];
        for t in self.mapped.iter() {
            let descriptor = self.registry.lookup(*t)?;
            let stmt = descriptor.create_table_statement()?.to_string();
            // Subclasses of a single-table hierarchy produce the same statement as their superclass.
            if !statements.contains(&stmt) {
                statements.push(stmt);
            }
            for jt in descriptor.join_tables() {
                let stmt = jt.create_table_statement().to_string();
                if !statements.contains(&stmt) {
                    statements.push(stmt);
                }
            }
        }

        self.driver.begin_transaction()?;
        for stmt in statements.iter() {
            if let Err(e) = self.driver.execute(stmt) {
                self.driver.rollback()?;
                return Err(e);
            }
        }
        self.driver.commit()
    }

    pub fn unit(&self) -> &PersistenceUnit {
        &self.unit
    }

    pub fn registry(&self) -> &Arc<DescriptorRegistry> {
        &self.registry
    }

    pub fn maps(&self, entity_type: EntityType) -> bool {
        self.mapped.contains(&entity_type)
    }

    pub fn require_mapped(&self, entity_type: EntityType) -> Result<(), LookupError> {
        if self.maps(entity_type) {
            Ok(())
        } else {
            Err(LookupError::NotInUnit {
                entity: entity_type.name().to_string(),
                unit: self.unit.unit_name().to_string(),
            })
        }
    }

    pub fn nesting(&self) -> usize {
        self.nesting
    }

    pub fn in_transaction(&self) -> bool {
        self.nesting > 0
    }

    pub fn cache(&self) -> &TransactionCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut TransactionCache {
        &mut self.cache
    }

    pub fn driver_mut(&mut self) -> &mut dyn StorageDriver {
        &mut *self.driver
    }

    pub fn start_transaction(&mut self) -> Result<()> {
        if self.nesting == 0 {
            self.rollback_only = false;
            if let Err(e) = self.begin_outermost() {
                let _ = self.driver.close();
                return Err(e);
            }
        }
        self.nesting += 1;
        trace!("Transaction nesting is now {}", self.nesting);
        Ok(())
    }

    fn begin_outermost(&mut self) -> Result<()> {
        self.driver.open()?;
        for a in self.attachments.iter() {
            self.driver.execute(&attach_statement(a))?;
        }
        if self.unit.use_transaction() {
            self.driver.begin_transaction()?;
        }
        Ok(())
    }

    /// End one level of transaction.
    ///
    /// `commit = false` at any level makes the outermost level roll back.
    pub fn end_transaction(&mut self, commit: bool) -> Result<()> {
        if self.nesting == 0 {
            return Err(QueryUsageError::NoActiveTransaction.into());
        }

        if !commit {
            self.rollback_only = true;
        }
        self.nesting -= 1;
        trace!("Transaction nesting is now {}", self.nesting);
        if self.nesting > 0 {
            return Ok(());
        }

        let finished = if !self.unit.use_transaction() {
            Ok(())
        } else if self.rollback_only {
            debug!("Rolling back transaction on {}", self.unit.unit_name());
            self.driver.rollback()
        } else {
            self.driver.commit()
        };

        self.rollback_only = false;
        self.cache.clear();
        let closed = self.driver.close();
        finished?;
        closed
    }

    /// Record a database to attach under `alias` every time the connection opens.
    pub fn attach(&mut self, path: impl Into<PathBuf>, alias: &str) -> Result<()> {
        if self.in_transaction() {
            return Err(QueryUsageError::AttachInTransaction.into());
        }
        if !sql::is_valid_identifier(alias) {
            return Err(QueryUsageError::InvalidAlias {
                alias: alias.to_string(),
            }
            .into());
        }

        let attachment = Attachment {
            path: path.into(),
            alias: alias.to_string(),
        };
        self.attachments.retain(|a| a.alias != attachment.alias);
        info!(
            "Attaching {} as {}",
            attachment.path.display(),
            attachment.alias
        );
        self.attachments.push(attachment);
        Ok(())
    }

    /// Stop attaching the database recorded under `alias`.  Returns whether there was one.
    pub fn detach(&mut self, alias: &str) -> Result<bool> {
        if self.in_transaction() {
            return Err(QueryUsageError::AttachInTransaction.into());
        }
        let before = self.attachments.len();
        self.attachments.retain(|a| a.alias != alias);
        Ok(self.attachments.len() != before)
    }

    /// Abandon any open transaction and close the connection.
    pub fn close(&mut self) -> Result<()> {
        if self.nesting > 0 {
            warn!(
                "Closing {} with {} open transaction levels",
                self.unit.unit_name(),
                self.nesting
            );
            if self.unit.use_transaction() {
                // The connection may already be gone, in which case there is nothing to roll back.
                let _ = self.driver.rollback();
            }
        }
        self.nesting = 0;
        self.rollback_only = false;
        self.cache.clear();
        self.driver.close()
    }

    /// Close, and forget any attachments.
    pub fn release(&mut self) -> Result<()> {
        self.attachments.clear();
        self.close()
    }
}

impl Drop for DatabaseAdapter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Error closing database adapter: {}", e);
        }
    }
}

fn attach_statement(a: &Attachment) -> String {
    let path = a.path.to_string_lossy().replace('\'', "''");
    format!("ATTACH DATABASE '{}' AS {}", path, a.alias)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::driver::SqliteDriver;
    use crate::entity::{Entity, MappedType};
    use crate::errors::ConversionError;
    use crate::metadata::{EntityMetadata, FieldMetadata};
    use crate::value::{FieldValue, PersistentValue, StorageValue};

    #[derive(Default, Debug)]
    struct Counter {
        id: i64,
    }

    impl Entity for Counter {
        fn metadata() -> EntityMetadata {
            EntityMetadata::entity::<Counter>()
                .table_name("counters")
                .field(FieldMetadata::new::<i64>("id").primary_key())
        }

        fn field_value(&self, field: &str) -> Option<FieldValue> {
            (field == "id").then(|| self.id.to_field_value())
        }

        fn set_field_value(&mut self, field: &str, value: FieldValue) -> Result<(), ConversionError> {
            match field {
                "id" => self.id = PersistentValue::from_field_value(value)?,
                _ => {
                    return Err(ConversionError::UnknownField {
                        entity: "Counter",
                        field: field.to_string(),
                    })
                }
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct Gauge;

    impl Entity for Gauge {
        fn metadata() -> EntityMetadata {
            EntityMetadata::entity::<Gauge>()
                .table_name("gauges")
                .field(FieldMetadata::new::<i64>("id").primary_key())
        }

        fn field_value(&self, _field: &str) -> Option<FieldValue> {
            None
        }

        fn set_field_value(&mut self, field: &str, _value: FieldValue) -> Result<(), ConversionError> {
            Err(ConversionError::UnknownField {
                entity: "Gauge",
                field: field.to_string(),
            })
        }
    }

    fn unit() -> PersistenceUnit {
        let mut unit = PersistenceUnit::new("test", "test");
        unit.set_database_version(2);
        unit
    }

    fn adapter(dir: &tempfile::TempDir, unit: PersistenceUnit) -> DatabaseAdapter {
        let registry = DescriptorRegistry::build(&[MappedType::of::<Counter>()]).unwrap();
        let driver = SqliteDriver::new(dir.path().join("test.db"));
        DatabaseAdapter::new(unit, registry, vec![EntityType::of::<Counter>()], Box::new(driver)).unwrap()
    }

    fn count(adapter: &mut DatabaseAdapter) -> i64 {
        adapter.start_transaction().unwrap();
        let mut c = adapter
            .driver_mut()
            .raw_query("SELECT count(*) FROM counters")
            .unwrap();
        c.move_to_first();
        let n = c.get_integer(0).unwrap().unwrap();
        adapter.end_transaction(true).unwrap();
        n
    }

    fn insert(adapter: &mut DatabaseAdapter, id: i64) {
        let mut values = sql::ContentValues::new();
        values.put("id", StorageValue::Integer(id));
        adapter.driver_mut().insert("counters", &values).unwrap();
    }

    #[test]
    fn test_creates_schema_and_version() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut a = adapter(&dir, unit());
        assert_eq!(count(&mut a), 0);
        assert!(!a.driver_mut().is_open());

        let mut driver = SqliteDriver::new(dir.path().join("test.db"));
        assert_eq!(driver.user_version().unwrap(), 2);
    }

    #[test]
    fn test_creates_only_mapped_tables() {
        let dir = tempfile::TempDir::new().unwrap();
        let registry =
            DescriptorRegistry::build(&[MappedType::of::<Counter>(), MappedType::of::<Gauge>()]).unwrap();
        let driver = SqliteDriver::new(dir.path().join("test.db"));
        let mut a =
            DatabaseAdapter::new(unit(), registry, vec![EntityType::of::<Counter>()], Box::new(driver)).unwrap();

        assert!(a.maps(EntityType::of::<Counter>()));
        assert!(a.require_mapped(EntityType::of::<Counter>()).is_ok());
        assert!(matches!(
            a.require_mapped(EntityType::of::<Gauge>()),
            Err(LookupError::NotInUnit { .. })
        ));

        a.start_transaction().unwrap();
        let mut c = a
            .driver_mut()
            .raw_query("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        let mut tables = vec![];
        while c.move_to_next() {
            tables.push(c.get_text(0).unwrap().unwrap());
        }
        drop(c);
        a.end_transaction(true).unwrap();
        assert_eq!(tables, vec!["counters".to_string()]);
    }

    #[test]
    fn test_no_autocreate() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut u = unit();
        u.set_auto_create_database(false);
        let mut a = adapter(&dir, u);
        a.start_transaction().unwrap();
        assert!(a
            .driver_mut()
            .raw_query("SELECT count(*) FROM counters")
            .is_err());
        a.end_transaction(false).unwrap();
    }

    #[test]
    fn test_nesting() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut a = adapter(&dir, unit());

        a.start_transaction().unwrap();
        a.start_transaction().unwrap();
        assert_eq!(a.nesting(), 2);
        insert(&mut a, 1);
        let cached = Rc::new(RefCell::new(Counter { id: 1 }));
        a.cache_mut().put(&cached).unwrap();

        a.end_transaction(true).unwrap();
        // Still open: the inner end only unwinds one level.
        assert!(a.in_transaction());
        assert_eq!(a.cache().len(), 1);

        a.end_transaction(true).unwrap();
        assert!(!a.in_transaction());
        assert!(a.cache().is_empty());
        assert_eq!(count(&mut a), 1);
    }

    #[test]
    fn test_inner_rollback_wins() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut a = adapter(&dir, unit());

        a.start_transaction().unwrap();
        insert(&mut a, 1);
        a.start_transaction().unwrap();
        insert(&mut a, 2);
        a.end_transaction(false).unwrap();
        a.end_transaction(true).unwrap();
        assert_eq!(count(&mut a), 0);

        // The flag does not leak into the next transaction.
        a.start_transaction().unwrap();
        insert(&mut a, 3);
        a.end_transaction(true).unwrap();
        assert_eq!(count(&mut a), 1);
    }

    #[test]
    fn test_unbalanced_end() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut a = adapter(&dir, unit());
        assert!(matches!(
            a.end_transaction(true),
            Err(crate::Error::QueryUsage(QueryUsageError::NoActiveTransaction))
        ));
    }

    #[test]
    fn test_close_resets() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut a = adapter(&dir, unit());
        a.start_transaction().unwrap();
        a.start_transaction().unwrap();
        insert(&mut a, 1);
        a.close().unwrap();
        assert_eq!(a.nesting(), 0);
        assert_eq!(count(&mut a), 0);
    }

    #[test]
    fn test_attach() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut a = adapter(&dir, unit());
        let other = dir.path().join("other.db");
        a.attach(&other, "other").unwrap();
        assert!(a.attach(&other, "bad alias").is_err());

        a.start_transaction().unwrap();
        assert!(a.attach(&other, "again").is_err());
        a.driver_mut()
            .execute("CREATE TABLE IF NOT EXISTS other.extra (x INTEGER)")
            .unwrap();
        a.end_transaction(true).unwrap();

        // Reattached on the next open.
        a.start_transaction().unwrap();
        assert!(a
            .driver_mut()
            .raw_query("SELECT x FROM other.extra")
            .is_ok());
        a.end_transaction(true).unwrap();

        assert!(a.detach("other").unwrap());
        assert!(!a.detach("other").unwrap());
    }
}
