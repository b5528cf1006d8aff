//! The persistence context ties configuration, a type catalog and storage together.
//!
//! Rust has no way to find a type by name at runtime, so the application hands over a catalog of every type it may
//! persist.  Each unit's `mapped_entities` names are resolved against that catalog once, up front.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::*;

use crate::adapter::DatabaseAdapter;
use crate::config::{PersistenceProperties, PersistenceUnit};
use crate::driver::SqliteDriver;
use crate::entity::{EntityType, MappedType};
use crate::errors::{ConfigError, Result};
use crate::manager::PersistenceManager;
use crate::registry::DescriptorRegistry;

pub struct PersistenceContext {
    properties: PersistenceProperties,
    registry: Arc<DescriptorRegistry>,
    /// The resolved mapped entities of each unit, by unit name.
    unit_types: HashMap<String, Vec<EntityType>>,
    database_dir: PathBuf,
}

fn resolve_unit(unit: &PersistenceUnit, catalog: &[MappedType]) -> Result<Vec<MappedType>, ConfigError> {
    unit.mapped_entities()
        .iter()
        .map(|name| {
            catalog
                .iter()
                .find(|t| t.entity_type().name() == name)
                .or_else(|| catalog.iter().find(|t| t.entity_type().is_named(name)))
                .copied()
                .ok_or_else(|| ConfigError::TypeNotInCatalog {
                    unit: unit.unit_name().to_string(),
                    type_name: name.clone(),
                })
        })
        .collect()
}

impl PersistenceContext {
    /// Resolve every unit against `catalog` and build the descriptor registry.
    ///
    /// Storage files are created under `database_dir`.
    pub fn new(
        properties: PersistenceProperties,
        catalog: &[MappedType],
        database_dir: impl AsRef<Path>,
    ) -> Result<PersistenceContext> {
        let mut types: Vec<MappedType> = vec![];
        let mut unit_types = HashMap::new();
        for unit in properties.units() {
            let resolved = resolve_unit(unit, catalog)?;
            for t in resolved.iter() {
                if !types.iter().any(|x| x.entity_type() == t.entity_type()) {
                    types.push(*t);
                }
            }
            unit_types.insert(
                unit.unit_name().to_string(),
                resolved.iter().map(|t| t.entity_type()).collect::<Vec<_>>(),
            );
        }

        let mut registry = DescriptorRegistry::new();
        for t in catalog {
            registry.register_reference_type(t.entity_type());
        }
        registry.initialize(&types)?;
        info!(
            "Persistence context ready with {} units",
            properties.units().len()
        );

        Ok(PersistenceContext {
            properties,
            registry: Arc::new(registry),
            unit_types,
            database_dir: database_dir.as_ref().to_path_buf(),
        })
    }

    pub fn properties(&self) -> &PersistenceProperties {
        &self.properties
    }

    pub fn registry(&self) -> &Arc<DescriptorRegistry> {
        &self.registry
    }

    /// Where the storage file of a unit lives.
    pub fn database_path(&self, unit_name: &str) -> Result<PathBuf> {
        let unit = self.properties.unit(unit_name)?;
        Ok(self.database_dir.join(unit.database_file_name()))
    }

    /// A manager over the storage of one unit.
    ///
    /// Each call opens its own adapter; managers of the same unit do not share a transaction or a cache.
    pub fn manager(&self, unit_name: &str) -> Result<PersistenceManager> {
        let unit = self.properties.unit(unit_name)?.clone();
        let path = self.database_dir.join(unit.database_file_name());
        info!("Opening unit {} at {}", unit.unit_name(), path.display());
        let mapped = self.unit_types.get(unit.unit_name()).cloned().unwrap_or_default();
        let driver = SqliteDriver::new(path);
        let adapter = DatabaseAdapter::new(unit, self.registry.clone(), mapped, Box::new(driver))?;
        Ok(PersistenceManager::new(adapter))
    }
}
