//! Persistence configuration.
//!
//! A persistence descriptor is a JSON document naming one or more units:
//!
//! ```json
//! {
//!     "persistence_units": [
//!         {
//!             "unit_name": "main",
//!             "database_name": "app",
//!             "database_version": 1,
//!             "auto_create_database": true,
//!             "use_transaction": true,
//!             "mapped_entities": ["app::model::Item", "Tag"]
//!         }
//!     ]
//! }
//! ```
//!
//! Entity names may be fully qualified or simple; they are resolved against the catalog handed to
//! [PersistenceContext](crate::PersistenceContext).
use std::path::Path;

use log::*;

use crate::errors::ConfigError;

fn default_version() -> i64 {
    1
}

fn default_true() -> bool {
    true
}

/// One database and the entities stored in it.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PersistenceUnit {
    unit_name: String,
    database_name: String,
    #[serde(default = "default_version")]
    database_version: i64,
    #[serde(default = "default_true")]
    auto_create_database: bool,
    #[serde(default = "default_true")]
    use_transaction: bool,
    #[serde(default)]
    mapped_entities: Vec<String>,
}

impl PersistenceUnit {
    pub fn new(unit_name: impl Into<String>, database_name: impl Into<String>) -> PersistenceUnit {
        PersistenceUnit {
            unit_name: unit_name.into(),
            database_name: database_name.into(),
            database_version: default_version(),
            auto_create_database: true,
            use_transaction: true,
            mapped_entities: vec![],
        }
    }

    pub fn unit_name(&self) -> &str {
        &self.unit_name
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// The storage file name: the database name with `.db` appended.
    pub fn database_file_name(&self) -> String {
        format!("{}.db", self.database_name)
    }

    pub fn database_version(&self) -> i64 {
        self.database_version
    }

    pub fn auto_create_database(&self) -> bool {
        self.auto_create_database
    }

    pub fn use_transaction(&self) -> bool {
        self.use_transaction
    }

    pub fn mapped_entities(&self) -> &[String] {
        &self.mapped_entities
    }

    pub fn set_database_name(&mut self, database_name: impl Into<String>) {
        self.database_name = database_name.into();
    }

    pub fn set_database_version(&mut self, version: i64) {
        self.database_version = version;
    }

    pub fn set_auto_create_database(&mut self, auto_create: bool) {
        self.auto_create_database = auto_create;
    }

    pub fn set_use_transaction(&mut self, use_transaction: bool) {
        self.use_transaction = use_transaction;
    }

    pub fn add_mapped_entity(&mut self, type_name: impl Into<String>) {
        self.mapped_entities.push(type_name.into());
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PersistenceProperties {
    persistence_units: Vec<PersistenceUnit>,
}

impl PersistenceProperties {
    pub fn new(units: Vec<PersistenceUnit>) -> Result<PersistenceProperties, ConfigError> {
        let props = PersistenceProperties {
            persistence_units: units,
        };
        props.check()?;
        Ok(props)
    }

    pub fn from_json_str(json: &str) -> Result<PersistenceProperties, ConfigError> {
        let props: PersistenceProperties = serde_json::from_str(json)?;
        props.check()?;
        Ok(props)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<PersistenceProperties, ConfigError> {
        let path = path.as_ref();
        info!("Loading persistence descriptor from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        PersistenceProperties::from_json_str(&text)
    }

    fn check(&self) -> Result<(), ConfigError> {
        for (i, unit) in self.persistence_units.iter().enumerate() {
            if self.persistence_units[..i]
                .iter()
                .any(|u| u.unit_name == unit.unit_name)
            {
                return Err(ConfigError::DuplicateUnit(unit.unit_name.clone()));
            }
        }
        Ok(())
    }

    pub fn unit(&self, name: &str) -> Result<&PersistenceUnit, ConfigError> {
        self.persistence_units
            .iter()
            .find(|u| u.unit_name == name)
            .ok_or_else(|| ConfigError::UnknownUnit(name.to_string()))
    }

    pub fn units(&self) -> &[PersistenceUnit] {
        &self.persistence_units
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_flags_are_independent() {
        let mut unit = PersistenceUnit::new("u", "d");
        assert!(unit.auto_create_database());
        assert!(unit.use_transaction());

        unit.set_use_transaction(false);
        assert!(!unit.use_transaction());
        assert!(unit.auto_create_database());

        unit.set_auto_create_database(false);
        unit.set_use_transaction(true);
        assert!(unit.use_transaction());
        assert!(!unit.auto_create_database());
    }

    #[test]
    fn test_parse() {
        let props = PersistenceProperties::from_json_str(
            r#"{
                "persistence_units": [
                    {"unit_name": "main", "database_name": "app", "mapped_entities": ["Item"]},
                    {"unit_name": "log", "database_name": "log", "database_version": 4, "use_transaction": false}
                ]
            }"#,
        )
        .unwrap();

        let main = props.unit("main").unwrap();
        assert_eq!(main.database_file_name(), "app.db");
        assert_eq!(main.database_version(), 1);
        assert!(main.auto_create_database() && main.use_transaction());
        assert_eq!(main.mapped_entities(), &["Item".to_string()]);

        let log = props.unit("log").unwrap();
        assert_eq!(log.database_version(), 4);
        assert!(!log.use_transaction());
        assert!(log.mapped_entities().is_empty());

        assert!(matches!(props.unit("x"), Err(ConfigError::UnknownUnit(_))));
    }

    #[test]
    fn test_duplicate_units() {
        let err = PersistenceProperties::new(vec![
            PersistenceUnit::new("a", "x"),
            PersistenceUnit::new("a", "y"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateUnit(_)));
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("persistence.json");
        let props = PersistenceProperties::new(vec![PersistenceUnit::new("a", "x")]).unwrap();
        std::fs::write(&path, serde_json::to_string(&props).unwrap()).unwrap();
        assert_eq!(PersistenceProperties::from_path(&path).unwrap(), props);

        assert!(matches!(
            PersistenceProperties::from_path(dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
        std::fs::write(&path, "{").unwrap();
        assert!(matches!(
            PersistenceProperties::from_path(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
