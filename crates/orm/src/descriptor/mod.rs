//! Entity descriptors.
//!
//! An [EntityDescriptor] is everything the mapper knows about one entity type: its table, its fields flattened
//! across every contributing layer, its primary key, and the per-operation field subsets used to build statements.
//!
//! Descriptors go through two phases.  [EntityDescriptor::build] and [EntityDescriptor::derive_primary_key] only look
//! at the type itself.  Single-table inheritance then needs every descriptor of a hierarchy to exist before the
//! superclass can absorb its subclasses' columns, which the registry does as a second pass.  The derived field subsets
//! are not available until that pass has run.
mod join_table;

pub use join_table::*;

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use log::*;

use crate::entity::EntityType;
use crate::errors::{LookupError, MappingError};
use crate::field::FieldDescriptor;
use crate::metadata::{EntityMetadata, LayerKind};
use crate::sql;

/// A shareable, ordered list of fields.
pub type FieldList = Arc<Vec<Arc<FieldDescriptor>>>;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, derive_more::Display)]
pub enum Operation {
    #[display(fmt = "CREATE_TABLE")]
    CreateTable,
    #[display(fmt = "QUERY")]
    Query,
    #[display(fmt = "INSERT")]
    Insert,
    #[display(fmt = "UPDATE")]
    Update,
    #[display(fmt = "DELETE")]
    Delete,
}

/// Handle to a descriptor inside the registry.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct DescriptorId(pub(crate) usize);

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DescriptorKind {
    Plain,
    /// Stores itself and its subclasses in one table.
    SingleTableSuperclass { subclasses: Vec<DescriptorId> },
    /// Stored in the table of its superclass.
    SingleTableSubclass { superclass: DescriptorId },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum BuildPhase {
    Built,
    Merged,
}

#[derive(Debug)]
pub struct EntityDescriptor {
    entity_type: EntityType,
    table_name: String,
    kind: DescriptorKind,
    fields: Vec<Arc<FieldDescriptor>>,
    primary_key: Option<Arc<FieldDescriptor>>,

    create_table_fields: FieldList,
    query_fields: Vec<Arc<FieldDescriptor>>,
    insert_fields: Vec<Arc<FieldDescriptor>>,
    update_fields: Vec<Arc<FieldDescriptor>>,

    join_tables: BTreeMap<String, JoinTable>,
    create_table_statement: OnceLock<String>,
    phase: BuildPhase,
}

impl EntityDescriptor {
    /// Build the table name and flattened field list.
    ///
    /// Layers are visited nearest first.  Only entity and mapped superclass layers contribute fields.  When two
    /// layers declare the same field, the nearer one wins.
    pub fn build(
        metadata: &EntityMetadata,
        kind: DescriptorKind,
    ) -> Result<EntityDescriptor, MappingError> {
        let entity_type = metadata.entity_type;
        let entity = entity_type.name();

        let table_name = metadata
            .table_name
            .clone()
            .unwrap_or_else(|| entity_type.simple_name().to_string());
        if !sql::is_valid_identifier(&table_name) {
            return Err(MappingError::InvalidIdentifier {
                entity: entity.to_string(),
                what: "Table",
                identifier: table_name,
            });
        }

        let mut descriptor = EntityDescriptor {
            entity_type,
            table_name,
            kind,
            fields: vec![],
            primary_key: None,
            create_table_fields: Default::default(),
            query_fields: vec![],
            insert_fields: vec![],
            update_fields: vec![],
            join_tables: Default::default(),
            create_table_statement: OnceLock::new(),
            phase: BuildPhase::Built,
        };

        // Join tables are merged from the root down so that nearer layers override.
        let layers = metadata.layers();
        for layer in layers.iter().rev() {
            if layer.kind == LayerKind::Plain {
                continue;
            }
            if let Some(join_tables) = layer.join_tables {
                for jt in join_tables() {
                    for ident in [jt.name(), jt.join_column(), jt.inverse_join_column()] {
                        if !sql::is_valid_identifier(ident) {
                            return Err(MappingError::InvalidIdentifier {
                                entity: entity.to_string(),
                                what: "Join table identifier",
                                identifier: ident.to_string(),
                            });
                        }
                    }
                    descriptor.join_tables.insert(jt.name().to_string(), jt);
                }
            }
        }

        for layer in layers.iter() {
            if layer.kind == LayerKind::Plain {
                continue;
            }
            for field in layer.fields.iter() {
                let field = FieldDescriptor::build(entity, field)?;
                descriptor.push_field(Arc::new(field))?;
            }
        }

        descriptor.build_operation_subsets();
        Ok(descriptor)
    }

    /// Add a field unless one with the same column is already present.
    ///
    /// The same field seen twice is skipped; two different fields claiming one column is an error.
    fn push_field(&mut self, field: Arc<FieldDescriptor>) -> Result<bool, MappingError> {
        if field.is_persistent() {
            if let Some(existing) = self
                .fields
                .iter()
                .find(|f| f.is_persistent() && f.column_name() == field.column_name())
            {
                if existing.field_name() == field.field_name() {
                    return Ok(false);
                }
                return Err(MappingError::DuplicateColumn {
                    entity: self.entity_type.name().to_string(),
                    column: field.column_name().to_string(),
                });
            }
        } else if self
            .fields
            .iter()
            .any(|f| f.field_name() == field.field_name())
        {
            return Ok(false);
        }

        self.fields.push(field);
        Ok(true)
    }

    /// Find the single primary key.
    pub fn derive_primary_key(&mut self) -> Result<(), MappingError> {
        let mut keys = self.fields.iter().filter(|f| f.is_primary_key());
        let first = keys
            .next()
            .ok_or_else(|| MappingError::PrimaryKeyNotFound {
                entity: self.entity_type.name().to_string(),
            })?
            .clone();
        if let Some(second) = keys.next() {
            return Err(MappingError::MultiplePrimaryKeys {
                entity: self.entity_type.name().to_string(),
                first: first.field_name().to_string(),
                second: second.field_name().to_string(),
            });
        }
        self.primary_key = Some(first);
        Ok(())
    }

    /// Recompute the per-operation subsets from the field list.
    pub fn build_operation_subsets(&mut self) {
        let persistent = || self.fields.iter().filter(|f| f.is_persistent()).cloned();

        self.create_table_fields = Arc::new(persistent().collect());
        self.query_fields = persistent().collect();
        self.insert_fields = persistent().filter(|f| f.is_insertable()).collect();
        self.update_fields = persistent().filter(|f| f.is_updatable()).collect();
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn kind(&self) -> &DescriptorKind {
        &self.kind
    }

    /// Every field, persistent or not, in extraction order.
    pub fn fields(&self) -> &[Arc<FieldDescriptor>] {
        &self.fields
    }

    pub fn primary_key(&self) -> Result<&Arc<FieldDescriptor>, MappingError> {
        self.primary_key
            .as_ref()
            .ok_or_else(|| MappingError::PrimaryKeyNotFound {
                entity: self.entity_type.name().to_string(),
            })
    }

    pub fn field(&self, name: &str) -> Result<&Arc<FieldDescriptor>, LookupError> {
        self.fields
            .iter()
            .find(|f| f.field_name() == name)
            .ok_or_else(|| LookupError::FieldNotFound {
                entity: self.entity_type.name().to_string(),
                field: name.to_string(),
            })
    }

    /// The field mapped to a column, if any.
    pub fn field_for_column(&self, column: &str) -> Option<&Arc<FieldDescriptor>> {
        self.fields
            .iter()
            .find(|f| f.is_persistent() && f.column_name() == column)
    }

    pub fn is_merged(&self) -> bool {
        self.phase == BuildPhase::Merged
    }

    fn require_merged(&self) -> Result<(), LookupError> {
        if !self.is_merged() {
            return Err(LookupError::NotMerged {
                entity: self.entity_type.name().to_string(),
            });
        }
        Ok(())
    }

    pub fn fields_for(&self, operation: Operation) -> Result<&[Arc<FieldDescriptor>], LookupError> {
        self.require_merged()?;
        Ok(match operation {
            Operation::CreateTable => self.create_table_fields.as_slice(),
            Operation::Query => self.query_fields.as_slice(),
            Operation::Insert => self.insert_fields.as_slice(),
            Operation::Update => self.update_fields.as_slice(),
            Operation::Delete => {
                return Err(LookupError::NoColumnsForOperation {
                    operation: operation.to_string(),
                })
            }
        })
    }

    /// The shared create-table list.  Subclasses of one hierarchy all hand out the same list.
    pub fn create_table_fields(&self) -> Result<&FieldList, LookupError> {
        self.require_merged()?;
        Ok(&self.create_table_fields)
    }

    pub fn columns_for_operation(&self, operation: Operation) -> Result<Vec<&str>, LookupError> {
        Ok(self
            .fields_for(operation)?
            .iter()
            .map(|f| f.column_name())
            .collect())
    }

    /// `CREATE TABLE IF NOT EXISTS ...` for this entity, built on first use.
    pub fn create_table_statement(&self) -> crate::Result<&str> {
        if let Some(stmt) = self.create_table_statement.get() {
            return Ok(stmt);
        }

        let stmt = sql::create_table_statement(
            self.entity_type.name(),
            &self.table_name,
            self.create_table_fields()?,
        )?;
        debug!("Create statement for {}: {}", self.entity_type, stmt);
        Ok(self.create_table_statement.get_or_init(|| stmt))
    }

    pub fn join_table(&self, name: &str) -> Result<&JoinTable, LookupError> {
        self.join_tables
            .get(name)
            .ok_or_else(|| LookupError::JoinTableNotFound {
                entity: self.entity_type.name().to_string(),
                join_table: name.to_string(),
            })
    }

    pub fn join_tables(&self) -> impl Iterator<Item = &JoinTable> {
        self.join_tables.values()
    }

    pub(crate) fn add_subclass(&mut self, id: DescriptorId) {
        if let DescriptorKind::SingleTableSuperclass { subclasses } = &mut self.kind {
            subclasses.push(id);
        }
    }

    pub(crate) fn set_kind(&mut self, kind: DescriptorKind) {
        self.kind = kind;
    }

    pub(crate) fn set_table_name(&mut self, table_name: String) {
        self.table_name = table_name;
    }

    /// Fold another descriptor's fields into this one.  Columns already present are skipped.
    pub(crate) fn absorb_fields(&mut self, fields: &[Arc<FieldDescriptor>]) -> Result<(), MappingError> {
        for field in fields.iter().filter(|f| f.is_persistent()) {
            if self.field_for_column(field.column_name()).is_some() {
                continue;
            }
            self.push_field(field.clone())?;
        }
        self.build_operation_subsets();
        Ok(())
    }

    pub(crate) fn share_create_table(&mut self, fields: FieldList) {
        self.create_table_fields = fields;
    }

    pub(crate) fn mark_merged(&mut self) {
        self.phase = BuildPhase::Merged;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::metadata::FieldMetadata;

    #[derive(Default)]
    struct Item;

    fn item() -> EntityMetadata {
        EntityMetadata::entity::<Item>()
            .field(FieldMetadata::new::<i32>("id").primary_key())
            .field(FieldMetadata::new::<String>("name").nullable(false))
    }

    fn built(metadata: &EntityMetadata) -> EntityDescriptor {
        let mut d = EntityDescriptor::build(metadata, DescriptorKind::Plain).unwrap();
        d.derive_primary_key().unwrap();
        d.mark_merged();
        d
    }

    #[test]
    fn test_item_ddl() {
        let d = built(&item());
        assert_eq!(d.table_name(), "Item");
        assert_eq!(
            d.create_table_statement().unwrap(),
            "CREATE TABLE IF NOT EXISTS Item (id INTEGER PRIMARY KEY,name TEXT NOT NULL)"
        );
        assert_eq!(d.primary_key().unwrap().field_name(), "id");
    }

    #[test]
    fn test_subsets() {
        let metadata = EntityMetadata::entity::<Item>()
            .table_name("items")
            .field(FieldMetadata::new::<i64>("id").primary_key().updatable(false))
            .field(FieldMetadata::new::<String>("created").updatable(false))
            .field(FieldMetadata::new::<String>("revision").insertable(false))
            .field(FieldMetadata::new::<String>("summary").persistent(false));
        let d = built(&metadata);

        let cols = |op| d.columns_for_operation(op).unwrap();
        assert_eq!(cols(Operation::CreateTable), vec!["id", "created", "revision"]);
        assert_eq!(cols(Operation::Query), vec!["id", "created", "revision"]);
        assert_eq!(cols(Operation::Insert), vec!["id", "created"]);
        assert_eq!(cols(Operation::Update), vec!["revision"]);
        assert!(matches!(
            d.columns_for_operation(Operation::Delete),
            Err(LookupError::NoColumnsForOperation { .. })
        ));

        assert_eq!(d.fields().len(), 4);
        assert!(d.field("summary").is_ok());
        assert!(matches!(
            d.field("missing"),
            Err(LookupError::FieldNotFound { .. })
        ));
    }

    #[test]
    fn test_subsets_require_merge() {
        let d = EntityDescriptor::build(&item(), DescriptorKind::Plain).unwrap();
        assert!(matches!(
            d.fields_for(Operation::Query),
            Err(LookupError::NotMerged { .. })
        ));
        assert!(d.create_table_statement().is_err());
    }

    #[test]
    fn test_primary_key_errors() {
        let none = EntityMetadata::entity::<Item>().field(FieldMetadata::new::<i64>("a"));
        let mut d = EntityDescriptor::build(&none, DescriptorKind::Plain).unwrap();
        assert!(matches!(
            d.derive_primary_key(),
            Err(MappingError::PrimaryKeyNotFound { .. })
        ));

        let two = EntityMetadata::entity::<Item>()
            .field(FieldMetadata::new::<i64>("a").primary_key())
            .field(FieldMetadata::new::<i64>("b").primary_key());
        let mut d = EntityDescriptor::build(&two, DescriptorKind::Plain).unwrap();
        assert!(matches!(
            d.derive_primary_key(),
            Err(MappingError::MultiplePrimaryKeys { .. })
        ));
    }

    #[test]
    fn test_duplicate_column() {
        let metadata = EntityMetadata::entity::<Item>()
            .field(FieldMetadata::new::<i64>("id").primary_key())
            .field(FieldMetadata::new::<String>("a").column("x"))
            .field(FieldMetadata::new::<String>("b").column("x"));
        assert!(matches!(
            EntityDescriptor::build(&metadata, DescriptorKind::Plain),
            Err(MappingError::DuplicateColumn { .. })
        ));
    }

    #[test]
    fn test_invalid_table_name() {
        let metadata = item().table_name("my items");
        assert!(matches!(
            EntityDescriptor::build(&metadata, DescriptorKind::Plain),
            Err(MappingError::InvalidIdentifier { what: "Table", .. })
        ));
    }

    #[derive(Default)]
    struct Base;
    #[derive(Default)]
    struct Document;

    fn base() -> EntityMetadata {
        EntityMetadata::mapped_superclass::<Base>()
            .field(FieldMetadata::new::<i64>("id").primary_key().autoincrement())
            .field(FieldMetadata::new::<String>("owner"))
            .join_tables(|| {
                vec![
                    JoinTable::new("shared", "a_id", "b_id"),
                    JoinTable::new("base_only", "a_id", "b_id"),
                ]
            })
    }

    #[test]
    fn test_layers() {
        let mut metadata = EntityMetadata::entity::<Document>()
            .field(FieldMetadata::new::<String>("title"))
            // Redeclared fields are taken from the nearest layer.
            .field(FieldMetadata::new::<String>("owner").nullable(false))
            .join_tables(|| vec![JoinTable::new("shared", "doc_id", "other_id")]);
        metadata.parent = Some(base);

        let d = built(&metadata);
        assert_eq!(
            d.columns_for_operation(Operation::CreateTable).unwrap(),
            vec!["title", "owner", "id"]
        );
        assert!(!d.field("owner").unwrap().is_nullable());
        assert_eq!(d.primary_key().unwrap().field_name(), "id");
        assert_eq!(d.join_table("shared").unwrap().join_column(), "doc_id");
        assert!(d.join_table("base_only").is_ok());
        assert!(d.join_table("nope").is_err());
    }
}
