//! Declarative mapping metadata.
//!
//! This is the input to descriptor construction: what the `#[stout(...)]` attributes say, as plain structs.  The
//! derive macros fill these in, but they can equally be built by hand:
//!
//! ```ignore
//! EntityMetadata::entity::<Item>()
//!     .table_name("items")
//!     .field(FieldMetadata::new::<i64>("id").primary_key().autoincrement())
//!     .field(FieldMetadata::new::<String>("name").nullable(false))
//! ```
use crate::descriptor::JoinTable;
use crate::entity::{Entity, EntityType};
use crate::value::{DeclaredType, PersistentValue};

/// What a layer of a type hierarchy contributes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LayerKind {
    /// A mapped entity.  Contributes its fields.
    Entity,
    /// Not mapped on its own, but contributes its fields to entities built on top of it.
    MappedSuperclass,
    /// Contributes nothing.  Ancestors past it are still visited.
    Plain,
}

/// How an enum field is stored.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum EnumMode {
    /// As the position of the member in the declaration.
    #[default]
    Ordinal,
    /// As the name of the member.
    String,
}

#[derive(Clone, Debug)]
pub struct FieldMetadata {
    pub name: String,
    pub declared_type: DeclaredType,
    pub column: Option<String>,
    pub primary_key: bool,
    pub autoincrement: bool,
    pub nullable: bool,
    pub insertable: bool,
    pub updatable: bool,
    pub unique: bool,
    pub persistent: bool,
    pub enum_mode: EnumMode,
}

impl FieldMetadata {
    pub fn new<T: PersistentValue>(name: impl Into<String>) -> FieldMetadata {
        FieldMetadata::with_type(name, T::declared_type())
    }

    pub fn with_type(name: impl Into<String>, declared_type: DeclaredType) -> FieldMetadata {
        FieldMetadata {
            name: name.into(),
            declared_type,
            column: None,
            primary_key: false,
            autoincrement: false,
            nullable: true,
            insertable: true,
            updatable: true,
            unique: false,
            persistent: true,
            enum_mode: EnumMode::Ordinal,
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn insertable(mut self, insertable: bool) -> Self {
        self.insertable = insertable;
        self
    }

    pub fn updatable(mut self, updatable: bool) -> Self {
        self.updatable = updatable;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Mark a computed field, which is readable through the entity but never reaches storage.
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn enumerated(mut self, mode: EnumMode) -> Self {
        self.enum_mode = mode;
        self
    }
}

/// Metadata for one layer of a type hierarchy.
///
/// Rust has no inheritance, so a hierarchy is expressed by embedding the parent struct and pointing at its metadata
/// with [EntityMetadata::parent].  The descriptor flattens the chain once, when it is built.
#[derive(Clone, Debug)]
pub struct EntityMetadata {
    pub entity_type: EntityType,
    pub kind: LayerKind,
    pub table_name: Option<String>,
    pub inheritance_single_table: bool,
    pub parent: Option<fn() -> EntityMetadata>,
    pub fields: Vec<FieldMetadata>,
    pub join_tables: Option<fn() -> Vec<JoinTable>>,
}

impl EntityMetadata {
    pub fn new(entity_type: EntityType, kind: LayerKind) -> EntityMetadata {
        EntityMetadata {
            entity_type,
            kind,
            table_name: None,
            inheritance_single_table: false,
            parent: None,
            fields: vec![],
            join_tables: None,
        }
    }

    pub fn entity<T: 'static>() -> EntityMetadata {
        EntityMetadata::new(EntityType::of::<T>(), LayerKind::Entity)
    }

    pub fn mapped_superclass<T: 'static>() -> EntityMetadata {
        EntityMetadata::new(EntityType::of::<T>(), LayerKind::MappedSuperclass)
    }

    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = Some(name.into());
        self
    }

    /// Store this type and every direct subclass in one table.
    pub fn inheritance_single_table(mut self) -> Self {
        self.inheritance_single_table = true;
        self
    }

    pub fn parent<P: Entity>(mut self) -> Self {
        self.parent = Some(P::metadata);
        self
    }

    pub fn field(mut self, field: FieldMetadata) -> Self {
        self.fields.push(field);
        self
    }

    pub fn join_tables(mut self, join_tables: fn() -> Vec<JoinTable>) -> Self {
        self.join_tables = Some(join_tables);
        self
    }

    /// The metadata of the direct parent, if any.
    pub fn parent_metadata(&self) -> Option<EntityMetadata> {
        self.parent.map(|p| p())
    }

    /// This layer followed by every ancestor, nearest first.
    pub fn layers(&self) -> Vec<EntityMetadata> {
        let mut out = vec![self.clone()];
        let mut next = self.parent_metadata();
        while let Some(layer) = next {
            next = layer.parent_metadata();
            out.push(layer);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_defaults() {
        let f = FieldMetadata::new::<i64>("id");
        assert_eq!(f.declared_type, DeclaredType::I64);
        assert!(f.nullable && f.insertable && f.updatable && f.persistent);
        assert!(!f.primary_key && !f.autoincrement && !f.unique);
        assert_eq!(f.enum_mode, EnumMode::Ordinal);
        assert_eq!(f.column, None);
    }

    struct Base;
    struct Middle;
    struct Leaf;

    fn base() -> EntityMetadata {
        EntityMetadata::mapped_superclass::<Base>()
    }

    fn middle() -> EntityMetadata {
        let mut m = EntityMetadata::new(EntityType::of::<Middle>(), LayerKind::Plain);
        m.parent = Some(base);
        m
    }

    #[test]
    fn test_layers_nearest_first() {
        let mut leaf = EntityMetadata::entity::<Leaf>();
        leaf.parent = Some(middle);
        let names = leaf
            .layers()
            .iter()
            .map(|l| l.entity_type.simple_name())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Leaf", "Middle", "Base"]);
    }
}
