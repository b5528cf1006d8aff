//! The Entity trait and type identities.
//!
//! An entity is a plain struct which can describe its own mapping ([Entity::metadata]) and read or write its fields
//! by name.  Implementations are normally generated with `#[derive(Entity)]`.
use std::any::TypeId;
use std::cell::RefCell;
use std::rc::Rc;

use crate::errors::ConversionError;
use crate::metadata::EntityMetadata;
use crate::value::FieldValue;

/// An entity instance shared through the transaction cache.
///
/// Within one transaction every read of the same row hands out the same `Managed`, so identity can be checked with
/// [Rc::ptr_eq].  Instances are deliberately not `Send`: sharing them across threads needs external locking.
pub type Managed<T> = Rc<RefCell<T>>;

/// Identity of a Rust type, with its fully qualified name.
#[derive(Copy, Clone, Debug)]
pub struct EntityType {
    id: TypeId,
    name: &'static str,
}

impl EntityType {
    pub fn of<T: 'static>() -> EntityType {
        EntityType {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    /// The fully qualified name, e.g. `my_app::model::Item`.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The last path segment of the name, e.g. `Item`.
    pub fn simple_name(&self) -> &'static str {
        self.name.rsplit("::").next().unwrap_or(self.name)
    }

    /// Whether `name` is either the simple or the fully qualified name of this type.
    pub fn is_named(&self, name: &str) -> bool {
        self.name == name || self.simple_name() == name
    }
}

impl PartialEq for EntityType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EntityType {}

impl std::hash::Hash for EntityType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// Resolves stored type names back to types.
pub trait TypeResolver {
    fn resolve_type(&self, name: &str) -> Option<EntityType>;
}

impl TypeResolver for [EntityType] {
    fn resolve_type(&self, name: &str) -> Option<EntityType> {
        self.iter().find(|t| t.name() == name).copied()
    }
}

impl<const N: usize> TypeResolver for [EntityType; N] {
    fn resolve_type(&self, name: &str) -> Option<EntityType> {
        self[..].resolve_type(name)
    }
}

/// A type mapped to a table.
pub trait Entity: Default + 'static {
    /// Describe the mapping of this type.
    ///
    /// Called once per type while the registry is built; the result is never consulted again afterward.
    fn metadata() -> EntityMetadata;

    /// Read a field by name, or `None` if the type has no such field.
    fn field_value(&self, field: &str) -> Option<FieldValue>;

    fn set_field_value(&mut self, field: &str, value: FieldValue) -> Result<(), ConversionError>;

    fn entity_type() -> EntityType {
        EntityType::of::<Self>()
    }
}

/// A type which may be handed to the registry.
#[derive(Copy, Clone, Debug)]
pub struct MappedType {
    entity_type: EntityType,
    metadata: fn() -> EntityMetadata,
}

impl MappedType {
    pub fn of<T: Entity>() -> MappedType {
        MappedType {
            entity_type: T::entity_type(),
            metadata: T::metadata,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn metadata(&self) -> EntityMetadata {
        (self.metadata)()
    }
}
