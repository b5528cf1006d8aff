//! An object-relational mapper for sqlite.
//!
//! Entities are plain structs deriving [Entity].  The mapping of each type is described once, as
//! [EntityMetadata], and resolved into an immutable [EntityDescriptor] when the [DescriptorRegistry] is built.  From
//! there a [PersistenceManager] can create tables, insert, update, delete and query entities, converting every value
//! through the converter its field was given.
//!
//! ```ignore
//! #[derive(Debug, Default, stout_orm::Entity)]
//! struct Item {
//!     #[stout(primary_key, autoincrement)]
//!     id: i64,
//!     #[stout(nullable = false)]
//!     name: String,
//! }
//!
//! let mut unit = PersistenceUnit::new("main", "app");
//! unit.add_mapped_entity("Item");
//! let ctx = PersistenceContext::new(
//!     PersistenceProperties::new(vec![unit])?,
//!     &[MappedType::of::<Item>()],
//!     "/var/lib/app",
//! )?;
//! let mut manager = ctx.manager("main")?;
//! let mut pen = Item { id: 0, name: "pen".into() };
//! manager.persist(&mut pen)?;
//! ```
//!
//! Within a transaction, reading the same row twice gives back the same `Rc<RefCell<_>>`.  Descriptors are `Send +
//! Sync`; managers and the entities they hand out are not.
extern crate self as stout_orm;

pub mod adapter;
pub mod cache;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod driver;
pub mod entity;
mod errors;
pub mod field;
pub mod manager;
pub mod metadata;
pub mod registry;
pub mod sql;
pub mod value;

pub use adapter::DatabaseAdapter;
pub use cache::TransactionCache;
pub use config::{PersistenceProperties, PersistenceUnit};
pub use context::PersistenceContext;
pub use descriptor::{DescriptorKind, EntityDescriptor, FieldList, JoinTable, Operation};
pub use driver::{BufferedCursor, RowCursor, SqliteDriver, StorageDriver};
pub use entity::{Entity, EntityType, Managed, MappedType, TypeResolver};
pub use errors::*;
pub use field::{FieldConverter, FieldDescriptor};
pub use manager::PersistenceManager;
pub use metadata::{EntityMetadata, EnumMode, FieldMetadata, LayerKind};
pub use registry::DescriptorRegistry;
pub use value::{
    enum_from_field_value, DeclaredType, EnumDeclaration, FieldValue, PersistentEnum,
    PersistentValue, StorageType, StorageValue,
};

pub use stout_orm_derive::{Entity, PersistentEnum};
