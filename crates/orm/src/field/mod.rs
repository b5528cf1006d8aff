//! Field descriptors.
//!
//! A [FieldDescriptor] is the resolved form of one [FieldMetadata]: the column it maps to, its sqlite storage type,
//! its constraints, and the converter which moves values between the entity and storage.
mod converter;

pub use converter::*;

use crate::entity::{Entity, TypeResolver};
use crate::errors::{ConversionError, MappingError};
use crate::metadata::{EnumMode, FieldMetadata};
use crate::sql::is_valid_identifier;
use crate::value::{DeclaredType, FieldValue, StorageType, StorageValue};

#[derive(Clone, Debug)]
pub struct FieldDescriptor {
    field_name: String,
    column_name: String,
    declared_type: DeclaredType,
    storage_type: Option<StorageType>,
    primary_key: bool,
    nullable: bool,
    insertable: bool,
    updatable: bool,
    unique: bool,
    autoincrement: bool,
    persistent: bool,
    converter: FieldConverter,
}

/// Pick the storage type and converter for a declared type.
///
/// Returns `None` for types which have no mapping.
fn resolve_storage(
    declared: &DeclaredType,
    enum_mode: EnumMode,
) -> Option<(StorageType, FieldConverter)> {
    let default = |storage_type| {
        Some((
            storage_type,
            FieldConverter::Default(DefaultConverter {
                storage_type: Some(storage_type),
            }),
        ))
    };

    match declared {
        DeclaredType::I16 | DeclaredType::I32 | DeclaredType::I64 => default(StorageType::Integer),
        DeclaredType::F32 | DeclaredType::F64 => default(StorageType::Real),
        DeclaredType::Text => default(StorageType::Text),
        DeclaredType::Blob => default(StorageType::Blob),
        DeclaredType::Bool => Some((
            StorageType::Integer,
            FieldConverter::Boolean(BooleanConverter),
        )),
        DeclaredType::DateTime => Some((
            StorageType::Text,
            FieldConverter::DateTime(DateTimeConverter),
        )),
        DeclaredType::ClassReference => Some((
            StorageType::Text,
            FieldConverter::ClassReference(ClassReferenceConverter),
        )),
        DeclaredType::Enum(declaration) => {
            let storage_type = match enum_mode {
                EnumMode::Ordinal => StorageType::Integer,
                EnumMode::String => StorageType::Text,
            };
            Some((
                storage_type,
                FieldConverter::Enum(EnumConverter {
                    declaration: *declaration,
                    mode: enum_mode,
                }),
            ))
        }
        DeclaredType::Unsupported(_) => None,
    }
}

impl FieldDescriptor {
    pub fn build(entity: &str, metadata: &FieldMetadata) -> Result<FieldDescriptor, MappingError> {
        let column_name = metadata
            .column
            .clone()
            .unwrap_or_else(|| metadata.name.clone());

        if metadata.persistent && !is_valid_identifier(&column_name) {
            return Err(MappingError::InvalidIdentifier {
                entity: entity.to_string(),
                what: "Column",
                identifier: column_name,
            });
        }

        let (storage_type, converter) =
            match resolve_storage(&metadata.declared_type, metadata.enum_mode) {
                Some((storage_type, converter)) => (Some(storage_type), converter),
                None if metadata.persistent => {
                    return Err(MappingError::UnmappedFieldType {
                        entity: entity.to_string(),
                        field: metadata.name.clone(),
                        declared_type: metadata.declared_type.name().to_string(),
                    })
                }
                None => (
                    None,
                    FieldConverter::Default(DefaultConverter { storage_type: None }),
                ),
            };

        if metadata.autoincrement && !metadata.declared_type.is_integer() {
            return Err(MappingError::AutoincrementNotInteger {
                entity: entity.to_string(),
                field: metadata.name.clone(),
            });
        }

        Ok(FieldDescriptor {
            field_name: metadata.name.clone(),
            column_name,
            declared_type: metadata.declared_type,
            storage_type,
            primary_key: metadata.primary_key,
            nullable: metadata.nullable,
            insertable: metadata.insertable,
            updatable: metadata.updatable,
            unique: metadata.unique,
            autoincrement: metadata.autoincrement,
            persistent: metadata.persistent,
            converter,
        })
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn column_name(&self) -> &str {
        &self.column_name
    }

    pub fn declared_type(&self) -> &DeclaredType {
        &self.declared_type
    }

    /// The storage type, or `None` for a non-persistent field.
    pub fn storage_type(&self) -> Option<StorageType> {
        self.storage_type
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_insertable(&self) -> bool {
        self.insertable
    }

    pub fn is_updatable(&self) -> bool {
        self.updatable
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn is_autoincrement(&self) -> bool {
        self.autoincrement
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn converter(&self) -> &FieldConverter {
        &self.converter
    }

    pub fn to_storage(&self, value: FieldValue) -> Result<StorageValue, ConversionError> {
        if value.is_null() {
            return Ok(StorageValue::Null);
        }
        self.converter.to_storage(value)
    }

    pub fn to_native(
        &self,
        value: StorageValue,
        types: &dyn TypeResolver,
    ) -> Result<FieldValue, ConversionError> {
        if value.is_null() {
            return Ok(FieldValue::Null);
        }
        self.converter.to_native(value, types)
    }

    /// Read this field from an entity, converted to storage form.
    pub fn read<E: Entity>(&self, entity: &E) -> Result<StorageValue, ConversionError> {
        let value =
            entity
                .field_value(&self.field_name)
                .ok_or_else(|| ConversionError::UnknownField {
                    entity: E::entity_type().name(),
                    field: self.field_name.clone(),
                })?;
        self.to_storage(value)
    }

    /// Whether `entity` has this field at all.  Superclass instances lack the fields merged in from subclasses.
    pub fn is_carried_by<E: Entity>(&self, entity: &E) -> bool {
        entity.field_value(&self.field_name).is_some()
    }

    /// Convert a stored value and write it into an entity.
    pub fn write<E: Entity>(
        &self,
        entity: &mut E,
        value: StorageValue,
        types: &dyn TypeResolver,
    ) -> Result<(), ConversionError> {
        let value = self.to_native(value, types)?;
        entity.set_field_value(&self.field_name, value)
    }
}
