//! Per-kind value conversion.
//!
//! Each field gets exactly one converter, chosen from its declared type when the descriptor is built.  Null never
//! reaches a converter: descriptors pass it through unchanged in both directions.
use time::format_description::FormatItem;
use time::macros::format_description;
use time::PrimitiveDateTime;

use crate::entity::TypeResolver;
use crate::errors::ConversionError;
use crate::metadata::EnumMode;
use crate::value::{EnumDeclaration, FieldValue, StorageType, StorageValue};

/// `yyyy-MM-dd HH:mm:ss`.  There is no locale or timezone involved.
pub const DATE_TIME_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

#[enum_dispatch::enum_dispatch(FieldConverter)]
pub trait FieldConversion {
    /// Convert a non-null native value to its storage form.
    fn to_storage(&self, value: FieldValue) -> Result<StorageValue, ConversionError>;

    /// Convert a non-null stored value to its native form.
    fn to_native(
        &self,
        value: StorageValue,
        types: &dyn TypeResolver,
    ) -> Result<FieldValue, ConversionError>;
}

#[enum_dispatch::enum_dispatch]
#[derive(Clone, Debug)]
pub enum FieldConverter {
    Default(DefaultConverter),
    Boolean(BooleanConverter),
    Enum(EnumConverter),
    DateTime(DateTimeConverter),
    ClassReference(ClassReferenceConverter),
}

fn native_mismatch(expected: &'static str, got: &FieldValue) -> ConversionError {
    ConversionError::TypeMismatch {
        expected,
        got: got.type_label(),
    }
}

fn storage_mismatch(expected: &'static str, got: &StorageValue) -> ConversionError {
    ConversionError::TypeMismatch {
        expected,
        got: got.type_label(),
    }
}

/// Identity conversion for values sqlite stores natively.
#[derive(Clone, Debug)]
pub struct DefaultConverter {
    /// `None` only for non-persistent fields, which never convert anything.
    pub(crate) storage_type: Option<StorageType>,
}

impl FieldConversion for DefaultConverter {
    fn to_storage(&self, value: FieldValue) -> Result<StorageValue, ConversionError> {
        match value {
            FieldValue::Null => Ok(StorageValue::Null),
            FieldValue::Integer(i) if self.storage_type == Some(StorageType::Real) => {
                Ok(StorageValue::Real(i as f64))
            }
            FieldValue::Integer(i) => Ok(StorageValue::Integer(i)),
            FieldValue::Real(r) => Ok(StorageValue::Real(r)),
            FieldValue::Text(t) => Ok(StorageValue::Text(t)),
            FieldValue::Blob(b) => Ok(StorageValue::Blob(b)),
            other => Err(native_mismatch("a plain value", &other)),
        }
    }

    fn to_native(
        &self,
        value: StorageValue,
        _types: &dyn TypeResolver,
    ) -> Result<FieldValue, ConversionError> {
        Ok(match value {
            StorageValue::Null => FieldValue::Null,
            // sqlite hands back whole reals as integers when the column has no declared affinity.
            StorageValue::Integer(i) if self.storage_type == Some(StorageType::Real) => {
                FieldValue::Real(i as f64)
            }
            StorageValue::Integer(i) => FieldValue::Integer(i),
            StorageValue::Real(r) => FieldValue::Real(r),
            StorageValue::Text(t) => FieldValue::Text(t),
            StorageValue::Blob(b) => FieldValue::Blob(b),
        })
    }
}

/// `true`/`false` as `1`/`0`.
#[derive(Clone, Debug)]
pub struct BooleanConverter;

impl FieldConversion for BooleanConverter {
    fn to_storage(&self, value: FieldValue) -> Result<StorageValue, ConversionError> {
        match value {
            FieldValue::Bool(b) => Ok(StorageValue::Integer(b as i64)),
            other => Err(native_mismatch("bool", &other)),
        }
    }

    fn to_native(
        &self,
        value: StorageValue,
        _types: &dyn TypeResolver,
    ) -> Result<FieldValue, ConversionError> {
        // Only 1 is true.
        match value {
            StorageValue::Integer(i) => Ok(FieldValue::Bool(i == 1)),
            StorageValue::Text(t) => Ok(FieldValue::Bool(t.trim() == "1")),
            other => Err(storage_mismatch("INTEGER", &other)),
        }
    }
}

/// Enum members by ordinal or by name.
#[derive(Clone, Debug)]
pub struct EnumConverter {
    pub(crate) declaration: EnumDeclaration,
    pub(crate) mode: EnumMode,
}

impl EnumConverter {
    fn member(&self, name: &str) -> Result<(usize, &'static str), ConversionError> {
        self.declaration
            .variants
            .iter()
            .enumerate()
            .find(|(_, v)| **v == name)
            .map(|(i, v)| (i, *v))
            .ok_or_else(|| ConversionError::UnknownEnumMember {
                enum_name: self.declaration.type_name,
                name: name.to_string(),
            })
    }

    fn by_ordinal(&self, ordinal: i64) -> Result<FieldValue, ConversionError> {
        usize::try_from(ordinal)
            .ok()
            .and_then(|i| self.declaration.variants.get(i))
            .map(|v| FieldValue::Enum(v))
            .ok_or(ConversionError::OrdinalOutOfRange {
                enum_name: self.declaration.type_name,
                ordinal,
                count: self.declaration.variants.len(),
            })
    }
}

impl FieldConversion for EnumConverter {
    fn to_storage(&self, value: FieldValue) -> Result<StorageValue, ConversionError> {
        let name = match value {
            FieldValue::Enum(name) => name.to_string(),
            FieldValue::Text(name) => name,
            other => return Err(native_mismatch("enum", &other)),
        };
        let (ordinal, name) = self.member(&name)?;

        Ok(match self.mode {
            EnumMode::Ordinal => StorageValue::Integer(ordinal as i64),
            EnumMode::String => StorageValue::Text(name.to_string()),
        })
    }

    fn to_native(
        &self,
        value: StorageValue,
        _types: &dyn TypeResolver,
    ) -> Result<FieldValue, ConversionError> {
        match (self.mode, value) {
            (EnumMode::Ordinal, StorageValue::Integer(i)) => self.by_ordinal(i),
            (EnumMode::Ordinal, StorageValue::Text(t)) => {
                let ordinal = t.trim().parse::<i64>().map_err(|_| {
                    ConversionError::TypeMismatch {
                        expected: "an enum ordinal",
                        got: "TEXT",
                    }
                })?;
                self.by_ordinal(ordinal)
            }
            (EnumMode::String, StorageValue::Text(t)) => {
                self.member(&t).map(|(_, name)| FieldValue::Enum(name))
            }
            (EnumMode::Ordinal, other) => Err(storage_mismatch("INTEGER", &other)),
            (EnumMode::String, other) => Err(storage_mismatch("TEXT", &other)),
        }
    }
}

/// Timestamps as [DATE_TIME_FORMAT] text, to the second.
#[derive(Clone, Debug)]
pub struct DateTimeConverter;

impl FieldConversion for DateTimeConverter {
    fn to_storage(&self, value: FieldValue) -> Result<StorageValue, ConversionError> {
        match value {
            FieldValue::DateTime(d) => Ok(StorageValue::Text(d.format(DATE_TIME_FORMAT)?)),
            other => Err(native_mismatch("datetime", &other)),
        }
    }

    fn to_native(
        &self,
        value: StorageValue,
        _types: &dyn TypeResolver,
    ) -> Result<FieldValue, ConversionError> {
        match value {
            StorageValue::Text(text) => match PrimitiveDateTime::parse(&text, DATE_TIME_FORMAT) {
                Ok(d) => Ok(FieldValue::DateTime(d)),
                Err(source) => Err(ConversionError::MalformedDateTime { text, source }),
            },
            other => Err(storage_mismatch("TEXT", &other)),
        }
    }
}

/// Type references as fully qualified type names.
#[derive(Clone, Debug)]
pub struct ClassReferenceConverter;

impl FieldConversion for ClassReferenceConverter {
    fn to_storage(&self, value: FieldValue) -> Result<StorageValue, ConversionError> {
        match value {
            FieldValue::TypeRef(t) => Ok(StorageValue::Text(t.name().to_string())),
            other => Err(native_mismatch("type reference", &other)),
        }
    }

    fn to_native(
        &self,
        value: StorageValue,
        types: &dyn TypeResolver,
    ) -> Result<FieldValue, ConversionError> {
        match value {
            StorageValue::Text(name) => types
                .resolve_type(&name)
                .map(FieldValue::TypeRef)
                .ok_or(ConversionError::TypeNotFound(name)),
            other => Err(storage_mismatch("TEXT", &other)),
        }
    }
}
