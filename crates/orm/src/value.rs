//! Values, on both sides of the mapping.
//!
//! A [FieldValue] is what an entity holds: a bool is a bool, an enum is the name of one of its members, and so on.  A
//! [StorageValue] is what sqlite holds, which is always one of its 5 dynamic storage classes.  Field converters (see
//! [crate::field]) translate between the two.
//!
//! Rust types participate by implementing [PersistentValue], which knows the [DeclaredType] of the field and how to
//! move a value of the type in and out of a [FieldValue].
use rusqlite::types::{ToSqlOutput, ValueRef};
use time::PrimitiveDateTime;

use crate::entity::EntityType;
use crate::errors::ConversionError;

/// The sqlite storage classes a column may be declared with.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, derive_more::Display)]
pub enum StorageType {
    #[display(fmt = "NULL")]
    Null,
    #[display(fmt = "INTEGER")]
    Integer,
    #[display(fmt = "REAL")]
    Real,
    #[display(fmt = "TEXT")]
    Text,
    #[display(fmt = "BLOB")]
    Blob,
}

/// A value as sqlite stores it.
#[derive(Clone, Debug, PartialEq)]
pub enum StorageValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl StorageValue {
    pub fn is_null(&self) -> bool {
        matches!(self, StorageValue::Null)
    }

    pub fn type_label(&self) -> &'static str {
        match self {
            StorageValue::Null => "NULL",
            StorageValue::Integer(_) => "INTEGER",
            StorageValue::Real(_) => "REAL",
            StorageValue::Text(_) => "TEXT",
            StorageValue::Blob(_) => "BLOB",
        }
    }

    /// Render the value as plain text, the way it is compared inside the transaction cache.
    pub fn to_text(&self) -> String {
        match self {
            StorageValue::Null => "NULL".to_string(),
            StorageValue::Integer(i) => i.to_string(),
            StorageValue::Real(r) => r.to_string(),
            StorageValue::Text(t) => t.clone(),
            StorageValue::Blob(b) => hex(b),
        }
    }

    /// Render the value as a SQL literal.
    ///
    /// Text is single-quoted with embedded quotes doubled, so this is safe to splice into a where clause.
    pub fn to_sql_literal(&self) -> String {
        match self {
            StorageValue::Null => "NULL".to_string(),
            StorageValue::Integer(i) => i.to_string(),
            StorageValue::Real(r) => r.to_string(),
            StorageValue::Text(t) => format!("'{}'", t.replace('\'', "''")),
            StorageValue::Blob(b) => format!("X'{}'", hex(b)),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

impl rusqlite::ToSql for StorageValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(match self {
            StorageValue::Null => ValueRef::Null,
            StorageValue::Integer(i) => ValueRef::Integer(*i),
            StorageValue::Real(r) => ValueRef::Real(*r),
            StorageValue::Text(t) => ValueRef::Text(t.as_bytes()),
            StorageValue::Blob(b) => ValueRef::Blob(b),
        }))
    }
}

impl From<rusqlite::types::Value> for StorageValue {
    fn from(value: rusqlite::types::Value) -> Self {
        use rusqlite::types::Value;

        match value {
            Value::Null => StorageValue::Null,
            Value::Integer(i) => StorageValue::Integer(i),
            Value::Real(r) => StorageValue::Real(r),
            Value::Text(t) => StorageValue::Text(t),
            Value::Blob(b) => StorageValue::Blob(b),
        }
    }
}

/// A value as an entity holds it.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    DateTime(PrimitiveDateTime),
    /// The name of an enum member.
    Enum(&'static str),
    /// A reference to a type.
    TypeRef(EntityType),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn type_label(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "bool",
            FieldValue::Integer(_) => "integer",
            FieldValue::Real(_) => "real",
            FieldValue::Text(_) => "text",
            FieldValue::Blob(_) => "blob",
            FieldValue::DateTime(_) => "datetime",
            FieldValue::Enum(_) => "enum",
            FieldValue::TypeRef(_) => "type reference",
        }
    }
}

/// The members of a persistent enum, in declaration order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EnumDeclaration {
    pub type_name: &'static str,
    pub variants: &'static [&'static str],
}

impl EnumDeclaration {
    pub fn ordinal_of(&self, name: &str) -> Option<usize> {
        self.variants.iter().position(|v| *v == name)
    }
}

/// The Rust-side type of a field, as far as the mapper cares.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DeclaredType {
    Bool,
    I16,
    I32,
    I64,
    F32,
    F64,
    Text,
    Blob,
    DateTime,
    /// A value naming another type.
    ClassReference,
    Enum(EnumDeclaration),
    /// A type the mapper has no conversion for.  Descriptors reject these.
    Unsupported(&'static str),
}

impl DeclaredType {
    pub fn name(&self) -> &'static str {
        match self {
            DeclaredType::Bool => "bool",
            DeclaredType::I16 => "i16",
            DeclaredType::I32 => "i32",
            DeclaredType::I64 => "i64",
            DeclaredType::F32 => "f32",
            DeclaredType::F64 => "f64",
            DeclaredType::Text => "String",
            DeclaredType::Blob => "Vec<u8>",
            DeclaredType::DateTime => "PrimitiveDateTime",
            DeclaredType::ClassReference => "EntityType",
            DeclaredType::Enum(e) => e.type_name,
            DeclaredType::Unsupported(n) => n,
        }
    }

    /// Whether values of this type are stored as sqlite integers without any conversion.
    pub fn is_integer(&self) -> bool {
        matches!(self, DeclaredType::I16 | DeclaredType::I32 | DeclaredType::I64)
    }
}

/// A Rust type which can be stored in a field.
pub trait PersistentValue: Sized {
    fn declared_type() -> DeclaredType;

    fn to_field_value(&self) -> FieldValue;

    fn from_field_value(value: FieldValue) -> Result<Self, ConversionError>;
}

/// An enum made only of unit variants, persisted by ordinal or by name.
///
/// Usually derived with `#[derive(PersistentEnum)]`, which also implements [PersistentValue].
pub trait PersistentEnum: Sized + 'static {
    const TYPE_NAME: &'static str;
    const VARIANTS: &'static [&'static str];

    fn variant_name(&self) -> &'static str;

    fn from_variant_name(name: &str) -> Option<Self>;

    fn declaration() -> EnumDeclaration {
        EnumDeclaration {
            type_name: Self::TYPE_NAME,
            variants: Self::VARIANTS,
        }
    }
}

/// Shared [PersistentValue::from_field_value] for enums.
pub fn enum_from_field_value<E: PersistentEnum>(value: FieldValue) -> Result<E, ConversionError> {
    match value {
        FieldValue::Enum(name) => {
            E::from_variant_name(name).ok_or_else(|| ConversionError::UnknownEnumMember {
                enum_name: E::TYPE_NAME,
                name: name.to_string(),
            })
        }
        FieldValue::Text(name) => {
            E::from_variant_name(&name).ok_or(ConversionError::UnknownEnumMember {
                enum_name: E::TYPE_NAME,
                name,
            })
        }
        other => Err(mismatch("enum", &other)),
    }
}

fn mismatch(expected: &'static str, got: &FieldValue) -> ConversionError {
    ConversionError::TypeMismatch {
        expected,
        got: got.type_label(),
    }
}

impl PersistentValue for bool {
    fn declared_type() -> DeclaredType {
        DeclaredType::Bool
    }

    fn to_field_value(&self) -> FieldValue {
        FieldValue::Bool(*self)
    }

    fn from_field_value(value: FieldValue) -> Result<Self, ConversionError> {
        match value {
            FieldValue::Bool(b) => Ok(b),
            other => Err(mismatch("bool", &other)),
        }
    }
}

macro_rules! integer_value {
    ($t: ty, $declared: ident) => {
        impl PersistentValue for $t {
            fn declared_type() -> DeclaredType {
                DeclaredType::$declared
            }

            fn to_field_value(&self) -> FieldValue {
                FieldValue::Integer(*self as i64)
            }

            fn from_field_value(value: FieldValue) -> Result<Self, ConversionError> {
                match value {
                    FieldValue::Integer(i) => {
                        <$t>::try_from(i).map_err(|_| ConversionError::OutOfRange {
                            value: i,
                            target: stringify!($t),
                        })
                    }
                    other => Err(mismatch(stringify!($t), &other)),
                }
            }
        }
    };
}

integer_value!(i16, I16);
integer_value!(i32, I32);
integer_value!(i64, I64);

macro_rules! real_value {
    ($t: ty, $declared: ident) => {
        impl PersistentValue for $t {
            fn declared_type() -> DeclaredType {
                DeclaredType::$declared
            }

            fn to_field_value(&self) -> FieldValue {
                FieldValue::Real(*self as f64)
            }

            fn from_field_value(value: FieldValue) -> Result<Self, ConversionError> {
                match value {
                    FieldValue::Real(r) => Ok(r as $t),
                    FieldValue::Integer(i) => Ok(i as $t),
                    other => Err(mismatch(stringify!($t), &other)),
                }
            }
        }
    };
}

real_value!(f32, F32);
real_value!(f64, F64);

impl PersistentValue for String {
    fn declared_type() -> DeclaredType {
        DeclaredType::Text
    }

    fn to_field_value(&self) -> FieldValue {
        FieldValue::Text(self.clone())
    }

    fn from_field_value(value: FieldValue) -> Result<Self, ConversionError> {
        match value {
            FieldValue::Text(t) => Ok(t),
            other => Err(mismatch("String", &other)),
        }
    }
}

impl PersistentValue for Vec<u8> {
    fn declared_type() -> DeclaredType {
        DeclaredType::Blob
    }

    fn to_field_value(&self) -> FieldValue {
        FieldValue::Blob(self.clone())
    }

    fn from_field_value(value: FieldValue) -> Result<Self, ConversionError> {
        match value {
            FieldValue::Blob(b) => Ok(b),
            other => Err(mismatch("Vec<u8>", &other)),
        }
    }
}

impl PersistentValue for PrimitiveDateTime {
    fn declared_type() -> DeclaredType {
        DeclaredType::DateTime
    }

    fn to_field_value(&self) -> FieldValue {
        FieldValue::DateTime(*self)
    }

    fn from_field_value(value: FieldValue) -> Result<Self, ConversionError> {
        match value {
            FieldValue::DateTime(d) => Ok(d),
            other => Err(mismatch("PrimitiveDateTime", &other)),
        }
    }
}

impl PersistentValue for EntityType {
    fn declared_type() -> DeclaredType {
        DeclaredType::ClassReference
    }

    fn to_field_value(&self) -> FieldValue {
        FieldValue::TypeRef(*self)
    }

    fn from_field_value(value: FieldValue) -> Result<Self, ConversionError> {
        match value {
            FieldValue::TypeRef(t) => Ok(t),
            other => Err(mismatch("EntityType", &other)),
        }
    }
}

impl<T: PersistentValue> PersistentValue for Option<T> {
    fn declared_type() -> DeclaredType {
        T::declared_type()
    }

    fn to_field_value(&self) -> FieldValue {
        match self {
            Some(x) => x.to_field_value(),
            None => FieldValue::Null,
        }
    }

    fn from_field_value(value: FieldValue) -> Result<Self, ConversionError> {
        match value {
            FieldValue::Null => Ok(None),
            v => Ok(Some(T::from_field_value(v)?)),
        }
    }
}
