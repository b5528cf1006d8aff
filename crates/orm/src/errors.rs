/// Problems with how an entity type is mapped.
///
/// These are raised while the descriptor registry is being built and abort initialization: a type which fails here is
/// never half-mapped.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MappingError {
    #[error("Field {entity}.{field} has type {declared_type}, which is not mapped yet")]
    UnmappedFieldType {
        entity: String,
        field: String,
        declared_type: String,
    },

    #[error("Field {entity}.{field} has no storage type mapped")]
    NoStorageType { entity: String, field: String },

    #[error("Field {entity}.{field} must be an INTEGER to be AUTOINCREMENT")]
    AutoincrementNotInteger { entity: String, field: String },

    #[error("Primary key not found for entity {entity}")]
    PrimaryKeyNotFound { entity: String },

    #[error("Entity {entity} declares more than one primary key ({first} and {second})")]
    MultiplePrimaryKeys {
        entity: String,
        first: String,
        second: String,
    },

    #[error("Entity {entity} maps column {column} more than once")]
    DuplicateColumn { entity: String, column: String },

    #[error("{what} {identifier:?} of entity {entity} is not a valid SQL identifier")]
    InvalidIdentifier {
        entity: String,
        what: &'static str,
        identifier: String,
    },

    #[error("Entity {entity} is a single-table subclass, but its superclass {superclass} is not mapped")]
    SuperclassNotMapped { entity: String, superclass: String },

    #[error("Type {entity} is a mapped superclass, not an entity")]
    NotAnEntity { entity: String },
}

/// Failures converting one value between its native and storage representations.
///
/// These only ever fail the read or write of the record being converted.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConversionError {
    #[error("Ordinal {ordinal} is out of range for enum {enum_name}, which has {count} members")]
    OrdinalOutOfRange {
        enum_name: &'static str,
        ordinal: i64,
        count: usize,
    },

    #[error("{name:?} is not a member of enum {enum_name}")]
    UnknownEnumMember {
        enum_name: &'static str,
        name: String,
    },

    #[error("Could not parse {text:?} as a `yyyy-MM-dd HH:mm:ss` timestamp: {source}")]
    MalformedDateTime {
        text: String,
        source: time::error::Parse,
    },

    #[error("Could not format a timestamp: {0}")]
    DateTimeFormat(#[from] time::error::Format),

    #[error("Type {0:?} saved in the database was not found")]
    TypeNotFound(String),

    #[error("Expected {expected} but got {got}")]
    TypeMismatch {
        expected: &'static str,
        got: &'static str,
    },

    #[error("Value {value} does not fit in {target}")]
    OutOfRange { value: i64, target: &'static str },

    #[error("Entity {entity} has no field named {field}")]
    UnknownField { entity: &'static str, field: String },
}

/// Misuse of the query API by the caller.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum QueryUsageError {
    #[error("The where clause cannot be empty when looking up a single {entity}")]
    EmptyWhereClause { entity: String },

    #[error("The statement returned {count} rows for {entity}, but at most one was expected")]
    MultipleResults { entity: String, count: usize },

    #[error("end_transaction was called without a matching start_transaction")]
    NoActiveTransaction,

    #[error("The primary key of {entity} is null")]
    NullPrimaryKey { entity: String },

    #[error("{alias:?} is not a valid database alias")]
    InvalidAlias { alias: String },

    #[error("Databases cannot be attached or detached while a transaction is open")]
    AttachInTransaction,
}

/// Something that was asked for is not known to the registry.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LookupError {
    #[error("Entity {0} isn't mapped. Check the persistence configuration")]
    EntityNotMapped(String),

    #[error("Entity {entity} isn't mapped by persistence unit {unit}")]
    NotInUnit { entity: String, unit: String },

    #[error("Entity {entity} has no field named {field}")]
    FieldNotFound { entity: String, field: String },

    #[error("Entity {entity} has no join table named {join_table}")]
    JoinTableNotFound { entity: String, join_table: String },

    #[error("The descriptor registry has not been initialized")]
    RegistryNotInitialized,

    #[error("Derived field lists of {entity} were requested before inheritance was merged")]
    NotMerged { entity: String },

    #[error("Column {column} is not part of the result set")]
    ColumnNotFound { column: String },

    #[error("Operation {operation} has no column list")]
    NoColumnsForOperation { operation: String },
}

/// Problems loading the persistence configuration.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("Could not read the persistence descriptor: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not parse the persistence descriptor: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Persistence unit {0} is not defined")]
    UnknownUnit(String),

    #[error("Persistence unit {0} is defined more than once")]
    DuplicateUnit(String),

    #[error("Type {type_name} is listed in unit {unit} but is not in the catalog")]
    TypeNotInCatalog { unit: String, type_name: String },
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Query usage error: {0}")]
    QueryUsage(#[from] QueryUsageError),

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
