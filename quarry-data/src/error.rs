use quarry_core::ConfigError;

/// Errors raised by the data mapper.
///
/// Optimistic update conflicts are not errors: `update`/`save` report them
/// as `Ok(false)`.
#[derive(Debug)]
pub enum StorageError {
    Config(ConfigError),
    DomainNotConfigured(String),
    UnknownAdapter(String),
    UnknownPlugin(String),
    InvalidDefinition { type_name: String, item: String },
    UnknownType(String),
    MissingPrimaryKey(String),
    EntityNotFound { type_name: String, cond: String },
    CompositeKeyUnsupported { type_name: String, operation: &'static str },
    UnknownProperty { type_name: String, prop: String },
    IncompleteProperty { type_name: String, prop: String },
    ReadOnly { type_name: String, prop: Option<String> },
    NonPersistable(String),
    NotSaved(String),
    UnexpectedRowCount { type_name: String, operation: &'static str, count: u64 },
    Inconsistent(String),
    NotImplemented { type_name: String, method: String },
    InvalidArgument(String),
    Query(String),
    Database(Box<dyn std::error::Error + Send + Sync>),
    Listener(String),
}

impl StorageError {
    /// Wrap a driver error.
    pub fn database(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StorageError::Database(Box::new(err))
    }

    pub(crate) fn invalid_definition(type_name: &str, item: impl Into<String>) -> Self {
        StorageError::InvalidDefinition {
            type_name: type_name.to_string(),
            item: item.into(),
        }
    }

    pub(crate) fn unknown_property(type_name: &str, prop: &str) -> Self {
        StorageError::UnknownProperty {
            type_name: type_name.to_string(),
            prop: prop.to_string(),
        }
    }

    pub(crate) fn incomplete_property(type_name: &str, prop: &str) -> Self {
        StorageError::IncompleteProperty {
            type_name: type_name.to_string(),
            prop: prop.to_string(),
        }
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Config(err) => write!(f, "Configuration error: {err}"),
            StorageError::DomainNotConfigured(key) => {
                write!(f, "Storage domain '{key}' is not configured")
            }
            StorageError::UnknownAdapter(name) => write!(f, "Unknown storage adapter '{name}'"),
            StorageError::UnknownPlugin(name) => write!(f, "Unknown model plugin '{name}'"),
            StorageError::InvalidDefinition { type_name, item } => {
                write!(f, "Invalid definition of '{type_name}': {item}")
            }
            StorageError::UnknownType(name) => write!(f, "Entity type '{name}' is not defined"),
            StorageError::MissingPrimaryKey(name) => {
                write!(f, "Entity type '{name}' declares no primary key")
            }
            StorageError::EntityNotFound { type_name, cond } => {
                write!(f, "Entity '{type_name}' not found: {cond}")
            }
            StorageError::CompositeKeyUnsupported { type_name, operation } => write!(
                f,
                "'{operation}' is not supported for '{type_name}' (composite primary key)"
            ),
            StorageError::UnknownProperty { type_name, prop } => {
                write!(f, "Unknown property '{type_name}.{prop}'")
            }
            StorageError::IncompleteProperty { type_name, prop } => {
                write!(f, "Property '{type_name}.{prop}' has no value")
            }
            StorageError::ReadOnly { type_name, prop: Some(prop) } => {
                write!(f, "Property '{type_name}.{prop}' is read-only")
            }
            StorageError::ReadOnly { type_name, prop: None } => {
                write!(f, "Entity type '{type_name}' is read-only")
            }
            StorageError::NonPersistable(name) => {
                write!(f, "Entity type '{name}' cannot be persisted")
            }
            StorageError::NotSaved(name) => write!(f, "Entity '{name}' has not been saved yet"),
            StorageError::UnexpectedRowCount { type_name, operation, count } => write!(
                f,
                "'{operation}' on '{type_name}' affected {count} rows, expected at most one"
            ),
            StorageError::Inconsistent(msg) => write!(f, "Inconsistent storage state: {msg}"),
            StorageError::NotImplemented { type_name, method } => {
                write!(f, "Method '{type_name}::{method}' is not implemented")
            }
            StorageError::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            StorageError::Query(msg) => write!(f, "Query error: {msg}"),
            StorageError::Database(err) => write!(f, "Database error: {err}"),
            StorageError::Listener(msg) => write!(f, "Event listener failed: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Config(err) => Some(err),
            StorageError::Database(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<ConfigError> for StorageError {
    fn from(err: ConfigError) -> Self {
        StorageError::Config(err)
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
