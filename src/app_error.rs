use std::fmt::{Display, Formatter};

use lmdb::Error as LmdbError;
use serde_json::Error as SerdeError;

/// Uniform result wrapper returned by every store, repository and queue operation.
pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: no document '{id}' in '{collection}'")]
    NotFound { collection: String, id: String },

    #[error("Internal error: {context}")]
    Internal {
        context: String,
        #[source]
        source: StoreFailure,
    },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Version conflict on '{collection}/{id}': expected {expected}, found {actual}")]
    VersionConflict {
        collection: String,
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Underlying cause kept on `AppError::Internal` for diagnostics.
#[derive(Debug)]
pub enum StoreFailure {
    Lmdb(LmdbError),
    Serialization(SerdeError),
    Io(String),
    Task(String),
    Nested(Box<AppError>),
}

impl Display for StoreFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreFailure::Lmdb(err) => write!(f, "LMDB error: {}", err),
            StoreFailure::Serialization(err) => write!(f, "JSON serialization error: {}", err),
            StoreFailure::Io(msg) => write!(f, "IO error: {}", msg),
            StoreFailure::Task(msg) => write!(f, "Background task error: {}", msg),
            StoreFailure::Nested(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for StoreFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreFailure::Lmdb(err) => Some(err),
            StoreFailure::Serialization(err) => Some(err),
            StoreFailure::Nested(err) => Some(err.as_ref()),
            StoreFailure::Io(_) | StoreFailure::Task(_) => None,
        }
    }
}

impl From<LmdbError> for AppError {
    fn from(err: LmdbError) -> Self {
        let context = match err {
            LmdbError::MapFull => "database map is full".to_string(),
            LmdbError::Corrupted => "database is corrupted".to_string(),
            LmdbError::DbsFull => "too many named collections".to_string(),
            _ => "database operation failed".to_string(),
        };
        AppError::Internal {
            context,
            source: StoreFailure::Lmdb(err),
        }
    }
}

impl From<SerdeError> for AppError {
    fn from(err: SerdeError) -> Self {
        AppError::Internal {
            context: "document could not be (de)serialized".to_string(),
            source: StoreFailure::Serialization(err),
        }
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal {
            context: "storage task did not complete".to_string(),
            source: StoreFailure::Task(err.to_string()),
        }
    }
}

impl AppError {
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        AppError::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Wraps any error as `Internal`, keeping it as the diagnostic cause.
    pub fn internal(context: impl Into<String>, cause: AppError) -> Self {
        AppError::Internal {
            context: context.into(),
            source: StoreFailure::Nested(Box::new(cause)),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound { .. })
    }
}
