//! Error types for `complaint_store`.
//!
//! Fatal failures (lock, storage init, bootstrap) surface as [`StoreError`].
//! Non-fatal migration and shutdown failures never become errors; they are
//! recorded in the reports returned by the storage layer.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The lock directory or lock file could not be created or opened.
    #[error("lock error at {}: {source}", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A data/upload directory could not be created or the database could not be opened.
    #[error("storage init failed: {message}")]
    StorageInit {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transactional schema creation or seeding failed (already rolled back).
    #[error("schema bootstrap failed: {0}")]
    Bootstrap(#[source] rusqlite::Error),

    /// Raised only when a caller opts into treating failed migrations as fatal.
    #[error("{0} migration step(s) failed")]
    MigrationIncomplete(usize),

    #[error("no open connection in this unit of work")]
    NotOpen,

    #[error("invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn storage_init(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::StorageInit {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Lock { .. } => ErrorCode::LockError,
            Self::StorageInit { .. } => ErrorCode::StorageInitError,
            Self::Bootstrap(_) => ErrorCode::BootstrapError,
            Self::MigrationIncomplete(_) => ErrorCode::MigrationIncomplete,
            Self::NotOpen => ErrorCode::NotOpen,
            Self::InvalidIdentifier(_) => ErrorCode::InvalidIdentifier,
            Self::Config(_) | Self::Yaml(_) => ErrorCode::ConfigError,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::InternalError,
        }
    }

    /// Whether retrying the same unit of work may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Lock { .. } | Self::Io(_) | Self::MigrationIncomplete(_) => true,
            Self::Database(err) => matches!(
                err.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }
}

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    LockError,
    StorageInitError,
    BootstrapError,
    MigrationIncomplete,
    NotOpen,
    InvalidIdentifier,
    ConfigError,
    DatabaseError,
    IoError,
    InternalError,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LockError => "LOCK_ERROR",
            Self::StorageInitError => "STORAGE_INIT_ERROR",
            Self::BootstrapError => "BOOTSTRAP_ERROR",
            Self::MigrationIncomplete => "MIGRATION_INCOMPLETE",
            Self::NotOpen => "NOT_OPEN",
            Self::InvalidIdentifier => "INVALID_IDENTIFIER",
            Self::ConfigError => "CONFIG_ERROR",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::IoError => "IO_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Error envelope handed to callers outside the storage layer.
#[derive(Debug, Clone, Serialize)]
pub struct StructuredError {
    pub code: ErrorCode,
    pub message: String,
    pub hint: Option<String>,
    pub retryable: bool,
}

impl StructuredError {
    /// Full detail, for operators and local CLI use.
    #[must_use]
    pub fn from_error(err: &StoreError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            hint: hint_for(err),
            retryable: err.is_retryable(),
        }
    }

    /// Generic message only; internal paths and SQL text are withheld.
    #[must_use]
    pub fn public(err: &StoreError) -> Self {
        Self {
            code: err.code(),
            message: "internal server error".to_string(),
            hint: None,
            retryable: err.is_retryable(),
        }
    }
}

impl From<&StoreError> for StructuredError {
    fn from(err: &StoreError) -> Self {
        Self::from_error(err)
    }
}

fn hint_for(err: &StoreError) -> Option<String> {
    match err {
        StoreError::Lock { path, .. } => Some(format!(
            "check that {} is writable by this process",
            path.display()
        )),
        StoreError::StorageInit { .. } => {
            Some("check the data and upload directory permissions".to_string())
        }
        StoreError::NotOpen => Some("call open() before issuing queries".to_string()),
        StoreError::Config(_) | StoreError::Yaml(_) => {
            Some("check complaints.yaml and COMPLAINTS_* environment variables".to_string())
        }
        _ => None,
    }
}
