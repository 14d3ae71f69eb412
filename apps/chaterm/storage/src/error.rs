//! Custom error types for the Chaterm storage engine
//!
//! This module provides a unified error type that is used by every part of
//! the bootstrap pipeline and can be handed back to the UI as a string.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::db::models::StoreKind;

/// Main error type for storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Missing or non-positive user identifier
    #[error("Invalid user: {0}")]
    InvalidUser(String),

    /// The packaged seed database could not be found
    #[error("Seed database for {kind} store not found (searched: {searched:?})")]
    SeedMissing {
        kind: StoreKind,
        searched: Vec<PathBuf>,
    },

    /// A single schema migration step failed
    #[error("Schema step '{step}' failed: {source}")]
    SchemaStep {
        step: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// The renderer did not answer a legacy data request in time
    #[error("Timed out after {timeout_ms}ms waiting for legacy data '{source_name}'")]
    BridgeTimeout { source_name: String, timeout_ms: u64 },

    /// The renderer answered a legacy data request with an error marker
    #[error("Renderer failed to provide legacy data '{source_name}': {message}")]
    BridgeRemote {
        source_name: String,
        message: String,
    },

    /// The response channel was dropped before an answer arrived
    #[error("Bridge closed while waiting for legacy data '{0}'")]
    BridgeClosed(String),

    /// Post-migration invariant violated
    #[error("Validation error: {0}")]
    Validation(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO-related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Mutex lock errors
    #[error("Lock error: {0}")]
    Lock(String),

    /// A background task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(String),

    /// An error shared between every caller of one initialization
    #[error(transparent)]
    Shared(Arc<StorageError>),
}

impl StorageError {
    /// Create an invalid user error
    pub fn invalid_user(msg: impl Into<String>) -> Self {
        Self::InvalidUser(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a lock error
    pub fn lock(msg: impl Into<String>) -> Self {
        Self::Lock(msg.into())
    }

    /// Create a task error
    pub fn task(msg: impl Into<String>) -> Self {
        Self::Task(msg.into())
    }

    /// Unwrap a shared error if this caller holds the last reference to it.
    pub fn from_shared(err: Arc<StorageError>) -> Self {
        match Arc::try_unwrap(err) {
            Ok(inner) => inner,
            Err(shared) => Self::Shared(shared),
        }
    }

    /// Look through `Shared` to the error that actually happened.
    pub fn root(&self) -> &StorageError {
        match self {
            Self::Shared(inner) => inner.root(),
            other => other,
        }
    }
}

/// Convert StorageError to String for the UI boundary
impl From<StorageError> for String {
    fn from(err: StorageError) -> Self {
        err.to_string()
    }
}

/// Result type alias using StorageError
pub type Result<T> = std::result::Result<T, StorageError>;

/// Serialize StorageError as its message
impl serde::Serialize for StorageError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
