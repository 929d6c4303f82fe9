//! Error types for the Huntboard storage engine.
//!
//! The engine uses a hierarchical error system:
//! - `StoreError` is the top-level error returned by all public APIs
//! - Specific error types (`NotFoundError`, `CodecError`, `RemoteError`,
//!   `StorageError`, `ValidationError`) provide detail
//!
//! # Error Handling Pattern
//! ```rust,ignore
//! use huntstore::{SessionProvider, Config, Result};
//!
//! async fn example(provider: &SessionProvider) -> Result<()> {
//!     let session = provider.get("alice", None).await?;
//!     // ... operations that may fail ...
//!     Ok(())
//! }
//! ```
//!
//! Absence (`NotFound`) is expected and surfaced to callers verbatim.
//! Transport errors are confined to the sync worker; request handlers only
//! ever see cache results or structured absence errors.

use thiserror::Error;

/// Result type alias for storage engine operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Top-level error enum for all storage engine operations.
///
/// This is the only error type returned by public APIs.
/// Use pattern matching to handle specific error cases.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Requested entity not found.
    #[error("{0}")]
    NotFound(#[from] NotFoundError),

    /// Document encode/decode failure (compression, structure, checksum).
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Remote backend failure (transport, authorization, offline stub).
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Local cache storage failure (I/O, corruption, transactions).
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Input validation error.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Configuration error.
    #[error("Configuration error: {reason}")]
    Config {
        /// Description of what's wrong with the configuration.
        reason: String,
    },

    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A request handler required a session but none was bound.
    #[error("No storage session bound to the request")]
    SessionMissing,
}

impl StoreError {
    /// Creates a configuration error with the given reason.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Returns true if this is a "not found" error (including `NoMatches`).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if this is a document corruption error.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Codec(_))
    }

    /// Returns true if this is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if the sync worker may retry after this error.
    ///
    /// Only transport failures are retryable. Authorization failures,
    /// corruption, and absence never are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Remote(RemoteError::Unavailable { .. }))
    }

    /// Returns true if this error disables a sync loop until it is
    /// re-armed (e.g. by a credential refresh).
    pub fn disables_sync(&self) -> bool {
        matches!(
            self,
            Self::Remote(RemoteError::Unauthorized) | Self::Remote(RemoteError::NotImplemented)
        ) || self.is_corrupt()
    }
}

/// Not found errors for specific entity types.
///
/// These are expected outcomes, surfaced to callers verbatim and never
/// retried.
#[derive(Debug, Error)]
pub enum NotFoundError {
    /// No profile stored for the user.
    #[error("Profile not found for user {0}")]
    Profile(String),

    /// Company with the given id not found in the user's partition.
    #[error("Company not found: {0}")]
    Company(i64),

    /// Job with the given id not found in the user's partition.
    #[error("Job not found: {0}")]
    Job(i64),

    /// Match result with the given id not found in the user's partition.
    #[error("Match not found: {0}")]
    Match(i64),

    /// The user has no match results recorded at all.
    #[error("No matches recorded for user {0}")]
    NoMatches(String),
}

impl NotFoundError {
    /// Creates a profile not found error.
    pub fn profile(user: impl Into<String>) -> Self {
        Self::Profile(user.into())
    }

    /// Creates a no-matches error.
    pub fn no_matches(user: impl Into<String>) -> Self {
        Self::NoMatches(user.into())
    }
}

/// Document codec errors.
///
/// Every variant means the document bytes must not be trusted; the caller
/// must never overwrite the remote copy with an unreadable document.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The gzip stream could not be read or written.
    #[error("Corrupt document: compression stream failed: {0}")]
    Compression(String),

    /// The decompressed payload is not a valid user document.
    #[error("Corrupt document: malformed structure: {0}")]
    Malformed(String),

    /// The embedded checksum does not match the recomputed digest.
    #[error("Corrupt document: checksum mismatch (expected {expected}, computed {computed})")]
    ChecksumMismatch {
        /// Digest stored in the document.
        expected: String,
        /// Digest recomputed over the document body.
        computed: String,
    },
}

impl CodecError {
    /// Creates a compression error with the given message.
    pub fn compression(msg: impl Into<String>) -> Self {
        Self::Compression(msg.into())
    }

    /// Creates a malformed-structure error with the given message.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

/// Remote backend errors.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Transport-level failure (connection, timeout, 5xx). Retryable.
    #[error("Remote unavailable: {reason}")]
    Unavailable {
        /// Description of the transport failure.
        reason: String,
    },

    /// The per-user credential was rejected. Fatal to the sync loop.
    #[error("Remote rejected the user credential")]
    Unauthorized,

    /// The offline stub backend: remote syncing is disabled.
    #[error("Remote backend not implemented")]
    NotImplemented,
}

impl RemoteError {
    /// Creates a transport failure with the given reason.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        RemoteError::unavailable(err.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Remote(RemoteError::from(err))
    }
}

/// Local cache storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Cache file or data is corrupted.
    #[error("Cache corrupted: {0}")]
    Corrupted(String),

    /// Cache database is locked by another process.
    #[error("Cache database is locked by another writer")]
    DatabaseLocked,

    /// Transaction failed (commit, rollback, etc.).
    #[error("Transaction failed: {0}")]
    Transaction(String),

    /// Serialization/deserialization of a cache value failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error from the redb storage engine.
    #[error("Storage engine error: {0}")]
    Redb(String),

    /// Cache schema version doesn't match expected version.
    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version.
        expected: u32,
        /// Actual schema version found in the cache.
        found: u32,
    },
}

impl StorageError {
    /// Creates a corruption error with the given message.
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Self::Corrupted(msg.into())
    }

    /// Creates a transaction error with the given message.
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Creates a serialization error with the given message.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Creates a redb error with the given message.
    pub fn redb(msg: impl Into<String>) -> Self {
        Self::Redb(msg.into())
    }
}

// Conversions from redb error types
impl From<redb::Error> for StorageError {
    fn from(err: redb::Error) -> Self {
        StorageError::Redb(err.to_string())
    }
}

impl From<redb::DatabaseError> for StorageError {
    fn from(err: redb::DatabaseError) -> Self {
        StorageError::Redb(err.to_string())
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(err: redb::TransactionError) -> Self {
        StorageError::Transaction(err.to_string())
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(err: redb::CommitError) -> Self {
        StorageError::Transaction(format!("Commit failed: {}", err))
    }
}

impl From<redb::TableError> for StorageError {
    fn from(err: redb::TableError) -> Self {
        StorageError::Redb(format!("Table error: {}", err))
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(err: redb::StorageError) -> Self {
        StorageError::Redb(format!("Storage error: {}", err))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

// Also allow direct conversion to StoreError for convenience
impl From<redb::Error> for StoreError {
    fn from(err: redb::Error) -> Self {
        StoreError::Storage(StorageError::from(err))
    }
}

impl From<redb::DatabaseError> for StoreError {
    fn from(err: redb::DatabaseError) -> Self {
        StoreError::Storage(StorageError::from(err))
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(err: redb::TransactionError) -> Self {
        StoreError::Storage(StorageError::from(err))
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(err: redb::CommitError) -> Self {
        StoreError::Storage(StorageError::from(err))
    }
}

impl From<redb::TableError> for StoreError {
    fn from(err: redb::TableError) -> Self {
        StoreError::Storage(StorageError::from(err))
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(err: redb::StorageError) -> Self {
        StoreError::Storage(StorageError::from(err))
    }
}

/// Validation errors for input data.
///
/// These indicate programmer errors at the call boundary; the engine fails
/// fast and mutates nothing.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("Required field missing: {field}")]
    RequiredField {
        /// Name of the missing field.
        field: String,
    },

    /// A field has an invalid value.
    #[error("Invalid field '{field}': {reason}")]
    InvalidField {
        /// Name of the invalid field.
        field: String,
        /// Why the value is invalid.
        reason: String,
    },

    /// An entity references another entity that is absent from the partition.
    #[error("Dangling reference in '{field}': no {entity} with id {id}")]
    DanglingReference {
        /// Name of the referencing field.
        field: String,
        /// Kind of entity the field points at.
        entity: String,
        /// The id that failed to resolve.
        id: i64,
    },
}

impl ValidationError {
    /// Creates a required field error.
    pub fn required_field(field: impl Into<String>) -> Self {
        Self::RequiredField {
            field: field.into(),
        }
    }

    /// Creates an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a dangling reference error.
    pub fn dangling_reference(
        field: impl Into<String>,
        entity: impl Into<String>,
        id: i64,
    ) -> Self {
        Self::DanglingReference {
            field: field.into(),
            entity: entity.into(),
            id,
        }
    }
}
