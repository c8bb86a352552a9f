//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Every failure of the underlying medium surfaces as [`StorageError::Io`],
/// regardless of which operation produced it. Identifier errors are raised
/// before any I/O is attempted.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A database name did not match the restricted name pattern.
    #[error("invalid database name: {name:?}")]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// A document id (or one of its segments) was malformed.
    #[error("invalid document id: {id:?}")]
    InvalidId {
        /// The rejected id.
        id: String,
    },

    /// An I/O error occurred while reading, writing, moving or deleting.
    #[error("I/O error on {target}: {source}")]
    Io {
        /// The document or path the operation addressed.
        target: String,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The database lock could not be created or acquired.
    #[error("unable to lock {target}: {source}")]
    Lock {
        /// The lock file or scope.
        target: String,
        /// The underlying error.
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    /// Creates an I/O error for the given target.
    pub fn io(target: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            target: target.into(),
            source,
        }
    }

    /// Creates a lock error for the given target.
    pub fn lock(target: impl Into<String>, source: io::Error) -> Self {
        Self::Lock {
            target: target.into(),
            source,
        }
    }

    /// Returns true if this is an I/O error whose cause is a missing file.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}
