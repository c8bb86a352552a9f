//! Error types for jsondoc core.

use crate::status::DocumentStatus;
use jsondoc_storage::StorageError;
use std::fmt;
use thiserror::Error;

/// Result type for document operations.
pub type DocumentResult<T> = Result<T, DocumentError>;

/// Opaque error produced by a [`crate::Serializer`].
pub type CodecError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Stage of a commit at which an unrecoverable failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPhase {
    /// Staged copies were being moved over (or deleted from) live documents.
    Finalize,
    /// A staging failure was being undone and the undo itself failed.
    Rollback,
}

impl fmt::Display for CommitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finalize => f.write_str("finalization"),
            Self::Rollback => f.write_str("rollback"),
        }
    }
}

/// Errors that can occur in document sessions and stores.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// A database name was malformed.
    #[error("invalid database name: {name:?}")]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// A document id was malformed.
    #[error("invalid document id: {id:?}")]
    InvalidId {
        /// The rejected id.
        id: String,
    },

    /// A document or tracked object does not exist.
    #[error("not found: {subject}")]
    NotFound {
        /// What was looked up.
        subject: String,
    },

    /// The operation is incompatible with the id's pending status.
    #[error("cannot {operation} document {id}: it is queued for {status}")]
    ConflictingStatus {
        /// The document id.
        id: String,
        /// The rejected operation.
        operation: &'static str,
        /// The status that blocked it.
        status: DocumentStatus,
    },

    /// The database lock could not be acquired or restored.
    #[error("unable to lock database {database}")]
    LockAcquisition {
        /// The database whose lock failed.
        database: String,
        /// The underlying failure.
        #[source]
        source: StorageError,
    },

    /// The persistence layer failed.
    #[error("I/O failure")]
    Io(#[source] StorageError),

    /// The serializer failed.
    #[error("unable to {operation} document {id}")]
    Codec {
        /// The document id.
        id: String,
        /// `"serialize"` or `"deserialize"`.
        operation: &'static str,
        /// The serializer's error.
        #[source]
        source: CodecError,
    },

    /// Staging failed and every staged change was rolled back.
    ///
    /// The session's pending changes are intact; `commit()` may be retried.
    #[error("an error occurred while committing changes to documents - changes were rolled back")]
    RecoverableCommit {
        /// The staging failure.
        #[source]
        source: Box<DocumentError>,
    },

    /// The commit failed past the point of no return.
    ///
    /// Persisted documents may be partially migrated. Nothing is repaired
    /// automatically.
    #[error(
        "an error occurred during commit {phase} - changes could not be rolled back \
         ({completed} of {total} steps completed)"
    )]
    UnrecoverableCommit {
        /// Where the commit failed.
        phase: CommitPhase,
        /// Steps of that phase completed before the failure.
        completed: usize,
        /// Steps in that phase.
        total: usize,
        /// The failure.
        #[source]
        source: Box<DocumentError>,
    },

    /// The session is closed, or cannot be closed yet.
    #[error("session error: {reason}")]
    ClosedSession {
        /// Why the operation was refused.
        reason: String,
    },
}

impl DocumentError {
    /// Creates a not-found error for a document id.
    pub fn not_found(id: impl fmt::Display) -> Self {
        Self::NotFound {
            subject: format!("document {id}"),
        }
    }

    /// Creates a closed-session error.
    pub fn closed_session(reason: impl Into<String>) -> Self {
        Self::ClosedSession {
            reason: reason.into(),
        }
    }

    /// Creates a lock acquisition error.
    pub fn lock_acquisition(database: impl fmt::Display, source: StorageError) -> Self {
        Self::LockAcquisition {
            database: database.to_string(),
            source,
        }
    }

    /// Returns true if a failed commit left the session intact for a retry.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::RecoverableCommit { .. })
    }
}

impl From<StorageError> for DocumentError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidName { name } => Self::InvalidName { name },
            StorageError::InvalidId { id } => Self::InvalidId { id },
            StorageError::Lock { target, source } => Self::LockAcquisition {
                database: target.clone(),
                source: StorageError::Lock { target, source },
            },
            err => Self::Io(err),
        }
    }
}
