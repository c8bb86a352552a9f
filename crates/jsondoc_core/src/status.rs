//! Per-document session status.

use std::fmt;

/// Status of a document tracked by a session.
///
/// An untracked id has no status. Statuses reset to [`DocumentStatus::Keep`]
/// (or to untracked, for deletions) only when a commit succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentStatus {
    /// Materialized and unchanged since the last commit.
    Keep,
    /// Queued to be written on commit.
    Store,
    /// Queued to be deleted on commit.
    Delete,
}

impl DocumentStatus {
    /// Returns true if the status holds an entry in the write-buffer.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Store | Self::Delete)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keep => f.write_str("keep"),
            Self::Store => f.write_str("storage"),
            Self::Delete => f.write_str("deletion"),
        }
    }
}
