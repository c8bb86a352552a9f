//! Readers/committer lock trait.

use crate::error::StorageResult;
use std::fmt;

/// Mode of a held database lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Compatible with any number of other shared holders.
    Shared,
    /// Excludes every other holder, shared or exclusive.
    Exclusive,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared => f.write_str("shared"),
            Self::Exclusive => f.write_str("exclusive"),
        }
    }
}

/// A shared/exclusive lock scoped to one database.
///
/// A handle is owned by exactly one session. Locking an already-locked handle
/// first gives up the lock it holds and then waits for the requested mode;
/// for file locks the operating system performs this conversion on the same
/// descriptor. This is an advisory, single-host lock, not a distributed
/// consensus primitive.
///
/// # Invariants
///
/// - Shared locks are mutually compatible
/// - An exclusive lock excludes all other holders
/// - `is_locked` reflects only this handle's local belief
/// - Acquisition blocks without timeout
///
/// # Implementors
///
/// - [`super::FileMutex`] - OS advisory lock on `<database>/.lock`
/// - [`super::MemoryMutex`] - In-process lock table for testing
pub trait DatabaseMutex: Send + fmt::Debug {
    /// Locks in shared mode, blocking until any exclusive holder releases.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Lock`] if the lock cannot be acquired.
    fn lock_shared(&mut self) -> StorageResult<()>;

    /// Locks in exclusive mode, blocking until every other holder releases.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Lock`] if the lock cannot be acquired.
    fn lock_exclusive(&mut self) -> StorageResult<()>;

    /// Attempts to lock in exclusive mode without blocking.
    ///
    /// Returns `Ok(false)` if another holder prevents acquisition; in that
    /// case this handle holds no lock afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Lock`] on failures other than contention.
    fn try_lock_exclusive(&mut self) -> StorageResult<bool>;

    /// Releases any held lock. Releasing an unlocked handle is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Lock`] if the release fails.
    fn unlock(&mut self) -> StorageResult<()>;

    /// Returns the mode this handle believes it holds.
    fn mode(&self) -> Option<LockMode>;

    /// Returns true if this handle believes it holds a lock.
    fn is_locked(&self) -> bool {
        self.mode().is_some()
    }
}
