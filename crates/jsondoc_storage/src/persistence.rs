//! Persistence trait definition.

use crate::error::StorageResult;
use crate::key::{DatabaseName, DocumentKey};
use crate::mutex::DatabaseMutex;

/// Byte-level document storage, addressed by database and document key.
///
/// Persistence layers are **opaque byte stores**. They never interpret
/// document payloads; the session layer owns serialization and the commit
/// protocol.
///
/// # Invariants
///
/// - `read` returns exactly the bytes last written under that key
/// - `write` creates any missing containers for the key
/// - `rename` replaces the destination if it exists
/// - `delete` fails if the key does not exist
/// - All medium failures surface as [`crate::StorageError::Io`]
///
/// # Implementors
///
/// - [`super::FilePersistence`] - One file per document under a root directory
/// - [`super::InMemoryPersistence`] - For testing
pub trait Persistence: Send + Sync {
    /// Ensures the backing container of `database` exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be created, or if something
    /// other than a container already occupies its location.
    fn ensure_container(&self, database: &DatabaseName) -> StorageResult<()>;

    /// Creates an unlocked mutex scoped to `database`.
    ///
    /// Every call returns an independent handle; handles for the same
    /// database coordinate with one another.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock scope cannot be prepared.
    fn create_mutex(&self, database: &DatabaseName) -> StorageResult<Box<dyn DatabaseMutex>>;

    /// Reads the bytes stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key does not exist or cannot be read.
    fn read(&self, database: &DatabaseName, key: &DocumentKey) -> StorageResult<Vec<u8>>;

    /// Writes (or overwrites) the bytes stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the data cannot be written.
    fn write(&self, database: &DatabaseName, key: &DocumentKey, data: &[u8]) -> StorageResult<()>;

    /// Moves the bytes stored under `from` to `to`, replacing `to` if present.
    ///
    /// # Errors
    ///
    /// Returns an error if `from` does not exist or the move fails.
    fn rename(
        &self,
        database: &DatabaseName,
        from: &DocumentKey,
        to: &DocumentKey,
    ) -> StorageResult<()>;

    /// Deletes the bytes stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key does not exist or cannot be deleted.
    fn delete(&self, database: &DatabaseName, key: &DocumentKey) -> StorageResult<()>;

    /// Returns true if bytes are stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if existence cannot be determined.
    fn exists(&self, database: &DatabaseName, key: &DocumentKey) -> StorageResult<bool>;
}
