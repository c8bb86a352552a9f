//! In-memory persistence for testing.

use crate::error::{StorageError, StorageResult};
use crate::key::{DatabaseName, DocumentId, DocumentKey};
use crate::mutex::{DatabaseMutex, LockMode};
use crate::persistence::Persistence;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;

/// Kind of a persistence operation, for journaling and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// `ensure_container`
    EnsureContainer,
    /// `read`
    Read,
    /// `write`
    Write,
    /// `rename`
    Rename,
    /// `delete`
    Delete,
    /// `exists`
    Exists,
}

/// One journaled persistence operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// What was done.
    pub kind: OperationKind,
    /// The database addressed.
    pub database: String,
    /// The key addressed; for renames, `"<from> -> <to>"`.
    pub target: String,
}

/// A one-shot failure injected into [`InMemoryPersistence`].
///
/// The fault fires on the first operation of `kind` whose target key has the
/// given id and staging state. For renames the destination key is matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    /// Operation to fail.
    pub kind: OperationKind,
    /// Document id the operation must address.
    pub id: DocumentId,
    /// Whether the addressed key must be a staging key.
    pub staged: bool,
}

impl Fault {
    /// Fails the next write of the staging copy of `id`.
    #[must_use]
    pub fn staged_write(id: &DocumentId) -> Self {
        Self {
            kind: OperationKind::Write,
            id: id.clone(),
            staged: true,
        }
    }

    /// Fails the next rename whose destination is the staging copy of `id`.
    #[must_use]
    pub fn rename_to_staged(id: &DocumentId) -> Self {
        Self {
            kind: OperationKind::Rename,
            id: id.clone(),
            staged: true,
        }
    }

    /// Fails the next rename whose destination is the live document `id`.
    #[must_use]
    pub fn rename_to_live(id: &DocumentId) -> Self {
        Self {
            kind: OperationKind::Rename,
            id: id.clone(),
            staged: false,
        }
    }

    /// Fails the next delete of the staging copy of `id`.
    #[must_use]
    pub fn staged_delete(id: &DocumentId) -> Self {
        Self {
            kind: OperationKind::Delete,
            id: id.clone(),
            staged: true,
        }
    }

    fn matches(&self, kind: OperationKind, key: &DocumentKey) -> bool {
        self.kind == kind && key.id() == &self.id && key.is_staged() == self.staged
    }
}

/// An in-memory persistence layer.
///
/// This layer keeps every document in memory and is suitable for:
/// - Unit tests
/// - Commit protocol tests with injected faults
/// - Ephemeral stores that don't need persistence
///
/// Mutexes created for the same database share one lock table, so sessions
/// opened against the same instance coordinate like separate processes
/// sharing a lock file.
///
/// # Example
///
/// ```rust
/// use jsondoc_storage::{DatabaseName, DocumentId, DocumentKey, InMemoryPersistence, Persistence};
///
/// let persistence = InMemoryPersistence::new();
/// let db = DatabaseName::new("test").unwrap();
/// let key = DocumentKey::live(&DocumentId::parse("a").unwrap());
/// persistence.write(&db, &key, b"data").unwrap();
/// assert_eq!(persistence.read(&db, &key).unwrap(), b"data");
/// ```
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    documents: RwLock<HashMap<(DatabaseName, DocumentKey), Vec<u8>>>,
    containers: RwLock<HashSet<DatabaseName>>,
    locks: Mutex<HashMap<DatabaseName, Arc<LockTable>>>,
    faults: Mutex<Vec<Fault>>,
    journal: Mutex<Vec<Operation>>,
}

impl InMemoryPersistence {
    /// Creates a new empty in-memory persistence layer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a one-shot fault.
    pub fn inject_fault(&self, fault: Fault) {
        self.faults.lock().push(fault);
    }

    /// Disarms all pending faults.
    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Returns every journaled operation, oldest first.
    #[must_use]
    pub fn operations(&self) -> Vec<Operation> {
        self.journal.lock().clone()
    }

    /// Returns the journaled operations that change stored data.
    #[must_use]
    pub fn mutations(&self) -> Vec<Operation> {
        self.journal
            .lock()
            .iter()
            .filter(|op| {
                matches!(
                    op.kind,
                    OperationKind::Write | OperationKind::Rename | OperationKind::Delete
                )
            })
            .cloned()
            .collect()
    }

    /// Clears the operation journal.
    pub fn clear_journal(&self) {
        self.journal.lock().clear();
    }

    /// Returns the sorted keys stored in `database`, staging keys included.
    #[must_use]
    pub fn keys(&self, database: &DatabaseName) -> Vec<String> {
        let mut keys: Vec<String> = self
            .documents
            .read()
            .keys()
            .filter(|(db, _)| db == database)
            .map(|(_, key)| key.to_string())
            .collect();
        keys.sort();
        keys
    }

    /// Returns true if `ensure_container` or a write created `database`.
    #[must_use]
    pub fn has_container(&self, database: &DatabaseName) -> bool {
        self.containers.read().contains(database)
    }

    fn record(&self, kind: OperationKind, database: &DatabaseName, target: String) {
        self.journal.lock().push(Operation {
            kind,
            database: database.to_string(),
            target,
        });
    }

    fn check_fault(&self, kind: OperationKind, key: &DocumentKey) -> StorageResult<()> {
        let mut faults = self.faults.lock();
        if let Some(index) = faults.iter().position(|f| f.matches(kind, key)) {
            faults.remove(index);
            return Err(StorageError::io(
                key.to_string(),
                io::Error::new(io::ErrorKind::Other, "injected fault"),
            ));
        }
        Ok(())
    }
}

fn not_found(key: &DocumentKey) -> StorageError {
    StorageError::io(
        key.to_string(),
        io::Error::new(io::ErrorKind::NotFound, "no such document"),
    )
}

impl Persistence for InMemoryPersistence {
    fn ensure_container(&self, database: &DatabaseName) -> StorageResult<()> {
        self.record(OperationKind::EnsureContainer, database, String::new());
        self.containers.write().insert(database.clone());
        Ok(())
    }

    fn create_mutex(&self, database: &DatabaseName) -> StorageResult<Box<dyn DatabaseMutex>> {
        let table = Arc::clone(self.locks.lock().entry(database.clone()).or_default());
        Ok(Box::new(MemoryMutex::new(database.clone(), table)))
    }

    fn read(&self, database: &DatabaseName, key: &DocumentKey) -> StorageResult<Vec<u8>> {
        self.record(OperationKind::Read, database, key.to_string());
        self.check_fault(OperationKind::Read, key)?;
        self.documents
            .read()
            .get(&(database.clone(), key.clone()))
            .cloned()
            .ok_or_else(|| not_found(key))
    }

    fn write(&self, database: &DatabaseName, key: &DocumentKey, data: &[u8]) -> StorageResult<()> {
        self.record(OperationKind::Write, database, key.to_string());
        self.check_fault(OperationKind::Write, key)?;
        self.containers.write().insert(database.clone());
        self.documents
            .write()
            .insert((database.clone(), key.clone()), data.to_vec());
        Ok(())
    }

    fn rename(
        &self,
        database: &DatabaseName,
        from: &DocumentKey,
        to: &DocumentKey,
    ) -> StorageResult<()> {
        self.record(OperationKind::Rename, database, format!("{from} -> {to}"));
        self.check_fault(OperationKind::Rename, to)?;
        let mut documents = self.documents.write();
        let data = documents
            .remove(&(database.clone(), from.clone()))
            .ok_or_else(|| not_found(from))?;
        documents.insert((database.clone(), to.clone()), data);
        Ok(())
    }

    fn delete(&self, database: &DatabaseName, key: &DocumentKey) -> StorageResult<()> {
        self.record(OperationKind::Delete, database, key.to_string());
        self.check_fault(OperationKind::Delete, key)?;
        self.documents
            .write()
            .remove(&(database.clone(), key.clone()))
            .map(|_| ())
            .ok_or_else(|| not_found(key))
    }

    fn exists(&self, database: &DatabaseName, key: &DocumentKey) -> StorageResult<bool> {
        self.record(OperationKind::Exists, database, key.to_string());
        self.check_fault(OperationKind::Exists, key)?;
        Ok(self
            .documents
            .read()
            .contains_key(&(database.clone(), key.clone())))
    }
}

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    writer: bool,
}

/// Holder counts for one database, shared by all of its [`MemoryMutex`]es.
#[derive(Debug, Default)]
pub struct LockTable {
    state: Mutex<LockState>,
    released: Condvar,
}

/// In-process shared/exclusive lock backed by a [`LockTable`].
#[derive(Debug)]
pub struct MemoryMutex {
    database: DatabaseName,
    table: Arc<LockTable>,
    mode: Option<LockMode>,
}

impl MemoryMutex {
    /// Creates an unlocked handle on `table`.
    #[must_use]
    pub fn new(database: DatabaseName, table: Arc<LockTable>) -> Self {
        Self {
            database,
            table,
            mode: None,
        }
    }

    fn release(&mut self) {
        let Some(mode) = self.mode.take() else {
            return;
        };

        let mut state = self.table.state.lock();
        match mode {
            LockMode::Shared => state.readers -= 1,
            LockMode::Exclusive => state.writer = false,
        }
        drop(state);
        self.table.released.notify_all();
    }
}

impl DatabaseMutex for MemoryMutex {
    fn lock_shared(&mut self) -> StorageResult<()> {
        self.release();

        let mut state = self.table.state.lock();
        while state.writer {
            self.table.released.wait(&mut state);
        }
        state.readers += 1;
        self.mode = Some(LockMode::Shared);
        tracing::trace!(database = %self.database, "acquired shared memory lock");
        Ok(())
    }

    fn lock_exclusive(&mut self) -> StorageResult<()> {
        self.release();

        let mut state = self.table.state.lock();
        while state.writer || state.readers > 0 {
            self.table.released.wait(&mut state);
        }
        state.writer = true;
        self.mode = Some(LockMode::Exclusive);
        tracing::trace!(database = %self.database, "acquired exclusive memory lock");
        Ok(())
    }

    fn try_lock_exclusive(&mut self) -> StorageResult<bool> {
        self.release();

        let mut state = self.table.state.lock();
        if state.writer || state.readers > 0 {
            return Ok(false);
        }
        state.writer = true;
        self.mode = Some(LockMode::Exclusive);
        Ok(true)
    }

    fn unlock(&mut self) -> StorageResult<()> {
        self.release();
        Ok(())
    }

    fn mode(&self) -> Option<LockMode> {
        self.mode
    }
}

impl Drop for MemoryMutex {
    fn drop(&mut self) {
        self.release();
    }
}
