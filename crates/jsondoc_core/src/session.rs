//! Document sessions: the unit of work.
//!
//! A session buffers reads and writes against one database. Every tracked id
//! holds exactly one [`Entry`], so the status, the materialized object and
//! the buffered payload can never disagree:
//!
//! ```text
//!            load / delete              store
//!  absent ───────────────▶ Keep ◀──────────────┐
//!    │                      │ store        commit
//!    │ store                ▼               │
//!    └────────────────▶ PendingStore ───────┘
//!                           ✗ delete
//!  absent / Keep ── delete ─▶ PendingDelete ── commit ──▶ absent
//!                               ✗ store, load
//! ```
//!
//! ## Commit protocol
//!
//! 1. Generate a fresh [`StagingToken`] and upgrade to an exclusive lock.
//! 2. Stage every pending entry in tracking order: stores are written to
//!    the staging key, deletions move the live document to the staging key.
//!    On failure, undo the staged steps in the same order, downgrade, and
//!    return [`DocumentError::RecoverableCommit`].
//! 3. Finalize in the same order: staged stores replace the live document,
//!    staged deletions are removed. A failure here is
//!    [`DocumentError::UnrecoverableCommit`].
//! 4. Downgrade to a shared lock and collapse the session state.

use crate::error::{CommitPhase, DocumentError, DocumentResult};
use crate::serializer::Serializer;
use crate::status::DocumentStatus;
use indexmap::IndexMap;
use jsondoc_storage::{
    DatabaseMutex, DatabaseName, DocumentId, DocumentKey, LockMode, Persistence, StagingToken,
};
use std::fmt;
use std::sync::Arc;

/// State of one tracked id.
#[derive(Debug)]
enum Entry<T> {
    /// Materialized and unchanged.
    Keep(Arc<T>),
    /// Queued for writing; `payload` is the serialized document.
    PendingStore { document: Arc<T>, payload: Vec<u8> },
    /// Queued for deletion; the document stays materialized until commit.
    /// `None` when the stored bytes could not be deserialized.
    PendingDelete(Option<Arc<T>>),
}

impl<T> Entry<T> {
    fn status(&self) -> DocumentStatus {
        match self {
            Self::Keep(_) => DocumentStatus::Keep,
            Self::PendingStore { .. } => DocumentStatus::Store,
            Self::PendingDelete(_) => DocumentStatus::Delete,
        }
    }

    fn document(&self) -> Option<&Arc<T>> {
        match self {
            Self::Keep(document) | Self::PendingStore { document, .. } => Some(document),
            Self::PendingDelete(document) => document.as_ref(),
        }
    }
}

/// One step of a commit, borrowed from the write-buffer.
#[derive(Debug, Clone, Copy)]
enum Step<'a> {
    Store { id: &'a DocumentId, payload: &'a [u8] },
    Delete { id: &'a DocumentId },
}

impl Step<'_> {
    fn id(&self) -> &DocumentId {
        match *self {
            Self::Store { id, .. } | Self::Delete { id } => id,
        }
    }
}

/// A unit of work against one database.
///
/// Sessions are single-owner: they are `Send` but are not meant to be shared
/// between threads. Concurrency happens between sessions, coordinated by the
/// database mutex. A session holds a shared lock from [`open`] until
/// [`close`], upgrading to exclusive only for the duration of [`commit`].
///
/// Loaded and stored documents are handed out as [`Arc`]s; repeated loads of
/// the same id return the same allocation, and [`get_id`] finds an id by
/// pointer identity.
///
/// Dropping a session releases its lock. Pending changes are discarded (and
/// a warning is logged); call [`commit`] or [`flush`] and then [`close`] to
/// end a session deliberately.
///
/// # Example
///
/// ```rust
/// use jsondoc_core::DocumentStore;
/// use serde_json::json;
///
/// let store = DocumentStore::<jsondoc_core::JsonSerializer<serde_json::Value>>::in_memory();
/// let mut session = store.open_session("sampledb").unwrap();
///
/// session.store(json!({ "bar": "one" }), "foo/a").unwrap();
/// session.commit().unwrap();
/// assert_eq!(session.load("foo/a").unwrap()["bar"], "one");
/// session.close().unwrap();
/// ```
///
/// [`open`]: crate::DocumentStore::open_session
/// [`close`]: DocumentSession::close
/// [`commit`]: DocumentSession::commit
/// [`flush`]: DocumentSession::flush
/// [`get_id`]: DocumentSession::get_id
pub struct DocumentSession<S: Serializer> {
    database: DatabaseName,
    persistence: Arc<dyn Persistence>,
    serializer: Arc<S>,
    mutex: Box<dyn DatabaseMutex>,
    entries: IndexMap<DocumentId, Entry<S::Document>>,
}

impl<S: Serializer> DocumentSession<S> {
    /// Opens a session, blocking until a shared lock is acquired.
    pub(crate) fn open(
        database: DatabaseName,
        persistence: Arc<dyn Persistence>,
        serializer: Arc<S>,
    ) -> DocumentResult<Self> {
        let mut mutex = persistence.create_mutex(&database)?;
        mutex
            .lock_shared()
            .map_err(|e| DocumentError::lock_acquisition(&database, e))?;

        tracing::debug!(database = %database, "opened session");

        Ok(Self {
            database,
            persistence,
            serializer,
            mutex,
            entries: IndexMap::new(),
        })
    }

    /// Returns the database this session is bound to.
    #[must_use]
    pub fn database(&self) -> &DatabaseName {
        &self.database
    }

    /// Returns the serializer shared with the store.
    #[must_use]
    pub fn serializer(&self) -> &S {
        &self.serializer
    }

    /// Returns true until the session is closed or loses its lock.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.mutex.is_locked()
    }

    /// Returns the mode of the lock currently held.
    #[must_use]
    pub fn lock_mode(&self) -> Option<LockMode> {
        self.mutex.mode()
    }

    /// Returns the number of entries in the write-buffer.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.status().is_pending())
            .count()
    }

    /// Iterates over tracked ids in the order they were first tracked.
    pub fn tracked_ids(&self) -> impl Iterator<Item = &DocumentId> {
        self.entries.keys()
    }

    /// Returns the status of `id`, or `None` if it is not tracked.
    #[must_use]
    pub fn status(&self, id: &str) -> Option<DocumentStatus> {
        let id = DocumentId::parse(id).ok()?;
        self.entries.get(&id).map(Entry::status)
    }

    /// Loads the document stored under `id`.
    ///
    /// The first load reads and deserializes the document; later loads
    /// within the session return the same [`Arc`].
    ///
    /// # Errors
    ///
    /// - [`DocumentError::ClosedSession`] if the session is closed
    /// - [`DocumentError::InvalidId`] if `id` is malformed
    /// - [`DocumentError::ConflictingStatus`] if `id` is queued for deletion
    /// - [`DocumentError::NotFound`] if no such document exists
    pub fn load(&mut self, id: &str) -> DocumentResult<Arc<S::Document>> {
        self.ensure_open("load a document into")?;
        let id = DocumentId::parse(id)?;

        match self.entries.get(&id) {
            Some(Entry::PendingDelete(_)) => Err(conflict(&id, "load", DocumentStatus::Delete)),
            Some(Entry::Keep(document) | Entry::PendingStore { document, .. }) => {
                Ok(Arc::clone(document))
            }
            None => {
                let document = self.read_document(&id)?;
                self.entries.insert(id, Entry::Keep(Arc::clone(&document)));
                Ok(document)
            }
        }
    }

    /// Queues `document` to be stored under `id` on commit.
    ///
    /// The document is serialized immediately; later changes to it are not
    /// captured unless it is stored again.
    ///
    /// # Errors
    ///
    /// - [`DocumentError::ClosedSession`] if the session is closed
    /// - [`DocumentError::InvalidId`] if `id` is malformed
    /// - [`DocumentError::ConflictingStatus`] if `id` is queued for deletion
    /// - [`DocumentError::Codec`] if serialization fails
    pub fn store(&mut self, document: impl Into<Arc<S::Document>>, id: &str) -> DocumentResult<()> {
        self.ensure_open("store a document in")?;
        let id = DocumentId::parse(id)?;

        if let Some(Entry::PendingDelete(_)) = self.entries.get(&id) {
            return Err(conflict(&id, "store", DocumentStatus::Delete));
        }

        let document = document.into();
        let payload = self
            .serializer
            .serialize(&document)
            .map_err(|source| DocumentError::Codec {
                id: id.to_string(),
                operation: "serialize",
                source,
            })?;

        self.entries
            .insert(id, Entry::PendingStore { document, payload });
        Ok(())
    }

    /// Queues the document under `id` for deletion on commit.
    ///
    /// An untracked document is materialized first, so it stays visible to
    /// [`contains`](Self::contains) until the commit evicts it. A stored
    /// document that cannot be deserialized is still queued for deletion.
    ///
    /// # Errors
    ///
    /// - [`DocumentError::ClosedSession`] if the session is closed
    /// - [`DocumentError::InvalidId`] if `id` is malformed
    /// - [`DocumentError::ConflictingStatus`] if `id` is queued for storage
    /// - [`DocumentError::NotFound`] if no such document exists
    pub fn delete(&mut self, id: &str) -> DocumentResult<()> {
        self.ensure_open("delete a document from")?;
        let id = DocumentId::parse(id)?;

        let document = match self.entries.get(&id) {
            Some(Entry::PendingStore { .. }) => {
                return Err(conflict(&id, "delete", DocumentStatus::Store));
            }
            Some(entry) => entry.document().cloned(),
            None => match self.read_document(&id) {
                Ok(document) => Some(document),
                Err(DocumentError::Codec { source, .. }) => {
                    tracing::warn!(
                        database = %self.database,
                        id = %id,
                        error = %source,
                        "deleting a document that cannot be deserialized"
                    );
                    None
                }
                Err(e) => return Err(e),
            },
        };

        self.entries.insert(id, Entry::PendingDelete(document));
        Ok(())
    }

    /// Returns the id under which `document` is tracked.
    ///
    /// Lookup is by identity: only the exact [`Arc`] allocation handed to or
    /// returned by this session matches.
    ///
    /// # Errors
    ///
    /// - [`DocumentError::ClosedSession`] if the session is closed
    /// - [`DocumentError::NotFound`] if the document is not tracked
    pub fn get_id(&self, document: &Arc<S::Document>) -> DocumentResult<DocumentId> {
        self.ensure_open("determine the id of a document in")?;

        self.entries
            .iter()
            .find(|(_, entry)| entry.document().is_some_and(|tracked| Arc::ptr_eq(tracked, document)))
            .map(|(id, _)| id.clone())
            .ok_or_else(|| DocumentError::NotFound {
                subject: "the given document is not tracked by this session".to_string(),
            })
    }

    /// Returns true if a document is materialized under `id` in this
    /// session, whatever its status. Malformed ids are never contained.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        DocumentId::parse(id).is_ok_and(|id| self.entries.contains_key(&id))
    }

    /// Returns true if a document exists under `id`, either materialized in
    /// this session or persisted. An id queued for deletion does not exist.
    ///
    /// # Errors
    ///
    /// - [`DocumentError::ClosedSession`] if the session is closed
    /// - [`DocumentError::InvalidId`] if `id` is malformed
    /// - [`DocumentError::Io`] if the persistence layer fails
    pub fn exists(&self, id: &str) -> DocumentResult<bool> {
        self.ensure_open("check for a document in")?;
        let id = DocumentId::parse(id)?;

        match self.entries.get(&id) {
            Some(Entry::PendingDelete(_)) => Ok(false),
            Some(_) => Ok(true),
            None => Ok(self
                .persistence
                .exists(&self.database, &DocumentKey::live(&id))?),
        }
    }

    /// Forgets `id`, discarding any pending change to it.
    ///
    /// # Errors
    ///
    /// - [`DocumentError::ClosedSession`] if the session is closed
    /// - [`DocumentError::InvalidId`] if `id` is malformed
    pub fn evict(&mut self, id: &str) -> DocumentResult<()> {
        self.ensure_open("evict a document from")?;
        let id = DocumentId::parse(id)?;
        self.entries.shift_remove(&id);
        Ok(())
    }

    /// Evicts every tracked id, discarding all pending changes and all
    /// materialized documents. Has no durable effect.
    pub fn flush(&mut self) {
        let pending = self.pending_count();
        if pending > 0 {
            tracing::debug!(database = %self.database, pending, "flushed pending changes");
        }
        self.entries.clear();
    }

    /// Commits every pending change.
    ///
    /// Blocks until an exclusive lock is available. On success, stored ids
    /// become [`DocumentStatus::Keep`] and deleted ids are evicted. A commit
    /// with nothing pending still cycles the lock but performs no I/O.
    ///
    /// # Errors
    ///
    /// - [`DocumentError::ClosedSession`] if the session is closed
    /// - [`DocumentError::LockAcquisition`] if the lock cannot be upgraded;
    ///   once changes are durable, a failed downgrade only closes the session
    /// - [`DocumentError::RecoverableCommit`] if staging failed and was rolled
    ///   back; pending changes are kept and the commit may be retried
    /// - [`DocumentError::UnrecoverableCommit`] if finalization (or a rollback)
    ///   failed; persisted documents may be inconsistent
    pub fn commit(&mut self) -> DocumentResult<()> {
        self.ensure_open("commit")?;

        let token = StagingToken::generate();
        let steps: Vec<Step<'_>> = self
            .entries
            .iter()
            .filter_map(|(id, entry)| match entry {
                Entry::PendingStore { payload, .. } => Some(Step::Store {
                    id,
                    payload: payload.as_slice(),
                }),
                Entry::PendingDelete(_) => Some(Step::Delete { id }),
                Entry::Keep(_) => None,
            })
            .collect();

        tracing::debug!(
            database = %self.database,
            token = %token,
            steps = steps.len(),
            "committing"
        );

        if let Err(e) = self.mutex.lock_exclusive() {
            restore_shared(self.mutex.as_mut(), &self.database);
            return Err(DocumentError::lock_acquisition(&self.database, e));
        }

        let persistence = self.persistence.as_ref();

        if let Err((failed, cause)) = stage(persistence, &self.database, &token, &steps) {
            tracing::warn!(
                database = %self.database,
                id = %steps[failed].id(),
                error = %cause,
                "staging failed, rolling back"
            );

            let rollback = unstage(persistence, &self.database, &token, &steps, failed);
            restore_shared(self.mutex.as_mut(), &self.database);

            return Err(match rollback {
                Ok(()) => DocumentError::RecoverableCommit {
                    source: Box::new(cause),
                },
                Err((completed, rollback_cause)) => {
                    tracing::error!(
                        database = %self.database,
                        token = %token,
                        error = %rollback_cause,
                        "rollback failed, staged files may remain"
                    );
                    DocumentError::UnrecoverableCommit {
                        phase: CommitPhase::Rollback,
                        completed,
                        total: failed + 1,
                        source: Box::new(rollback_cause),
                    }
                }
            });
        }

        if let Err((completed, cause)) = finalize(persistence, &self.database, &token, &steps) {
            tracing::error!(
                database = %self.database,
                token = %token,
                completed,
                total = steps.len(),
                error = %cause,
                "finalization failed, documents may be inconsistent"
            );
            let total = steps.len();
            restore_shared(self.mutex.as_mut(), &self.database);
            return Err(DocumentError::UnrecoverableCommit {
                phase: CommitPhase::Finalize,
                completed,
                total,
                source: Box::new(cause),
            });
        }

        let committed = steps.len();
        drop(steps);

        self.entries
            .retain(|_, entry| !matches!(entry, Entry::PendingDelete(_)));
        for entry in self.entries.values_mut() {
            if let Entry::PendingStore { document, .. } = entry {
                *entry = Entry::Keep(Arc::clone(document));
            }
        }

        restore_shared(self.mutex.as_mut(), &self.database);

        tracing::debug!(database = %self.database, token = %token, committed, "committed");
        Ok(())
    }

    /// Releases the session's lock.
    ///
    /// Closing an already-closed session is a no-op.
    ///
    /// # Errors
    ///
    /// - [`DocumentError::ClosedSession`] if changes are pending; call
    ///   [`commit`](Self::commit) or [`flush`](Self::flush) first
    /// - [`DocumentError::LockAcquisition`] if the release fails
    pub fn close(&mut self) -> DocumentResult<()> {
        let pending = self.pending_count();
        if pending > 0 {
            return Err(DocumentError::closed_session(format!(
                "unable to close session with {pending} pending changes - \
                 you must either flush() or commit() pending changes before calling close()"
            )));
        }

        if self.mutex.is_locked() {
            self.mutex
                .unlock()
                .map_err(|e| DocumentError::lock_acquisition(&self.database, e))?;
            tracing::debug!(database = %self.database, "closed session");
        }
        Ok(())
    }

    fn ensure_open(&self, operation: &str) -> DocumentResult<()> {
        if self.mutex.is_locked() {
            Ok(())
        } else {
            Err(DocumentError::closed_session(format!(
                "cannot {operation} a closed session"
            )))
        }
    }

    fn read_document(&self, id: &DocumentId) -> DocumentResult<Arc<S::Document>> {
        let data = self
            .persistence
            .read(&self.database, &DocumentKey::live(id))
            .map_err(|e| {
                if e.is_not_found() {
                    DocumentError::not_found(id)
                } else {
                    DocumentError::from(e)
                }
            })?;

        let document = self
            .serializer
            .deserialize(&data)
            .map_err(|source| DocumentError::Codec {
                id: id.to_string(),
                operation: "deserialize",
                source,
            })?;
        Ok(Arc::new(document))
    }
}

impl<S: Serializer> fmt::Debug for DocumentSession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentSession")
            .field("database", &self.database)
            .field("lock", &self.mutex.mode())
            .field("tracked", &self.entries.len())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl<S: Serializer> Drop for DocumentSession<S> {
    fn drop(&mut self) {
        if !self.mutex.is_locked() {
            return;
        }

        let pending = self.pending_count();
        if pending > 0 {
            tracing::warn!(
                database = %self.database,
                pending,
                "session dropped with pending changes, discarding them"
            );
        }

        if let Err(e) = self.mutex.unlock() {
            tracing::warn!(database = %self.database, error = %e, "failed to release lock");
        }
    }
}

fn conflict(id: &DocumentId, operation: &'static str, status: DocumentStatus) -> DocumentError {
    DocumentError::ConflictingStatus {
        id: id.to_string(),
        operation,
        status,
    }
}

/// Downgrades to shared after a commit attempt; if that fails the lock is
/// released entirely, never left exclusive.
fn restore_shared(mutex: &mut dyn DatabaseMutex, database: &DatabaseName) {
    if let Err(e) = mutex.lock_shared() {
        tracing::error!(database = %database, error = %e, "failed to restore shared lock");
        if let Err(e) = mutex.unlock() {
            tracing::error!(database = %database, error = %e, "failed to release lock");
        }
    }
}

/// Stages every step. On failure returns the index of the failing step.
fn stage(
    persistence: &dyn Persistence,
    database: &DatabaseName,
    token: &StagingToken,
    steps: &[Step<'_>],
) -> Result<(), (usize, DocumentError)> {
    for (index, step) in steps.iter().enumerate() {
        let result = match *step {
            Step::Store { id, payload } => {
                persistence.write(database, &DocumentKey::staged(id, token), payload)
            }
            Step::Delete { id } => persistence.rename(
                database,
                &DocumentKey::live(id),
                &DocumentKey::staged(id, token),
            ),
        };
        result.map_err(|e| (index, DocumentError::from(e)))?;
    }
    Ok(())
}

/// Undoes steps `0..=failed` in staging order. Steps before `failed`
/// completed, so they are reverted unconditionally; the failed step may have
/// left a partial staging file, which is reverted only if present.
///
/// On failure returns how many steps were reverted.
fn unstage(
    persistence: &dyn Persistence,
    database: &DatabaseName,
    token: &StagingToken,
    steps: &[Step<'_>],
    failed: usize,
) -> Result<(), (usize, DocumentError)> {
    for (index, step) in steps.iter().take(failed + 1).enumerate() {
        let staged = DocumentKey::staged(step.id(), token);
        let revert = || -> DocumentResult<()> {
            if index == failed && !persistence.exists(database, &staged)? {
                return Ok(());
            }
            match *step {
                Step::Store { .. } => persistence.delete(database, &staged)?,
                Step::Delete { id } => {
                    persistence.rename(database, &staged, &DocumentKey::live(id))?;
                }
            }
            Ok(())
        };
        revert().map_err(|e| (index, e))?;
    }
    Ok(())
}

/// Finalizes every staged step. On failure returns how many steps completed.
fn finalize(
    persistence: &dyn Persistence,
    database: &DatabaseName,
    token: &StagingToken,
    steps: &[Step<'_>],
) -> Result<(), (usize, DocumentError)> {
    for (index, step) in steps.iter().enumerate() {
        let result = match *step {
            Step::Store { id, .. } => persistence.rename(
                database,
                &DocumentKey::staged(id, token),
                &DocumentKey::live(id),
            ),
            Step::Delete { id } => persistence.delete(database, &DocumentKey::staged(id, token)),
        };
        result.map_err(|e| (index, DocumentError::from(e)))?;
    }
    Ok(())
}
