//! Document store: the factory for sessions.

use crate::error::{DocumentError, DocumentResult};
use crate::serializer::{JsonSerializer, Serializer};
use crate::session::DocumentSession;
use jsondoc_storage::{DatabaseName, FileConfig, FilePersistence, InMemoryPersistence, Persistence};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// A document store.
///
/// Holds one shared persistence layer and one serializer, and opens sessions
/// scoped to a named database.
///
/// # Example
///
/// ```rust,no_run
/// use jsondoc_core::{DocumentStore, JsonSerializer};
/// use jsondoc_storage::FileConfig;
/// use std::path::Path;
///
/// let store: DocumentStore<JsonSerializer<serde_json::Value>> =
///     DocumentStore::open(Path::new("data"), FileConfig::default())?;
///
/// store.with_session("sampledb", |session| {
///     session.store(serde_json::json!({ "bar": "one" }), "foo/a")?;
///     session.commit()
/// })?;
/// # Ok::<(), jsondoc_core::DocumentError>(())
/// ```
pub struct DocumentStore<S> {
    persistence: Arc<dyn Persistence>,
    serializer: Arc<S>,
}

impl<S: Serializer> DocumentStore<S> {
    /// Creates a store over `persistence`.
    pub fn new(persistence: Arc<dyn Persistence>, serializer: S) -> Self {
        Self {
            persistence,
            serializer: Arc::new(serializer),
        }
    }

    /// Returns the serializer shared by every session.
    #[must_use]
    pub fn serializer(&self) -> &S {
        &self.serializer
    }

    /// Returns the persistence layer.
    #[must_use]
    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }

    /// Opens a session on `database`, creating its container if needed.
    ///
    /// Blocks until a shared lock on the database is available.
    ///
    /// # Errors
    ///
    /// - [`DocumentError::InvalidName`] if `database` is malformed
    /// - [`DocumentError::Io`] if the container cannot be created
    /// - [`DocumentError::LockAcquisition`] if the lock cannot be acquired
    pub fn open_session(&self, database: &str) -> DocumentResult<DocumentSession<S>> {
        let database = DatabaseName::new(database)?;
        self.persistence.ensure_container(&database)?;
        DocumentSession::open(
            database,
            Arc::clone(&self.persistence),
            Arc::clone(&self.serializer),
        )
    }

    /// Runs `f` in a session on `database` and closes it on every exit path.
    ///
    /// If `f` fails, pending changes are flushed before closing and the
    /// original error is returned. If `f` succeeds but leaves changes
    /// uncommitted, closing fails with [`DocumentError::ClosedSession`] and
    /// the changes are discarded.
    ///
    /// # Errors
    ///
    /// Returns the error of [`open_session`](Self::open_session), of `f`, or
    /// of the final [`DocumentSession::close`].
    pub fn with_session<R, F>(&self, database: &str, f: F) -> DocumentResult<R>
    where
        F: FnOnce(&mut DocumentSession<S>) -> DocumentResult<R>,
    {
        let mut session = self.open_session(database)?;

        match f(&mut session) {
            Ok(value) => {
                session.close()?;
                Ok(value)
            }
            Err(err) => {
                session.flush();
                if let Err(close_err) = session.close() {
                    tracing::warn!(database, error = %close_err, "failed to close session");
                }
                Err(err)
            }
        }
    }
}

impl<T: Serialize + DeserializeOwned> DocumentStore<JsonSerializer<T>> {
    /// Opens a file-backed JSON store rooted at an existing directory.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Io`] if `root` does not exist or is not a
    /// directory.
    pub fn open(root: &Path, config: FileConfig) -> DocumentResult<Self> {
        let persistence = FilePersistence::open(root, config).map_err(DocumentError::from)?;
        Ok(Self::new(Arc::new(persistence), JsonSerializer::new()))
    }

    /// Creates an in-memory JSON store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryPersistence::new()), JsonSerializer::new())
    }
}

impl<S> Clone for DocumentStore<S> {
    fn clone(&self) -> Self {
        Self {
            persistence: Arc::clone(&self.persistence),
            serializer: Arc::clone(&self.serializer),
        }
    }
}

impl<S> fmt::Debug for DocumentStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsondoc_storage::LockMode;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    type JsonStore = DocumentStore<JsonSerializer<Value>>;

    #[test]
    fn open_session_validates_name() {
        let store = JsonStore::in_memory();
        assert!(matches!(
            store.open_session("bad/name"),
            Err(DocumentError::InvalidName { .. })
        ));
        assert!(matches!(
            store.open_session(""),
            Err(DocumentError::InvalidName { .. })
        ));
    }

    #[test]
    fn open_session_creates_container() {
        let dir = tempdir().unwrap();
        let store = JsonStore::open(dir.path(), FileConfig::default()).unwrap();
        let session = store.open_session("sampledb").unwrap();

        assert!(dir.path().join("sampledb").is_dir());
        assert_eq!(session.database().as_str(), "sampledb");
        assert_eq!(session.lock_mode(), Some(LockMode::Shared));
    }

    #[test]
    fn open_requires_existing_root() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            JsonStore::open(&dir.path().join("missing"), FileConfig::default()),
            Err(DocumentError::Io(_))
        ));
    }

    #[test]
    fn with_session_commits_and_closes() {
        let store = JsonStore::in_memory();
        store
            .with_session("sampledb", |session| {
                session.store(json!({ "bar": "one" }), "foo/a")?;
                session.commit()
            })
            .unwrap();

        let bar = store
            .with_session("sampledb", |session| Ok(session.load("foo/a")?["bar"].clone()))
            .unwrap();
        assert_eq!(bar, "one");
    }

    #[test]
    fn with_session_flushes_on_error() {
        let store = JsonStore::in_memory();
        let result: DocumentResult<()> = store.with_session("sampledb", |session| {
            session.store(json!({ "bar": "one" }), "foo/a")?;
            session.load("foo/missing")?;
            session.commit()
        });
        assert!(matches!(result, Err(DocumentError::NotFound { .. })));

        let exists = store
            .with_session("sampledb", |session| session.exists("foo/a"))
            .unwrap();
        assert!(!exists);
    }

    #[test]
    fn with_session_rejects_uncommitted_changes() {
        let store = JsonStore::in_memory();
        let result = store.with_session("sampledb", |session| {
            session.store(json!(1), "foo/a")
        });
        assert!(matches!(result, Err(DocumentError::ClosedSession { .. })));

        // The lock was still released
        let mut session = store.open_session("sampledb").unwrap();
        session.commit().unwrap();
        assert!(!session.exists("foo/a").unwrap());
    }

    #[test]
    fn sessions_share_serializer() {
        let store = DocumentStore::new(
            Arc::new(InMemoryPersistence::new()),
            JsonSerializer::<Value>::pretty(),
        );
        let session = store.open_session("sampledb").unwrap();
        assert!(session.serializer().is_pretty());
        assert!(store.serializer().is_pretty());
    }
}
