//! Test fixtures and store helpers.

use jsondoc_core::{DocumentStore, JsonSerializer};
use jsondoc_storage::{DatabaseName, DocumentId, DocumentKey, FileConfig, FilePersistence};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Sample document with a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Foo {
    /// Payload.
    pub bar: String,
}

impl Foo {
    /// Creates a document.
    pub fn new(bar: impl Into<String>) -> Self {
        Self { bar: bar.into() }
    }
}

/// A file-backed test store with automatic cleanup.
pub struct TestStore<T> {
    /// The store instance.
    pub store: DocumentStore<JsonSerializer<T>>,
    persistence: Arc<FilePersistence>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl<T: Serialize + DeserializeOwned> TestStore<T> {
    /// Creates a store rooted in a fresh temporary directory.
    pub fn file() -> Self {
        Self::with_config(FileConfig::default().sync_writes(false))
    }

    /// Creates a store with a custom file configuration.
    pub fn with_config(config: FileConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let persistence = Arc::new(
            FilePersistence::open(temp_dir.path(), config).expect("Failed to open persistence"),
        );
        let store = DocumentStore::new(persistence.clone(), JsonSerializer::new());

        Self {
            store,
            persistence,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        self.persistence.root()
    }

    /// Returns the path a live document maps to.
    pub fn document_path(&self, database: &str, id: &str) -> PathBuf {
        let database = DatabaseName::new(database).expect("Invalid database name");
        let id = DocumentId::parse(id).expect("Invalid document id");
        self.persistence.key_path(&database, &DocumentKey::live(&id))
    }

    /// Returns every file below the database directory, relative to it,
    /// sorted. The lock file is excluded.
    pub fn files(&self, database: &str) -> Vec<String> {
        let base = self.root().join(database);
        let mut files = Vec::new();
        collect_files(&base, &base, &mut files);
        files.sort();
        files
    }
}

fn collect_files(base: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(base, &path, out);
        } else if entry.file_name() != jsondoc_storage::LOCK_FILE {
            let relative = path.strip_prefix(base).expect("path below base");
            out.push(
                relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/"),
            );
        }
    }
}

impl<T> std::ops::Deref for TestStore<T> {
    type Target = DocumentStore<JsonSerializer<T>>;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Installs a `tracing` subscriber honoring `RUST_LOG`, once per process.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
