//! File-based persistence: one file per document under a root directory.
//!
//! ```text
//! <root>/
//! └─ <database>/
//!    ├─ .lock                      # Advisory lock, never read by application code
//!    ├─ foo/
//!    │  ├─ a.json                  # Document "foo/a"
//!    │  └─ b.<token>.tmp           # Staged copy of "foo/b" during a commit
//!    └─ bar.json                   # Document "bar"
//! ```

use crate::error::{StorageError, StorageResult};
use crate::key::{DatabaseName, DocumentKey};
use crate::mutex::{DatabaseMutex, LockMode};
use crate::persistence::Persistence;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Name of the lock file inside each database directory.
pub const LOCK_FILE: &str = ".lock";

/// Permission mask applied to lock files so every local user can take them.
const LOCK_FILE_MODE: u32 = 0o666;

/// Configuration for [`FilePersistence`].
#[derive(Debug, Clone)]
pub struct FileConfig {
    /// Extension of live document files.
    pub extension: String,

    /// Extension of staging files written during a commit.
    pub staging_extension: String,

    /// Permission mask applied to created directories (Unix only).
    pub dir_mode: u32,

    /// Permission mask applied to created files (Unix only).
    pub file_mode: u32,

    /// Whether to fsync written files and their directories.
    pub sync_writes: bool,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            extension: "json".to_string(),
            staging_extension: "tmp".to_string(),
            dir_mode: 0o755,
            file_mode: 0o755,
            sync_writes: true,
        }
    }
}

impl FileConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the extension of live document files.
    #[must_use]
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Sets the extension of staging files.
    #[must_use]
    pub fn staging_extension(mut self, extension: impl Into<String>) -> Self {
        self.staging_extension = extension.into();
        self
    }

    /// Sets the permission mask for created directories.
    #[must_use]
    pub const fn dir_mode(mut self, mode: u32) -> Self {
        self.dir_mode = mode;
        self
    }

    /// Sets the permission mask for created files.
    #[must_use]
    pub const fn file_mode(mut self, mode: u32) -> Self {
        self.file_mode = mode;
        self
    }

    /// Sets whether writes are fsynced.
    #[must_use]
    pub const fn sync_writes(mut self, value: bool) -> Self {
        self.sync_writes = value;
        self
    }
}

/// Filesystem-backed persistence.
///
/// Document id segments map to nested directories, the last segment to a
/// file named `<segment>.<extension>`. Staging keys map to
/// `<segment>.<token>.<staging_extension>` next to the live file, so a
/// staged rename never crosses directories.
///
/// # Permissions
///
/// Created files and directories receive `file_mode`/`dir_mode` through an
/// explicit `chmod` after creation, so the process umask cannot narrow them.
///
/// # Example
///
/// ```no_run
/// use jsondoc_storage::{DatabaseName, DocumentId, DocumentKey, FileConfig, FilePersistence, Persistence};
/// use std::path::Path;
///
/// let persistence = FilePersistence::open(Path::new("data"), FileConfig::default()).unwrap();
/// let db = DatabaseName::new("sampledb").unwrap();
/// let key = DocumentKey::live(&DocumentId::parse("foo/a").unwrap());
/// persistence.ensure_container(&db).unwrap();
/// persistence.write(&db, &key, br#"{"bar":"one"}"#).unwrap();
/// ```
#[derive(Debug)]
pub struct FilePersistence {
    root: PathBuf,
    config: FileConfig,
}

impl FilePersistence {
    /// Opens persistence rooted at an existing directory.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` does not exist or is not a directory.
    pub fn open(root: &Path, config: FileConfig) -> StorageResult<Self> {
        let metadata = fs::metadata(root).map_err(|e| StorageError::io(display(root), e))?;
        if !metadata.is_dir() {
            return Err(not_a_directory(root));
        }

        Ok(Self {
            root: root.to_path_buf(),
            config,
        })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &FileConfig {
        &self.config
    }

    /// Returns the directory backing `database`.
    #[must_use]
    pub fn database_path(&self, database: &DatabaseName) -> PathBuf {
        self.root.join(database.as_str())
    }

    /// Maps a key to its file path.
    #[must_use]
    pub fn key_path(&self, database: &DatabaseName, key: &DocumentKey) -> PathBuf {
        let mut path = self.database_path(database);
        let mut segments = key.id().segments().peekable();

        while let Some(segment) = segments.next() {
            if segments.peek().is_some() {
                path.push(segment);
                continue;
            }

            let file_name = match key.token() {
                Some(token) => format!("{segment}.{token}.{}", self.config.staging_extension),
                None => format!("{segment}.{}", self.config.extension),
            };
            path.push(file_name);
        }

        path
    }

    /// Creates `path` and any missing ancestors, applying `dir_mode` to each
    /// directory this call creates.
    fn ensure_dir(&self, path: &Path) -> StorageResult<()> {
        match fs::metadata(path) {
            Ok(metadata) if metadata.is_dir() => return Ok(()),
            Ok(_) => return Err(not_a_directory(path)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::io(display(path), e)),
        }

        if let Some(parent) = path.parent() {
            self.ensure_dir(parent)?;
        }

        match fs::create_dir(path) {
            Ok(()) => {
                set_mode(path, self.config.dir_mode)?;
                tracing::trace!(path = %path.display(), "created directory");
                Ok(())
            }
            // Another process may have won the race.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
            Err(e) => Err(StorageError::io(display(path), e)),
        }
    }

    fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        match path.parent() {
            Some(parent) => self.ensure_dir(parent),
            None => Ok(()),
        }
    }

    fn sync_parent(&self, path: &Path) -> StorageResult<()> {
        if !self.config.sync_writes {
            return Ok(());
        }
        match path.parent() {
            Some(parent) => sync_directory(parent),
            None => Ok(()),
        }
    }
}

impl Persistence for FilePersistence {
    fn ensure_container(&self, database: &DatabaseName) -> StorageResult<()> {
        self.ensure_dir(&self.database_path(database))
    }

    fn create_mutex(&self, database: &DatabaseName) -> StorageResult<Box<dyn DatabaseMutex>> {
        let path = self.database_path(database).join(LOCK_FILE);
        Ok(Box::new(FileMutex::new(path)))
    }

    fn read(&self, database: &DatabaseName, key: &DocumentKey) -> StorageResult<Vec<u8>> {
        let path = self.key_path(database, key);
        fs::read(&path).map_err(|e| StorageError::io(display(&path), e))
    }

    fn write(&self, database: &DatabaseName, key: &DocumentKey, data: &[u8]) -> StorageResult<()> {
        let path = self.key_path(database, key);
        self.ensure_parent(&path)?;

        let io_err = |e| StorageError::io(display(&path), e);
        let mut file = File::create(&path).map_err(io_err)?;
        file.write_all(data).map_err(io_err)?;
        if self.config.sync_writes {
            file.sync_all().map_err(io_err)?;
        }
        drop(file);

        set_mode(&path, self.config.file_mode)?;
        tracing::trace!(path = %path.display(), len = data.len(), "wrote file");
        Ok(())
    }

    fn rename(
        &self,
        database: &DatabaseName,
        from: &DocumentKey,
        to: &DocumentKey,
    ) -> StorageResult<()> {
        let from_path = self.key_path(database, from);
        let to_path = self.key_path(database, to);
        self.ensure_parent(&to_path)?;

        // rename(2) atomically replaces an existing destination
        fs::rename(&from_path, &to_path).map_err(|e| {
            StorageError::io(
                format!("{} -> {}", from_path.display(), to_path.display()),
                e,
            )
        })?;

        self.sync_parent(&to_path)?;
        tracing::trace!(from = %from_path.display(), to = %to_path.display(), "renamed file");
        Ok(())
    }

    fn delete(&self, database: &DatabaseName, key: &DocumentKey) -> StorageResult<()> {
        let path = self.key_path(database, key);
        fs::remove_file(&path).map_err(|e| StorageError::io(display(&path), e))?;
        self.sync_parent(&path)?;
        tracing::trace!(path = %path.display(), "deleted file");
        Ok(())
    }

    fn exists(&self, database: &DatabaseName, key: &DocumentKey) -> StorageResult<bool> {
        let path = self.key_path(database, key);
        match fs::metadata(&path) {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(display(&path), e)),
        }
    }
}

/// OS advisory lock on a database's `.lock` file.
///
/// The lock file is opened lazily on the first acquisition and kept open
/// while locked; switching modes is performed on the same descriptor.
/// Dropping the handle closes the file, which releases the lock.
#[derive(Debug)]
pub struct FileMutex {
    path: PathBuf,
    file: Option<File>,
    mode: Option<LockMode>,
}

impl FileMutex {
    /// Creates an unlocked handle for the lock file at `path`.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: None,
            mode: None,
        }
    }

    /// Returns the path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_lock_file(&mut self) -> StorageResult<&File> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .read(true)
                .append(true)
                .create(true)
                .open(&self.path)
                .map_err(|e| StorageError::lock(display(&self.path), e))?;
            set_mode(&self.path, LOCK_FILE_MODE)
                .map_err(|_| StorageError::lock(display(&self.path), permission_error()))?;
            self.file = Some(file);
        }

        self.file
            .as_ref()
            .ok_or_else(|| StorageError::lock(display(&self.path), permission_error()))
    }

    fn acquire(&mut self, mode: LockMode) -> StorageResult<()> {
        let target = display(&self.path);
        // The prior mode is forfeited even if the new acquisition fails.
        self.mode = None;

        let file = self.open_lock_file()?;
        let result = match mode {
            LockMode::Shared => FileExt::lock_shared(file),
            LockMode::Exclusive => FileExt::lock_exclusive(file),
        };

        match result {
            Ok(()) => {
                self.mode = Some(mode);
                tracing::trace!(path = %target, %mode, "acquired file lock");
                Ok(())
            }
            Err(e) => {
                self.file = None;
                Err(StorageError::lock(target, e))
            }
        }
    }
}

impl DatabaseMutex for FileMutex {
    fn lock_shared(&mut self) -> StorageResult<()> {
        self.acquire(LockMode::Shared)
    }

    fn lock_exclusive(&mut self) -> StorageResult<()> {
        self.acquire(LockMode::Exclusive)
    }

    fn try_lock_exclusive(&mut self) -> StorageResult<bool> {
        let target = display(&self.path);
        self.mode = None;

        let file = self.open_lock_file()?;
        match FileExt::try_lock_exclusive(file) {
            Ok(()) => {
                self.mode = Some(LockMode::Exclusive);
                Ok(true)
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                self.file = None;
                Ok(false)
            }
            Err(e) => {
                self.file = None;
                Err(StorageError::lock(target, e))
            }
        }
    }

    fn unlock(&mut self) -> StorageResult<()> {
        self.mode = None;
        if let Some(file) = self.file.take() {
            FileExt::unlock(&file).map_err(|e| StorageError::lock(display(&self.path), e))?;
            tracing::trace!(path = %self.path.display(), "released file lock");
        }
        Ok(())
    }

    fn mode(&self) -> Option<LockMode> {
        self.mode
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn not_a_directory(path: &Path) -> StorageError {
    StorageError::io(
        display(path),
        io::Error::new(io::ErrorKind::Other, "path is not a directory"),
    )
}

fn permission_error() -> io::Error {
    io::Error::new(io::ErrorKind::PermissionDenied, "unable to prepare lock file")
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> StorageResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| StorageError::io(display(path), e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> StorageResult<()> {
    // Permission masks have no equivalent on this platform
    Ok(())
}

/// Syncs a directory so renames and deletions inside it are durable.
#[cfg(unix)]
fn sync_directory(path: &Path) -> StorageResult<()> {
    let dir = File::open(path).map_err(|e| StorageError::io(display(path), e))?;
    dir.sync_all().map_err(|e| StorageError::io(display(path), e))
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> StorageResult<()> {
    // NTFS journaling covers metadata durability
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{DocumentId, StagingToken};
    use tempfile::tempdir;

    fn db() -> DatabaseName {
        DatabaseName::new("sampledb").unwrap()
    }

    fn key(id: &str) -> DocumentKey {
        DocumentKey::live(&DocumentId::parse(id).unwrap())
    }

    #[test]
    fn open_requires_existing_directory() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(FilePersistence::open(&missing, FileConfig::default()).is_err());

        let file = dir.path().join("file");
        fs::write(&file, b"x").unwrap();
        assert!(FilePersistence::open(&file, FileConfig::default()).is_err());
    }

    #[test]
    fn key_paths() {
        let dir = tempdir().unwrap();
        let persistence = FilePersistence::open(dir.path(), FileConfig::default()).unwrap();
        let id = DocumentId::parse("foo/a").unwrap();
        let token = StagingToken::generate();

        assert_eq!(
            persistence.key_path(&db(), &DocumentKey::live(&id)),
            dir.path().join("sampledb").join("foo").join("a.json")
        );
        assert_eq!(
            persistence.key_path(&db(), &DocumentKey::staged(&id, &token)),
            dir.path()
                .join("sampledb")
                .join("foo")
                .join(format!("a.{token}.tmp"))
        );
    }

    #[test]
    fn custom_extensions() {
        let dir = tempdir().unwrap();
        let config = FileConfig::new().extension("doc").staging_extension("stage");
        let persistence = FilePersistence::open(dir.path(), config).unwrap();
        let id = DocumentId::parse("a").unwrap();
        let token = StagingToken::generate();

        assert!(persistence
            .key_path(&db(), &DocumentKey::live(&id))
            .ends_with("a.doc"));
        assert!(persistence
            .key_path(&db(), &DocumentKey::staged(&id, &token))
            .to_string_lossy()
            .ends_with(".stage"));
    }

    #[test]
    fn write_read_and_exists() {
        let dir = tempdir().unwrap();
        let persistence = FilePersistence::open(dir.path(), FileConfig::default()).unwrap();
        persistence.ensure_container(&db()).unwrap();

        assert!(!persistence.exists(&db(), &key("foo/bar/baz")).unwrap());
        persistence
            .write(&db(), &key("foo/bar/baz"), b"{\"x\":1}")
            .unwrap();
        assert!(persistence.exists(&db(), &key("foo/bar/baz")).unwrap());
        assert_eq!(
            persistence.read(&db(), &key("foo/bar/baz")).unwrap(),
            b"{\"x\":1}"
        );
    }

    #[test]
    fn read_missing_is_io_error() {
        let dir = tempdir().unwrap();
        let persistence = FilePersistence::open(dir.path(), FileConfig::default()).unwrap();
        let err = persistence.read(&db(), &key("nope")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn rename_replaces_destination() {
        let dir = tempdir().unwrap();
        let persistence = FilePersistence::open(dir.path(), FileConfig::default()).unwrap();
        let id = DocumentId::parse("foo/a").unwrap();
        let staged = DocumentKey::staged(&id, &StagingToken::generate());
        let live = DocumentKey::live(&id);

        persistence.write(&db(), &live, b"old").unwrap();
        persistence.write(&db(), &staged, b"new").unwrap();
        persistence.rename(&db(), &staged, &live).unwrap();

        assert_eq!(persistence.read(&db(), &live).unwrap(), b"new");
        assert!(!persistence.exists(&db(), &staged).unwrap());
    }

    #[test]
    fn delete_missing_fails() {
        let dir = tempdir().unwrap();
        let persistence = FilePersistence::open(dir.path(), FileConfig::default()).unwrap();
        persistence.write(&db(), &key("a"), b"1").unwrap();
        persistence.delete(&db(), &key("a")).unwrap();
        assert!(!persistence.exists(&db(), &key("a")).unwrap());
        assert!(matches!(
            persistence.delete(&db(), &key("a")),
            Err(StorageError::Io { .. })
        ));
    }

    #[test]
    fn ensure_container_rejects_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("sampledb"), b"x").unwrap();
        let persistence = FilePersistence::open(dir.path(), FileConfig::default()).unwrap();
        assert!(persistence.ensure_container(&db()).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn permission_masks_applied() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let config = FileConfig::new().dir_mode(0o770).file_mode(0o640);
        let persistence = FilePersistence::open(dir.path(), config).unwrap();
        persistence.write(&db(), &key("foo/a"), b"1").unwrap();

        let folder = dir.path().join("sampledb").join("foo");
        let file = folder.join("a.json");
        assert_eq!(fs::metadata(&folder).unwrap().permissions().mode() & 0o777, 0o770);
        assert_eq!(fs::metadata(&file).unwrap().permissions().mode() & 0o777, 0o640);
    }

    #[test]
    fn shared_locks_are_compatible() {
        let dir = tempdir().unwrap();
        let persistence = FilePersistence::open(dir.path(), FileConfig::default()).unwrap();
        persistence.ensure_container(&db()).unwrap();

        let mut a = persistence.create_mutex(&db()).unwrap();
        let mut b = persistence.create_mutex(&db()).unwrap();
        a.lock_shared().unwrap();
        b.lock_shared().unwrap();
        assert_eq!(a.mode(), Some(LockMode::Shared));
        assert!(b.is_locked());

        let mut c = persistence.create_mutex(&db()).unwrap();
        assert!(!c.try_lock_exclusive().unwrap());
        assert!(!c.is_locked());
    }

    #[test]
    fn exclusive_excludes_and_unlock_releases() {
        let dir = tempdir().unwrap();
        let persistence = FilePersistence::open(dir.path(), FileConfig::default()).unwrap();
        persistence.ensure_container(&db()).unwrap();

        let mut a = persistence.create_mutex(&db()).unwrap();
        let mut b = persistence.create_mutex(&db()).unwrap();
        a.lock_shared().unwrap();
        a.lock_exclusive().unwrap();
        assert_eq!(a.mode(), Some(LockMode::Exclusive));
        assert!(!b.try_lock_exclusive().unwrap());

        a.lock_shared().unwrap();
        assert!(!b.try_lock_exclusive().unwrap());

        a.unlock().unwrap();
        assert!(!a.is_locked());
        assert!(b.try_lock_exclusive().unwrap());
        assert!(dir.path().join("sampledb").join(LOCK_FILE).exists());
    }

    #[test]
    fn drop_releases_lock() {
        let dir = tempdir().unwrap();
        let persistence = FilePersistence::open(dir.path(), FileConfig::default()).unwrap();
        persistence.ensure_container(&db()).unwrap();

        {
            let mut a = persistence.create_mutex(&db()).unwrap();
            a.lock_exclusive().unwrap();
        }

        let mut b = persistence.create_mutex(&db()).unwrap();
        assert!(b.try_lock_exclusive().unwrap());
    }
}
