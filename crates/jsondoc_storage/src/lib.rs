//! # jsondoc Storage
//!
//! Persistence and locking primitives for jsondoc.
//!
//! This crate provides the lowest-level abstractions of the document store.
//! Persistence layers are **opaque byte stores** addressed by database name
//! and document key - they do not interpret the documents they store.
//!
//! ## Design Principles
//!
//! - Identifiers are validated before any I/O ([`DatabaseName`], [`DocumentId`])
//! - Backends expose read, write, rename, delete and exists per key
//! - Each backend is also the factory for its database mutexes
//! - Must be `Send + Sync` so one instance can serve many sessions
//!
//! ## Available Backends
//!
//! - [`FilePersistence`] - One file per document, guarded by [`FileMutex`]
//! - [`InMemoryPersistence`] - For testing, guarded by [`MemoryMutex`]
//!
//! ## Example
//!
//! ```rust
//! use jsondoc_storage::{DatabaseName, DocumentId, DocumentKey, InMemoryPersistence, Persistence};
//!
//! let persistence = InMemoryPersistence::new();
//! let db = DatabaseName::new("sampledb").unwrap();
//! let id = DocumentId::parse("foo/a").unwrap();
//!
//! persistence.write(&db, &DocumentKey::live(&id), b"{}").unwrap();
//! assert!(persistence.exists(&db, &DocumentKey::live(&id)).unwrap());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod key;
mod memory;
mod mutex;
mod persistence;

pub use error::{StorageError, StorageResult};
pub use file::{FileConfig, FileMutex, FilePersistence, LOCK_FILE};
pub use key::{is_valid_name, DatabaseName, DocumentId, DocumentKey, StagingToken, SEGMENT_SEPARATOR};
pub use memory::{Fault, InMemoryPersistence, LockTable, MemoryMutex, Operation, OperationKind};
pub use mutex::{DatabaseMutex, LockMode};
pub use persistence::Persistence;
