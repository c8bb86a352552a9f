//! # jsondoc Core
//!
//! Transactional document sessions for jsondoc.
//!
//! This crate provides:
//! - [`DocumentStore`], the factory that opens sessions on named databases
//! - [`DocumentSession`], a unit of work with identity-preserving loads,
//!   buffered stores and deletions, and a two-phase staged commit
//! - [`Serializer`] with a serde-based [`JsonSerializer`]
//!
//! Sessions coordinate through a per-database readers/committer lock: each
//! open session holds a shared lock, and a commit upgrades to exclusive
//! while it stages and finalizes its writes.
//!
//! ## Example
//!
//! ```rust
//! use jsondoc_core::{DocumentStore, JsonSerializer};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Foo {
//!     bar: String,
//! }
//!
//! let store = DocumentStore::<JsonSerializer<Foo>>::in_memory();
//!
//! let mut session = store.open_session("sampledb").unwrap();
//! session.store(Foo { bar: "one".into() }, "foo/a").unwrap();
//! session.commit().unwrap();
//! session.close().unwrap();
//!
//! let mut session = store.open_session("sampledb").unwrap();
//! assert_eq!(session.load("foo/a").unwrap().bar, "one");
//! session.close().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod serializer;
mod session;
mod status;
mod store;

pub use error::{CodecError, CommitPhase, DocumentError, DocumentResult};
#[cfg(feature = "cbor")]
pub use serializer::CborSerializer;
pub use serializer::{JsonSerializer, Serializer};
pub use session::DocumentSession;
pub use status::DocumentStatus;
pub use store::DocumentStore;

pub use jsondoc_storage::{
    DatabaseName, DocumentId, FileConfig, FilePersistence, InMemoryPersistence, LockMode,
    Persistence,
};
