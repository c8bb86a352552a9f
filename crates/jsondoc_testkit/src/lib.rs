//! # jsondoc Testkit
//!
//! Test utilities for jsondoc.
//!
//! This crate provides:
//! - File-backed and in-memory store fixtures with automatic cleanup
//! - Property-based generators for ids and database names
//! - A sample document type
//!
//! ## Usage
//!
//! ```rust
//! use jsondoc_testkit::prelude::*;
//!
//! let fixture = TestStore::<Foo>::file();
//! let mut session = fixture.open_session("sampledb").unwrap();
//! session.store(Foo::new("one"), "foo/a").unwrap();
//! session.commit().unwrap();
//! assert!(fixture.document_path("sampledb", "foo/a").exists());
//! session.close().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
