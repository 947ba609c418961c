//! # depot-core
//!
//! Core abstractions for the Depot distributed pack store.
//!
//! This crate provides the foundational types and traits used across all
//! Depot components:
//!
//! - **Object Identifiers**: Fixed-width content hashes and compact OID sets
//! - **Storage Backend**: Abstract object-storage interface with conditional
//!   writes, plus an in-memory backend for tests
//! - **Clock**: Injectable wall-clock and time-zone source
//! - **Progress**: Progress reporting and cooperative cancellation contract
//! - **Lock Files**: Single-winner file creation for weakly-consistent
//!   filesystems
//! - **Error Types**: Shared error definitions and result types
//!
//! ## Crate Boundary
//!
//! `depot-core` is the only crate allowed to define shared primitives. The
//! store and engine layers build on these contracts without knowing which
//! backend is underneath.
//!
//! ## Example
//!
//! ```rust
//! use depot_core::prelude::*;
//!
//! let oid: Oid = "da39a3ee5e6b4b0d3255bfef95601890afd80709".parse().unwrap();
//! assert_eq!(oid.to_string().len(), 40);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod clock;
pub mod error;
pub mod lockfile;
pub mod observability;
pub mod oid;
pub mod progress;
pub mod storage;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use depot_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::clock::{Clock, FixedClock, SystemClock};
    pub use crate::error::{Error, Result};
    pub use crate::lockfile::{create_unique_file, LockToken};
    pub use crate::oid::{ObjectKind, Oid, OidSet, OID_HEX_LEN, OID_LEN};
    pub use crate::progress::{CountingProgressMonitor, NullProgressMonitor, ProgressMonitor};
    pub use crate::storage::{
        MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult,
    };
}

// Re-export key types at crate root for ergonomics
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{Error, Result};
pub use lockfile::{create_unique_file, LockToken};
pub use observability::{init_logging, LogFormat};
pub use oid::{ObjectKind, Oid, OidSet, OID_HEX_LEN, OID_LEN};
pub use progress::{CountingProgressMonitor, NullProgressMonitor, ProgressMonitor};
pub use storage::{MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult};
