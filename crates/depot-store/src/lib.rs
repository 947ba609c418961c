//! # depot-store
//!
//! Pack-file object store for the Depot distributed version-control
//! backend.
//!
//! This crate implements the storage layer that holds repository objects
//! (commits, trees, blobs, tags) in pack files with companion indices:
//!
//! - **Pack Catalog**: Descriptors classified by provenance (`INSERT`,
//!   `RECEIVE`, `COMPACT`, `GC`, `GC_REST`, `GC_TXN`,
//!   `UNREACHABLE_GARBAGE`)
//! - **Contracts**: Object database, ref database, and pack writer traits
//!   over pluggable backends
//! - **Garbage Collection**: The repack engine that consolidates reachable
//!   objects and retires unreachable ones under a time-to-live
//!
//! ## Architecture
//!
//! The committed pack set is a single manifest swapped atomically by the
//! object database. Maintenance reads one snapshot of refs and packs,
//! writes replacement packs, and publishes them in one commit; concurrent
//! inserters keep appending packs that the running collection neither reads
//! nor prunes.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use depot_core::NullProgressMonitor;
//! use depot_store::gc::GarbageCollector;
//!
//! let mut gc = GarbageCollector::new(odb, refdb);
//! gc.set_garbage_ttl(std::time::Duration::from_secs(24 * 60 * 60));
//! let clean = gc.pack(&NullProgressMonitor).await?;
//! if !clean {
//!     // race detected, rerun later
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod cache;
pub mod desc;
pub mod error;
pub mod gc;
pub mod index;
pub mod memory;
pub mod metrics;
pub mod odb;
pub mod refs;
pub mod writer;

// Re-export main types at crate root
pub use cache::BlockCache;
pub use desc::{PackDescription, PackExt, PackSource, PackStatistics};
pub use error::{Result, StoreError};
pub use gc::GarbageCollector;
pub use index::{IndexEntry, PackIndex, ReverseIndex};
pub use odb::{CommitOutcome, ObjectDatabase, PackFile};
pub use refs::{Ref, RefDatabase};
pub use writer::{PackConfig, PackWriter};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::cache::BlockCache;
    pub use crate::desc::{PackDescription, PackExt, PackSource, PackStatistics};
    pub use crate::error::{Result, StoreError};
    pub use crate::gc::{GarbageCollector, GarbagePolicy};
    pub use crate::index::{IndexEntry, PackIndex, ReverseIndex};
    pub use crate::memory::{MemoryObjectDatabase, MemoryRefDatabase, ObjectSpec};
    pub use crate::odb::{CommitOutcome, ObjectDatabase, PackFile};
    pub use crate::refs::{Ref, RefDatabase};
    pub use crate::writer::{PackConfig, PackWriter};
}
