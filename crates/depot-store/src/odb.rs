//! Object-database contract.
//!
//! The object database owns pack enumeration, descriptor allocation, pack
//! file I/O, and the atomic swap of the committed pack set. Implementations
//! sit on anything from a durable filesystem to weakly-consistent object
//! storage; the commit contract is written for the weakest backend.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::desc::{PackDescription, PackExt, PackSource};
use crate::error::Result;
use crate::index::PackIndex;
use crate::writer::{PackConfig, PackWriter};

/// A committed pack file and its loaded companions.
#[async_trait]
pub trait PackFile: Send + Sync {
    /// The catalog record of this pack.
    fn description(&self) -> &PackDescription;

    /// Loads (or returns the cached) forward index of this pack.
    ///
    /// # Errors
    ///
    /// Returns an object-database error when the index cannot be read.
    async fn index(&self) -> Result<Arc<PackIndex>>;
}

/// Result of attempting to commit a pack-set swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The additions and removals were published atomically.
    Committed,
    /// The repository changed underneath the caller; nothing was published.
    ///
    /// The caller discards its new packs and may retry the whole operation
    /// against a fresh snapshot.
    RaceDetected,
}

/// Contract of the object database consumed by the garbage collector.
#[async_trait]
pub trait ObjectDatabase: Send + Sync + 'static {
    /// Pack handle type produced by this database.
    type Pack: PackFile;
    /// Writer type produced by this database.
    type Writer: PackWriter;

    /// Lists the currently committed packs.
    ///
    /// The snapshot is taken once per maintenance run; packs committed
    /// concurrently afterwards are neither read nor pruned by that run.
    async fn packs(&self) -> Result<Vec<Self::Pack>>;

    /// Allocates a descriptor for a pack about to be written.
    ///
    /// The descriptor is not visible to readers until committed.
    async fn new_pack(
        &self,
        source: PackSource,
        estimated_pack_size: u64,
    ) -> Result<PackDescription>;

    /// Creates a writer that reads objects through this database.
    fn new_writer(&self, config: &PackConfig) -> Self::Writer;

    /// Reads a companion file of a pack.
    async fn read_file(&self, desc: &PackDescription, ext: PackExt) -> Result<Bytes>;

    /// Writes a companion file of an uncommitted pack.
    async fn put_file(&self, desc: &PackDescription, ext: PackExt, data: Bytes) -> Result<()>;

    /// Atomically publishes `additions` and withdraws `removals`.
    ///
    /// Detects races with concurrent committers: when the pack set changed
    /// in a way that invalidates the caller's snapshot, nothing is
    /// published and [`CommitOutcome::RaceDetected`] is returned.
    async fn commit_pack(
        &self,
        additions: &[PackDescription],
        removals: &[PackDescription],
    ) -> Result<CommitOutcome>;

    /// Discards uncommitted packs, removing their written files.
    ///
    /// Best-effort by contract: failures are reported but leave the
    /// committed pack set untouched.
    async fn rollback_pack(&self, additions: &[PackDescription]) -> Result<()>;

    /// Drops any cached pack state so the next read observes the backend.
    fn clear_cache(&self);
}
