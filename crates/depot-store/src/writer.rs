//! Pack-writer configuration and contract.
//!
//! The writer is a black box to the garbage collector: given `want` and
//! `have` tips it assembles a pack stream, index, and optional bitmap
//! index. Delta search and encoding strategy live entirely behind this
//! contract.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use depot_core::{ObjectKind, Oid, OidSet, ProgressMonitor};

use crate::desc::PackStatistics;
use crate::error::Result;
use crate::index::PackIndex;

/// Configuration handed to each pack writer.
///
/// The collector adjusts a few of these per phase; everything else passes
/// through to the writer unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackConfig {
    /// Version of the forward index to write. Only version 2 is supported.
    pub index_version: u32,
    /// Encode delta bases as offsets instead of full OIDs.
    pub delta_base_as_offset: bool,
    /// Reuse existing delta chains for commits.
    pub reuse_delta_commits: bool,
    /// Reuse existing deltas verbatim where possible.
    pub reuse_deltas: bool,
    /// Reuse whole object representations where possible.
    pub reuse_objects: bool,
    /// Search for new deltas while packing.
    pub delta_compress: bool,
    /// Build a bitmap index alongside the pack.
    pub build_bitmaps: bool,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            index_version: PackIndex::VERSION,
            delta_base_as_offset: false,
            reuse_delta_commits: true,
            reuse_deltas: true,
            reuse_objects: true,
            delta_compress: true,
            build_bitmaps: true,
        }
    }
}

/// Contract of the pack writer consumed by the garbage collector.
///
/// A writer instance produces exactly one pack: either prepared from a
/// reachability traversal (`prepare_pack`) or assembled object by object
/// (`add_object`), then written out as pack, index, and optional bitmap
/// bytes.
#[async_trait]
pub trait PackWriter: Send {
    /// Announces the objects that tags ultimately name.
    fn set_tag_targets(&mut self, targets: FxHashSet<Oid>);

    /// Excludes every member of `objects` from the produced pack.
    ///
    /// May be called multiple times; exclusions accumulate.
    fn exclude_objects(&mut self, objects: Arc<OidSet>);

    /// Selects the objects reachable from `want` but not from `have`.
    ///
    /// # Errors
    ///
    /// Returns a writer error when traversal fails.
    async fn prepare_pack(
        &mut self,
        pm: &dyn ProgressMonitor,
        want: &FxHashSet<Oid>,
        have: &FxHashSet<Oid>,
    ) -> Result<()>;

    /// Adds a single object with its persisted kind.
    ///
    /// Used instead of `prepare_pack` when the caller enumerates objects
    /// itself. Duplicate additions are ignored.
    ///
    /// # Errors
    ///
    /// Returns a writer error when the object cannot be staged.
    fn add_object(&mut self, oid: Oid, kind: ObjectKind) -> Result<()>;

    /// Number of objects selected for the pack.
    fn object_count(&self) -> u64;

    /// Produces the pack bytes (header, body, trailer).
    ///
    /// # Errors
    ///
    /// Returns a writer error when encoding fails.
    async fn write_pack(&mut self, pm: &dyn ProgressMonitor) -> Result<Bytes>;

    /// Produces the forward-index bytes for the written pack.
    ///
    /// # Errors
    ///
    /// Returns a writer error when the pack has not been written yet.
    async fn write_index(&mut self) -> Result<Bytes>;

    /// Prepares a bitmap index; returns false when none will be available.
    ///
    /// # Errors
    ///
    /// Returns a writer error when bitmap preparation fails.
    async fn prepare_bitmap_index(&mut self, pm: &dyn ProgressMonitor) -> Result<bool>;

    /// Produces the bitmap-index bytes.
    ///
    /// Only valid after `prepare_bitmap_index` returned true.
    ///
    /// # Errors
    ///
    /// Returns a writer error when no bitmap was prepared.
    async fn write_bitmap_index(&mut self) -> Result<Bytes>;

    /// Statistics for the written pack.
    fn statistics(&self) -> PackStatistics;

    /// Membership set of every object written into the pack.
    fn object_set(&self) -> OidSet;

    /// Version of the index produced by `write_index`.
    fn index_version(&self) -> u32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_writer_friendly() {
        let cfg = PackConfig::default();
        assert_eq!(cfg.index_version, 2);
        assert!(!cfg.delta_base_as_offset);
        assert!(cfg.reuse_deltas);
        assert!(cfg.delta_compress);
        assert!(cfg.build_bitmaps);
    }

    #[test]
    fn config_serde_round_trip() {
        let cfg = PackConfig {
            delta_compress: false,
            build_bitmaps: false,
            ..PackConfig::default()
        };
        let json = serde_json::to_string(&cfg).expect("serialize");
        let back: PackConfig = serde_json::from_str(&json).expect("parse");
        assert_eq!(cfg, back);
    }
}
