//! Pack descriptors and their provenance classes.
//!
//! A [`PackDescription`] is the catalog's record of one pack: its name, the
//! class it was produced under, its timestamps and companion-file sizes.
//! Descriptors are allocated by the object database, populated while the
//! pack is written, and become immutable once committed.

use serde::{Deserialize, Serialize};

/// Bytes of fixed header at the start of every pack file.
pub const PACK_HEADER_LEN: u64 = 12;

/// Bytes of trailer checksum at the end of every pack file.
pub const PACK_TRAILER_LEN: u64 = 20;

/// Combined per-pack overhead of header plus trailer.
pub const PACK_OVERHEAD: u64 = PACK_HEADER_LEN + PACK_TRAILER_LEN;

/// The class a pack was produced under.
///
/// Classification is a stored attribute of the pack, never recomputed.
/// Garbage-collection policy keys off this class.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PackSource {
    /// Pack created by a local object inserter.
    Insert,
    /// Pack received over the wire.
    Receive,
    /// Pack produced by compacting smaller packs.
    Compact,
    /// Heads pack produced by garbage collection.
    Gc,
    /// Non-head reachable pack produced by garbage collection.
    GcRest,
    /// Transactional ref-tree pack produced by garbage collection.
    GcTxn,
    /// Unreachable objects retained under a time-to-live.
    UnreachableGarbage,
}

impl PackSource {
    /// Returns the canonical name of this class.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Receive => "RECEIVE",
            Self::Compact => "COMPACT",
            Self::Gc => "GC",
            Self::GcRest => "GC_REST",
            Self::GcTxn => "GC_TXN",
            Self::UnreachableGarbage => "UNREACHABLE_GARBAGE",
        }
    }
}

impl std::fmt::Display for PackSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Companion-file extensions of a pack.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackExt {
    /// The pack data file itself.
    Pack,
    /// The forward index (OID to offset).
    Index,
    /// The optional bitmap index.
    BitmapIndex,
}

impl PackExt {
    /// File-name suffix for this extension.
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Pack => "pack",
            Self::Index => "idx",
            Self::BitmapIndex => "bitmap",
        }
    }
}

/// Opaque statistics reported by a pack writer for one written pack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackStatistics {
    /// Objects written into the pack.
    pub object_count: u64,
    /// Total pack bytes including header and trailer.
    pub total_bytes: u64,
    /// Objects copied verbatim from source packs.
    pub reused_objects: u64,
}

/// Catalog record of one pack file and its companions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackDescription {
    name: String,
    source: PackSource,
    last_modified_ms: i64,
    estimated_pack_size: u64,
    object_count: u64,
    index_version: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pack_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    index_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    bitmap_index_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pack_stats: Option<PackStatistics>,
}

impl PackDescription {
    /// Creates a fresh descriptor for a pack about to be written.
    #[must_use]
    pub fn new(name: impl Into<String>, source: PackSource, estimated_pack_size: u64) -> Self {
        Self {
            name: name.into(),
            source,
            last_modified_ms: 0,
            estimated_pack_size,
            object_count: 0,
            index_version: 0,
            pack_size: None,
            index_size: None,
            bitmap_index_size: None,
            pack_stats: None,
        }
    }

    /// Unique name of this pack within the store.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The class this pack was produced under.
    #[must_use]
    pub fn source(&self) -> PackSource {
        self.source
    }

    /// Storage key of the given companion file.
    #[must_use]
    pub fn file_name(&self, ext: PackExt) -> String {
        format!("{}.{}", self.name, ext.suffix())
    }

    /// Wall-clock milliseconds at which the pack was written.
    #[must_use]
    pub fn last_modified_ms(&self) -> i64 {
        self.last_modified_ms
    }

    /// Stamps the modification time.
    pub fn set_last_modified_ms(&mut self, millis: i64) {
        self.last_modified_ms = millis;
    }

    /// Size estimate supplied when the descriptor was allocated.
    #[must_use]
    pub fn estimated_pack_size(&self) -> u64 {
        self.estimated_pack_size
    }

    /// Bytes present for the given extension; 0 when absent.
    #[must_use]
    pub fn file_size(&self, ext: PackExt) -> u64 {
        match ext {
            PackExt::Pack => self.pack_size,
            PackExt::Index => self.index_size,
            PackExt::BitmapIndex => self.bitmap_index_size,
        }
        .unwrap_or(0)
    }

    /// Returns true when the given companion file has been written.
    #[must_use]
    pub fn has_file(&self, ext: PackExt) -> bool {
        match ext {
            PackExt::Pack => self.pack_size,
            PackExt::Index => self.index_size,
            PackExt::BitmapIndex => self.bitmap_index_size,
        }
        .is_some()
    }

    /// Records the byte size of a written companion file.
    pub fn set_file_size(&mut self, ext: PackExt, size: u64) {
        let slot = match ext {
            PackExt::Pack => &mut self.pack_size,
            PackExt::Index => &mut self.index_size,
            PackExt::BitmapIndex => &mut self.bitmap_index_size,
        };
        *slot = Some(size);
    }

    /// Objects contained in the pack.
    #[must_use]
    pub fn object_count(&self) -> u64 {
        self.object_count
    }

    /// Records the object count.
    pub fn set_object_count(&mut self, count: u64) {
        self.object_count = count;
    }

    /// Version of the written forward index.
    #[must_use]
    pub fn index_version(&self) -> u32 {
        self.index_version
    }

    /// Records the index version.
    pub fn set_index_version(&mut self, version: u32) {
        self.index_version = version;
    }

    /// Writer statistics for this pack, if attached.
    #[must_use]
    pub fn pack_stats(&self) -> Option<&PackStatistics> {
        self.pack_stats.as_ref()
    }

    /// Attaches writer statistics.
    pub fn set_pack_stats(&mut self, stats: PackStatistics) {
        self.pack_stats = Some(stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_names_are_canonical() {
        assert_eq!(PackSource::Insert.as_str(), "INSERT");
        assert_eq!(PackSource::GcRest.as_str(), "GC_REST");
        assert_eq!(
            PackSource::UnreachableGarbage.as_str(),
            "UNREACHABLE_GARBAGE"
        );

        let json = serde_json::to_string(&PackSource::GcTxn).expect("serialize");
        assert_eq!(json, "\"GC_TXN\"");
    }

    #[test]
    fn file_names_follow_extension() {
        let desc = PackDescription::new("pack-01h2xyz", PackSource::Gc, 0);
        assert_eq!(desc.file_name(PackExt::Pack), "pack-01h2xyz.pack");
        assert_eq!(desc.file_name(PackExt::Index), "pack-01h2xyz.idx");
        assert_eq!(desc.file_name(PackExt::BitmapIndex), "pack-01h2xyz.bitmap");
    }

    #[test]
    fn file_sizes_default_to_zero() {
        let mut desc = PackDescription::new("p", PackSource::Insert, 100);
        assert_eq!(desc.file_size(PackExt::Pack), 0);
        assert!(!desc.has_file(PackExt::Pack));

        desc.set_file_size(PackExt::Pack, 4096);
        assert_eq!(desc.file_size(PackExt::Pack), 4096);
        assert!(desc.has_file(PackExt::Pack));
        assert!(!desc.has_file(PackExt::BitmapIndex));
    }

    #[test]
    fn descriptor_serde_round_trip() {
        let mut desc = PackDescription::new("pack-a", PackSource::UnreachableGarbage, 64);
        desc.set_last_modified_ms(1_700_000_000_000);
        desc.set_file_size(PackExt::Pack, 320);
        desc.set_object_count(3);
        desc.set_index_version(2);
        desc.set_pack_stats(PackStatistics {
            object_count: 3,
            total_bytes: 320,
            reused_objects: 3,
        });

        let json = serde_json::to_string(&desc).expect("serialize");
        let back: PackDescription = serde_json::from_str(&json).expect("parse");
        assert_eq!(desc, back);
    }

    #[test]
    fn overhead_matches_layout() {
        assert_eq!(PACK_OVERHEAD, 32);
    }
}
