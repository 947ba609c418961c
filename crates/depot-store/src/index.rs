//! Forward and reverse pack indices.
//!
//! The forward index maps OIDs to byte offsets inside the pack body. The
//! reverse index is its offset-sorted view; walking it yields per-object
//! compressed sizes as the distance to the next offset, with the region
//! before the trailer (`pack_size − 20`) terminating the last object.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use depot_core::{ObjectKind, Oid};

use crate::error::{Result, StoreError};

/// One forward-index record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    /// Object identifier.
    pub oid: Oid,
    /// Byte offset of the object within the pack file.
    pub offset: u64,
    /// Persisted kind of the object.
    pub kind: ObjectKind,
}

/// Forward index of one pack: OID-sorted entries.
#[derive(Debug, Clone)]
pub struct PackIndex {
    entries: Vec<IndexEntry>,
}

impl PackIndex {
    /// Current forward-index format version.
    pub const VERSION: u32 = 2;

    /// Builds an index from entries, sorting by OID.
    #[must_use]
    pub fn new(mut entries: Vec<IndexEntry>) -> Self {
        entries.sort_unstable_by(|a, b| a.oid.cmp(&b.oid));
        Self { entries }
    }

    /// Parses a persisted index.
    ///
    /// # Errors
    ///
    /// Returns a serialization error when the bytes are not a valid index.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let entries: Vec<IndexEntry> =
            serde_json::from_slice(data).map_err(|e| StoreError::Serialization {
                message: format!("failed to parse pack index: {e}"),
            })?;
        Ok(Self::new(entries))
    }

    /// Serializes the index for storage.
    ///
    /// # Errors
    ///
    /// Returns a serialization error when encoding fails.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let data = serde_json::to_vec(&self.entries).map_err(|e| StoreError::Serialization {
            message: format!("failed to encode pack index: {e}"),
        })?;
        Ok(Bytes::from(data))
    }

    /// Number of objects in the pack.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the pack holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in OID order.
    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.iter()
    }

    /// Looks up the pack offset of an object.
    #[must_use]
    pub fn offset_of(&self, oid: &Oid) -> Option<u64> {
        self.find(oid).map(|e| e.offset)
    }

    /// Looks up the persisted kind of an object.
    #[must_use]
    pub fn kind_of(&self, oid: &Oid) -> Option<ObjectKind> {
        self.find(oid).map(|e| e.kind)
    }

    fn find(&self, oid: &Oid) -> Option<&IndexEntry> {
        self.entries
            .binary_search_by(|e| e.oid.cmp(oid))
            .ok()
            .map(|i| &self.entries[i])
    }
}

/// Offset-sorted view of a [`PackIndex`].
#[derive(Debug, Clone)]
pub struct ReverseIndex {
    offsets: Vec<u64>,
}

impl ReverseIndex {
    /// Builds the reverse index for a forward index.
    #[must_use]
    pub fn new(index: &PackIndex) -> Self {
        let mut offsets: Vec<u64> = index.entries().map(|e| e.offset).collect();
        offsets.sort_unstable();
        Self { offsets }
    }

    /// Returns the offset where the object at `offset` ends.
    ///
    /// That is the offset of the next object, or `max_offset` (the body
    /// terminator, `pack_size − 20`) for the last object in the pack.
    #[must_use]
    pub fn next_offset(&self, offset: u64, max_offset: u64) -> u64 {
        match self.offsets.binary_search(&offset) {
            Ok(i) => self.offsets.get(i + 1).copied().unwrap_or(max_offset),
            // Unknown offsets only arise from corrupt indices; clamp to the
            // terminator rather than inventing a size.
            Err(_) => max_offset,
        }
    }
}
