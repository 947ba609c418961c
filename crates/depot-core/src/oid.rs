//! Object identifiers for content-addressed storage.
//!
//! An [`Oid`] is the fixed-width hash naming one object in the store.
//! Equality and ordering are value-based, so OIDs can key maps and be kept
//! in sorted membership structures ([`OidSet`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Number of raw bytes in an object identifier.
pub const OID_LEN: usize = 20;

/// Number of hex characters in the string form of an object identifier.
pub const OID_HEX_LEN: usize = OID_LEN * 2;

/// A fixed-width content hash naming one object.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Oid([u8; OID_LEN]);

impl Oid {
    /// The all-zero identifier, never naming a real object.
    pub const ZERO: Oid = Oid([0u8; OID_LEN]);

    /// Creates an identifier from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; OID_LEN]) -> Self {
        Self(bytes)
    }

    /// Hashes arbitrary content into an identifier.
    ///
    /// The store is hash-agnostic; this helper derives identifiers for
    /// locally created objects by truncating a BLAKE3 digest to the OID
    /// width.
    #[must_use]
    pub fn hash(data: &[u8]) -> Self {
        let digest = blake3::hash(data);
        let mut bytes = [0u8; OID_LEN];
        bytes.copy_from_slice(&digest.as_bytes()[..OID_LEN]);
        Self(bytes)
    }

    /// Returns the raw bytes of this identifier.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; OID_LEN] {
        &self.0
    }

    /// Returns true for the all-zero identifier.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Renders the identifier as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        const HEX_CHARS: &[u8] = b"0123456789abcdef";
        let mut hex = String::with_capacity(OID_HEX_LEN);
        for &byte in &self.0 {
            hex.push(HEX_CHARS[(byte >> 4) as usize] as char);
            hex.push(HEX_CHARS[(byte & 0xf) as usize] as char);
        }
        hex
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self.to_hex())
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Oid {
    type Err = Error;

    fn from_str(hex: &str) -> Result<Self, Self::Err> {
        if hex.len() != OID_HEX_LEN {
            return Err(Error::InvalidInput(format!(
                "invalid oid length: expected {OID_HEX_LEN} hex characters, got {}",
                hex.len()
            )));
        }
        let mut bytes = [0u8; OID_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let high = hex_nibble(hex.as_bytes()[i * 2])?;
            let low = hex_nibble(hex.as_bytes()[i * 2 + 1])?;
            *byte = (high << 4) | low;
        }
        Ok(Self(bytes))
    }
}

fn hex_nibble(c: u8) -> Result<u8, Error> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(Error::InvalidInput(format!(
            "invalid hex character: {}",
            c as char
        ))),
    }
}

impl Serialize for Oid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Oid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        hex.parse().map_err(serde::de::Error::custom)
    }
}

/// The kind of a stored object.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    /// A commit object.
    Commit,
    /// A directory tree object.
    Tree,
    /// A file content object.
    Blob,
    /// An annotated tag object.
    Tag,
}

impl ObjectKind {
    /// Returns the lowercase name of this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Tag => "tag",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable, compact membership set of object identifiers.
///
/// Built once when a pack is written and queried many times afterwards.
/// Backed by a sorted slice; `contains` is a binary search.
#[derive(Debug, Clone, Default)]
pub struct OidSet {
    sorted: Box<[Oid]>,
}

impl FromIterator<Oid> for OidSet {
    fn from_iter<I: IntoIterator<Item = Oid>>(oids: I) -> Self {
        let mut sorted: Vec<Oid> = oids.into_iter().collect();
        sorted.sort_unstable();
        sorted.dedup();
        Self {
            sorted: sorted.into_boxed_slice(),
        }
    }
}

impl OidSet {
    /// Returns true if `oid` is a member.
    #[must_use]
    pub fn contains(&self, oid: &Oid) -> bool {
        self.sorted.binary_search(oid).is_ok()
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    /// Returns true if the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// Iterates members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &Oid> {
        self.sorted.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let oid = Oid::hash(b"hello world");
        let hex = oid.to_hex();
        assert_eq!(hex.len(), OID_HEX_LEN);
        let parsed: Oid = hex.parse().expect("parse");
        assert_eq!(oid, parsed);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!("deadbeef".parse::<Oid>().is_err());
        assert!("zz".repeat(20).parse::<Oid>().is_err());
    }

    #[test]
    fn zero_oid() {
        assert!(Oid::ZERO.is_zero());
        assert!(!Oid::hash(b"x").is_zero());
    }

    #[test]
    fn serde_uses_hex_form() {
        let oid = Oid::hash(b"content");
        let json = serde_json::to_string(&oid).expect("serialize");
        assert_eq!(json, format!("\"{oid}\""));
        let back: Oid = serde_json::from_str(&json).expect("parse");
        assert_eq!(oid, back);
    }

    #[test]
    fn oid_set_membership() {
        let a = Oid::hash(b"a");
        let b = Oid::hash(b"b");
        let c = Oid::hash(b"c");
        let set = OidSet::from_iter([b, a, b]);
        assert_eq!(set.len(), 2);
        assert!(set.contains(&a));
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
    }

    #[test]
    fn oid_set_iterates_sorted() {
        let mut oids: Vec<Oid> = (0u8..8).map(|i| Oid::hash(&[i])).collect();
        let set = OidSet::from_iter(oids.clone());
        oids.sort_unstable();
        let collected: Vec<Oid> = set.iter().copied().collect();
        assert_eq!(collected, oids);
    }
}
