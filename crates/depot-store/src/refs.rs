//! Ref model and the ref-database contract.
//!
//! The garbage collector treats the ref database as an oracle: one snapshot
//! of named tips is read at the start of a run and carried unchanged through
//! commit.

use async_trait::async_trait;

use depot_core::Oid;

use crate::error::Result;

/// Prefix of every ref name.
pub const R_REFS: &str = "refs/";

/// Prefix of branch head refs.
pub const R_HEADS: &str = "refs/heads/";

/// Prefix of tag refs.
pub const R_TAGS: &str = "refs/tags/";

/// A named pointer into the object graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ref {
    /// Full ref name, e.g. `refs/heads/main`.
    pub name: String,
    /// The object the ref points at; `None` for unborn refs.
    pub target: Option<Oid>,
    /// For tag refs, the non-tag object the tag ultimately names.
    pub peeled: Option<Oid>,
    /// True when the ref indirects to another ref instead of an object.
    pub symbolic: bool,
}

impl Ref {
    /// Creates a direct ref pointing at `target`.
    #[must_use]
    pub fn direct(name: impl Into<String>, target: Oid) -> Self {
        Self {
            name: name.into(),
            target: Some(target),
            peeled: None,
            symbolic: false,
        }
    }

    /// Creates a symbolic ref.
    #[must_use]
    pub fn symbolic(name: impl Into<String>, target: Option<Oid>) -> Self {
        Self {
            name: name.into(),
            target,
            peeled: None,
            symbolic: true,
        }
    }

    /// Attaches the peeled object of an annotated tag.
    #[must_use]
    pub fn with_peeled(mut self, peeled: Oid) -> Self {
        self.peeled = Some(peeled);
        self
    }

    /// True for refs under the heads namespace.
    #[must_use]
    pub fn is_head(&self) -> bool {
        self.name.starts_with(R_HEADS)
    }

    /// True for refs under the tags namespace.
    #[must_use]
    pub fn is_tag(&self) -> bool {
        self.name.starts_with(R_TAGS)
    }
}

/// Read-only contract of the ref database.
#[async_trait]
pub trait RefDatabase: Send + Sync + 'static {
    /// Drops any cached ref state so the next read observes the backend.
    async fn refresh(&self) -> Result<()>;

    /// Returns all regular refs.
    async fn refs(&self) -> Result<Vec<Ref>>;

    /// Returns additional refs outside the regular namespace listing.
    ///
    /// Callers filter these to the `refs/` prefix themselves.
    async fn additional_refs(&self) -> Result<Vec<Ref>>;

    /// Returns true when `name` is managed as a transactional ref tree.
    fn is_ref_tree(&self, name: &str) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_predicates() {
        let head = Ref::direct("refs/heads/main", Oid::hash(b"c1"));
        assert!(head.is_head());
        assert!(!head.is_tag());

        let tag = Ref::direct("refs/tags/v1.0", Oid::hash(b"t1")).with_peeled(Oid::hash(b"c1"));
        assert!(tag.is_tag());
        assert_eq!(tag.peeled, Some(Oid::hash(b"c1")));

        let other = Ref::direct("refs/notes/commits", Oid::hash(b"n1"));
        assert!(!other.is_head());
        assert!(!other.is_tag());
    }

    #[test]
    fn symbolic_refs_carry_no_peel() {
        let sym = Ref::symbolic("HEAD", Some(Oid::hash(b"c1")));
        assert!(sym.symbolic);
        assert!(sym.peeled.is_none());
    }
}
