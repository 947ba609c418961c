//! Storage backend abstraction for the pack store.
//!
//! The object database persists pack files, their companion indices and the
//! committed pack-list manifest through this contract. Backends range from a
//! durable filesystem to cloud object storage; the contract is written for
//! the weakest of them:
//!
//! - Conditional writes with preconditions (CAS)
//! - Object metadata including `last_modified` and an opaque version token
//! - No ordering guarantee on listings
//!
//! The version token is an opaque `String` so that different backends can
//! supply whatever they natively version with (generation number, ETag).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Precondition for conditional writes (CAS operations).
#[derive(Debug, Clone)]
pub enum WritePrecondition {
    /// Write only if the object does not exist.
    DoesNotExist,
    /// Write only if the object's version matches the given token.
    MatchesVersion(String),
    /// Write unconditionally.
    None,
}

/// Result of a conditional write.
#[derive(Debug, Clone)]
pub enum WriteResult {
    /// Write succeeded, returns the new version token.
    Success {
        /// The new version token after the write.
        version: String,
    },
    /// Precondition failed, returns the current version token.
    PreconditionFailed {
        /// The version that caused the precondition to fail.
        current_version: String,
    },
}

/// Metadata about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Object path (key).
    pub path: String,
    /// Object size in bytes.
    pub size: u64,
    /// Opaque version token for CAS operations.
    pub version: String,
    /// Last modification timestamp.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Storage backend trait for the pack store.
///
/// All backends (filesystem, object storage, memory) implement this trait.
/// Precondition failures are normal results, never errors.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Reads an entire object.
    ///
    /// Returns `Error::NotFound` if the object doesn't exist.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Writes with an optional precondition.
    ///
    /// Returns `WriteResult::PreconditionFailed` if the precondition is not
    /// met; that is a normal result, not an error.
    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult>;

    /// Deletes an object. Idempotent.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists objects with the given prefix.
    ///
    /// **Ordering**: arbitrary and backend-dependent. Callers requiring a
    /// deterministic order must sort.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Gets object metadata without reading content.
    ///
    /// Returns `None` if the object doesn't exist.
    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>>;
}

/// In-memory storage backend for tests.
///
/// Thread-safe via `RwLock`. Uses numeric versions internally (stored as
/// strings) to simulate generation-style CAS semantics.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    version: i64,
    last_modified: DateTime<Utc>,
}

impl MemoryBackend {
    /// Creates a new empty memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn meta_of(path: &str, obj: &StoredObject) -> ObjectMeta {
    ObjectMeta {
        path: path.to_string(),
        size: obj.data.len() as u64,
        version: obj.version.to_string(),
        last_modified: Some(obj.last_modified),
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let objects = self.objects.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        objects
            .get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let mut objects = self.objects.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        let current = objects.get(path);

        match precondition {
            WritePrecondition::DoesNotExist => {
                if let Some(obj) = current {
                    return Ok(WriteResult::PreconditionFailed {
                        current_version: obj.version.to_string(),
                    });
                }
            }
            WritePrecondition::MatchesVersion(expected) => {
                let expected_num: i64 = expected.parse().unwrap_or(-1);
                match current {
                    Some(obj) if obj.version != expected_num => {
                        return Ok(WriteResult::PreconditionFailed {
                            current_version: obj.version.to_string(),
                        });
                    }
                    None => {
                        return Ok(WriteResult::PreconditionFailed {
                            current_version: "0".to_string(),
                        });
                    }
                    _ => {}
                }
            }
            WritePrecondition::None => {}
        }

        let new_version = current.map_or(1, |o| o.version + 1);
        objects.insert(
            path.to_string(),
            StoredObject {
                data,
                version: new_version,
                last_modified: Utc::now(),
            },
        );
        drop(objects);

        Ok(WriteResult::Success {
            version: new_version.to_string(),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects
            .write()
            .map_err(|_| Error::Internal {
                message: "lock poisoned".into(),
            })?
            .remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        Ok(objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(path, obj)| meta_of(path, obj))
            .collect())
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        Ok(objects.get(path).map(|obj| meta_of(path, obj)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip() {
        let backend = MemoryBackend::new();
        let data = Bytes::from("hello world");

        let result = backend
            .put("pack/p1.pack", data.clone(), WritePrecondition::None)
            .await
            .expect("put should succeed");
        assert!(matches!(result, WriteResult::Success { ref version } if version == "1"));

        let retrieved = backend.get("pack/p1.pack").await.expect("get");
        assert_eq!(retrieved, data);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend.get("absent").await.expect_err("missing");
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn does_not_exist_precondition() {
        let backend = MemoryBackend::new();
        backend
            .put("f", Bytes::from("a"), WritePrecondition::DoesNotExist)
            .await
            .expect("first put");

        let second = backend
            .put("f", Bytes::from("b"), WritePrecondition::DoesNotExist)
            .await
            .expect("second put");
        assert!(matches!(second, WriteResult::PreconditionFailed { .. }));
    }

    #[tokio::test]
    async fn matches_version_precondition() {
        let backend = MemoryBackend::new();
        let WriteResult::Success { version } = backend
            .put("f", Bytes::from("a"), WritePrecondition::None)
            .await
            .expect("put")
        else {
            panic!("unconditional put must succeed");
        };

        let ok = backend
            .put(
                "f",
                Bytes::from("b"),
                WritePrecondition::MatchesVersion(version),
            )
            .await
            .expect("cas put");
        assert!(matches!(ok, WriteResult::Success { .. }));

        let stale = backend
            .put(
                "f",
                Bytes::from("c"),
                WritePrecondition::MatchesVersion("1".into()),
            )
            .await
            .expect("stale cas put");
        assert!(matches!(stale, WriteResult::PreconditionFailed { .. }));
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let backend = MemoryBackend::new();
        for path in ["pack/a", "pack/b", "refs/c"] {
            backend
                .put(path, Bytes::from("x"), WritePrecondition::None)
                .await
                .expect("put");
        }

        let mut listed = backend.list("pack/").await.expect("list");
        listed.sort_by(|a, b| a.path.cmp(&b.path));
        let paths: Vec<_> = listed.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(paths, vec!["pack/a", "pack/b"]);
    }

    #[tokio::test]
    async fn head_reports_metadata() {
        let backend = MemoryBackend::new();
        backend
            .put("f", Bytes::from("data"), WritePrecondition::None)
            .await
            .expect("put");

        let meta = backend.head("f").await.expect("head").expect("exists");
        assert_eq!(meta.size, 4);
        assert!(!meta.version.is_empty());
        assert!(meta.last_modified.is_some());

        assert!(backend.head("absent").await.expect("head").is_none());
    }
}
