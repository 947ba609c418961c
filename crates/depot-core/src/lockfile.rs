//! Single-winner file creation for weakly-consistent filesystems.
//!
//! Plain `O_CREAT|O_EXCL` is not reliable on NFS: two clients on different
//! NFS mounts can both believe they created the same file. The classic
//! countermeasure is to hard-link a witness to the freshly created file and
//! probe the link count; only a count of exactly two proves single
//! ownership. The witness must then be retained for the lifetime of the
//! logical lock, otherwise another client whose cache has not yet seen the
//! file could recreate it.
//!
//! [`create_unique_file`] implements that protocol behind one operation.
//! Filesystems that decline hard links fall back to local create-new
//! semantics.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use ulid::Ulid;

use crate::error::{Error, Result};

/// Ownership token for a file created by [`create_unique_file`].
///
/// Holds the lock file and its hard-link witness. Dropping the token
/// releases the logical lock by removing both.
#[derive(Debug)]
pub struct LockToken {
    path: PathBuf,
    witness: Option<PathBuf>,
    released: bool,
}

impl LockToken {
    /// Path of the lock file this token owns.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true when the hard-link witness is in place.
    ///
    /// False means the filesystem declined hard links and the lock relies
    /// on local create-new semantics only.
    #[must_use]
    pub fn has_witness(&self) -> bool {
        self.witness.is_some()
    }

    /// Explicitly releases the lock, reporting removal errors.
    ///
    /// Dropping the token releases best-effort instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file or witness could not be removed.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        if let Some(witness) = self.witness.take() {
            remove_if_present(&witness)?;
        }
        remove_if_present(&self.path)
    }
}

impl Drop for LockToken {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Some(witness) = self.witness.take() {
            if let Err(e) = remove_if_present(&witness) {
                tracing::warn!(path = %witness.display(), error = %e, "failed to remove lock witness");
            }
        }
        if let Err(e) = remove_if_present(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove lock file");
        }
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::storage_with_source(
            format!("failed to remove {}", path.display()),
            e,
        )),
    }
}

/// Atomically creates `path`, succeeding for exactly one caller.
///
/// On success the returned [`LockToken`] owns the file and must be held for
/// the lifetime of the logical lock. A second caller gets
/// [`Error::PreconditionFailed`] until the token is dropped.
///
/// # Errors
///
/// Returns `Error::PreconditionFailed` when the file already exists or the
/// link-count probe shows another winner, and `Error::Storage` for I/O
/// failures.
pub fn create_unique_file(path: impl AsRef<Path>) -> Result<LockToken> {
    let path = path.as_ref();

    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(Error::PreconditionFailed {
                message: format!("lock file already exists: {}", path.display()),
            });
        }
        Err(e) => {
            return Err(Error::storage_with_source(
                format!("failed to create {}", path.display()),
                e,
            ));
        }
    }

    let witness = witness_path(path);
    match fs::hard_link(path, &witness) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::Unsupported => {
            // Backend declines hard links; local create-new semantics apply.
            return Ok(LockToken {
                path: path.to_path_buf(),
                witness: None,
                released: false,
            });
        }
        Err(e) => {
            let _ = fs::remove_file(path);
            return Err(Error::storage_with_source(
                format!("failed to link witness for {}", path.display()),
                e,
            ));
        }
    }

    match link_count(path)? {
        Some(n) if n > 2 => {
            // Another client created the same file through a different
            // mount. Remove only our witness; the file is theirs.
            let _ = fs::remove_file(&witness);
            Err(Error::PreconditionFailed {
                message: format!(
                    "lock file {} has {n} links, lost creation race",
                    path.display()
                ),
            })
        }
        _ => Ok(LockToken {
            path: path.to_path_buf(),
            witness: Some(witness),
            released: false,
        }),
    }
}

fn witness_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{}", Ulid::new().to_string().to_lowercase()));
    PathBuf::from(name)
}

#[cfg(unix)]
fn link_count(path: &Path) -> Result<Option<u64>> {
    use std::os::unix::fs::MetadataExt;

    let meta = fs::metadata(path).map_err(|e| {
        Error::storage_with_source(format!("failed to stat {}", path.display()), e)
    })?;
    Ok(Some(meta.nlink()))
}

#[cfg(not(unix))]
fn link_count(_path: &Path) -> Result<Option<u64>> {
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_winner() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = dir.path().join("gc.lock");

        let token = create_unique_file(&lock).expect("first create wins");
        assert_eq!(token.path(), lock);

        let second = create_unique_file(&lock);
        assert!(matches!(second, Err(Error::PreconditionFailed { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn witness_is_linked() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = dir.path().join("gc.lock");

        let token = create_unique_file(&lock).expect("create");
        assert!(token.has_witness());
        assert_eq!(link_count(&lock).expect("stat"), Some(2));
    }

    #[test]
    fn drop_releases_lock() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = dir.path().join("gc.lock");

        let token = create_unique_file(&lock).expect("create");
        drop(token);

        assert!(!lock.exists());
        let reacquired = create_unique_file(&lock).expect("reacquire after drop");
        reacquired.release().expect("release");
        assert!(!lock.exists());

        // No witness files left behind either.
        let leftovers = std::fs::read_dir(dir.path()).expect("read_dir").count();
        assert_eq!(leftovers, 0);
    }
}
