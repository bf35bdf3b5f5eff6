//! Cross-process mutual exclusion through advisory `flock(2)` locks.
//!
//! Unrelated processes share no mutex, so the critical section around the
//! reservation ledger is an exclusive lock on an open descriptor of the
//! ledger file itself. The lock belongs to the open file description and is
//! released when [`FileLock`] is dropped, on every exit path.

use std::fs::File;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use runexcl_common::error::{Result, RunexclError};

/// Exclusive advisory lock held on an open file.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    _lock: Flock<File>,
}

impl FileLock {
    /// Opens `path` read-only and blocks until an exclusive lock is granted.
    /// Interrupted waits are retried.
    ///
    /// # Errors
    ///
    /// Returns [`RunexclError::Io`] if the file cannot be opened and
    /// [`RunexclError::Os`] if `flock(2)` fails for any reason but `EINTR`.
    pub fn acquire(path: &Path) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| RunexclError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        loop {
            match Flock::lock(file, FlockArg::LockExclusive) {
                Ok(lock) => {
                    tracing::trace!(path = %path.display(), "lock acquired");
                    return Ok(Self {
                        path: path.to_path_buf(),
                        _lock: lock,
                    });
                }
                Err((returned, Errno::EINTR)) => file = returned,
                Err((_, errno)) => {
                    return Err(RunexclError::Os {
                        call: "flock",
                        source: errno.into(),
                    });
                }
            }
        }
    }

    /// Path of the locked file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        tracing::trace!(path = %self.path.display(), "lock released");
    }
}

/// Runs `f` while holding an exclusive lock on `path`.
///
/// # Errors
///
/// Returns the lock acquisition error, or whatever `f` returns.
pub fn with_lock<T>(path: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let _lock = FileLock::acquire(path)?;
    f()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn second_lock_waits_for_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("cpuset.cpus.exclusive");
        std::fs::write(&file, "").expect("write");

        let held = FileLock::acquire(&file).expect("first lock");
        let acquired = Arc::new(AtomicBool::new(false));

        let waiter = {
            let file = file.clone();
            let acquired = Arc::clone(&acquired);
            std::thread::spawn(move || {
                let _lock = FileLock::acquire(&file).expect("second lock");
                acquired.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(100));
        assert!(!acquired.load(Ordering::SeqCst));

        drop(held);
        waiter.join().expect("join");
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn with_lock_releases_after_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("ledger");
        std::fs::write(&file, "").expect("write");

        let result: Result<()> = with_lock(&file, || {
            Err(RunexclError::Conflict {
                message: "test".into(),
            })
        });
        assert!(result.is_err());

        let value = with_lock(&file, || Ok(7)).expect("relock");
        assert_eq!(value, 7);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = FileLock::acquire(&dir.path().join("absent")).expect_err("missing");
        assert!(matches!(err, RunexclError::Io { .. }));
    }
}
