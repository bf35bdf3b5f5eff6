//! Host-wide record of reserved CPUs.
//!
//! The ledger is the slice's `cpuset.cpus.exclusive` file. It holds the union
//! of the CPUs of every live partition and only ever changes inside an
//! exclusive [`FileLock`] on that same file, so two allocators can never both
//! reserve a CPU.
//!
//! The kernel does not accept an empty list here. Releasing the last
//! partition writes an empty token, which leaves the previous value in place;
//! the kernel ignores it while the slice has no remote partitions, and
//! reservation treats the ledger as empty in that case (see
//! [`crate::cgroup::partition`]).

use std::path::{Path, PathBuf};

use runexcl_common::error::Result;

use crate::cgroup::read_cpus;
use crate::cpuset::CpuSet;
use crate::lock::{self, FileLock};
use crate::sysfs;

/// Handle to the shared reservation file.
#[derive(Debug, Clone)]
pub struct ExclusiveLedger {
    path: PathBuf,
}

/// Exclusive access to the ledger, held until dropped.
#[derive(Debug)]
pub struct LedgerGuard<'a> {
    ledger: &'a ExclusiveLedger,
    _lock: FileLock,
}

impl ExclusiveLedger {
    /// Creates a handle for the ledger stored at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the ledger file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocks until this process holds the ledger lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be opened or locked.
    pub fn lock(&self) -> Result<LedgerGuard<'_>> {
        Ok(LedgerGuard {
            ledger: self,
            _lock: FileLock::acquire(&self.path)?,
        })
    }

    /// Reads the reservation, lets `f` modify it, and writes it back, all
    /// under the lock. Nothing is written if `f` fails.
    ///
    /// # Errors
    ///
    /// Returns lock, read, or write failures, or the error from `f`.
    pub fn update<T>(
        &self,
        max_cpus: usize,
        f: impl FnOnce(&mut CpuSet) -> Result<T>,
    ) -> Result<T> {
        lock::with_lock(&self.path, || {
            let mut reserved = read_cpus(&self.path, max_cpus)?;
            let value = f(&mut reserved)?;
            write_set(&self.path, &reserved)?;
            Ok(value)
        })
    }

    /// Removes `cpus` from the reservation.
    ///
    /// When the result is empty the kernel keeps the old value (see the
    /// module documentation).
    ///
    /// # Errors
    ///
    /// Returns lock, read, or write failures.
    pub fn release(&self, cpus: &CpuSet) -> Result<()> {
        self.lock()?.release(cpus)
    }
}

impl LedgerGuard<'_> {
    /// Reads the current reservation.
    ///
    /// # Errors
    ///
    /// Returns an I/O error or a CPU list parse error.
    pub fn read(&self, max_cpus: usize) -> Result<CpuSet> {
        read_cpus(&self.ledger.path, max_cpus)
    }

    /// Persists a new reservation.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the kernel rejects the list.
    pub fn write(&self, reserved: &CpuSet) -> Result<()> {
        write_set(&self.ledger.path, reserved)
    }

    /// Removes `cpus` from the reservation without giving up the lock.
    ///
    /// # Errors
    ///
    /// Returns read or write failures.
    pub fn release(&self, cpus: &CpuSet) -> Result<()> {
        let reserved = self.read(cpus.max_cpus())?.difference(cpus);
        self.write(&reserved)?;
        tracing::debug!(path = %self.ledger.path.display(), cpus = %cpus, "reservation released");
        Ok(())
    }
}

fn write_set(path: &Path, reserved: &CpuSet) -> Result<()> {
    sysfs::write(path, &reserved.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 16;

    fn ledger_in(dir: &tempfile::TempDir, content: &str) -> ExclusiveLedger {
        let path = dir.path().join("cpuset.cpus.exclusive");
        std::fs::write(&path, content).expect("write");
        ExclusiveLedger::new(path)
    }

    fn set(text: &str) -> CpuSet {
        CpuSet::from_list(text, MAX).expect("valid list")
    }

    #[test]
    fn update_adds_to_reservation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = ledger_in(&dir, "0-1\n");

        ledger
            .update(MAX, |reserved| {
                *reserved |= &set("4-5");
                Ok(())
            })
            .expect("update");

        assert_eq!(
            std::fs::read_to_string(ledger.path()).expect("read"),
            "0-1,4-5"
        );
    }

    #[test]
    fn failed_update_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = ledger_in(&dir, "2\n");

        let result: Result<()> = ledger.update(MAX, |reserved| {
            reserved.insert(3);
            Err(runexcl_common::error::RunexclError::Conflict {
                message: "busy".into(),
            })
        });
        assert!(result.is_err());
        assert_eq!(std::fs::read_to_string(ledger.path()).expect("read"), "2\n");
    }

    #[test]
    fn release_removes_only_given_cpus() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = ledger_in(&dir, "0-3,8\n");

        ledger.release(&set("1-2")).expect("release");

        let guard = ledger.lock().expect("lock");
        assert_eq!(guard.read(MAX).expect("read"), set("0,3,8"));
    }

    #[test]
    fn guard_reads_and_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = ledger_in(&dir, "");

        let guard = ledger.lock().expect("lock");
        assert!(guard.read(MAX).expect("read").is_empty());
        guard.write(&set("6-7")).expect("write");
        assert_eq!(guard.read(MAX).expect("read"), set("6-7"));
    }

    #[test]
    fn guard_release_keeps_lock() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = ledger_in(&dir, "0-5\n");

        let guard = ledger.lock().expect("lock");
        guard.release(&set("0-1")).expect("release");
        guard.release(&set("5")).expect("release again");
        assert_eq!(guard.read(MAX).expect("read"), set("2-4"));
    }

    #[test]
    fn malformed_ledger_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = ledger_in(&dir, "0-,1\n");
        assert!(ledger.lock().expect("lock").read(MAX).is_err());
    }
}
