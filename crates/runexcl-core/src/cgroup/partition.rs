//! The allocation state machine.
//!
//! A [`CpuPartition`] moves through these states:
//!
//! 1. *Reserved*: the CPUs were added to the slice's ledger under its lock.
//! 2. *Provisioned*: the partition directory holds the CPUs and is a `root`
//!    partition.
//! 3. *Active*: processes run inside it ([`CpuPartition::spawn`],
//!    [`CpuPartition::attach`]).
//! 4. *Draining*: [`CpuPartition::wait_drained`] blocks until it is empty.
//! 5. *Released*: the value is dropped; under the ledger lock the directory
//!    is removed and the CPUs are taken out of the ledger.
//!
//! Any failure after the reservation drops the partially built value, so the
//! release runs exactly as it does for a fully provisioned one.
//!
//! CPUs returned to the slice are not immediately usable by other partitions;
//! the kernel hands them back asynchronously and offers no way to tell when
//! that finished. The ledger is therefore updated from the partition's own
//! CPU set rather than from what the kernel reports as effective.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use nix::sched::CloneFlags;
use nix::unistd::{ForkResult, Pid};
use runexcl_common::constants::{CGROUP_EVENTS, CGROUP_PROCS, CPUSET_CPUS, CPUSET_CPUS_PARTITION};
use runexcl_common::error::{Result, RunexclError};
use runexcl_common::types::PartitionType;

use super::events::EventsWatcher;
use super::slice::Slice;
use super::spawn;
use crate::cpuset::CpuSet;
use crate::ledger::ExclusiveLedger;
use crate::sysfs;

/// Exclusive ownership of a set of CPUs through a cpuset partition.
#[derive(Debug)]
pub struct CpuPartition {
    cpus: CpuSet,
    path: PathBuf,
    ledger: ExclusiveLedger,
    partition_type: PartitionType,
}

impl CpuPartition {
    /// Reserves `cpus` and provisions a `root` partition holding them.
    ///
    /// The reservation and the creation of the partition directory happen
    /// under the ledger lock. When the slice contains no partition directory
    /// at all, whatever the ledger still holds is a leftover from the last
    /// release and is ignored.
    ///
    /// # Errors
    ///
    /// * [`RunexclError::EmptyRequest`] if `cpus` is empty; the ledger is not
    ///   touched.
    /// * [`RunexclError::Conflict`] if a CPU is outside the slice's effective
    ///   set, already reserved, or a directory for the same set is left over.
    /// * [`RunexclError::Protocol`] if the kernel refuses the partition type.
    /// * I/O and OS errors from the cgroup files or the lock.
    ///
    /// # Panics
    ///
    /// Panics if `cpus` was built with a different CPU bound than `slice`.
    pub fn create(slice: &Slice, cpus: &CpuSet) -> Result<Self> {
        if cpus.is_empty() {
            return Err(RunexclError::EmptyRequest);
        }

        let ledger = slice.ledger();
        let path = slice.partition_path(cpus);
        reserve(slice, &ledger, cpus, &path)?;
        tracing::info!(cpus = %cpus, path = %path.display(), "CPUs reserved");

        let mut partition = Self {
            cpus: cpus.clone(),
            path,
            ledger,
            partition_type: PartitionType::Root,
        };
        sysfs::write(&partition.path.join(CPUSET_CPUS), &cpus.to_string())?;
        partition.set_partition_type(PartitionType::Root)?;
        tracing::info!(path = %partition.path.display(), "partition provisioned");
        Ok(partition)
    }

    /// Switches between a `root` and an `isolated` partition. An isolated
    /// partition is also removed from load balancing and kernel housekeeping.
    ///
    /// # Errors
    ///
    /// Returns [`RunexclError::Protocol`] if the kernel reports a different
    /// partition type after the write. This is never retried.
    pub fn isolate(&mut self, enable: bool) -> Result<()> {
        let wanted = if enable {
            PartitionType::Isolated
        } else {
            PartitionType::Root
        };
        self.set_partition_type(wanted)
    }

    /// Moves an already running process into the partition.
    ///
    /// The process runs in its old cgroup until this call returns; prefer
    /// [`Self::spawn`] for new processes.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the kernel rejects the pid.
    pub fn attach(&self, pid: Pid) -> Result<()> {
        sysfs::write(&self.path.join(CGROUP_PROCS), &pid.to_string())?;
        tracing::debug!(pid = pid.as_raw(), path = %self.path.display(), "process attached");
        Ok(())
    }

    /// Creates a new process that is a member of the partition from its
    /// first instruction. `flags` are extra `clone3(2)` flags such as
    /// `CLONE_VFORK`.
    ///
    /// Returns [`ForkResult::Parent`] with the child's pid in the caller and
    /// [`ForkResult::Child`] in the new process. The child owns a copy of
    /// this value and must leave through `exec` or `_exit` so that the copy
    /// is never dropped.
    ///
    /// # Safety
    ///
    /// Same contract as [`nix::unistd::fork`].
    ///
    /// # Errors
    ///
    /// Returns [`RunexclError::Os`] in the caller if `clone3(2)` fails.
    pub unsafe fn spawn(&self, flags: CloneFlags) -> Result<ForkResult> {
        // SAFETY: forwarded to the caller.
        unsafe { spawn::clone_into_cgroup(&self.path, flags) }
    }

    /// Blocks until no process is left in the partition, including
    /// descendants of the spawned process that outlived it.
    ///
    /// # Errors
    ///
    /// Returns [`RunexclError::Protocol`] if `cgroup.events` lacks the
    /// `populated` field, or an I/O or OS error from the watch.
    pub fn wait_drained(&self) -> Result<()> {
        EventsWatcher::open(&self.path.join(CGROUP_EVENTS))?.wait_until_empty()
    }

    /// CPUs owned by the partition.
    pub const fn cpus(&self) -> &CpuSet {
        &self.cpus
    }

    /// Directory of the partition.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current partition type.
    pub const fn partition_type(&self) -> PartitionType {
        self.partition_type
    }

    /// Removes the partition and releases its CPUs. Equivalent to dropping it.
    pub fn destroy(self) {
        drop(self);
    }

    fn set_partition_type(&mut self, wanted: PartitionType) -> Result<()> {
        let file = self.path.join(CPUSET_CPUS_PARTITION);
        sysfs::write(&file, wanted.as_str())?;
        let observed = sysfs::read_line(&file)?;
        check_partition_type(&file, wanted, &observed)?;
        self.partition_type = wanted;
        tracing::debug!(path = %self.path.display(), partition = %wanted, "partition type set");
        Ok(())
    }
}

impl Drop for CpuPartition {
    /// Removes the directory and releases the CPUs while holding the ledger
    /// lock. An allocator that finds no partition directory may clear the
    /// ledger, so the two must not be observable apart.
    fn drop(&mut self) {
        let guard = match self.ledger.lock() {
            Ok(guard) => Some(guard),
            Err(e) => {
                tracing::error!(
                    ledger = %self.ledger.path().display(),
                    error = %e,
                    cpus = %self.cpus,
                    "failed to lock ledger, CPUs stay reserved"
                );
                None
            }
        };

        match std::fs::remove_dir(&self.path) {
            Ok(()) => tracing::info!(path = %self.path.display(), "partition removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // Once the directory was gone another allocator may have
                // cleared the ledger and taken these CPUs.
                tracing::warn!(
                    path = %self.path.display(),
                    cpus = %self.cpus,
                    "partition already gone, leaving ledger untouched"
                );
                return;
            }
            Err(e) => {
                // The kernel still holds the CPUs; keep them reserved.
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    cpus = %self.cpus,
                    "failed to remove partition, CPUs stay reserved"
                );
                return;
            }
        }

        let Some(guard) = guard else { return };
        if let Err(e) = guard.release(&self.cpus) {
            tracing::error!(
                ledger = %self.ledger.path().display(),
                error = %e,
                cpus = %self.cpus,
                "failed to release CPUs, ledger needs manual cleanup"
            );
        }
    }
}

/// Adds `cpus` to the ledger and creates the partition directory, both under
/// the ledger lock.
fn reserve(slice: &Slice, ledger: &ExclusiveLedger, cpus: &CpuSet, path: &Path) -> Result<()> {
    let guard = ledger.lock()?;
    let mut reserved = guard.read(slice.max_cpus())?;
    let effective = slice.effective()?;

    if !reserved.is_empty() && slice.live_partitions()?.is_empty() {
        tracing::debug!(stale = %reserved, "no partitions left, ignoring ledger contents");
        reserved.clear();
    }

    let available = effective.difference(&reserved);
    if !cpus.is_subset(&available) {
        return Err(RunexclError::Conflict {
            message: format!(
                "CPUs {cpus} not available (effective {effective}, reserved {reserved})"
            ),
        });
    }

    std::fs::create_dir(path).map_err(|e| {
        if e.kind() == ErrorKind::AlreadyExists {
            RunexclError::Conflict {
                message: format!("stale partition directory {} exists", path.display()),
            }
        } else {
            RunexclError::Io {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;

    reserved |= cpus;
    if let Err(e) = guard.write(&reserved) {
        if let Err(rm) = std::fs::remove_dir(path) {
            tracing::warn!(path = %path.display(), error = %rm, "rollback of partition directory failed");
        }
        return Err(e);
    }
    Ok(())
}

/// Compares the first line of `cpuset.cpus.partition` with the requested
/// type. The kernel appends a reason (`isolated invalid (...)`) when it
/// refuses a transition.
fn check_partition_type(file: &Path, wanted: PartitionType, observed: &str) -> Result<()> {
    if observed.trim_end().parse::<PartitionType>() == Ok(wanted) {
        return Ok(());
    }
    Err(RunexclError::Protocol {
        path: file.to_path_buf(),
        message: format!("could not set partition type to '{wanted}': kernel reports '{observed}'"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_partition_type_passes() {
        let file = Path::new("cpuset.cpus.partition");
        assert!(check_partition_type(file, PartitionType::Root, "root").is_ok());
        assert!(check_partition_type(file, PartitionType::Isolated, "isolated\n").is_ok());
    }

    #[test]
    fn refused_partition_type_is_protocol_error() {
        let file = Path::new("cpuset.cpus.partition");
        let err = check_partition_type(
            file,
            PartitionType::Isolated,
            "isolated invalid (Cpu list in cpuset.cpus not exclusive)",
        )
        .expect_err("refused");
        assert!(matches!(err, RunexclError::Protocol { .. }));
        assert!(err.to_string().contains("isolated invalid"));

        assert!(check_partition_type(file, PartitionType::Root, "member").is_err());
    }
}
