//! Bootstrap of the shared parent cgroup.
//!
//! [`Slice::ensure`] is idempotent and takes no lock. Concurrent callers can
//! only race on enabling the same controller or writing the same CPU list,
//! both of which converge.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use runexcl_common::config::RunexclConfig;
use runexcl_common::constants::{
    CPU_SYSFS_PATH, CPUSET_CONTROLLER, CPUSET_CPUS, CPUSET_CPUS_EFFECTIVE, CPUSET_CPUS_EXCLUSIVE,
    KERNEL_MAX_FILE, PARTITION_PREFIX, SUBTREE_CONTROL,
};
use runexcl_common::error::{Result, RunexclError};

use super::read_cpus;
use crate::cpuset::{self, CpuSet};
use crate::ledger::ExclusiveLedger;
use crate::sysfs;

/// The shared parent cgroup every partition is created under.
#[derive(Debug, Clone)]
pub struct Slice {
    cgroup_root: PathBuf,
    path: PathBuf,
    max_cpus: usize,
}

impl Slice {
    /// Describes the slice `name` below the cgroup mount `cgroup_root`.
    /// Nothing is touched on disk.
    pub fn new(cgroup_root: impl Into<PathBuf>, name: &str, max_cpus: usize) -> Self {
        let cgroup_root = cgroup_root.into();
        let path = cgroup_root.join(name);
        Self {
            cgroup_root,
            path,
            max_cpus,
        }
    }

    /// Describes the slice named by `config`. The CPU bound comes from the
    /// configured sysfs tree.
    ///
    /// # Errors
    ///
    /// Returns [`RunexclError::Config`] if the configuration is invalid.
    pub fn from_config(config: &RunexclConfig) -> Result<Self> {
        config.validate()?;
        let max_cpus = if config.cpu_sysfs_root == Path::new(CPU_SYSFS_PATH) {
            cpuset::kernel_max_cpus()
        } else {
            cpuset::max_cpus_from(&config.cpu_sysfs_root.join(KERNEL_MAX_FILE))
        };
        Ok(Self {
            cgroup_root: config.cgroup_root.clone(),
            path: config.slice_path(),
            max_cpus,
        })
    }

    /// Directory of the slice.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// CPU id bound used for every set read from this slice.
    pub const fn max_cpus(&self) -> usize {
        self.max_cpus
    }

    /// Creates the slice if needed and prepares it for remote partitions.
    ///
    /// Enables the cpuset controller on the cgroup root and on the slice, and
    /// initializes the slice's `cpuset.cpus` to its effective CPUs when it is
    /// still empty. The kernel refuses remote partitions while the parent's
    /// `cpuset.cpus` or `cpuset.cpus.exclusive` is empty.
    ///
    /// Returns the CPUs the slice may hand out.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if any cgroup file cannot be read or written.
    pub fn ensure(&self) -> Result<CpuSet> {
        enable_cpuset_controller(&self.cgroup_root)?;

        match std::fs::create_dir(&self.path) {
            Ok(()) => tracing::info!(path = %self.path.display(), "slice created"),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(RunexclError::Io {
                    path: self.path.clone(),
                    source: e,
                });
            }
        }

        enable_cpuset_controller(&self.path)?;

        let effective = self.effective()?;
        let cpus_path = self.path.join(CPUSET_CPUS);
        if read_cpus(&cpus_path, self.max_cpus)?.is_empty() {
            sysfs::write(&cpus_path, &effective.to_string())?;
            tracing::debug!(cpus = %effective, "slice CPU list initialized");
        }
        Ok(effective)
    }

    /// CPUs the kernel currently lets the slice use.
    ///
    /// # Errors
    ///
    /// Returns an I/O or parse error for `cpuset.cpus.effective`.
    pub fn effective(&self) -> Result<CpuSet> {
        read_cpus(&self.path.join(CPUSET_CPUS_EFFECTIVE), self.max_cpus)
    }

    /// The reservation ledger kept in the slice's `cpuset.cpus.exclusive`.
    pub fn ledger(&self) -> ExclusiveLedger {
        ExclusiveLedger::new(self.path.join(CPUSET_CPUS_EXCLUSIVE))
    }

    /// Directory a partition for `cpus` is created at: the partition prefix
    /// followed by the canonical CPU list.
    pub fn partition_path(&self, cpus: &CpuSet) -> PathBuf {
        self.path.join(format!("{PARTITION_PREFIX}{cpus}"))
    }

    /// Partition directories currently present in the slice, live or stale.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the slice cannot be listed.
    pub fn live_partitions(&self) -> Result<Vec<PathBuf>> {
        let io_error = |e| RunexclError::Io {
            path: self.path.clone(),
            source: e,
        };
        let mut partitions = Vec::new();
        for entry in std::fs::read_dir(&self.path).map_err(io_error)? {
            let entry = entry.map_err(io_error)?;
            let is_partition = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(PARTITION_PREFIX));
            if is_partition && entry.file_type().map_err(io_error)?.is_dir() {
                partitions.push(entry.path());
            }
        }
        partitions.sort();
        Ok(partitions)
    }
}

/// Adds `+cpuset` to a cgroup's `cgroup.subtree_control` unless it is
/// already enabled.
fn enable_cpuset_controller(cgroup: &Path) -> Result<()> {
    let control = cgroup.join(SUBTREE_CONTROL);
    let enabled = sysfs::read_line(&control)?;
    if has_controller(&enabled, CPUSET_CONTROLLER) {
        return Ok(());
    }
    sysfs::write(&control, &format!("+{CPUSET_CONTROLLER}"))?;
    tracing::debug!(cgroup = %cgroup.display(), "cpuset controller enabled");
    Ok(())
}

fn has_controller(line: &str, controller: &str) -> bool {
    line.split_whitespace()
        .any(|token| token.trim_start_matches('+') == controller)
}
