//! Cgroup v2 cpuset partitions.
//!
//! All partitions live under one shared parent cgroup, the [`Slice`]. Each
//! [`CpuPartition`] is a child directory named after its CPU list and turned
//! into a remote cpuset partition, so the CPUs it holds are taken away from
//! every other cgroup on the host for as long as it exists.

pub mod events;
pub mod partition;
pub mod slice;
mod spawn;

pub use events::EventsWatcher;
pub use partition::CpuPartition;
pub use slice::Slice;

use std::path::Path;

use runexcl_common::error::Result;

use crate::cpuset::CpuSet;
use crate::sysfs;

/// Reads the CPU list at the start of a cgroup file.
pub(crate) fn read_cpus(path: &Path, max_cpus: usize) -> Result<CpuSet> {
    let content = sysfs::read_to_string(path)?;
    let (set, _) = CpuSet::parse_prefix(&content, max_cpus)?;
    Ok(set)
}
