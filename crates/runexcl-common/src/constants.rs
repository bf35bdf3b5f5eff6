//! System-wide constants and kernel file names.

/// Cgroups v2 unified hierarchy mount point.
pub const CGROUP_V2_PATH: &str = "/sys/fs/cgroup";

/// CPU device directory in sysfs.
pub const CPU_SYSFS_PATH: &str = "/sys/devices/system/cpu";

/// Name of the shared parent cgroup all partitions live under.
pub const SLICE_NAME: &str = "runexcl.slice";

/// Prefix of every partition directory; the canonical CPU list follows it.
pub const PARTITION_PREFIX: &str = "runexcl.";

/// Fallback CPU count when `kernel_max` cannot be read (glibc `CPU_SETSIZE`).
pub const CPU_SETSIZE: usize = 1024;

/// Highest CPU index the kernel was built for, relative to [`CPU_SYSFS_PATH`].
pub const KERNEL_MAX_FILE: &str = "kernel_max";

/// Controllers enabled for the children of a cgroup.
pub const SUBTREE_CONTROL: &str = "cgroup.subtree_control";
/// Requested CPU list of a cgroup.
pub const CPUSET_CPUS: &str = "cpuset.cpus";
/// CPUs the parent hands out to remote partitions; doubles as the ledger.
pub const CPUSET_CPUS_EXCLUSIVE: &str = "cpuset.cpus.exclusive";
/// CPUs the kernel actually lets a cgroup use.
pub const CPUSET_CPUS_EFFECTIVE: &str = "cpuset.cpus.effective";
/// Partition type of a cgroup (`member`, `root`, `isolated`).
pub const CPUSET_CPUS_PARTITION: &str = "cpuset.cpus.partition";
/// Process list of a cgroup.
pub const CGROUP_PROCS: &str = "cgroup.procs";
/// Status file carrying the `populated <0|1>` line.
pub const CGROUP_EVENTS: &str = "cgroup.events";

/// Name of the cpuset controller.
pub const CPUSET_CONTROLLER: &str = "cpuset";
