//! # runexcl-core
//!
//! Exclusive CPU allocation on Linux.
//!
//! This crate provides:
//! - **CPU sets**: bounded bit-vectors over CPU ids in the kernel's list
//!   syntax, with set algebra and affinity binding.
//! - **Reservation ledger**: a host-wide record of reserved CPUs guarded by
//!   an advisory `flock(2)` lock.
//! - **Cgroup v2 partitions**: provisioning, process placement, drain
//!   detection and teardown of cpuset partitions.
//! - **Frequency control**: pinning the cpufreq policies of reserved CPUs.
//!
//! All unsafe system calls are encapsulated with `// SAFETY:` documentation.

pub mod cgroup;
pub mod cpuset;
pub mod governor;
pub mod ledger;
pub mod lock;
pub mod sysfs;

pub use cgroup::{CpuPartition, Slice};
pub use cpuset::CpuSet;
