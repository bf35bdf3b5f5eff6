//! # runexcl-common
//!
//! Shared types, error definitions, configuration models, and constants
//! used across the runexcl workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate and describes the kernel-visible layout (cgroup v2 and CPU
//! sysfs paths) that the allocator in `runexcl-core` manipulates.

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
