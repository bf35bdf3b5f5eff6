//! Global configuration model for runexcl.
//!
//! Every kernel path the allocator touches is derived from this structure,
//! which is what lets the whole allocation protocol run against a scratch
//! directory tree instead of the live cgroup filesystem.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, RunexclError};

/// Root configuration for runexcl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunexclConfig {
    /// Mount point of the cgroup v2 unified hierarchy.
    pub cgroup_root: PathBuf,
    /// Name of the shared parent cgroup created under `cgroup_root`.
    pub slice_name: String,
    /// CPU device directory in sysfs (`kernel_max`, `cpufreq/`, `amd_pstate/`).
    pub cpu_sysfs_root: PathBuf,
}

impl Default for RunexclConfig {
    fn default() -> Self {
        Self {
            cgroup_root: PathBuf::from(crate::constants::CGROUP_V2_PATH),
            slice_name: crate::constants::SLICE_NAME.to_owned(),
            cpu_sysfs_root: PathBuf::from(crate::constants::CPU_SYSFS_PATH),
        }
    }
}

impl RunexclConfig {
    /// Loads a configuration from a JSON file. Missing fields keep their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// names an unusable slice.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| RunexclError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the slice name is a single path component.
    ///
    /// # Errors
    ///
    /// Returns [`RunexclError::Config`] if the slice name is empty or
    /// contains a path separator.
    pub fn validate(&self) -> Result<()> {
        if self.slice_name.is_empty() || self.slice_name.contains('/') || self.slice_name == ".." {
            return Err(RunexclError::Config {
                message: format!("invalid slice name \"{}\"", self.slice_name),
            });
        }
        Ok(())
    }

    /// Path of the shared parent cgroup.
    #[must_use]
    pub fn slice_path(&self) -> PathBuf {
        self.cgroup_root.join(&self.slice_name)
    }

    /// Path of the CPU frequency scaling directory.
    #[must_use]
    pub fn cpufreq_path(&self) -> PathBuf {
        self.cpu_sysfs_root.join("cpufreq")
    }

    /// Path of the AMD P-State driver status file.
    #[must_use]
    pub fn amd_pstate_status_path(&self) -> PathBuf {
        self.cpu_sysfs_root.join("amd_pstate").join("status")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_points_at_live_kernel() {
        let config = RunexclConfig::default();
        assert_eq!(config.slice_path(), Path::new("/sys/fs/cgroup/runexcl.slice"));
        assert_eq!(
            config.amd_pstate_status_path(),
            Path::new("/sys/devices/system/cpu/amd_pstate/status")
        );
    }

    #[test]
    fn load_fills_missing_fields_with_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("runexcl.json");
        std::fs::write(&file, r#"{ "cgroup_root": "/tmp/cg" }"#).expect("write");

        let config = RunexclConfig::load(&file).expect("load");
        assert_eq!(config.cgroup_root, Path::new("/tmp/cg"));
        assert_eq!(config.slice_name, "runexcl.slice");
    }

    #[test]
    fn load_rejects_nested_slice_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("runexcl.json");
        std::fs::write(&file, r#"{ "slice_name": "a/b" }"#).expect("write");

        let err = RunexclConfig::load(&file).expect_err("nested slice");
        assert!(matches!(err, RunexclError::Config { .. }));
    }

    #[test]
    fn load_reports_bad_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("runexcl.json");
        std::fs::write(&file, "{").expect("write");

        let err = RunexclConfig::load(&file).expect_err("bad json");
        assert!(matches!(err, RunexclError::Serialization { .. }));
    }
}
