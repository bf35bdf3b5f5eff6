//! One cpufreq policy: a group of CPUs that always share a frequency.

use std::path::{Path, PathBuf};

use runexcl_common::error::{Result, RunexclError};

use super::driver::ScalingDriver;
use super::frequency::Frequency;
use super::read_khz;
use crate::cpuset::CpuSet;
use crate::sysfs;

const SCALING_GOVERNOR: &str = "scaling_governor";
const SCALING_SETSPEED: &str = "scaling_setspeed";
const SCALING_MIN_FREQ: &str = "scaling_min_freq";
const SCALING_MAX_FREQ: &str = "scaling_max_freq";
const AFFECTED_CPUS: &str = "affected_cpus";
const USERSPACE: &str = "userspace";
const UNSUPPORTED: &str = "<unsupported>";

/// A cpufreq policy whose governor and speed are restored on drop.
#[derive(Debug)]
pub struct Policy {
    path: PathBuf,
    saved_governor: String,
    saved_setspeed: String,
    min_khz: u64,
    max_khz: u64,
    nonlinear_khz: Option<u64>,
}

impl Policy {
    /// Records the current settings of the policy at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O or protocol error if a policy file is missing or not
    /// numeric.
    pub fn open(path: &Path, driver: &ScalingDriver) -> Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            saved_governor: sysfs::read(&path.join(SCALING_GOVERNOR))?,
            saved_setspeed: sysfs::read(&path.join(SCALING_SETSPEED))?,
            min_khz: read_khz(&path.join(SCALING_MIN_FREQ))?,
            max_khz: read_khz(&path.join(SCALING_MAX_FREQ))?,
            nonlinear_khz: driver.lowest_nonlinear_khz(path)?,
        })
    }

    /// Switches to the `userspace` governor and pins the policy to
    /// `frequency`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the kernel rejects the governor or speed.
    pub fn pin(&self, frequency: Frequency) -> Result<()> {
        sysfs::write(&self.path.join(SCALING_GOVERNOR), USERSPACE)?;
        let khz = frequency.target_khz(self.min_khz, self.max_khz, self.nonlinear_khz);
        sysfs::write(&self.path.join(SCALING_SETSPEED), &khz.to_string())?;
        tracing::debug!(policy = %self.path.display(), khz, "policy pinned");
        Ok(())
    }

    /// Directory of the policy.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Policy {
    fn drop(&mut self) {
        if self.saved_setspeed != UNSUPPORTED {
            let setspeed = self.path.join(SCALING_SETSPEED);
            if let Err(e) = sysfs::write(&setspeed, &self.saved_setspeed) {
                tracing::warn!(policy = %self.path.display(), error = %e, "failed to restore scaling speed");
            }
        }
        if let Err(e) = sysfs::write(&self.path.join(SCALING_GOVERNOR), &self.saved_governor) {
            tracing::warn!(policy = %self.path.display(), error = %e, "failed to restore governor");
        }
    }
}

/// Lists the `policy*` directories under `cpufreq` that cover at least one
/// CPU of `cpus`.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be listed or an
/// `affected_cpus` file cannot be read.
pub fn policies_for(cpufreq: &Path, cpus: &CpuSet) -> Result<Vec<PathBuf>> {
    let io_error = |e| RunexclError::Io {
        path: cpufreq.to_path_buf(),
        source: e,
    };
    let mut found = Vec::new();
    for entry in std::fs::read_dir(cpufreq).map_err(io_error)? {
        let entry = entry.map_err(io_error)?;
        let is_policy = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with("policy"));
        if !is_policy || !entry.file_type().map_err(io_error)?.is_dir() {
            continue;
        }
        let affected = sysfs::read_to_string(&entry.path().join(AFFECTED_CPUS))?;
        let covers = affected
            .split_whitespace()
            .filter_map(|cpu| cpu.parse::<usize>().ok())
            .any(|cpu| cpu < cpus.max_cpus() && cpus.contains(cpu));
        if covers {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}
