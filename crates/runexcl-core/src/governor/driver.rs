//! Frequency scaling backends.

use std::path::{Path, PathBuf};

use runexcl_common::config::RunexclConfig;
use runexcl_common::error::Result;

use crate::sysfs;

const AMD_PSTATE_PASSIVE: &str = "passive";
const AMD_PSTATE_NONLINEAR_FREQ: &str = "amd_pstate_lowest_nonlinear_freq";

/// The scaling driver found on the host, chosen by probing sysfs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalingDriver {
    /// `amd-pstate`, switched to passive mode so that cpufreq governors
    /// apply. Holds the mode to restore.
    AmdPState {
        /// The driver's `status` file.
        status_path: PathBuf,
        /// Mode before the switch (`active`, `guided`, ...).
        previous: String,
    },
    /// Any other cpufreq driver, driven through the `userspace` governor.
    Cpufreq,
}

impl ScalingDriver {
    /// Detects the scaling driver. `amd-pstate` is put into passive mode
    /// right away.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the `amd-pstate` mode cannot be changed.
    pub fn probe(config: &RunexclConfig) -> Result<Self> {
        let status_path = config.amd_pstate_status_path();
        if !status_path.exists() {
            return Ok(Self::Cpufreq);
        }
        let previous = sysfs::change(&status_path, AMD_PSTATE_PASSIVE)?;
        tracing::info!(previous, "amd-pstate switched to passive mode");
        Ok(Self::AmdPState {
            status_path,
            previous,
        })
    }

    /// Short name for logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AmdPState { .. } => "amd-pstate",
            Self::Cpufreq => "cpufreq",
        }
    }

    /// Lowest non-linear frequency of a policy in kHz, if the driver
    /// exposes one.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the driver should expose the value but the
    /// file cannot be read, or a protocol error if it is not a number.
    pub fn lowest_nonlinear_khz(&self, policy: &Path) -> Result<Option<u64>> {
        match self {
            Self::AmdPState { .. } => super::read_khz(&policy.join(AMD_PSTATE_NONLINEAR_FREQ)).map(Some),
            Self::Cpufreq => Ok(None),
        }
    }

    /// Puts the driver back into the mode it had before [`Self::probe`].
    /// Failures are logged.
    pub fn restore(&self) {
        if let Self::AmdPState {
            status_path,
            previous,
        } = self
        {
            match sysfs::write(status_path, previous) {
                Ok(()) => tracing::info!(mode = %previous, "amd-pstate mode restored"),
                Err(e) => tracing::error!(error = %e, "failed to restore amd-pstate mode"),
            }
        }
    }
}
