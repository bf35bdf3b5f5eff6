//! CPU frequency control for the CPUs of a partition.
//!
//! A [`Governor`] pins every cpufreq policy that covers one of its CPUs to a
//! fixed [`Frequency`] and undoes all changes when dropped: first each
//! policy's governor and speed, then the scaling driver's mode, since the
//! saved policy values belong to the mode the driver was switched into.

pub mod driver;
pub mod frequency;
pub mod policy;

pub use driver::ScalingDriver;
pub use frequency::Frequency;
pub use policy::Policy;

use std::path::Path;

use runexcl_common::config::RunexclConfig;
use runexcl_common::error::{Result, RunexclError};

use crate::cpuset::CpuSet;
use crate::sysfs;

/// Frequency settings applied to a set of CPUs.
#[derive(Debug)]
pub struct Governor {
    policies: Vec<Policy>,
    driver: ScalingDriver,
}

impl Governor {
    /// Pins the policies covering `cpus` to `frequency`.
    ///
    /// Anything changed before a failure is restored before returning.
    ///
    /// # Errors
    ///
    /// * [`RunexclError::Config`] if `frequency` needs a feature the
    ///   driver lacks, or no policy covers `cpus`.
    /// * I/O and protocol errors from the sysfs files.
    pub fn apply(config: &RunexclConfig, cpus: &CpuSet, frequency: Frequency) -> Result<Self> {
        let mut governor = Self {
            policies: Vec::new(),
            driver: ScalingDriver::probe(config)?,
        };
        if frequency == Frequency::LowestNonlinear
            && !matches!(governor.driver, ScalingDriver::AmdPState { .. })
        {
            return Err(RunexclError::Config {
                message: format!(
                    "'nonlinear' frequency is not supported by the {} driver",
                    governor.driver.name()
                ),
            });
        }

        let paths = policy::policies_for(&config.cpufreq_path(), cpus)?;
        if paths.is_empty() {
            return Err(RunexclError::Config {
                message: format!("no cpufreq policy covers CPUs {cpus}"),
            });
        }
        for path in paths {
            let policy = Policy::open(&path, &governor.driver)?;
            let pinned = policy.pin(frequency);
            // Kept before propagating so that dropping the governor restores it.
            governor.policies.push(policy);
            pinned?;
        }
        tracing::info!(
            driver = governor.driver.name(),
            policies = governor.policies.len(),
            cpus = %cpus,
            "CPU frequency pinned"
        );
        Ok(governor)
    }

    /// The driver the settings were applied through.
    pub const fn driver(&self) -> &ScalingDriver {
        &self.driver
    }

    /// Policies currently pinned.
    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }
}

impl Drop for Governor {
    fn drop(&mut self) {
        self.policies.clear();
        self.driver.restore();
    }
}

/// Reads a frequency file holding a plain kHz value.
fn read_khz(path: &Path) -> Result<u64> {
    let token = sysfs::read(path)?;
    token.parse().map_err(|_| RunexclError::Protocol {
        path: path.to_path_buf(),
        message: format!("expected a frequency in kHz, found {token:?}"),
    })
}
