//! Unified error type for the runexcl workspace.
//!
//! Parsing and validation failures are reported to the immediate caller and
//! never retried. Interrupted system calls are retried where they occur and
//! never show up here.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum RunexclError {
    /// CPU list text does not follow the `a,b-c` grammar.
    #[error("malformed CPU list \"{input}\": {message}")]
    Syntax {
        /// Text that failed to parse.
        input: String,
        /// What was wrong with it.
        message: String,
    },

    /// A range whose lower bound exceeds its upper bound.
    #[error("invalid CPU range {lo}-{hi}")]
    InvalidRange {
        /// First id of the range.
        lo: usize,
        /// Last id of the range.
        hi: usize,
    },

    /// A CPU id at or above the host's maximum CPU count.
    #[error("CPU #{cpu} out of range (host supports {max_cpus} CPUs)")]
    OutOfBounds {
        /// Offending CPU id.
        cpu: usize,
        /// Upper bound (exclusive) for CPU ids on this host.
        max_cpus: usize,
    },

    /// The requested CPUs are unavailable or already reserved.
    #[error("CPU conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// The kernel refused or misreported an expected state transition.
    #[error("protocol error at {path}: {message}")]
    Protocol {
        /// Kernel file that produced the unexpected value.
        path: PathBuf,
        /// Description of the mismatch.
        message: String,
    },

    /// An I/O operation on a kernel pseudo-file failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A system call failed.
    #[error("{call} failed: {source}")]
    Os {
        /// Name of the failing system call.
        call: &'static str,
        /// Underlying OS error, carrying the errno.
        source: std::io::Error,
    },

    /// A partition was requested for an empty CPU set.
    #[error("cannot allocate an empty CPU set")]
    EmptyRequest,

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl RunexclError {
    /// Builds an [`RunexclError::Os`] from the calling thread's last OS error.
    #[must_use]
    pub fn last_os_error(call: &'static str) -> Self {
        Self::Os {
            call,
            source: std::io::Error::last_os_error(),
        }
    }

    /// Returns the raw errno carried by I/O and OS-call errors.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Io { source, .. } | Self::Os { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, RunexclError>;

#[cfg(test)]
mod tests {
    use super::*;

    const EBADF: i32 = 9;

    #[test]
    fn out_of_bounds_display_names_cpu_and_limit() {
        let err = RunexclError::OutOfBounds {
            cpu: 1024,
            max_cpus: 1024,
        };
        assert_eq!(
            err.to_string(),
            "CPU #1024 out of range (host supports 1024 CPUs)"
        );
    }

    #[test]
    fn os_error_keeps_errno() {
        let err = RunexclError::Os {
            call: "flock",
            source: std::io::Error::from_raw_os_error(EBADF),
        };
        assert_eq!(err.raw_os_error(), Some(EBADF));
        assert!(err.to_string().starts_with("flock failed"));
    }

    #[test]
    fn parse_errors_carry_no_errno() {
        let err = RunexclError::InvalidRange { lo: 1, hi: 0 };
        assert_eq!(err.raw_os_error(), None);
        assert_eq!(err.to_string(), "invalid CPU range 1-0");
    }
}
