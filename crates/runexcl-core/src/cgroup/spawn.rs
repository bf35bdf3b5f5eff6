//! Process creation directly inside a cgroup through `clone3(2)`.

use std::os::fd::AsRawFd;
use std::path::Path;

use nix::fcntl::{OFlag, open};
use nix::sched::CloneFlags;
use nix::sys::stat::Mode;
use nix::unistd::{ForkResult, Pid};
use runexcl_common::error::{Result, RunexclError};

/// Place the child in the cgroup referred to by `CloneArgs::cgroup`
/// (Linux 5.7).
const CLONE_INTO_CGROUP: u64 = 0x2_0000_0000;

/// `struct clone_args` from `<linux/sched.h>`, version 2 layout.
#[repr(C)]
#[derive(Debug, Default)]
struct CloneArgs {
    flags: u64,
    pidfd: u64,
    child_tid: u64,
    parent_tid: u64,
    exit_signal: u64,
    stack: u64,
    stack_size: u64,
    tls: u64,
    set_tid: u64,
    set_tid_size: u64,
    cgroup: u64,
}

/// Creates a child process that starts life as a member of `cgroup`.
///
/// The child is never visible in its parent's cgroup, not even briefly. It
/// reports `SIGCHLD` on exit like a `fork(2)` child.
///
/// # Safety
///
/// Same contract as [`nix::unistd::fork`]: in a multi-threaded parent the
/// child may only call async-signal-safe functions until it execs or exits.
///
/// # Errors
///
/// Returns [`RunexclError::Io`] if the cgroup directory cannot be opened and
/// [`RunexclError::Os`] if `clone3(2)` fails.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
pub(super) unsafe fn clone_into_cgroup(cgroup: &Path, flags: CloneFlags) -> Result<ForkResult> {
    let dir = open(cgroup, OFlag::O_PATH | OFlag::O_CLOEXEC, Mode::empty()).map_err(|e| {
        RunexclError::Io {
            path: cgroup.to_path_buf(),
            source: e.into(),
        }
    })?;

    let args = CloneArgs {
        flags: CLONE_INTO_CGROUP | u64::from(flags.bits() as u32),
        exit_signal: libc::SIGCHLD as u64,
        cgroup: dir.as_raw_fd() as u64,
        ..CloneArgs::default()
    };

    // SAFETY: `args` is a valid `clone_args` of the size passed; no stack is
    // supplied, so the child continues on a copy of the caller's stack just
    // like after fork(2).
    let ret = unsafe {
        libc::syscall(
            libc::SYS_clone3,
            &raw const args,
            size_of::<CloneArgs>(),
        )
    };
    match ret {
        -1 => Err(RunexclError::last_os_error("clone3")),
        0 => Ok(ForkResult::Child),
        pid => {
            tracing::debug!(pid, cgroup = %cgroup.display(), "child created in cgroup");
            Ok(ForkResult::Parent {
                child: Pid::from_raw(pid as libc::pid_t),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_args_matches_kernel_layout() {
        assert_eq!(size_of::<CloneArgs>(), 88);
    }

    #[test]
    fn missing_cgroup_fails_before_clone() {
        let dir = tempfile::tempdir().expect("tempdir");
        // SAFETY: the call fails before any process is created.
        let result =
            unsafe { clone_into_cgroup(&dir.path().join("absent"), CloneFlags::empty()) };
        assert!(matches!(result, Err(RunexclError::Io { .. })));
    }

    #[test]
    fn plain_directory_is_rejected_by_clone3() {
        let dir = tempfile::tempdir().expect("tempdir");
        // SAFETY: the kernel refuses a non-cgroup fd; a child would only _exit.
        let result = unsafe { clone_into_cgroup(dir.path(), CloneFlags::empty()) };
        match result {
            Ok(ForkResult::Child) => unsafe { libc::_exit(0) },
            Ok(ForkResult::Parent { child }) => {
                let _ = nix::sys::wait::waitpid(child, None);
            }
            Err(_) => {}
        }
        assert!(
            matches!(result, Err(RunexclError::Os { call: "clone3", .. })),
            "{result:?}"
        );
    }
}
