//! Setup performed inside the new process before it becomes the command.

use std::convert::Infallible;
use std::ffi::{CString, OsString};
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStringExt;

use anyhow::Context;
use nix::sys::signal::{SigSet, SigmaskHow, sigprocmask};
use nix::unistd::{execvp, getgid, getuid, setgid, setuid};
use runexcl_core::CpuSet;

/// Everything the child needs, prepared by the parent before the clone.
#[derive(Debug)]
pub struct ChildContext {
    cpus: CpuSet,
    argv: Vec<CString>,
    signal_mask: SigSet,
}

impl ChildContext {
    /// Converts the command line and records the signal mask to restore.
    pub fn new(cpus: CpuSet, command: &[OsString], signal_mask: SigSet) -> anyhow::Result<Self> {
        let argv = command
            .iter()
            .map(|arg| {
                CString::new(arg.clone().into_vec())
                    .with_context(|| format!("argument {arg:?} contains a NUL byte"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        anyhow::ensure!(!argv.is_empty(), "no command given");
        Ok(Self {
            cpus,
            argv,
            signal_mask,
        })
    }

    /// Replaces the process image with the command. Never returns; on
    /// failure the error is logged and the process exits with status 1
    /// without running any destructor.
    pub fn exec(&self) -> ! {
        if let Err(e) = self.try_exec() {
            tracing::error!(command = ?self.argv[0], error = format!("{e:#}"), "failed to start command");
        }
        // SAFETY: _exit only terminates the process. Skipping destructors
        // keeps the parent's partition and governor copies from being torn
        // down in the child.
        unsafe { libc::_exit(1) }
    }

    fn try_exec(&self) -> anyhow::Result<Infallible> {
        self.cpus
            .bind_to_current_thread()
            .context("failed to set CPU affinity")?;

        // Only the primary group matters for a setuid/setgid binary; the
        // supplementary groups already belong to the calling user.
        setgid(getgid()).context("failed to drop group privileges")?;
        setuid(getuid()).context("failed to drop user privileges")?;

        close_inherited_fds();

        sigprocmask(SigmaskHow::SIG_SETMASK, Some(&self.signal_mask), None)
            .context("failed to restore the signal mask")?;

        execvp(&self.argv[0], &self.argv).with_context(|| format!("{:?}", self.argv[0]))
    }
}

/// Closes every descriptor above stderr. Descriptors opened without
/// `O_CLOEXEC` would otherwise leak into the command.
fn close_inherited_fds() {
    let fds: Vec<RawFd> = match std::fs::read_dir("/proc/self/fd") {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
            .filter(|&fd| fd > 2)
            .collect(),
        Err(e) => {
            tracing::debug!(error = %e, "cannot list open descriptors");
            return;
        }
    };
    for fd in fds {
        // SAFETY: no live object in this process image uses these
        // descriptors any more; the one backing the directory listing is
        // already closed and yields EBADF.
        let _ = unsafe { libc::close(fd) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_keeps_arguments_in_order() {
        let command: Vec<OsString> = ["echo", "-n", "hello"].iter().map(OsString::from).collect();
        let context = ChildContext::new(CpuSet::new(16), &command, SigSet::empty()).expect("context");
        assert_eq!(context.argv.len(), 3);
        assert_eq!(context.argv[1].to_str().expect("utf-8"), "-n");
    }

    #[test]
    fn nul_in_argument_is_rejected() {
        let command = vec![OsString::from("echo"), OsString::from("a\0b")];
        assert!(ChildContext::new(CpuSet::new(16), &command, SigSet::empty()).is_err());
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(ChildContext::new(CpuSet::new(16), &[], SigSet::empty()).is_err());
    }
}
