//! Drives one allocation from reservation to release.

use std::process::ExitCode;

use anyhow::Context;
use nix::errno::Errno;
use nix::sched::CloneFlags;
use nix::sys::signal::{SigSet, SigmaskHow, Signal, sigprocmask};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid};
use runexcl_core::governor::Governor;
use runexcl_core::{CpuPartition, Slice};

use crate::args::Cli;
use crate::child::ChildContext;

/// Runs the command from `cli` on its reserved CPUs and returns the
/// command's exit status.
pub fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    let config = cli.load_config()?;
    let slice = Slice::from_config(&config)?;
    let requested = cli.requested_cpus(slice.max_cpus())?;

    // SIGQUIT stays deliverable so that a stuck run can still be killed
    // without cleanup.
    let saved_mask = block_termination_signals()?;
    let context = ChildContext::new(requested.clone(), &cli.command, saved_mask)?;

    let effective = slice.ensure().context("failed to set up the slice")?;
    anyhow::ensure!(
        requested.is_subset(&effective),
        "CPUs {requested} must be within {effective}"
    );

    let mut partition = CpuPartition::create(&slice, &requested)
        .with_context(|| format!("failed to reserve CPUs {requested}"))?;
    if cli.isolate {
        partition.isolate(true)?;
    }

    let _governor = cli.frequency.and_then(|frequency| {
        Governor::apply(&config, &requested, frequency)
            .inspect_err(|e| tracing::warn!(error = %e, "failed to set CPU frequency"))
            .ok()
    });

    // SAFETY: the process is single-threaded, and the child leaves through
    // execvp or _exit without returning here.
    let status = match unsafe { partition.spawn(CloneFlags::CLONE_VFORK) }? {
        ForkResult::Child => context.exec(),
        ForkResult::Parent { child } => wait_for(child)?,
    };
    tracing::debug!(?status, "command exited");

    partition
        .wait_drained()
        .context("failed waiting for the partition to drain")?;
    Ok(ExitCode::from(exit_status(status)))
}

/// Blocks SIGINT, SIGTERM and SIGHUP so that a terminal interrupt reaches
/// the command but not the allocator. Returns the previous mask.
fn block_termination_signals() -> anyhow::Result<SigSet> {
    let mut blocked = SigSet::empty();
    blocked.add(Signal::SIGINT);
    blocked.add(Signal::SIGTERM);
    blocked.add(Signal::SIGHUP);
    let mut previous = SigSet::empty();
    sigprocmask(SigmaskHow::SIG_BLOCK, Some(&blocked), Some(&mut previous))
        .context("setting signal mask failed")?;
    Ok(previous)
}

fn wait_for(child: Pid) -> anyhow::Result<WaitStatus> {
    loop {
        match waitpid(child, None) {
            Err(Errno::EINTR) => {}
            result => return result.with_context(|| format!("waitpid({child}) failed")),
        }
    }
}

/// Exit status mirroring the command's, shell style: `128 + n` for a
/// command killed by signal `n`.
fn exit_status(status: WaitStatus) -> u8 {
    match status {
        WaitStatus::Exited(_, code) => u8::try_from(code).unwrap_or(1),
        WaitStatus::Signaled(_, signal, _) => u8::try_from(128 + signal as i32).unwrap_or(1),
        _ => 1,
    }
}
