//! # runexcl
//!
//! Runs a command on CPUs reserved exclusively for it. The CPUs are carved
//! out as a cgroup v2 cpuset partition and returned once the command and
//! everything it started have exited.

mod args;
mod child;
mod launch;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::args::Cli;

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_directive())),
        )
        .with_writer(std::io::stderr)
        .init();

    launch::run(&cli)
}
