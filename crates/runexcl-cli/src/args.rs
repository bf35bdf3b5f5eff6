//! Command-line interface definition.

use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Parser};
use runexcl_common::config::RunexclConfig;
use runexcl_core::CpuSet;
use runexcl_core::governor::Frequency;

/// Run a command on exclusively reserved CPUs.
#[derive(Parser, Debug)]
#[command(name = "runexcl", version, about, long_about = None)]
pub struct Cli {
    /// CPUs to reserve, e.g. `2-3,6`. May be repeated; the lists are merged.
    #[arg(short = 'c', long = "cpu-list", value_name = "LIST", required = true)]
    pub cpu_lists: Vec<String>,

    /// Pin the CPUs to a frequency: `max`, `min`, `nonlinear`, a fraction of
    /// the maximum such as `0.5`, or a value with unit such as `2.4GHz`.
    #[arg(short, long, value_name = "FREQ")]
    pub frequency: Option<Frequency>,

    /// Also remove the CPUs from load balancing and kernel housekeeping.
    #[arg(short, long)]
    pub isolate: bool,

    /// Increase log verbosity (`-v` debug, `-vv` trace).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// JSON configuration file.
    #[arg(long, value_name = "FILE", env = "RUNEXCL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Mount point of the cgroup v2 hierarchy, overriding the configuration.
    #[arg(long, value_name = "DIR")]
    pub cgroup_root: Option<PathBuf>,

    /// Command to run, followed by its arguments.
    #[arg(
        value_name = "COMMAND",
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<OsString>,
}

impl Cli {
    /// Default `tracing` directive when `RUST_LOG` is unset.
    pub const fn log_directive(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Builds the effective configuration from `--config` and
    /// `--cgroup-root`.
    pub fn load_config(&self) -> anyhow::Result<RunexclConfig> {
        let mut config = match &self.config {
            Some(path) => RunexclConfig::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => RunexclConfig::default(),
        };
        if let Some(root) = &self.cgroup_root {
            config.cgroup_root.clone_from(root);
        }
        config.validate()?;
        Ok(config)
    }

    /// Union of all `--cpu-list` arguments.
    pub fn requested_cpus(&self, max_cpus: usize) -> anyhow::Result<CpuSet> {
        let mut requested = CpuSet::new(max_cpus);
        for list in &self.cpu_lists {
            let cpus = CpuSet::from_list(list, max_cpus)
                .with_context(|| format!("invalid CPU specification \"{list}\""))?;
            requested |= &cpus;
        }
        anyhow::ensure!(!requested.is_empty(), "at least one CPU must be given");
        Ok(requested)
    }
}
