use std::path::PathBuf;

use clap::Parser;

/// Per-process, NUMA-aware RAPL energy attribution.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Probe topology and powercap permissions, then exit.
    #[arg(long)]
    pub check: bool,

    /// Run idle-power calibration and write the baseline file, then exit.
    #[arg(long)]
    pub basepower: bool,

    /// Attach to a process by PID.
    #[arg(long, conflicts_with = "name")]
    pub pid: Option<i32>,

    /// Attach to a process by matching its executable name.
    #[arg(long)]
    pub name: Option<String>,

    /// Output trace file (CSV).
    #[arg(long, default_value = "trace.csv")]
    pub output: PathBuf,

    /// Baseline power file (JSON): read in attribution mode, written by
    /// `--basepower`.
    #[arg(long, default_value = "baseline.json")]
    pub basefile: PathBuf,

    /// Calibration window for `--basepower`, in seconds.
    #[arg(long, default_value_t = 2.0)]
    pub base_period: f64,

    /// Spacing between high-rate RAPL polls, in seconds.
    #[arg(long, default_value_t = 0.01)]
    pub rapl_period: f64,

    /// Spacing between attribution samples, in seconds.
    #[arg(long, default_value_t = 1.0)]
    pub interval: f64,

    /// CPU domain scaling exponent.
    #[arg(long, default_value_t = 0.3)]
    pub gamma: f64,

    /// DRAM domain scaling exponent.
    #[arg(long, default_value_t = 0.2)]
    pub delta: f64,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    pub loglvl: String,
}

/// How to locate the process to attribute energy to.
#[derive(Debug, Clone)]
pub enum Target {
    Pid(i32),
    Name(String),
}

/// The operation selected by the flags on the command line. Exactly one
/// of `--check`, `--basepower`, `--pid`, `--name` must be given.
#[derive(Debug, Clone)]
pub enum Mode {
    Check,
    Basepower,
    Attach(Target),
}

impl Cli {
    pub fn mode(&self) -> anyhow::Result<Mode> {
        if self.check {
            Ok(Mode::Check)
        } else if self.basepower {
            Ok(Mode::Basepower)
        } else if let Some(pid) = self.pid {
            Ok(Mode::Attach(Target::Pid(pid)))
        } else if let Some(name) = &self.name {
            Ok(Mode::Attach(Target::Name(name.clone())))
        } else {
            Err(anyhow::anyhow!(
                "one of --check, --basepower, --pid <N>, or --name <S> is required"
            ))
        }
    }
}
