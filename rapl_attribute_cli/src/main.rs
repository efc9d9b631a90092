use anyhow::Context;
use attribution::Config;
use clap::Parser;
use log::{error, info};

use cli::{Cli, Mode, Target};

mod calibrate;
mod cli;
mod sampling;
mod sink;

#[tokio::main]
async fn main() {
    let exit_code = match run().await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            sampling::ExitCode::ConfigOrPermission
        }
    };
    std::process::exit(exit_code as i32);
}

async fn run() -> anyhow::Result<sampling::ExitCode> {
    let cli = Cli::parse();

    let env = env_logger::Env::default().default_filter_or(cli.loglvl.clone());
    env_logger::init_from_env(env);

    match cli.mode()? {
        Mode::Check => {
            run_check()?;
            Ok(sampling::ExitCode::Normal)
        }
        Mode::Basepower => {
            calibrate::run(&cli.basefile, cli.base_period).await?;
            Ok(sampling::ExitCode::Normal)
        }
        Mode::Attach(target) => {
            let pid = resolve_target(&target)?;
            let cfg = sampling::LoopConfig {
                pid,
                output: cli.output.clone(),
                basefile: cli.basefile.clone(),
                rapl_period_s: cli.rapl_period,
                interval_s: cli.interval,
                attribution: Config { gamma: cli.gamma, delta: cli.delta },
            };
            sampling::run(cfg).await
        }
    }
}

/// `--check`: probe topology and powercap permissions, then exit.
fn run_check() -> anyhow::Result<()> {
    let zones = rapl_probes::powercap::all_power_zones().context("discovering RAPL power zones")?;
    if zones.is_empty() {
        println!("no RAPL powercap zones found under /sys/devices/virtual/powercap/intel-rapl");
    } else {
        println!("RAPL powercap zones:");
        for zone in &zones {
            println!("{zone}");
        }
    }

    let topology = proc_probes::CpuTopology::discover().context("discovering CPU topology")?;
    println!("{} socket(s) discovered", topology.socket_count());

    let has_package = zones.iter().any(|z| z.domain == rapl_probes::RaplDomainType::Package);
    if !has_package {
        println!("WARNING: no package RAPL domain available, attribution would exit with code 2");
    }
    info!("check complete");
    Ok(())
}

fn resolve_target(target: &Target) -> anyhow::Result<i32> {
    match target {
        Target::Pid(pid) => Ok(*pid),
        Target::Name(name) => proc_probes::threads::find_pid_by_name(name)?
            .with_context(|| format!("no running process named {name:?}")),
    }
}
