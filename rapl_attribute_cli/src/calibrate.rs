use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use attribution::Baseline;
use log::info;
use rapl_probes::powercap::{all_power_zones, PowercapReader};
use rapl_probes::RaplDomainType;

/// Runs the idle-power calibration routine: samples RAPL power over
/// `base_period_s` and writes the averaged per-socket watts to
/// `basefile` as the baseline the attribution engine subtracts from
/// every measured interval.
///
/// This is meant to be run on an otherwise idle host; the caller is
/// responsible for ensuring no other tenant is competing for the machine
/// during the window.
pub async fn run(basefile: &Path, base_period_s: f64) -> anyhow::Result<()> {
    let zones = all_power_zones().context("discovering RAPL power zones")?;
    if zones.is_empty() {
        anyhow::bail!("no RAPL powercap zones found; is this host RAPL-capable?");
    }
    let mut reader = PowercapReader::open(&zones).context("opening powercap zones")?;
    let n_sockets = reader.socket_count();

    info!("calibrating idle baseline over {base_period_s:.1}s on {n_sockets} socket(s)");

    // Establish the wrap-correction baseline for every domain.
    for s in 0..n_sockets {
        reader.read(s, RaplDomainType::Package);
        reader.read(s, RaplDomainType::Dram);
    }

    let start_cpu: Vec<f64> = (0..n_sockets).map(|s| reader.accumulated_j(s, RaplDomainType::Package).joules_or_zero()).collect();
    let start_dram: Vec<f64> = (0..n_sockets).map(|s| reader.accumulated_j(s, RaplDomainType::Dram).joules_or_zero()).collect();

    tokio::time::sleep(Duration::from_secs_f64(base_period_s)).await;

    for s in 0..n_sockets {
        reader.read(s, RaplDomainType::Package);
        reader.read(s, RaplDomainType::Dram);
    }

    let mut cpu_watts = Vec::with_capacity(n_sockets);
    let mut dram_watts = Vec::with_capacity(n_sockets);
    for s in 0..n_sockets {
        let end_cpu = reader.accumulated_j(s, RaplDomainType::Package).joules_or_zero();
        let end_dram = reader.accumulated_j(s, RaplDomainType::Dram).joules_or_zero();
        cpu_watts.push((end_cpu - start_cpu[s]) / base_period_s);
        dram_watts.push((end_dram - start_dram[s]) / base_period_s);
        info!("socket {s}: idle cpu {:.2} W, idle dram {:.2} W", cpu_watts[s], dram_watts[s]);
    }

    let baseline = Baseline { cpu: cpu_watts, dram: dram_watts };
    let json = serde_json::to_string_pretty(&baseline).context("serializing baseline")?;
    std::fs::write(basefile, json).with_context(|| format!("writing {}", basefile.display()))?;
    info!("wrote baseline to {}", basefile.display());
    Ok(())
}
