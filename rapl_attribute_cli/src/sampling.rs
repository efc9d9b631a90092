use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use attribution::{attribute_all, Baseline, Config, DomainDelta, SocketInput, ThreadContribution};
use futures::StreamExt;
use log::{info, warn};
use proc_probes::{
    threads::{is_process_alive, process_numa_residency},
    CpuTopology, SystemProbe, ThreadInventory,
};
use rapl_probes::{
    powercap::{all_power_zones, PowercapReader},
    RaplDomainType,
};
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::sink::TraceSink;

/// Process-exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Normal = 0,
    ConfigOrPermission = 1,
    UnsupportedHardware = 2,
    TargetGoneBeforeFirstSample = 3,
}

/// Everything the sampling loop needs, gathered at `INIT`.
pub struct LoopConfig {
    pub pid: i32,
    pub output: PathBuf,
    pub basefile: PathBuf,
    pub rapl_period_s: f64,
    pub interval_s: f64,
    pub attribution: Config,
}

/// Runs the `INIT -> CALIBRATED -> RUNNING -> {FLUSHING -> DONE}` state
/// machine, returning the process exit code.
///
/// A dedicated high-rate task polls RAPL at `rapl_period_s` into a
/// `Mutex`-protected [`PowercapReader`]; the sampling loop itself only
/// takes read-only snapshots of that reader at `interval_s`, so the only
/// cross-task shared state is the RAPL accumulator array.
pub async fn run(cfg: LoopConfig) -> anyhow::Result<ExitCode> {
    info!("state: INIT");
    let zones = all_power_zones().context("discovering RAPL power zones")?;
    if !zones.iter().any(|z| z.domain == RaplDomainType::Package) {
        warn!("no package RAPL domain found under the powercap sysfs tree");
        return Ok(ExitCode::UnsupportedHardware);
    }
    let has_dram_on_socket: Vec<bool> = {
        let n_sockets = zones.iter().map(|z| z.socket_id).max().map(|m| m as usize + 1).unwrap_or(0);
        (0..n_sockets)
            .map(|s| zones.iter().any(|z| z.socket_id as usize == s && z.domain == RaplDomainType::Dram))
            .collect()
    };
    let reader = PowercapReader::open(&zones).context("opening powercap zones")?;
    let n_sockets = reader.socket_count();
    let reader = Arc::new(Mutex::new(reader));

    let topology = CpuTopology::discover().context("discovering CPU topology")?;
    let system_probe = SystemProbe::new(topology.clone()).context("initializing system probe")?;
    let mut thread_inventory = ThreadInventory::new(topology);

    let baseline = Baseline::load_or_zero(&cfg.basefile, n_sockets);

    if !is_process_alive(cfg.pid) {
        warn!("target pid {} is already gone", cfg.pid);
        return Ok(ExitCode::TargetGoneBeforeFirstSample);
    }

    let stop = Arc::new(AtomicBool::new(false));
    install_signal_handler(stop.clone());
    let poller = spawn_rapl_poller(reader.clone(), n_sockets, cfg.rapl_period_s, stop.clone());

    let mut sink = TraceSink::create(&cfg.output, n_sockets).context("creating trace sink")?;

    info!("state: CALIBRATED");
    let mut prev_host = system_probe.snapshot().context("initial host snapshot")?;
    let _ = thread_inventory.inventory(cfg.pid); // seeds per-tid CPU-time baselines
    let mut prev_rapl = snapshot_rapl(&reader, n_sockets).await;
    let mut prev_t = OffsetDateTime::now_utc();

    info!("state: RUNNING");
    let mut interval = tokio::time::interval(Duration::from_secs_f64(cfg.interval_s));
    interval.tick().await; // first tick fires immediately

    let mut rows_emitted: u64 = 0;

    loop {
        if stop.load(Ordering::Relaxed) || !is_process_alive(cfg.pid) {
            break;
        }

        interval.tick().await;

        if stop.load(Ordering::Relaxed) || !is_process_alive(cfg.pid) {
            break;
        }

        let now = OffsetDateTime::now_utc();
        let dt_s = (now - prev_t).as_seconds_f64();

        let host = match system_probe.snapshot() {
            Ok(h) => h,
            Err(e) => {
                warn!("host snapshot failed: {e:#}");
                continue;
            }
        };
        let target_threads = thread_inventory.inventory(cfg.pid).unwrap_or_default();
        let target_numa_bytes = process_numa_residency(cfg.pid, n_sockets).unwrap_or_else(|_| vec![0u64; n_sockets]);
        let rapl_now = snapshot_rapl(&reader, n_sockets).await;

        let contributions: Vec<ThreadContribution> = target_threads
            .iter()
            .map(|t| ThreadContribution { socket: t.socket, cpu_time_delta_s: t.cpu_time_delta_s })
            .collect();

        let inputs: Vec<SocketInput> = (0..n_sockets)
            .map(|s| SocketInput {
                host_cpu_delta_j: rapl_now[s].0 - prev_rapl[s].0,
                host_dram_delta_j: if has_dram_on_socket.get(s).copied().unwrap_or(false) {
                    DomainDelta::supported(rapl_now[s].1 - prev_rapl[s].1)
                } else {
                    DomainDelta::unsupported()
                },
                host_cpu_time_delta_s: host.cpu_time_per_socket.get(s).copied().unwrap_or(0.0)
                    - prev_host.cpu_time_per_socket.get(s).copied().unwrap_or(0.0),
                host_numa_mem_mb: host.numa_mem_per_node.get(s).copied().unwrap_or(0.0),
                target_numa_mem_mb: target_numa_bytes.get(s).copied().unwrap_or(0) as f64 / (1024.0 * 1024.0),
                threads: &contributions,
            })
            .collect();

        match attribute_all(&cfg.attribution, dt_s, &baseline, &inputs) {
            Ok(sockets) => {
                if let Err(e) = sink.write_row(now, dt_s, &sockets) {
                    warn!("failed to write trace row: {e:#}");
                } else {
                    rows_emitted += 1;
                }
            }
            Err(e) => warn!("sample skipped: {e}"),
        }

        prev_host = host;
        prev_rapl = rapl_now;
        prev_t = now;
    }

    info!("state: FLUSHING");
    poller.abort();
    let _ = poller.await;
    info!("state: DONE");

    if rows_emitted == 0 {
        warn!("target pid {} disappeared before any sample was emitted", cfg.pid);
        return Ok(ExitCode::TargetGoneBeforeFirstSample);
    }

    Ok(ExitCode::Normal)
}

async fn snapshot_rapl(reader: &Arc<Mutex<PowercapReader>>, n_sockets: usize) -> Vec<(f64, f64)> {
    let r = reader.lock().await;
    (0..n_sockets)
        .map(|s| {
            (
                r.accumulated_j(s, RaplDomainType::Package).joules_or_zero(),
                r.accumulated_j(s, RaplDomainType::Dram).joules_or_zero(),
            )
        })
        .collect()
}

/// Spawns the high-rate RAPL polling task: it alternates sleeping for
/// `rapl_period_s` and taking a lock just long enough to read-and-update
/// every socket's accumulators, so counters never go `rapl_period_s`
/// without being refreshed even on a long `interval_s`.
fn spawn_rapl_poller(reader: Arc<Mutex<PowercapReader>>, n_sockets: usize, rapl_period_s: f64, stop: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match tokio_timerfd::Interval::new_interval(Duration::from_secs_f64(rapl_period_s)) {
            Ok(mut ticker) => loop {
                if stop.load(Ordering::Relaxed) {
                    return;
                }
                if ticker.next().await.is_none() {
                    return;
                }
                poll_once(&reader, n_sockets).await;
            },
            Err(e) => {
                warn!("failed to create high-precision RAPL timer, falling back to tokio::time::sleep: {e}");
                loop {
                    if stop.load(Ordering::Relaxed) {
                        return;
                    }
                    tokio::time::sleep(Duration::from_secs_f64(rapl_period_s)).await;
                    poll_once(&reader, n_sockets).await;
                }
            }
        }
    })
}

async fn poll_once(reader: &Arc<Mutex<PowercapReader>>, n_sockets: usize) {
    let mut r = reader.lock().await;
    for s in 0..n_sockets {
        r.read(s, RaplDomainType::Package);
        r.read(s, RaplDomainType::Dram);
    }
}

/// Bridges SIGINT/SIGTERM to a flag checked at each sleep boundary,
/// rather than terminating immediately, so `RUNNING` can transition to
/// `FLUSHING` and leave the trace durable on disk.
fn install_signal_handler(stop: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                stop.store(true, Ordering::Relaxed);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
        stop.store(true, Ordering::Relaxed);
    });
}
