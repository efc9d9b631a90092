use std::fs;

use anyhow::Context;

use crate::topology::CpuTopology;

const PROC_STAT_PATH: &str = "/proc/stat";
const NODE_SYSFS_DIR: &str = "/sys/devices/system/node";

/// A host-wide snapshot taken at one sample boundary.
#[derive(Debug, Clone, Default)]
pub struct HostSnapshot {
    /// Aggregate non-idle CPU time across all cores of socket `s`, seconds.
    pub cpu_time_per_socket: Vec<f64>,
    /// Total resident memory on NUMA node `s`, megabytes.
    pub numa_mem_per_node: Vec<f64>,
}

/// Reads host-wide CPU time (per socket) and per-NUMA-node memory totals.
pub struct SystemProbe {
    topology: CpuTopology,
    ticks_per_second: f64,
}

impl SystemProbe {
    pub fn new(topology: CpuTopology) -> anyhow::Result<SystemProbe> {
        let ticks_per_second = procfs::ticks_per_second() as f64;
        Ok(SystemProbe {
            topology,
            ticks_per_second,
        })
    }

    pub fn topology(&self) -> &CpuTopology {
        &self.topology
    }

    pub fn snapshot(&self) -> anyhow::Result<HostSnapshot> {
        let per_cpu_jiffies = read_per_cpu_nonidle_jiffies()?;
        let n_sockets = self.topology.socket_count();
        let mut cpu_time_per_socket = vec![0.0; n_sockets];

        for (cpu, jiffies) in per_cpu_jiffies {
            if let Some(socket) = self.topology.socket_of_cpu(cpu) {
                cpu_time_per_socket[socket as usize] += jiffies as f64 / self.ticks_per_second;
            }
        }

        let numa_mem_per_node = read_numa_mem_per_node(n_sockets)?;

        Ok(HostSnapshot {
            cpu_time_per_socket,
            numa_mem_per_node,
        })
    }
}

/// Reads `/proc/stat` and returns, for each `cpuN` line, the sum of the
/// non-idle jiffy counters (user + nice + system + irq + softirq + steal;
/// idle and iowait are excluded, matching how `htop`/`mpstat` define
/// "busy" time).
fn read_per_cpu_nonidle_jiffies() -> anyhow::Result<Vec<(u32, u64)>> {
    let content = fs::read_to_string(PROC_STAT_PATH).with_context(|| format!("failed to read {PROC_STAT_PATH}"))?;
    let mut result = Vec::new();

    for line in content.lines() {
        let Some(rest) = line.strip_prefix("cpu") else { continue };
        let mut parts = rest.split_whitespace();
        let Some(idx_str) = parts.next() else { continue };
        // the aggregate "cpu" line (no trailing digits) is not a core
        let Ok(cpu) = idx_str.parse::<u32>() else { continue };

        let fields: Vec<u64> = parts.filter_map(|f| f.parse::<u64>().ok()).collect();
        // user nice system idle iowait irq softirq steal guest guest_nice
        if fields.len() < 8 {
            continue;
        }
        let (user, nice, system, _idle, _iowait, irq, softirq, steal) =
            (fields[0], fields[1], fields[2], fields[3], fields[4], fields[5], fields[6], fields[7]);
        let nonidle = user + nice + system + irq + softirq + steal;
        result.push((cpu, nonidle));
    }

    Ok(result)
}

/// Reads resident memory (MB) per NUMA node from `nodeN/meminfo`.
///
/// The supported topology maps one NUMA node to one socket, so node `s`
/// and socket `s` are the same index.
fn read_numa_mem_per_node(n_sockets: usize) -> anyhow::Result<Vec<f64>> {
    let mut mem = vec![0.0; n_sockets];
    for (node, slot) in mem.iter_mut().enumerate() {
        let path = format!("{NODE_SYSFS_DIR}/node{node}/meminfo");
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        *slot = parse_node_meminfo_mem_used_mb(&content);
    }
    Ok(mem)
}

/// Parses a `nodeN/meminfo` file, looking for the `MemUsed` line (in kB),
/// e.g. `Node 0 MemUsed:  1234567 kB`.
fn parse_node_meminfo_mem_used_mb(content: &str) -> f64 {
    for line in content.lines() {
        if let Some(rest) = line.split("MemUsed:").nth(1) {
            let kb: f64 = rest
                .split_whitespace()
                .next()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.0);
            return kb / 1024.0;
        }
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_proc_stat_line() {
        let line = "cpu0 100 5 50 800 10 2 3 0 0 0";
        let rest = line.strip_prefix("cpu").unwrap();
        let mut parts = rest.split_whitespace();
        let cpu: u32 = parts.next().unwrap().parse().unwrap();
        assert_eq!(cpu, 0);
        let fields: Vec<u64> = parts.filter_map(|f| f.parse().ok()).collect();
        let nonidle = fields[0] + fields[1] + fields[2] + fields[5] + fields[6] + fields[7];
        assert_eq!(nonidle, 100 + 5 + 50 + 2 + 3 + 0);
    }

    #[test]
    fn parses_node_meminfo() {
        let content = "Node 0 MemTotal:       16384000 kB\nNode 0 MemUsed:        2048000 kB\nNode 0 MemFree:        14336000 kB\n";
        assert_eq!(parse_node_meminfo_mem_used_mb(content), 2048000.0 / 1024.0);
    }

    #[test]
    fn missing_meminfo_is_zero() {
        assert_eq!(parse_node_meminfo_mem_used_mb(""), 0.0);
    }
}
