use std::{collections::HashMap, fs, num::ParseIntError, path::Path};

use anyhow::Context;

const CPU_ONLINE_PATH: &str = "/sys/devices/system/cpu/online";
const CPU_SYSFS_DIR: &str = "/sys/devices/system/cpu";

/// Maps each online CPU core to the socket (physical package) it belongs to.
///
/// Discovered once at startup, the same way the teacher discovers the
/// monitorable CPUs from `/sys/devices/power/cpumask`: by reading a
/// compact sysfs cpulist (`"n"` or `"start-end"`, comma-separated) and
/// then, for every core in it, its `topology/physical_package_id`.
#[derive(Debug, Clone)]
pub struct CpuTopology {
    /// cpu core id -> socket id
    cpu_to_socket: HashMap<u32, u32>,
    socket_count: usize,
}

impl CpuTopology {
    pub fn discover() -> anyhow::Result<CpuTopology> {
        let online = online_cpus()?;
        let mut cpu_to_socket = HashMap::with_capacity(online.len());
        let mut max_socket = 0u32;

        for cpu in online {
            let path = format!("{CPU_SYSFS_DIR}/cpu{cpu}/topology/physical_package_id");
            let socket: u32 = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {path}"))?
                .trim()
                .parse()
                .with_context(|| format!("invalid physical_package_id in {path}"))?;
            max_socket = max_socket.max(socket);
            cpu_to_socket.insert(cpu, socket);
        }

        Ok(CpuTopology {
            cpu_to_socket,
            socket_count: max_socket as usize + 1,
        })
    }

    pub fn socket_count(&self) -> usize {
        self.socket_count
    }

    pub fn socket_of_cpu(&self, cpu: u32) -> Option<u32> {
        self.cpu_to_socket.get(&cpu).copied()
    }

    pub fn cores_of_socket(&self, socket: u32) -> impl Iterator<Item = u32> + '_ {
        self.cpu_to_socket
            .iter()
            .filter(move |(_, s)| **s == socket)
            .map(|(cpu, _)| *cpu)
    }

    #[cfg(test)]
    pub(crate) fn from_map(cpu_to_socket: HashMap<u32, u32>, socket_count: usize) -> CpuTopology {
        CpuTopology {
            cpu_to_socket,
            socket_count,
        }
    }
}

fn online_cpus() -> anyhow::Result<Vec<u32>> {
    let list = fs::read_to_string(Path::new(CPU_ONLINE_PATH))
        .with_context(|| format!("failed to read {CPU_ONLINE_PATH}"))?;
    parse_cpu_list(&list)
}

/// Parses a compact cpulist like `"0"`, `"0-1"`, or `"0,64"`/`"1-3,5-6"`.
pub(crate) fn parse_cpu_list(cpulist: &str) -> anyhow::Result<Vec<u32>> {
    fn parse_item(item: &str) -> anyhow::Result<Vec<u32>> {
        let bounds: Vec<u32> = item
            .split('-')
            .map(str::parse)
            .collect::<Result<Vec<u32>, ParseIntError>>()?;
        match bounds.as_slice() {
            &[start, end] => Ok((start..=end).collect()),
            &[n] => Ok(vec![n]),
            _ => Err(anyhow::anyhow!("invalid cpulist item: {item}")),
        }
    }

    let cpus = cpulist
        .trim_end()
        .split(',')
        .filter(|s| !s.is_empty())
        .map(parse_item)
        .collect::<anyhow::Result<Vec<Vec<u32>>>>()?
        .into_iter()
        .flatten()
        .collect();
    Ok(cpus)
}

#[cfg(test)]
mod tests {
    use super::parse_cpu_list;

    #[test]
    fn parses_combined_list() {
        assert_eq!(parse_cpu_list("0").unwrap(), vec![0]);
        assert_eq!(parse_cpu_list("0,64").unwrap(), vec![0, 64]);
        assert_eq!(parse_cpu_list("0-1").unwrap(), vec![0, 1]);
        assert_eq!(parse_cpu_list("1-3,5-6").unwrap(), vec![1, 2, 3, 5, 6]);
    }
}
