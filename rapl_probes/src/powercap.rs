// See https://www.kernel.org/doc/html/latest/power/powercap/powercap.html
// for an explanation of the Power Capping framework.

use std::{
    fmt::Display,
    fs::{self, File},
    io::{Read, Seek},
    path::{Path, PathBuf},
};

use anyhow::Context;
use log::warn;

use crate::{RaplCounter, RaplDomainType, RaplReading};

const POWERCAP_RAPL_PATH: &str = "/sys/devices/virtual/powercap/intel-rapl";
const POWER_ZONE_PREFIX: &str = "intel-rapl";
const POWERCAP_ENERGY_UNIT: f64 = 0.000_001; // 1 microjoule

/// A power zone, as found under the powercap sysfs tree.
#[derive(Debug)]
pub struct PowerZone {
    /// The name of the zone, as returned by powercap, e.g. `package-0` or `dram`.
    pub name: String,

    /// The RAPL domain this zone corresponds to.
    pub domain: RaplDomainType,

    /// The path of the zone in sysfs, e.g.
    /// `/sys/devices/virtual/powercap/intel-rapl/intel-rapl:0`.
    pub path: PathBuf,

    /// The socket this zone belongs to.
    pub socket_id: u32,
}

impl PowerZone {
    pub fn energy_path(&self) -> PathBuf {
        self.path.join("energy_uj")
    }

    pub fn max_energy_path(&self) -> PathBuf {
        self.path.join("max_energy_range_uj")
    }
}

impl Display for PowerZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "- {} ({:?}) socket {}: {}", self.name, self.domain, self.socket_id, self.path.display())
    }
}

/// Discovers the package and dram power zones in the powercap sysfs tree.
///
/// Unlike the MSR/perf-event access paths, powercap zones are a flat,
/// self-describing list: each `intel-rapl:S` directory is a package zone
/// for socket `S`, and an optional `intel-rapl:S:N` child whose `name`
/// file reads `dram` is that socket's DRAM subzone. Any other subzone
/// (`core`, `uncore`, `psys`) is skipped — it belongs to a domain this
/// crate does not model.
pub fn all_power_zones() -> anyhow::Result<Vec<PowerZone>> {
    let mut zones = Vec::new();
    let root = Path::new(POWERCAP_RAPL_PATH);
    if !root.exists() {
        return Ok(zones);
    }

    for entry in fs::read_dir(root).with_context(|| format!("failed to read {}", root.display()))? {
        let entry = entry?;
        let path = entry.path();
        let file_name = path.file_name().unwrap().to_string_lossy().to_string();
        if !path.is_dir() || !file_name.starts_with(POWER_ZONE_PREFIX) {
            continue;
        }

        let name = fs::read_to_string(path.join("name"))?.trim().to_owned();
        let Some(socket_id) = name
            .strip_prefix("package-")
            .and_then(|s| s.parse::<u32>().ok())
        else {
            continue;
        };

        zones.push(PowerZone {
            name,
            domain: RaplDomainType::Package,
            path: path.clone(),
            socket_id,
        });

        // Look for a `dram` subzone.
        for sub in fs::read_dir(&path)? {
            let sub = sub?;
            let sub_path = sub.path();
            let sub_file_name = sub_path.file_name().unwrap().to_string_lossy().to_string();
            if !sub_path.is_dir() || !sub_file_name.starts_with(POWER_ZONE_PREFIX) {
                continue;
            }
            let sub_name = fs::read_to_string(sub_path.join("name"))?.trim().to_owned();
            if sub_name == "dram" {
                zones.push(PowerZone {
                    name: sub_name,
                    domain: RaplDomainType::Dram,
                    path: sub_path,
                    socket_id,
                });
            }
        }
    }

    zones.sort_by_key(|z| (z.socket_id, format!("{:?}", z.domain)));
    Ok(zones)
}

/// Reads and wrap-corrects cumulative energy from the powercap sysfs tree,
/// one socket/domain pair at a time.
///
/// A domain that has no zone on a given socket (most commonly DRAM, which
/// isn't exposed on every platform) reads as [`RaplReading::Unsupported`]
/// rather than failing the whole reader.
pub struct PowercapReader {
    sockets: Vec<SocketZones>,
}

struct SocketZones {
    package: Option<OpenedZone>,
    dram: Option<OpenedZone>,
}

struct OpenedZone {
    file: File,
    counter: RaplCounter,
}

impl PowercapReader {
    pub fn open(zones: &[PowerZone]) -> anyhow::Result<PowercapReader> {
        let n_sockets = zones.iter().map(|z| z.socket_id).max().map(|m| m as usize + 1).unwrap_or(0);
        let mut sockets: Vec<SocketZones> = (0..n_sockets)
            .map(|_| SocketZones { package: None, dram: None })
            .collect();

        for zone in zones {
            let opened = OpenedZone::open(zone)?;
            let slot = &mut sockets[zone.socket_id as usize];
            match zone.domain {
                RaplDomainType::Package => slot.package = Some(opened),
                RaplDomainType::Dram => slot.dram = Some(opened),
            }
        }

        if sockets.iter().all(|s| s.package.is_none()) {
            anyhow::bail!("no package RAPL zone found under {POWERCAP_RAPL_PATH}");
        }

        Ok(PowercapReader { sockets })
    }

    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    /// Reads the current cumulative energy for `socket`/`domain`, applying
    /// wraparound correction against the zone's previous raw reading.
    ///
    /// A read error is logged and the previously accumulated value is
    /// returned unchanged: the next successful read will absorb the
    /// missed interval through an even larger (but still correctly
    /// wrap-corrected) delta.
    pub fn read(&mut self, socket: usize, domain: RaplDomainType) -> RaplReading {
        let Some(slot) = self.sockets.get_mut(socket) else {
            return RaplReading::Unsupported;
        };
        let zone = match domain {
            RaplDomainType::Package => &mut slot.package,
            RaplDomainType::Dram => &mut slot.dram,
        };
        let Some(zone) = zone else {
            return RaplReading::Unsupported;
        };

        match zone.read_raw_joules() {
            Ok(raw_j) => {
                zone.counter.update(raw_j);
                RaplReading::Value(zone.counter.accumulated_j())
            }
            Err(e) => {
                warn!("transient RAPL read error on socket {socket} domain {domain:?}: {e:#}");
                RaplReading::Value(zone.counter.accumulated_j())
            }
        }
    }

    /// Snapshots the current wrap-corrected accumulator without touching
    /// the underlying sysfs file.
    ///
    /// The sampling loop calls [`PowercapReader::read`] from a dedicated
    /// high-rate polling task and this method from the interval-rate
    /// attribution loop, so that a single socket/domain pair is never
    /// read from sysfs twice for the same hardware tick.
    pub fn accumulated_j(&self, socket: usize, domain: RaplDomainType) -> RaplReading {
        let Some(slot) = self.sockets.get(socket) else {
            return RaplReading::Unsupported;
        };
        let zone = match domain {
            RaplDomainType::Package => &slot.package,
            RaplDomainType::Dram => &slot.dram,
        };
        match zone {
            Some(zone) => RaplReading::Value(zone.counter.accumulated_j()),
            None => RaplReading::Unsupported,
        }
    }
}

impl OpenedZone {
    fn open(zone: &PowerZone) -> anyhow::Result<OpenedZone> {
        let file = File::open(zone.energy_path())
            .with_context(|| format!("failed to open {}", zone.energy_path().display()))?;
        let max_range_raw: u64 = fs::read_to_string(zone.max_energy_path())
            .with_context(|| format!("failed to read {}", zone.max_energy_path().display()))?
            .trim()
            .parse()
            .context("invalid max_energy_range_uj")?;
        let max_range_j = max_range_raw as f64 * POWERCAP_ENERGY_UNIT;

        Ok(OpenedZone {
            file,
            counter: RaplCounter::new(max_range_j),
        })
    }

    fn read_raw_joules(&mut self) -> anyhow::Result<f64> {
        self.file.rewind()?;
        let mut buf = String::new();
        self.file.read_to_string(&mut buf)?;
        let raw_uj: u64 = buf.trim_end().parse().context("invalid energy_uj content")?;
        Ok(raw_uj as f64 * POWERCAP_ENERGY_UNIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_zone(dir: &Path, name: &str, energy_uj: u64, max_uj: u64) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        File::create(dir.join("name")).unwrap().write_all(name.as_bytes()).unwrap();
        File::create(dir.join("energy_uj")).unwrap().write_all(energy_uj.to_string().as_bytes()).unwrap();
        File::create(dir.join("max_energy_range_uj")).unwrap().write_all(max_uj.to_string().as_bytes()).unwrap();
        dir.to_path_buf()
    }

    #[test]
    fn reads_and_wraps() {
        let tmp = tempfile::tempdir().unwrap();
        let pkg_dir = write_zone(&tmp.path().join("pkg"), "package-0", 100, 1_000_000);
        let dram_dir = write_zone(&tmp.path().join("dram"), "dram", 50, 500_000);

        let zones = vec![
            PowerZone {
                name: "package-0".into(),
                domain: RaplDomainType::Package,
                path: pkg_dir.clone(),
                socket_id: 0,
            },
            PowerZone {
                name: "dram".into(),
                domain: RaplDomainType::Dram,
                path: dram_dir.clone(),
                socket_id: 0,
            },
        ];

        let mut reader = PowercapReader::open(&zones).unwrap();
        // first read establishes the baseline, no delta yet
        assert_eq!(reader.read(0, RaplDomainType::Package), RaplReading::Value(0.0));

        // bump the counter past a wrap point
        File::create(pkg_dir.join("energy_uj")).unwrap().write_all(b"5").unwrap();
        let second = reader.read(0, RaplDomainType::Package);
        // wrapped: (1_000_000 - 100) + 5 = 999_905 uj
        match second {
            RaplReading::Value(j) => assert!((j - 999_905.0 * 0.000_001).abs() < 1e-9),
            _ => panic!("expected a value"),
        }
    }

    #[test]
    fn missing_socket_is_unsupported() {
        let tmp = tempfile::tempdir().unwrap();
        let pkg_dir = write_zone(&tmp.path().join("pkg"), "package-0", 100, 1_000_000);
        let zones = vec![PowerZone {
            name: "package-0".into(),
            domain: RaplDomainType::Package,
            path: pkg_dir,
            socket_id: 0,
        }];
        let mut reader = PowercapReader::open(&zones).unwrap();
        assert_eq!(reader.read(0, RaplDomainType::Dram), RaplReading::Unsupported);
        assert_eq!(reader.read(5, RaplDomainType::Package), RaplReading::Unsupported);
    }
}
