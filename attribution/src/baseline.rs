use std::{fs, path::Path};

use log::warn;
use serde::{Deserialize, Serialize};

/// Per-socket idle power, in watts, for the CPU and DRAM domains: the
/// output of a one-shot calibration run. The core attribution pipeline
/// only ever consumes this file; it never recomputes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    pub cpu: Vec<f64>,
    pub dram: Vec<f64>,
}

impl Baseline {
    pub fn zero(n_sockets: usize) -> Baseline {
        Baseline {
            cpu: vec![0.0; n_sockets],
            dram: vec![0.0; n_sockets],
        }
    }

    /// Loads a baseline file, falling back to an all-zero baseline (with
    /// a warning) when the file doesn't exist or fails to parse.
    pub fn load_or_zero(path: &Path, n_sockets: usize) -> Baseline {
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Baseline>(&content) {
                Ok(b) => b.resized(n_sockets),
                Err(e) => {
                    warn!("failed to parse baseline file {}: {e}; using zero baseline", path.display());
                    Baseline::zero(n_sockets)
                }
            },
            Err(_) => {
                warn!("baseline file {} not found; using zero baseline", path.display());
                Baseline::zero(n_sockets)
            }
        }
    }

    fn resized(mut self, n_sockets: usize) -> Baseline {
        self.cpu.resize(n_sockets, 0.0);
        self.dram.resize(n_sockets, 0.0);
        self
    }

    pub fn cpu_joules(&self, socket: usize, dt_s: f64) -> f64 {
        self.cpu.get(socket).copied().unwrap_or(0.0) * dt_s
    }

    pub fn dram_joules(&self, socket: usize, dt_s: f64) -> f64 {
        self.dram.get(socket).copied().unwrap_or(0.0) * dt_s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_valid_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp.as_file(), r#"{{"cpu": [10.0, 12.0], "dram": [2.0, 2.5]}}"#).unwrap();
        let b = Baseline::load_or_zero(tmp.path(), 2);
        assert_eq!(b.cpu, vec![10.0, 12.0]);
        assert_eq!(b.cpu_joules(0, 2.0), 20.0);
    }

    #[test]
    fn missing_file_is_zero() {
        let b = Baseline::load_or_zero(Path::new("/nonexistent/path/baseline.json"), 2);
        assert_eq!(b.cpu, vec![0.0, 0.0]);
        assert_eq!(b.dram, vec![0.0, 0.0]);
    }
}
