use thiserror::Error;

use crate::baseline::Baseline;
use crate::model::{Config, SocketSample, ThreadContribution};

/// A floor under denominators that could otherwise be zero, to avoid
/// division-by-zero while keeping a near-zero `C_host`/`M_host` from
/// producing a spuriously huge (pre-clamp) fraction.
const EPS: f64 = 1e-9;

#[derive(Debug, Error)]
pub enum AttributionError {
    /// `Δt ≤ 0`. The sample must be skipped entirely, not emitted with
    /// garbage values.
    #[error("clock anomaly: non-positive sample interval ({0}s)")]
    ClockAnomaly(f64),
}

/// RAPL input for one domain, on one socket: the wrap-corrected delta
/// since the previous sample, or `None` if the domain is unsupported on
/// this socket. An unsupported domain surfaces as NaN fields downstream
/// rather than aborting the sample.
#[derive(Debug, Clone, Copy)]
pub struct DomainDelta(pub Option<f64>);

impl DomainDelta {
    pub fn supported(j: f64) -> DomainDelta {
        DomainDelta(Some(j))
    }
    pub fn unsupported() -> DomainDelta {
        DomainDelta(None)
    }
}

/// Everything the engine needs to attribute one interval `[t-1, t]` on
/// one socket.
pub struct SocketInput<'a> {
    pub host_cpu_delta_j: f64,
    pub host_dram_delta_j: DomainDelta,
    /// `C_host(s)`: host-wide non-idle CPU time delta on this socket, s.
    pub host_cpu_time_delta_s: f64,
    /// `M_host(s)`: host-wide NUMA memory on this socket's node, MB.
    pub host_numa_mem_mb: f64,
    /// `M_target(s)`: the target process's resident memory on this
    /// socket's node, MB. Read once from the process; all of its threads
    /// share one address space, so summing per thread would double-count.
    pub target_numa_mem_mb: f64,
    pub threads: &'a [ThreadContribution],
}

/// Attributes energy for one socket over one interval: RAPL deltas minus
/// baseline, per-domain share, the non-linear scaling law, then the final
/// energy split. `dt_s` must already have been validated as `> 0` by the
/// caller (see [`attribute_all`]).
pub fn attribute_socket(cfg: &Config, socket: u32, dt_s: f64, baseline: &Baseline, input: &SocketInput) -> SocketSample {
    // Step 1: raw RAPL deltas, baseline subtraction.
    let e_base_cpu = baseline.cpu_joules(socket as usize, dt_s);
    let e_active_cpu = (input.host_cpu_delta_j - e_base_cpu).max(0.0);

    let (host_dram_energy_j, e_active_dram) = match input.host_dram_delta_j.0 {
        Some(host_dram_j) => {
            let e_base_dram = baseline.dram_joules(socket as usize, dt_s);
            (host_dram_j, (host_dram_j - e_base_dram).max(0.0))
        }
        None => (f64::NAN, f64::NAN),
    };

    // Step 2: CPU share on this socket.
    let c_target: f64 = input
        .threads
        .iter()
        .filter(|t| t.socket == Some(socket))
        .map(|t| t.cpu_time_delta_s)
        .sum();
    let n_threads_on_socket = input.threads.iter().filter(|t| t.socket == Some(socket)).count();

    let raw_f_cpu = c_target / input.host_cpu_time_delta_s.max(EPS);
    let cpu_overflow = raw_f_cpu > 1.0 + 1e-9;
    let f_cpu = raw_f_cpu.clamp(0.0, 1.0);

    // Step 3: DRAM share on this socket. Requires at least one thread of
    // the target currently assigned to this socket; otherwise 0, not NaN.
    let threads_present = n_threads_on_socket > 0;
    let (f_dram, dram_overflow) = if threads_present {
        let raw_f_dram = input.target_numa_mem_mb / input.host_numa_mem_mb.max(EPS);
        (raw_f_dram.clamp(0.0, 1.0), raw_f_dram > 1.0 + 1e-9)
    } else {
        (0.0, false)
    };

    // Step 4: non-linear scaling law. `share(0) = 0`, `share(1) = 1`,
    // monotonically increasing in between — `f.powf(exp)` already has
    // these properties for `f` in `[0, 1]` and `exp > 0`, but the
    // endpoints are pinned explicitly to avoid any floating-point
    // surprise at the boundary.
    let share_cpu = scale(f_cpu, cfg.gamma);
    let share_dram = if input.host_dram_delta_j.0.is_some() {
        scale(f_dram, cfg.delta)
    } else {
        f64::NAN
    };

    // Step 5: energy attribution.
    let target_cpu_energy_j = share_cpu * e_active_cpu;
    let target_dram_energy_j = share_dram * e_active_dram;

    SocketSample {
        host_cpu_energy_j: input.host_cpu_delta_j,
        host_dram_energy_j,
        target_cpu_energy_j,
        target_dram_energy_j,
        target_cpu_share: share_cpu,
        target_dram_share: share_dram,
        n_threads_on_socket,
        share_overflow: cpu_overflow || dram_overflow,
    }
}

fn scale(f: f64, exponent: f64) -> f64 {
    if f <= 0.0 {
        0.0
    } else if f >= 1.0 {
        1.0
    } else {
        f.powf(exponent)
    }
}

/// Attributes energy for every socket over one interval, validating
/// `dt_s` once up front so a non-positive interval skips the whole
/// sample rather than leaking into every socket's computation.
pub fn attribute_all(
    cfg: &Config,
    dt_s: f64,
    baseline: &Baseline,
    inputs: &[SocketInput],
) -> Result<Vec<SocketSample>, AttributionError> {
    if dt_s <= 0.0 {
        return Err(AttributionError::ClockAnomaly(dt_s));
    }
    Ok(inputs
        .iter()
        .enumerate()
        .map(|(s, input)| attribute_socket(cfg, s as u32, dt_s, baseline, input))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(gamma: f64, delta: f64) -> Config {
        Config { gamma, delta }
    }

    fn thread(socket: Option<u32>, delta_s: f64) -> ThreadContribution {
        ThreadContribution { socket, cpu_time_delta_s: delta_s }
    }

    #[test]
    fn idle_host_idle_target() {
        let baseline = Baseline { cpu: vec![55.0], dram: vec![0.0] };
        let threads = vec![];
        let input = SocketInput {
            host_cpu_delta_j: 60.0,
            host_dram_delta_j: DomainDelta::unsupported(),
            host_cpu_time_delta_s: 1.0,
            host_numa_mem_mb: 1000.0,
            target_numa_mem_mb: 0.0,
            threads: &threads,
        };
        let row = attribute_socket(&cfg(0.3, 0.2), 0, 1.0, &baseline, &input);
        assert_eq!(row.target_cpu_share, 0.0);
        assert_eq!(row.target_cpu_energy_j, 0.0);
    }

    #[test]
    fn single_tenant_full_cpu_share() {
        let baseline = Baseline { cpu: vec![10.0, 10.0], dram: vec![0.0, 0.0] };
        let threads = vec![thread(Some(0), 2.0)];
        let input0 = SocketInput {
            host_cpu_delta_j: 80.0,
            host_dram_delta_j: DomainDelta::unsupported(),
            host_cpu_time_delta_s: 2.0, // 2 full cores * 1s or 1 core * 2s, over the 2s interval
            host_numa_mem_mb: 1000.0,
            target_numa_mem_mb: 0.0,
            threads: &threads,
        };
        let row0 = attribute_socket(&cfg(0.3, 0.2), 0, 2.0, &baseline, &input0);
        assert!((row0.target_cpu_share - 1.0).abs() < 1e-9);
        // E_active = 80 - 10*2 = 60J, share=1.0 -> E_target = 60J
        assert!((row0.target_cpu_energy_j - 60.0).abs() < 0.5);

        let input1 = SocketInput {
            host_cpu_delta_j: 0.0,
            host_dram_delta_j: DomainDelta::unsupported(),
            host_cpu_time_delta_s: 2.0,
            host_numa_mem_mb: 1000.0,
            target_numa_mem_mb: 0.0,
            threads: &threads,
        };
        let row1 = attribute_socket(&cfg(0.3, 0.2), 1, 2.0, &baseline, &input1);
        assert_eq!(row1.target_cpu_energy_j, 0.0);
    }

    #[test]
    fn co_tenant_partial_share() {
        let baseline = Baseline { cpu: vec![10.0], dram: vec![0.0] };
        let threads = vec![thread(Some(0), 0.3)];
        let input = SocketInput {
            host_cpu_delta_j: 100.0,
            host_dram_delta_j: DomainDelta::unsupported(),
            host_cpu_time_delta_s: 1.0,
            host_numa_mem_mb: 1000.0,
            target_numa_mem_mb: 0.0,
            threads: &threads,
        };
        let row = attribute_socket(&cfg(0.3, 0.2), 0, 1.0, &baseline, &input);
        let expected_share = 0.3f64.powf(0.3);
        assert!((row.target_cpu_share - expected_share).abs() < 1e-9);
        let e_active = 100.0 - 10.0;
        assert!((row.target_cpu_energy_j - expected_share * e_active).abs() < 1e-6);
    }

    #[test]
    fn missing_dram_domain_is_nan() {
        let baseline = Baseline { cpu: vec![0.0], dram: vec![0.0] };
        let threads = vec![];
        let input = SocketInput {
            host_cpu_delta_j: 10.0,
            host_dram_delta_j: DomainDelta::unsupported(),
            host_cpu_time_delta_s: 1.0,
            host_numa_mem_mb: 1000.0,
            target_numa_mem_mb: 0.0,
            threads: &threads,
        };
        let row = attribute_socket(&cfg(0.3, 0.2), 0, 1.0, &baseline, &input);
        assert!(row.target_dram_energy_j.is_nan());
        assert!(row.target_dram_share.is_nan());
        assert!(row.host_dram_energy_j.is_nan());
    }

    #[test]
    fn clock_anomaly_is_rejected() {
        let baseline = Baseline::zero(1);
        let inputs = vec![SocketInput {
            host_cpu_delta_j: 1.0,
            host_dram_delta_j: DomainDelta::unsupported(),
            host_cpu_time_delta_s: 1.0,
            host_numa_mem_mb: 1.0,
            target_numa_mem_mb: 0.0,
            threads: &[],
        }];
        let err = attribute_all(&cfg(0.3, 0.2), 0.0, &baseline, &inputs).unwrap_err();
        matches!(err, AttributionError::ClockAnomaly(_));
    }

    #[test]
    fn linear_attribution_when_exponents_are_one() {
        let baseline = Baseline { cpu: vec![0.0], dram: vec![0.0] };
        let threads = vec![thread(Some(0), 0.42)];
        let input = SocketInput {
            host_cpu_delta_j: 200.0,
            host_dram_delta_j: DomainDelta::unsupported(),
            host_cpu_time_delta_s: 1.0,
            host_numa_mem_mb: 1000.0,
            target_numa_mem_mb: 0.0,
            threads: &threads,
        };
        let row = attribute_socket(&cfg(1.0, 1.0), 0, 1.0, &baseline, &input);
        let f = 0.42;
        assert!((row.target_cpu_share - f).abs() < 1e-9);
        assert!((row.target_cpu_energy_j - f * 200.0).abs() < 1e-9);
    }

    #[test]
    fn clock_skew_clamps_fraction_to_one() {
        let baseline = Baseline::zero(1);
        let threads = vec![thread(Some(0), 5.0)];
        let input = SocketInput {
            host_cpu_delta_j: 10.0,
            host_dram_delta_j: DomainDelta::unsupported(),
            host_cpu_time_delta_s: 0.0, // impossible except via clock skew
            host_numa_mem_mb: 1000.0,
            target_numa_mem_mb: 0.0,
            threads: &threads,
        };
        let row = attribute_socket(&cfg(0.3, 0.2), 0, 1.0, &baseline, &input);
        assert_eq!(row.target_cpu_share, 1.0);
        assert!(row.share_overflow);
    }

    proptest::proptest! {
        #[test]
        fn shares_are_always_bounded(
            c_target in 0.0f64..1000.0,
            c_host in 0.0f64..1000.0,
            host_cpu_j in 0.0f64..10_000.0,
            gamma in 0.01f64..0.99,
        ) {
            let baseline = Baseline::zero(1);
            let threads = vec![thread(Some(0), c_target)];
            let input = SocketInput {
                host_cpu_delta_j: host_cpu_j,
                host_dram_delta_j: DomainDelta::unsupported(),
                host_cpu_time_delta_s: c_host,
                host_numa_mem_mb: 1000.0,
                target_numa_mem_mb: 0.0,
                threads: &threads,
            };
            let row = attribute_socket(&cfg(gamma, 0.2), 0, 1.0, &baseline, &input);
            prop_assert!(row.target_cpu_share >= 0.0 && row.target_cpu_share <= 1.0);
            prop_assert!(row.target_cpu_energy_j <= row.host_cpu_energy_j.max(0.0) + 1e-9);
            prop_assert!(row.target_cpu_energy_j >= 0.0);
        }
    }
}
