use time::OffsetDateTime;

/// Non-linear scaling + clamping configuration, passed by reference into
/// the engine and the sampling loop rather than held in a global.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// CPU domain scaling exponent `γ`, default 0.3.
    pub gamma: f64,
    /// DRAM domain scaling exponent `δ`, default 0.2.
    pub delta: f64,
}

impl Default for Config {
    fn default() -> Config {
        Config { gamma: 0.3, delta: 0.2 }
    }
}

/// A single thread's contribution to this sample's attribution, as
/// computed by `proc_probes::ThreadInventory`.
#[derive(Debug, Clone, Copy)]
pub struct ThreadContribution {
    pub socket: Option<u32>,
    pub cpu_time_delta_s: f64,
}

/// Per-socket fields of one output trace row.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketSample {
    /// Raw host package energy for the interval, joules (Open Question
    /// (a): exposed alongside the baseline-subtracted figure so that
    /// consumers can compare "measured" against "raw").
    pub host_cpu_energy_j: f64,
    /// Raw host DRAM energy for the interval, joules. `NaN` if the DRAM
    /// domain is unsupported on this host.
    pub host_dram_energy_j: f64,
    pub target_cpu_energy_j: f64,
    /// `NaN` if the DRAM domain is unsupported.
    pub target_dram_energy_j: f64,
    pub target_cpu_share: f64,
    /// `NaN` if the DRAM domain is unsupported.
    pub target_dram_share: f64,
    pub n_threads_on_socket: usize,
    /// Set when a raw fraction exceeded 1.0 before clamping: this can
    /// only happen through a race between the host and target snapshots,
    /// never in steady state.
    pub share_overflow: bool,
}

/// One emitted trace row.
#[derive(Debug, Clone)]
pub struct SampleRow {
    pub timestamp: OffsetDateTime,
    pub interval_s: f64,
    pub sockets: Vec<SocketSample>,
}
