use std::fmt;

pub mod powercap;

/// A RAPL domain this crate knows how to read.
///
/// Only the two domains used for per-process energy attribution are
/// modeled: `PACKAGE` (the whole socket) and `DRAM`. The powercap sysfs
/// tree also exposes `core`/`uncore`/`psys` subzones on some platforms,
/// but those belong to the MSR/perf-event access paths this crate does
/// not implement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RaplDomainType {
    Package,
    Dram,
}

impl fmt::Display for RaplDomainType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl RaplDomainType {
    pub const ALL: [RaplDomainType; 2] = [RaplDomainType::Package, RaplDomainType::Dram];
}

/// The outcome of reading one domain on one socket.
///
/// A domain whose sysfs files don't exist is `Unsupported` rather than an
/// error: DRAM is optional on many platforms, and the engine consuming
/// this reading must treat it as zero/NaN rather than aborting the whole
/// pipeline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RaplReading {
    Value(f64),
    Unsupported,
}

impl RaplReading {
    pub fn joules_or_zero(self) -> f64 {
        match self {
            RaplReading::Value(j) => j,
            RaplReading::Unsupported => 0.0,
        }
    }

    pub fn is_supported(self) -> bool {
        matches!(self, RaplReading::Value(_))
    }
}

/// Wrap-corrected cumulative energy counter for one socket/domain pair.
///
/// `accumulated_j` only ever grows: every call to [`RaplCounter::update`]
/// adds the (possibly wraparound-corrected) delta since the previous raw
/// reading, mirroring how `EnergyCounter` in the teacher's probe works,
/// but keyed on the domain's own `max_range_j` instead of a fixed MSR
/// mask, since powercap zones report their own `max_energy_range_uj`.
#[derive(Debug, Clone)]
pub struct RaplCounter {
    max_range_j: f64,
    last_reading_j: Option<f64>,
    accumulated_j: f64,
}

impl RaplCounter {
    pub fn new(max_range_j: f64) -> Self {
        RaplCounter {
            max_range_j,
            last_reading_j: None,
            accumulated_j: 0.0,
        }
    }

    /// Feed a new raw (non-wrapped) cumulative reading, in joules.
    ///
    /// Returns the corrected delta applied, or `0.0` on the first call
    /// (there is no previous reading to diff against).
    pub fn update(&mut self, raw_j: f64) -> f64 {
        let delta = match self.last_reading_j {
            None => 0.0,
            Some(last) if raw_j >= last => raw_j - last,
            Some(last) => (self.max_range_j - last) + raw_j,
        };
        self.accumulated_j += delta;
        self.last_reading_j = Some(raw_j);
        delta
    }

    pub fn accumulated_j(&self) -> f64 {
        self.accumulated_j
    }
}
