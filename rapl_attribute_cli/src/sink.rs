use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use anyhow::Context;
use attribution::SocketSample;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Appends rows to a CSV trace file.
///
/// Buffers at most one row: every [`TraceSink::write_row`] call formats,
/// writes, and flushes before returning, so a partial run still leaves a
/// usable file on disk.
pub struct TraceSink {
    writer: BufWriter<File>,
    n_sockets: usize,
}

impl TraceSink {
    pub fn create(path: &Path, n_sockets: usize) -> anyhow::Result<TraceSink> {
        let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        write_header(&mut writer, n_sockets)?;
        writer.flush()?;
        Ok(TraceSink { writer, n_sockets })
    }

    /// Appends one sample row, one line per socket's worth of columns.
    ///
    /// `overflow` flags which sockets hit [`SocketSample::share_overflow`]
    /// so the run is auditable without re-deriving it from the raw shares.
    pub fn write_row(&mut self, timestamp: OffsetDateTime, interval_s: f64, sockets: &[SocketSample]) -> anyhow::Result<()> {
        debug_assert_eq!(sockets.len(), self.n_sockets);

        let ts = timestamp.format(&Rfc3339).context("formatting timestamp")?;
        write!(self.writer, "{ts},{interval_s:.6}")?;
        for s in sockets {
            write!(
                self.writer,
                ",{},{},{},{},{},{},{},{}",
                fmt(s.host_cpu_energy_j),
                fmt(s.host_dram_energy_j),
                fmt(s.target_cpu_energy_j),
                fmt(s.target_dram_energy_j),
                fmt(s.target_cpu_share),
                fmt(s.target_dram_share),
                s.n_threads_on_socket,
                s.share_overflow as u8,
            )?;
        }
        writeln!(self.writer)?;
        self.writer.flush().context("flushing trace row")?;
        Ok(())
    }
}

fn write_header(writer: &mut impl Write, n_sockets: usize) -> anyhow::Result<()> {
    write!(writer, "timestamp_iso8601,interval_s")?;
    for s in 0..n_sockets {
        write!(
            writer,
            ",host_cpu_j_s{s},host_dram_j_s{s},target_cpu_j_s{s},target_dram_j_s{s},cpu_share_s{s},dram_share_s{s},n_threads_s{s},overflow_s{s}"
        )?;
    }
    writeln!(writer)?;
    Ok(())
}

/// Formats a decimal value with at least 6 significant digits, or the
/// literal `NaN` for unsupported domains.
fn fmt(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_owned()
    } else {
        format!("{v:.6}")
    }
}
