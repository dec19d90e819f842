//! Diagnostic artifacts: output dumps and execution timing log

use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Output words in lowercase hex, one per line.
pub const HEX_FILE: &str = "CNN_output_hex.txt";

/// Output words as 32-digit binary, one per line.
pub const BIN_FILE: &str = "CNN_output_bin.txt";

/// Write `words` to `dir/CNN_output_hex.txt` and `dir/CNN_output_bin.txt`.
///
/// Returns the two paths written.
///
/// # Errors
///
/// Returns error if either file cannot be created or written.
pub fn write_output_artifacts(dir: &Path, words: &[u32]) -> Result<(PathBuf, PathBuf)> {
    let hex_path = dir.join(HEX_FILE);
    let bin_path = dir.join(BIN_FILE);

    let mut hex = BufWriter::new(File::create(&hex_path)?);
    for w in words {
        writeln!(hex, "{w:x}")?;
    }
    hex.flush()?;

    let mut bin = BufWriter::new(File::create(&bin_path)?);
    for w in words {
        writeln!(bin, "{w:032b}")?;
    }
    bin.flush()?;

    tracing::debug!("Wrote {} output words to {}", words.len(), dir.display());
    Ok((hex_path, bin_path))
}

/// Append one duration, in seconds, to the timing log.
///
/// # Errors
///
/// Returns error if the log cannot be opened or written.
pub fn append_timing(log: &Path, elapsed: Duration) -> Result<()> {
    let mut f = OpenOptions::new().create(true).append(true).open(log)?;
    writeln!(f, "{}", elapsed.as_secs_f64())?;
    Ok(())
}

/// Monotonic stopwatch for the execute-to-drain window.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionTimer {
    start: Instant,
}

impl ExecutionTimer {
    /// Start timing now.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Time since [`ExecutionTimer::start`].
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_formats() {
        let dir = tempfile::tempdir().unwrap();
        let (hex, bin) = write_output_artifacts(dir.path(), &[0, 255, 0xDEAD_BEEF]).unwrap();

        let hex = std::fs::read_to_string(hex).unwrap();
        assert_eq!(hex, "0\nff\ndeadbeef\n");

        let bin = std::fs::read_to_string(bin).unwrap();
        let lines: Vec<_> = bin.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "0".repeat(32));
        assert_eq!(lines[1], format!("{}{}", "0".repeat(24), "1".repeat(8)));
        assert!(lines.iter().all(|l| l.len() == 32));
    }

    #[test]
    fn timing_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("execution_time.txt");
        append_timing(&log, Duration::from_millis(1500)).unwrap();
        let t = ExecutionTimer::start().elapsed();
        append_timing(&log, t).unwrap();

        let text = std::fs::read_to_string(&log).unwrap();
        let values: Vec<f64> = text.lines().map(|l| l.parse().unwrap()).collect();
        assert_eq!(values.len(), 2);
        assert!((values[0] - 1.5).abs() < f64::EPSILON);
        assert!((values[1] - t.as_secs_f64()).abs() < 1e-9);
    }
}
