use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::change::ChangeReceipt;
use crate::convergence::ConvergenceResult;
use crate::errors::ProbeError;

/// One completed probe cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeLogEntry {
    pub elapsed: Duration,
    pub change_id: String,
    pub submitted_at: DateTime<Utc>,
}

impl ProbeLogEntry {
    pub fn new(result: &ConvergenceResult, receipt: &ChangeReceipt) -> Self {
        Self {
            elapsed: result.elapsed,
            change_id: receipt.change_id.clone(),
            submitted_at: receipt.submitted_at,
        }
    }
}

impl fmt::Display for ProbeLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Elapsed: {} - RequestId: {} - Submitted: {}",
            format_elapsed(self.elapsed),
            self.change_id,
            format_timestamp(&self.submitted_at)
        )
    }
}

/// Append-only audit trail; every line is flushed before returning.
pub struct ProbeLog {
    path: PathBuf,
    file: File,
}

impl ProbeLog {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, entry: &ProbeLogEntry) -> io::Result<()> {
        self.write_line(&entry.to_string())
    }

    pub fn append_failure(&mut self, error: &ProbeError) -> io::Result<()> {
        let level = match error {
            ProbeError::NonConvergence { .. } => "TIMEOUT",
            _ => "ERROR",
        };
        self.write_line(&format!("{} {}", level, error))
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        self.file.sync_data()
    }
}

/// `H:MM:SS.ffffff`
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!(
        "{}:{:02}:{:02}.{:06}",
        total / 3600,
        (total % 3600) / 60,
        total % 60,
        elapsed.subsec_micros()
    )
}

pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S%.6f%:z").to_string()
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    use super::{format_elapsed, ProbeLog, ProbeLogEntry};
    use crate::errors::{ApiError, ProbeError};

    fn entry(change_id: &str) -> ProbeLogEntry {
        ProbeLogEntry {
            elapsed: Duration::from_millis(41_500),
            change_id: String::from(change_id),
            submitted_at: Utc.with_ymd_and_hms(2016, 3, 1, 10, 0, 0).unwrap(),
        }
    }

    #[test]
    fn formats_elapsed() {
        assert_eq!("0:00:00.000000", format_elapsed(Duration::ZERO));
        assert_eq!("0:00:41.500000", format_elapsed(Duration::from_millis(41_500)));
        assert_eq!("1:01:01.000250", format_elapsed(Duration::from_micros(3_661_000_250)));
    }

    #[test]
    fn formats_entry() {
        assert_eq!(
            "Elapsed: 0:00:41.500000 - RequestId: /change/C1 - Submitted: 2016-03-01 10:00:00.000000+00:00",
            entry("/change/C1").to_string()
        );
    }

    #[test]
    fn appends_to_existing_file() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("proptime.log");
        fs::write(&file_path, "earlier line\n").unwrap();

        let mut log = ProbeLog::open(&file_path).unwrap();
        log.append(&entry("/change/C1")).unwrap();
        log.append_failure(&ProbeError::Submission(ApiError::fatal("already exists")))
            .unwrap();

        let contents = fs::read_to_string(&file_path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(3, lines.len());
        assert_eq!("earlier line", lines[0]);
        assert_eq!(true, lines[1].contains("RequestId: /change/C1"));
        assert_eq!(true, lines[2].starts_with("ERROR "));
        assert_eq!(true, lines[2].contains("already exists"));
    }

    #[test]
    fn timeouts_are_marked_separately() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("proptime.log");
        let mut log = ProbeLog::open(&file_path).unwrap();

        log.append_failure(&ProbeError::NonConvergence {
            change_id: String::from("/change/C9"),
            submitted_at: Utc.with_ymd_and_hms(2016, 3, 1, 10, 0, 0).unwrap(),
            elapsed: Duration::from_secs(60),
            timeout: Duration::from_secs(60),
            attempts: 120,
        })
        .unwrap();

        let contents = fs::read_to_string(&file_path).unwrap();
        assert_eq!(true, contents.starts_with("TIMEOUT "));
        assert_eq!(true, contents.contains("/change/C9"));
    }
}
