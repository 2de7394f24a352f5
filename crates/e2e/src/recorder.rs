//! Outcome logs - one line per round, one file per group

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{E2eError, E2eResult};
use crate::status::{RunStatus, SUCCESS, TIMEOUT};

/// A single line of a group's outcome log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeLine {
    /// One-based iteration number
    pub iteration: u32,
    /// Ticks spent polling for the result
    pub elapsed: u32,
    /// Status column as written
    pub status: String,
}

impl OutcomeLine {
    pub fn new(iteration: u32, elapsed: u32, status: &RunStatus) -> Self {
        Self {
            iteration,
            elapsed,
            status: status.log_value(),
        }
    }

    /// Render as `"{iteration}, {elapsed}, {status}\n"`
    pub fn render(&self) -> String {
        format!("{}, {}, {}\n", self.iteration, self.elapsed, self.status)
    }

    /// Parse a rendered line (with or without its trailing newline).
    ///
    /// The status column is everything after the second separator, so free
    /// text containing `", "` survives.
    pub fn parse(line: &str) -> E2eResult<Self> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let mut parts = line.splitn(3, ", ");
        let (Some(iteration), Some(elapsed), Some(status)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(E2eError::OutcomeLine(line.to_string()));
        };

        let iteration = iteration
            .trim()
            .parse()
            .map_err(|_| E2eError::OutcomeLine(line.to_string()))?;
        let elapsed = elapsed
            .trim()
            .parse()
            .map_err(|_| E2eError::OutcomeLine(line.to_string()))?;

        Ok(Self {
            iteration,
            elapsed,
            status: status.to_string(),
        })
    }

    pub fn is_success(&self) -> bool {
        self.status == SUCCESS
    }

    pub fn is_timeout(&self) -> bool {
        self.status == TIMEOUT
    }
}

/// Appends outcome lines to `{dir}/{group}.log`
#[derive(Debug, Clone)]
pub struct OutcomeRecorder {
    dir: PathBuf,
}

impl OutcomeRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn log_path(&self, group: &str) -> PathBuf {
        self.dir.join(format!("{}.log", group))
    }

    /// Append one line. The line goes out in a single write so that
    /// concurrent writers can interleave lines but never split one.
    pub fn record(&self, group: &str, line: &OutcomeLine) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;

        let path = self.log_path(group);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(line.render().as_bytes())?;

        debug!("Recorded {:?} to {}", line, path.display());
        Ok(path)
    }

    /// Read back every line of a group's log
    pub fn read(&self, group: &str) -> E2eResult<Vec<OutcomeLine>> {
        read_log(&self.log_path(group))
    }
}

/// Parse an outcome log file, skipping blank lines
pub fn read_log(path: &Path) -> E2eResult<Vec<OutcomeLine>> {
    std::fs::read_to_string(path)?
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(OutcomeLine::parse)
        .collect()
}

/// Aggregate view of a group's outcome log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Mean elapsed ticks over rounds that produced a result
    pub mean_elapsed: Option<f64>,
}

impl OutcomeSummary {
    pub fn from_lines(lines: &[OutcomeLine]) -> Self {
        let timed_out = lines.iter().filter(|l| l.is_timeout()).count();
        let succeeded = lines.iter().filter(|l| l.is_success()).count();
        let finished: Vec<u32> = lines
            .iter()
            .filter(|l| !l.is_timeout())
            .map(|l| l.elapsed)
            .collect();

        let mean_elapsed = if finished.is_empty() {
            None
        } else {
            Some(finished.iter().map(|&t| t as f64).sum::<f64>() / finished.len() as f64)
        };

        Self {
            total: lines.len(),
            succeeded,
            failed: lines.len() - succeeded - timed_out,
            timed_out,
            mean_elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_success_line() {
        let line = OutcomeLine::new(1, 12, &RunStatus::Success);
        assert_eq!(line.render(), "1, 12, Success\n");
    }

    #[test]
    fn test_render_timeout_line() {
        let line = OutcomeLine::new(3, 601, &RunStatus::Timeout);
        assert_eq!(line.render(), "3, 601, Timeout\n");
    }

    #[test]
    fn test_parse_keeps_commas_in_status() {
        let line = OutcomeLine::parse("2, 45, Failed, rollback requested\n").unwrap();
        assert_eq!(line.iteration, 2);
        assert_eq!(line.elapsed, 45);
        assert_eq!(line.status, "Failed, rollback requested");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(OutcomeLine::parse("not a line").is_err());
        assert!(OutcomeLine::parse("x, 1, Success").is_err());
    }

    #[test]
    fn test_record_appends() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = OutcomeRecorder::new(dir.path().join("results"));

        recorder
            .record("autotests_FAM", &OutcomeLine::new(1, 12, &RunStatus::Success))
            .unwrap();
        let path = recorder
            .record("autotests_FAM", &OutcomeLine::new(2, 601, &RunStatus::Timeout))
            .unwrap();

        assert_eq!(path, dir.path().join("results").join("autotests_FAM.log"));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "1, 12, Success\n2, 601, Timeout\n"
        );
        assert_eq!(recorder.read("autotests_FAM").unwrap().len(), 2);
    }

    #[test]
    fn test_summary() {
        let lines = vec![
            OutcomeLine::new(1, 10, &RunStatus::Success),
            OutcomeLine::new(2, 20, &RunStatus::Failed("Failed".into())),
            OutcomeLine::new(3, 601, &RunStatus::Timeout),
        ];
        let summary = OutcomeSummary::from_lines(&lines);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.mean_elapsed, Some(15.0));
    }
}
