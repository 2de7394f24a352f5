//! Result polling - waiting for the server emulator's result file

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::E2eResult;

/// Name of the file the server emulator writes when an install finishes
pub const RESULT_FILE_NAME: &str = "result";

/// Something that eventually yields the round's result text
pub trait ResultSource {
    /// Whether the result is available yet
    fn is_present(&self) -> bool;

    /// Read the full result text
    fn read(&self) -> E2eResult<String>;
}

/// Result file on disk
#[derive(Debug, Clone)]
pub struct ResultFile {
    path: PathBuf,
}

impl ResultFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Result file inside a server emulator folder
    pub fn in_folder(folder: &Path) -> Self {
        Self::new(folder.join(RESULT_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove a stale result left by a previous round
    pub fn clear_stale(&self) -> E2eResult<bool> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
            info!("Removed stale result file {}", self.path.display());
            return Ok(true);
        }
        Ok(false)
    }
}

impl ResultSource for ResultFile {
    fn is_present(&self) -> bool {
        self.path.exists()
    }

    /// Contents as written; invalid UTF-8 is replaced, never an error
    fn read(&self) -> E2eResult<String> {
        let bytes = std::fs::read(&self.path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Outcome of a polling run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The result appeared after `ticks` intervals
    Found { ticks: u32, contents: String },
    /// The budget was exhausted; `ticks` is `budget + 1`
    TimedOut { ticks: u32 },
}

impl PollOutcome {
    pub fn ticks(&self) -> u32 {
        match self {
            PollOutcome::Found { ticks, .. } | PollOutcome::TimedOut { ticks } => *ticks,
        }
    }
}

/// Bounded tick-based poller
#[derive(Debug, Clone, Copy)]
pub struct ResultPoller {
    /// Ticks to wait before giving up
    pub budget: u32,
    /// Length of one tick
    pub interval: Duration,
}

impl Default for ResultPoller {
    fn default() -> Self {
        Self {
            budget: 600,
            interval: Duration::from_secs(1),
        }
    }
}

impl ResultPoller {
    pub fn new(budget: u32, interval: Duration) -> Self {
        Self { budget, interval }
    }

    /// Wait for `source` to become present.
    ///
    /// The source is checked before every tick, so a result that is present
    /// after `k` ticks yields `ticks == k`. The loop stops once the counter
    /// exceeds the budget without checking again.
    pub async fn wait<S: ResultSource + ?Sized>(&self, source: &S) -> E2eResult<PollOutcome> {
        let mut ticks: u32 = 0;

        while !source.is_present() {
            sleep(self.interval).await;
            ticks += 1;
            if ticks > self.budget {
                warn!("Installation takes too long - something went wrong...");
                return Ok(PollOutcome::TimedOut { ticks });
            }
            if ticks % 60 == 0 {
                debug!("Still waiting for result after {} ticks", ticks);
            }
        }

        info!("Installation took {} seconds", ticks);
        let contents = source.read()?;
        Ok(PollOutcome::Found { ticks, contents })
    }
}
