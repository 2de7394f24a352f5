//! Round status and result-file decoding

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status text the server emulator writes on a successful install
pub const SUCCESS: &str = "Success";

/// Logged status of a round whose result file never appeared
pub const TIMEOUT: &str = "Timeout";

/// Final status of one update round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RunStatus {
    /// The result file reported exactly `Success`
    Success,
    /// The result file reported anything else
    Failed(String),
    /// The result file did not appear within the poll budget
    Timeout,
    /// The round aborted before polling (launch or portal failure)
    Error(String),
}

impl RunStatus {
    /// Classify a status string read from the result file.
    ///
    /// Comparison is exact: no trimming, no case folding.
    pub fn from_status_text(status: &str) -> Self {
        if status == SUCCESS {
            RunStatus::Success
        } else {
            RunStatus::Failed(status.to_string())
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Success)
    }

    /// Value written in the third column of the outcome log
    pub fn log_value(&self) -> String {
        match self {
            RunStatus::Success => SUCCESS.to_string(),
            RunStatus::Failed(text) => text.clone(),
            RunStatus::Timeout => TIMEOUT.to_string(),
            RunStatus::Error(cause) => format!("Error: {}", cause),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::Failed(text) => write!(f, "installation status is {:?}", text),
            RunStatus::Timeout => write!(f, "installation timed out"),
            RunStatus::Error(cause) => write!(f, "error: {}", cause),
        }
    }
}

/// Extract the status string from result-file contents.
///
/// Two layouts are accepted: a JSON document carrying
/// `metrics[0].commandStatus`, or free text taken verbatim.
pub fn extract_status(contents: &str) -> String {
    serde_json::from_str::<serde_json::Value>(contents)
        .ok()
        .and_then(|doc| {
            doc.get("metrics")?
                .get(0)?
                .get("commandStatus")?
                .as_str()
                .map(String::from)
        })
        .unwrap_or_else(|| contents.to_string())
}
