//! Error types for FOTA automation

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Failed to launch {role} emulator {}: {source}", path.display())]
    Launch {
        role: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{role} emulator not ready: {marker} did not appear within {waited_ms} ms")]
    EmulatorNotReady {
        role: String,
        marker: String,
        waited_ms: u64,
    },

    #[error("Client staging failed: {0}")]
    Staging(String),

    #[error("Playwright not found. Install with: npx playwright install")]
    PlaywrightNotFound,

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Flow parse error: {0}")]
    FlowParse(String),

    #[error("Portal step failed: {step} - {reason}")]
    PortalStep { step: String, reason: String },

    #[error("API request to {url} failed with status {status}: {body}")]
    Api {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Malformed outcome line: {0}")]
    OutcomeLine(String),

    #[error("Worker task failed: {0}")]
    Task(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;
