//! FOTA automation configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::emulator::Readiness;
use crate::error::{E2eError, E2eResult};
use crate::flow::FlowLibrary;
use crate::orchestrator::{EmulatorLayout, OrchestratorConfig};
use crate::playwright::{Browser, PlaywrightConfig};
use crate::poller::ResultPoller;
use crate::portal::Credentials;
use crate::provision::ApiConfig;

/// Top-level configuration, usually read from `fota.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FotaConfig {
    pub paths: PathsConfig,
    pub timing: TimingConfig,
    pub portal: PortalConfig,
    pub api: ApiConfig,
    pub results: ResultsConfig,
}

/// Emulator locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root holding one `{serial}_{type}` folder per device
    pub devices_root: PathBuf,
    pub server_subdir: PathBuf,
    pub server_binary: String,
    pub client_subdir: PathBuf,
    pub client_binary: String,
    /// Copy the client here before each round
    pub client_install_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let layout = EmulatorLayout::default();
        Self {
            devices_root: layout.devices_root,
            server_subdir: layout.server_subdir,
            server_binary: layout.server_binary,
            client_subdir: layout.client_subdir,
            client_binary: layout.client_binary,
            client_install_dir: layout.client_install_dir,
        }
    }
}

/// Waits and budgets of a round
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Delay after each emulator launch; with `ready_marker`, the maximum wait
    pub warmup_secs: u64,
    /// File an emulator creates in its folder once it is ready
    pub ready_marker: Option<String>,
    /// SIGTERM grace period before killing an emulator
    pub stop_grace_ms: u64,
    pub poll_budget_ticks: u32,
    pub poll_interval_ms: u64,
    /// Pause after teardown
    pub settle_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            warmup_secs: 5,
            ready_marker: None,
            stop_grace_ms: 0,
            poll_budget_ticks: 600,
            poll_interval_ms: 1000,
            settle_secs: 5,
        }
    }
}

/// Web portal and browser settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub browser: Browser,
    pub headless: bool,
    pub timeout_ms: u64,
    /// Directory whose flow files replace the built-in ones
    pub flows_dir: Option<PathBuf>,
    /// `node_modules` providing Playwright
    pub node_modules: Option<PathBuf>,
    pub screenshot_dir: PathBuf,
}

impl Default for PortalConfig {
    fn default() -> Self {
        let pw = PlaywrightConfig::default();
        Self {
            base_url: pw.base_url,
            username: String::new(),
            password: String::new(),
            browser: pw.browser,
            headless: pw.headless,
            timeout_ms: pw.default_timeout_ms,
            flows_dir: None,
            node_modules: None,
            screenshot_dir: pw.screenshot_dir,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsConfig {
    /// Outcome logs and suite results go here
    pub dir: PathBuf,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("results"),
        }
    }
}

impl FotaConfig {
    /// Load configuration from file; a missing file yields defaults
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> E2eResult<()> {
        if self.timing.poll_interval_ms == 0 {
            return Err(E2eError::InvalidConfig(
                "timing.poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.portal.base_url.is_empty() {
            return Err(E2eError::InvalidConfig("portal.base_url is empty".into()));
        }
        Ok(())
    }

    pub fn readiness(&self) -> Readiness {
        let warmup = Duration::from_secs(self.timing.warmup_secs);
        match &self.timing.ready_marker {
            Some(file_name) => Readiness::Marker {
                file_name: file_name.clone(),
                timeout: warmup,
                poll: Duration::from_millis(100),
            },
            None => Readiness::Delay(warmup),
        }
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        let paths = &self.paths;
        OrchestratorConfig {
            layout: EmulatorLayout {
                devices_root: paths.devices_root.clone(),
                server_subdir: paths.server_subdir.clone(),
                server_binary: paths.server_binary.clone(),
                client_subdir: paths.client_subdir.clone(),
                client_binary: paths.client_binary.clone(),
                client_install_dir: paths.client_install_dir.clone(),
            },
            readiness: self.readiness(),
            stop_grace: Duration::from_millis(self.timing.stop_grace_ms),
            poller: ResultPoller::new(
                self.timing.poll_budget_ticks,
                Duration::from_millis(self.timing.poll_interval_ms),
            ),
            settle: Duration::from_secs(self.timing.settle_secs),
            results_dir: self.results.dir.clone(),
        }
    }

    pub fn playwright(&self) -> PlaywrightConfig {
        PlaywrightConfig {
            base_url: self.portal.base_url.clone(),
            screenshot_dir: self.portal.screenshot_dir.clone(),
            browser: self.portal.browser,
            headless: self.portal.headless,
            default_timeout_ms: self.portal.timeout_ms,
            node_modules: self.portal.node_modules.clone(),
        }
    }

    pub fn flows(&self) -> FlowLibrary {
        match &self.portal.flows_dir {
            Some(dir) => FlowLibrary::with_dir(dir),
            None => FlowLibrary::builtin(),
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.portal.username.clone(),
            password: self.portal.password.clone(),
        }
    }
}
