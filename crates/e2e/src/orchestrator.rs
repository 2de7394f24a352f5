//! One FOTA round-trip: launch emulators, publish the version through the
//! portal, poll for the result, record it, then tear everything down.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::device::Device;
use crate::emulator::{stage_client, EmulatorPair, EmulatorSpec, Readiness, Role, TeardownReport};
use crate::error::E2eResult;
use crate::poller::{PollOutcome, ResultFile, ResultPoller};
use crate::portal::{PortalDriver, VersionUpload};
use crate::recorder::{OutcomeLine, OutcomeRecorder};
use crate::status::{extract_status, RunStatus};

/// Where each device's emulators live on disk
#[derive(Debug, Clone)]
pub struct EmulatorLayout {
    pub devices_root: PathBuf,
    pub server_subdir: PathBuf,
    pub server_binary: String,
    pub client_subdir: PathBuf,
    pub client_binary: String,
    /// When set, the device's client folder is copied here before launch
    pub client_install_dir: Option<PathBuf>,
}

impl Default for EmulatorLayout {
    fn default() -> Self {
        Self {
            devices_root: PathBuf::from("D:/DeviceFolders"),
            server_subdir: PathBuf::from("Server/Debug_x64"),
            server_binary: "LumXServerHost.exe".to_string(),
            client_subdir: PathBuf::from("Client/Debug_x64"),
            client_binary: "ClientWPF_Tester.exe".to_string(),
            client_install_dir: None,
        }
    }
}

impl EmulatorLayout {
    pub fn server(&self, device: &Device) -> EmulatorSpec {
        EmulatorSpec::new(
            Role::Server,
            device.folder(&self.devices_root).join(&self.server_subdir),
            self.server_binary.clone(),
        )
    }

    pub fn client(&self, device: &Device) -> EmulatorSpec {
        EmulatorSpec::new(
            Role::Client,
            device.folder(&self.devices_root).join(&self.client_subdir),
            self.client_binary.clone(),
        )
    }
}

/// Runtime settings for rounds
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub layout: EmulatorLayout,
    pub readiness: Readiness,
    /// SIGTERM grace period before the hard kill (zero = kill at once)
    pub stop_grace: Duration,
    pub poller: ResultPoller,
    /// Pause after teardown so the OS can release the emulators' resources
    pub settle: Duration,
    pub results_dir: PathBuf,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            layout: EmulatorLayout::default(),
            readiness: Readiness::default(),
            stop_grace: Duration::ZERO,
            poller: ResultPoller::default(),
            settle: Duration::from_secs(5),
            results_dir: PathBuf::from("results"),
        }
    }
}

/// Inputs of a single round
#[derive(Debug, Clone)]
pub struct RoundParams {
    pub device: Device,
    pub group: String,
    pub upload: VersionUpload,
    /// Zero-based repetition index
    pub times: u32,
}

impl RoundParams {
    /// One-based iteration passed to the emulators and written to the log
    pub fn iteration(&self) -> u32 {
        self.times + 1
    }
}

/// Outcome of a single round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundReport {
    pub serial_number: String,
    pub group: String,
    pub iteration: u32,
    /// Ticks spent polling; absent when the round aborted before polling
    pub elapsed_ticks: Option<u32>,
    pub status: RunStatus,
    /// Outcome log the round was recorded to
    pub log_path: Option<PathBuf>,
    pub teardown: TeardownReport,
    pub duration_ms: u64,
}

impl RoundReport {
    pub fn passed(&self) -> bool {
        self.status.is_success()
    }
}

/// Runs rounds against one portal
pub struct Orchestrator {
    config: OrchestratorConfig,
    portal: Arc<dyn PortalDriver>,
    recorder: OutcomeRecorder,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, portal: Arc<dyn PortalDriver>) -> Self {
        let recorder = OutcomeRecorder::new(config.results_dir.clone());
        Self {
            config,
            portal,
            recorder,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run one round. Never fails: every error becomes `RunStatus::Error`,
    /// including an outcome line that could not be written, and the
    /// emulators are torn down on every path.
    pub async fn run_round(&self, params: &RoundParams) -> RoundReport {
        let start = Instant::now();
        let iteration = params.iteration();
        info!(
            "Round {} for {} (group {})",
            iteration, params.device.serial_number, params.group
        );

        let mut emulators = EmulatorPair::new();
        let outcome = self.drive(params, &mut emulators).await;

        // The outcome line is written while the emulators are still up
        let (elapsed_ticks, status, log_path) = match outcome {
            Ok((ticks, status)) => {
                let line = OutcomeLine::new(iteration, ticks, &status);
                match self.recorder.record(&params.group, &line) {
                    Ok(path) => (Some(ticks), status, Some(path)),
                    Err(e) => {
                        error!("Failed to record outcome for {}: {}", params.group, e);
                        let status = RunStatus::Error(format!(
                            "outcome {} not recorded: {}",
                            status.log_value(),
                            e
                        ));
                        (Some(ticks), status, None)
                    }
                }
            }
            Err(e) => {
                error!(
                    "Round {} for {} aborted: {}",
                    iteration, params.device.serial_number, e
                );
                (None, RunStatus::Error(e.to_string()), None)
            }
        };

        let teardown = emulators.teardown(self.config.settle).await;

        if status.is_success() {
            info!("Round {} for {} passed", iteration, params.device.serial_number);
        } else {
            warn!(
                "Round {} for {} failed: {}",
                iteration, params.device.serial_number, status
            );
        }

        RoundReport {
            serial_number: params.device.serial_number.clone(),
            group: params.group.clone(),
            iteration,
            elapsed_ticks,
            status,
            log_path,
            teardown,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn drive(&self, params: &RoundParams, emulators: &mut EmulatorPair) -> E2eResult<(u32, RunStatus)> {
        let layout = &self.config.layout;
        let server = layout.server(&params.device);
        let client = layout.client(&params.device);

        let result = ResultFile::in_folder(&server.folder);
        result.clear_stale()?;

        if let Some(install_dir) = &layout.client_install_dir {
            stage_client(&client.folder, install_dir)?;
        }

        emulators
            .launch(
                &server,
                &client,
                params.iteration(),
                &self.config.readiness,
                self.config.stop_grace,
            )
            .await?;

        self.publish_update(params).await?;

        let status = match self.config.poller.wait(&result).await? {
            PollOutcome::Found { ticks, contents } => {
                (ticks, RunStatus::from_status_text(&extract_status(&contents)))
            }
            PollOutcome::TimedOut { ticks } => (ticks, RunStatus::Timeout),
        };
        Ok(status)
    }

    /// Portal phase: make the version available and publish it to the group
    async fn publish_update(&self, params: &RoundParams) -> E2eResult<()> {
        let portal = &self.portal;
        let device = &params.device;
        let upload = &params.upload;

        portal.login().await?;
        portal.search_device(device).await?;

        if portal.version_exists(&upload.version, device).await? {
            info!("Version {} already uploaded for {}", upload.version, device.device_type);
        } else {
            portal.upload_version(upload, device).await?;
        }

        portal.assign_device_to_group(&params.group, device).await?;
        portal.publish_version(&params.group, &upload.version).await
    }
}
