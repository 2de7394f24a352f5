//! Web portal driver
//!
//! The orchestrator talks to the portal only through [`PortalDriver`].
//! [`PlaywrightPortal`] implements it with browser flows. `login` saves the
//! browser session and later operations start from it; an operation run
//! before any login signs in itself first.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{E2eError, E2eResult};
use crate::flow::{FlowKind, FlowLibrary, FlowSpec, FlowVars};
use crate::playwright::{FlowRun, PlaywrightHandle, SessionFiles};

/// Portal login credentials
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A software package to register in the portal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionUpload {
    /// Local path of the package file
    pub path: String,
    pub version: String,
    pub file_type: String,
    /// Pattern of versions this package may upgrade from
    pub supported_version: String,
    pub install_type: String,
}

/// Operations the orchestrator needs from the portal.
///
/// Any expectation that does not hold (missing device, wrong notification,
/// dialog that never closes) is an `Err`.
#[async_trait]
pub trait PortalDriver: Send + Sync {
    async fn login(&self) -> E2eResult<()>;

    /// Find the device and check it is listed as active with its type
    async fn search_device(&self, device: &Device) -> E2eResult<()>;

    /// Whether a valid package with this version exists for the device type
    async fn version_exists(&self, version: &str, device: &Device) -> E2eResult<bool>;

    async fn upload_version(&self, upload: &VersionUpload, device: &Device) -> E2eResult<()>;

    async fn assign_device_to_group(&self, group: &str, device: &Device) -> E2eResult<()>;

    async fn publish_version(&self, group: &str, version: &str) -> E2eResult<()>;
}

/// Portal driver backed by Playwright flows
pub struct PlaywrightPortal {
    browser: PlaywrightHandle,
    flows: FlowLibrary,
    credentials: Credentials,
    sessions: TempDir,
    /// Storage state saved by the last successful login
    session: Mutex<Option<PathBuf>>,
}

/// A flow ready to run, with how many of its leading steps sign in
struct Plan {
    flow: FlowSpec,
    login_steps: usize,
    files: SessionFiles,
}

impl PlaywrightPortal {
    pub fn new(browser: PlaywrightHandle, flows: FlowLibrary, credentials: Credentials) -> E2eResult<Self> {
        Ok(Self {
            browser,
            flows,
            credentials,
            sessions: tempfile::tempdir()?,
            session: Mutex::new(None),
        })
    }

    fn current_session(&self) -> Option<PathBuf> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_session(&self, state: Option<PathBuf>) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn vars(&self) -> FlowVars {
        let mut vars = FlowVars::new();
        vars.insert("username".into(), self.credentials.username.clone());
        vars.insert("password".into(), self.credentials.password.clone());
        vars
    }

    fn device_vars(&self, device: &Device) -> FlowVars {
        let mut vars = self.vars();
        vars.insert("serial_number".into(), device.serial_number.clone());
        vars.insert("device_type".into(), device.device_type.clone());
        vars.insert("device_model".into(), device.model.clone());
        vars.insert("device_group".into(), device.group.clone().unwrap_or_default());
        vars
    }

    /// The operation's flow, starting from the saved session when there is
    /// one and from the login steps otherwise
    fn plan(&self, kind: FlowKind, vars: &FlowVars) -> E2eResult<Plan> {
        if kind == FlowKind::Login {
            let flow = self.flows.load(FlowKind::Login, vars)?;
            return Ok(Plan {
                login_steps: flow.steps.len(),
                flow,
                files: SessionFiles {
                    load: None,
                    save: Some(self.sessions.path().join(format!("{}.json", uuid::Uuid::new_v4()))),
                },
            });
        }

        let op = self.flows.load(kind, vars)?;
        if let Some(state) = self.current_session() {
            return Ok(Plan {
                flow: op,
                login_steps: 0,
                files: SessionFiles {
                    load: Some(state),
                    save: None,
                },
            });
        }

        let login = self.flows.load(FlowKind::Login, vars)?;
        let login_steps = login.steps.len();
        let mut steps = login.steps;
        steps.extend(op.steps);

        Ok(Plan {
            flow: FlowSpec {
                name: op.name,
                description: op.description,
                viewport: op.viewport,
                steps,
            },
            login_steps,
            files: SessionFiles::default(),
        })
    }

    async fn run(&self, kind: FlowKind, vars: &FlowVars) -> E2eResult<(FlowRun, bool)> {
        let plan = self.plan(kind, vars)?;
        let run = self.browser.run_flow_with(&plan.flow, &plan.files).await?;
        let in_login = failed_in_login(&run, plan.login_steps);

        if kind == FlowKind::Login {
            self.set_session(if run.success { plan.files.save } else { None });
        } else if in_login {
            self.set_session(None);
        }
        Ok((run, in_login))
    }

    async fn expect_success(&self, kind: FlowKind, vars: &FlowVars) -> E2eResult<()> {
        let (run, _) = self.run(kind, vars).await?;
        if run.success {
            info!("Portal flow {} passed ({} ms)", run.name, run.duration_ms);
            return Ok(());
        }
        Err(failure(&run))
    }
}

/// Whether the run stopped inside its leading login steps
fn failed_in_login(run: &FlowRun, login_steps: usize) -> bool {
    run.failed_index.map_or(false, |i| i < login_steps)
}

fn failure(run: &FlowRun) -> E2eError {
    if let Some(shot) = &run.screenshot_path {
        warn!("Portal flow {} failed, screenshot at {}", run.name, shot.display());
    }
    E2eError::PortalStep {
        step: format!("{}/{}", run.name, run.failed_step.as_deref().unwrap_or("?")),
        reason: run.error.clone().unwrap_or_else(|| "unknown error".to_string()),
    }
}

#[async_trait]
impl PortalDriver for PlaywrightPortal {
    async fn login(&self) -> E2eResult<()> {
        self.expect_success(FlowKind::Login, &self.vars()).await?;
        debug!("Portal session saved");
        Ok(())
    }

    async fn search_device(&self, device: &Device) -> E2eResult<()> {
        self.expect_success(FlowKind::SearchDevice, &self.device_vars(device)).await
    }

    async fn version_exists(&self, version: &str, device: &Device) -> E2eResult<bool> {
        let mut vars = self.device_vars(device);
        vars.insert("sw_version".into(), version.to_string());

        let (run, failed_in_login) = self.run(FlowKind::VersionExists, &vars).await?;
        if failed_in_login {
            return Err(failure(&run));
        }
        Ok(run.success)
    }

    async fn upload_version(&self, upload: &VersionUpload, device: &Device) -> E2eResult<()> {
        let mut vars = self.device_vars(device);
        vars.insert("sw_path".into(), upload.path.clone());
        vars.insert("sw_version".into(), upload.version.clone());
        vars.insert("sw_file_type".into(), upload.file_type.clone());
        vars.insert("sw_supported_version".into(), upload.supported_version.clone());
        vars.insert("sw_install_type".into(), upload.install_type.clone());
        self.expect_success(FlowKind::UploadVersion, &vars).await
    }

    async fn assign_device_to_group(&self, group: &str, device: &Device) -> E2eResult<()> {
        let mut vars = self.device_vars(device);
        vars.insert("group_name".into(), group.to_string());
        self.expect_success(FlowKind::AssignDevice, &vars).await
    }

    async fn publish_version(&self, group: &str, version: &str) -> E2eResult<()> {
        let mut vars = self.vars();
        vars.insert("group_name".into(), group.to_string());
        vars.insert("sw_version".into(), version.to_string());
        self.expect_success(FlowKind::PublishVersion, &vars).await
    }
}
