//! Emulator management - spawning, readiness and teardown of the
//! server and client device emulators

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{E2eError, E2eResult};

/// Which side of the round-trip an emulator plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => write!(f, "server"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// Where an emulator lives and how it is started
#[derive(Debug, Clone)]
pub struct EmulatorSpec {
    pub role: Role,
    /// Folder containing the executable; also the working directory
    pub folder: PathBuf,
    /// Executable file name inside `folder`
    pub binary: String,
}

impl EmulatorSpec {
    pub fn new(role: Role, folder: impl Into<PathBuf>, binary: impl Into<String>) -> Self {
        Self {
            role,
            folder: folder.into(),
            binary: binary.into(),
        }
    }

    pub fn binary_path(&self) -> PathBuf {
        self.folder.join(&self.binary)
    }

    /// Command line for `iteration`: the binary, one positional argument,
    /// and the emulator folder as working directory
    pub fn command(&self, iteration: u32) -> Command {
        let mut cmd = Command::new(self.binary_path());
        cmd.arg(iteration.to_string())
            .current_dir(&self.folder)
            .stdin(Stdio::null());
        cmd
    }
}

/// How to decide that a freshly spawned emulator is ready
#[derive(Debug, Clone)]
pub enum Readiness {
    /// Sleep a fixed duration
    Delay(Duration),
    /// Wait for a marker file to appear in the emulator folder
    Marker {
        file_name: String,
        timeout: Duration,
        poll: Duration,
    },
}

impl Default for Readiness {
    fn default() -> Self {
        Readiness::Delay(Duration::from_secs(5))
    }
}

/// Handle to a running emulator process.
///
/// The process is stopped at most once; stopping an already stopped
/// handle is a no-op. Dropping the handle stops the process.
pub struct EmulatorHandle {
    role: Role,
    child: Option<Child>,
    pid: u32,
    grace: Duration,
}

impl EmulatorHandle {
    /// Spawn an emulator and wait until it is ready
    pub async fn spawn(
        spec: &EmulatorSpec,
        iteration: u32,
        readiness: &Readiness,
        grace: Duration,
    ) -> E2eResult<Self> {
        if let Readiness::Marker { file_name, .. } = readiness {
            let marker = spec.folder.join(file_name);
            if marker.exists() {
                std::fs::remove_file(&marker)?;
            }
        }

        info!(
            "Spawning {} emulator {} (iteration {})",
            spec.role,
            spec.binary_path().display(),
            iteration
        );

        let child = spec.command(iteration).spawn().map_err(|e| E2eError::Launch {
            role: spec.role.to_string(),
            path: spec.binary_path(),
            source: e,
        })?;

        let handle = EmulatorHandle {
            role: spec.role,
            pid: child.id(),
            child: Some(child),
            grace,
        };

        handle.wait_until_ready(spec, readiness).await?;
        Ok(handle)
    }

    async fn wait_until_ready(&self, spec: &EmulatorSpec, readiness: &Readiness) -> E2eResult<()> {
        match readiness {
            Readiness::Delay(delay) => {
                sleep(*delay).await;
                Ok(())
            }
            Readiness::Marker {
                file_name,
                timeout,
                poll,
            } => {
                let marker = spec.folder.join(file_name);
                let start = Instant::now();

                while start.elapsed() < *timeout {
                    if marker.exists() {
                        debug!("{} emulator ready after {:?}", self.role, start.elapsed());
                        return Ok(());
                    }
                    sleep(*poll).await;
                }

                Err(E2eError::EmulatorNotReady {
                    role: self.role.to_string(),
                    marker: marker.display().to_string(),
                    waited_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the process has not been stopped yet
    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Stop the process. Returns `true` if this call killed it.
    pub fn stop(&mut self) -> bool {
        let Some(mut child) = self.child.take() else {
            return false;
        };

        info!("Stopping {} emulator (pid: {})", self.role, self.pid);

        // Try graceful shutdown first
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(self.pid as i32);
            if !self.grace.is_zero() && kill(pid, Signal::SIGTERM).is_ok() {
                let deadline = Instant::now() + self.grace;
                while Instant::now() < deadline {
                    if let Ok(Some(_)) = child.try_wait() {
                        return true;
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }

        if let Err(e) = child.kill() {
            // Already exited on its own
            debug!("kill({}) for {} emulator: {}", self.pid, self.role, e);
        }
        if let Err(e) = child.wait() {
            warn!("Failed to reap {} emulator (pid: {}): {}", self.role, self.pid, e);
        }
        true
    }
}

impl Drop for EmulatorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// What teardown actually stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownReport {
    pub server_stopped: bool,
    pub client_stopped: bool,
}

/// The server/client pair owned by one round
#[derive(Default)]
pub struct EmulatorPair {
    server: Option<EmulatorHandle>,
    client: Option<EmulatorHandle>,
}

impl EmulatorPair {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the server, then the client, each followed by its readiness wait.
    /// A handle acquired before a failure stays in the pair for teardown.
    pub async fn launch(
        &mut self,
        server: &EmulatorSpec,
        client: &EmulatorSpec,
        iteration: u32,
        readiness: &Readiness,
        grace: Duration,
    ) -> E2eResult<()> {
        self.server = Some(EmulatorHandle::spawn(server, iteration, readiness, grace).await?);
        self.client = Some(EmulatorHandle::spawn(client, iteration, readiness, grace).await?);
        Ok(())
    }

    pub fn server(&self) -> Option<&EmulatorHandle> {
        self.server.as_ref()
    }

    pub fn client(&self) -> Option<&EmulatorHandle> {
        self.client.as_ref()
    }

    /// Stop the client then the server, skipping absent handles, then
    /// wait `settle` for the OS to release their resources
    pub async fn teardown(&mut self, settle: Duration) -> TeardownReport {
        let report = TeardownReport {
            client_stopped: self.client.as_mut().map(EmulatorHandle::stop).unwrap_or(false),
            server_stopped: self.server.as_mut().map(EmulatorHandle::stop).unwrap_or(false),
        };
        self.client = None;
        self.server = None;

        if report.client_stopped || report.server_stopped {
            sleep(settle).await;
        }
        report
    }
}

/// Replace `install_dir` with a fresh copy of `source`.
///
/// Read-only entries that block removal are made writable and the removal
/// is retried once.
pub fn stage_client(source: &Path, install_dir: &Path) -> E2eResult<()> {
    if !source.is_dir() {
        return Err(E2eError::Staging(format!(
            "client source folder {} does not exist",
            source.display()
        )));
    }

    if install_dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(install_dir) {
            debug!("Retrying removal of {} after clearing read-only bits: {}", install_dir.display(), e);
            make_writable(install_dir)?;
            std::fs::remove_dir_all(install_dir).map_err(|e| {
                E2eError::Staging(format!("cannot remove {}: {}", install_dir.display(), e))
            })?;
        }
    }

    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|e| E2eError::Staging(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| E2eError::Staging(e.to_string()))?;
        let target = install_dir.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }

    info!("Staged client {} -> {}", source.display(), install_dir.display());
    Ok(())
}

fn make_writable(root: &Path) -> E2eResult<()> {
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        let mut perms = entry.metadata().map_err(|e| E2eError::Staging(e.to_string()))?.permissions();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            perms.set_mode(perms.mode() | 0o700);
        }
        #[cfg(not(unix))]
        #[allow(clippy::permissions_set_readonly_false)]
        {
            perms.set_readonly(false);
        }

        std::fs::set_permissions(entry.path(), perms)?;
    }
    Ok(())
}
