//! Round-trip tests against shell-script emulators
//!
//! Each device folder gets a server and a client script under the standard
//! layout. The server script writes the result file shortly after start;
//! the portal is a scripted fake.

#![cfg(unix)]

use async_trait::async_trait;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fota_e2e::emulator::Readiness;
use fota_e2e::orchestrator::EmulatorLayout;
use fota_e2e::poller::ResultPoller;
use fota_e2e::recorder::{read_log, OutcomeSummary};
use fota_e2e::{
    Device, E2eError, E2eResult, Orchestrator, OrchestratorConfig, PortalDriver, RoundParams,
    RunStatus, SuitePlan, SuiteRunner, VersionUpload,
};

const READY: &str = "ready";

/// Portal that accepts everything except `fail_on`
#[derive(Default)]
struct ScriptedPortal {
    calls: Mutex<Vec<String>>,
    fail_on: Option<&'static str>,
}

impl ScriptedPortal {
    fn failing_on(step: &'static str) -> Self {
        Self {
            fail_on: Some(step),
            ..Default::default()
        }
    }

    fn step(&self, name: &'static str) -> E2eResult<()> {
        self.calls.lock().unwrap().push(name.to_string());
        if self.fail_on == Some(name) {
            return Err(E2eError::PortalStep {
                step: name.to_string(),
                reason: "element not found".to_string(),
            });
        }
        Ok(())
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PortalDriver for ScriptedPortal {
    async fn login(&self) -> E2eResult<()> {
        self.step("login")
    }
    async fn search_device(&self, _device: &Device) -> E2eResult<()> {
        self.step("search_device")
    }
    async fn version_exists(&self, _version: &str, _device: &Device) -> E2eResult<bool> {
        self.step("version_exists")?;
        Ok(false)
    }
    async fn upload_version(&self, _upload: &VersionUpload, _device: &Device) -> E2eResult<()> {
        self.step("upload_version")
    }
    async fn assign_device_to_group(&self, _group: &str, _device: &Device) -> E2eResult<()> {
        self.step("assign_device_to_group")
    }
    async fn publish_version(&self, _group: &str, _version: &str) -> E2eResult<()> {
        self.step("publish_version")
    }
}

fn write_script(path: &Path, body: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, format!("#!/bin/sh\n{}", body)).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Install emulator scripts for `device`. `result` is what the server
/// writes to its result file; `None` means it never writes one.
fn install_emulators(layout: &EmulatorLayout, device: &Device, result: Option<&str>) -> PathBuf {
    let server = layout.server(device);
    let client = layout.client(device);

    let write_result = match result {
        Some(text) => format!(
            "sleep 0.2\nprintf '%s' '{}' > result.tmp && mv result.tmp result\n",
            text
        ),
        None => String::new(),
    };
    write_script(
        &server.binary_path(),
        &format!(
            "echo \"$1\" > iteration\ntouch {}\n{}exec sleep 30\n",
            READY, write_result
        ),
    );
    write_script(
        &client.binary_path(),
        &format!("echo \"$1\" > iteration\ntouch {}\nexec sleep 30\n", READY),
    );

    server.folder
}

fn config(root: &Path, budget: u32, interval: Duration) -> OrchestratorConfig {
    OrchestratorConfig {
        layout: EmulatorLayout {
            devices_root: root.join("devices"),
            server_binary: "server.sh".to_string(),
            client_binary: "client.sh".to_string(),
            ..Default::default()
        },
        readiness: Readiness::Marker {
            file_name: READY.to_string(),
            timeout: Duration::from_secs(5),
            poll: Duration::from_millis(10),
        },
        stop_grace: Duration::ZERO,
        poller: ResultPoller::new(budget, interval),
        settle: Duration::ZERO,
        results_dir: root.join("results"),
    }
}

fn upload() -> VersionUpload {
    VersionUpload {
        path: "swDesiredVersionCheck3.0.0_Force_Signed.exe".into(),
        version: "3.0.0".into(),
        file_type: "TESTER_APP".into(),
        supported_version: "*".into(),
        install_type: "Force".into(),
    }
}

fn device(index: usize) -> Device {
    Device::from_family("TEST-SWFOTA-C", index, "GA-0000180", "Acupulse - 40W ST", None)
}

fn round(device: Device, times: u32) -> RoundParams {
    RoundParams {
        group: device.group_name(),
        device,
        upload: upload(),
        times,
    }
}

#[tokio::test]
async fn successful_round_is_logged_and_torn_down() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), 100, Duration::from_millis(50));
    let dev = device(0);
    let server_folder = install_emulators(&cfg.layout, &dev, Some("Success"));

    let portal = Arc::new(ScriptedPortal::default());
    let orchestrator = Orchestrator::new(cfg, portal.clone());
    let report = orchestrator.run_round(&round(dev, 0)).await;

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.iteration, 1);
    assert!(report.teardown.server_stopped);
    assert!(report.teardown.client_stopped);
    assert_eq!(
        portal.calls(),
        [
            "login",
            "search_device",
            "version_exists",
            "upload_version",
            "assign_device_to_group",
            "publish_version"
        ]
    );

    // The emulators received the one-based iteration
    let iteration = std::fs::read_to_string(server_folder.join("iteration")).unwrap();
    assert_eq!(iteration.trim(), "1");

    let log_path = report.log_path.unwrap();
    assert_eq!(log_path, dir.path().join("results/autotests_TEST-SWFOTA-C.log"));
    let contents = std::fs::read_to_string(&log_path).unwrap();
    let ticks = report.elapsed_ticks.unwrap();
    assert_eq!(contents, format!("1, {}, Success\n", ticks));
}

#[tokio::test]
async fn json_result_is_decoded() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), 100, Duration::from_millis(50));
    let dev = device(0);
    install_emulators(
        &cfg.layout,
        &dev,
        Some(r#"{"metrics":[{"commandStatus":"Failed"}]}"#),
    );

    let orchestrator = Orchestrator::new(cfg, Arc::new(ScriptedPortal::default()));
    let report = orchestrator.run_round(&round(dev, 1)).await;

    assert_eq!(report.status, RunStatus::Failed("Failed".to_string()));
    let lines = read_log(&report.log_path.unwrap()).unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].iteration, 2);
    assert_eq!(lines[0].status, "Failed");
}

#[tokio::test]
async fn missing_result_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), 3, Duration::from_millis(10));
    let dev = device(0);
    install_emulators(&cfg.layout, &dev, None);

    let orchestrator = Orchestrator::new(cfg, Arc::new(ScriptedPortal::default()));
    let report = orchestrator.run_round(&round(dev, 0)).await;

    assert_eq!(report.status, RunStatus::Timeout);
    assert!(report.teardown.server_stopped);
    assert!(report.teardown.client_stopped);

    let contents = std::fs::read_to_string(report.log_path.unwrap()).unwrap();
    assert_eq!(contents, "1, 4, Timeout\n");
}

#[tokio::test]
async fn portal_failure_tears_down_without_logging() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), 100, Duration::from_millis(50));
    let dev = device(0);
    install_emulators(&cfg.layout, &dev, Some("Success"));

    let portal = Arc::new(ScriptedPortal::failing_on("assign_device_to_group"));
    let orchestrator = Orchestrator::new(cfg, portal.clone());
    let report = orchestrator.run_round(&round(dev, 0)).await;

    match &report.status {
        RunStatus::Error(cause) => assert!(cause.contains("assign_device_to_group")),
        other => panic!("unexpected status {:?}", other),
    }
    assert!(report.teardown.server_stopped);
    assert!(report.teardown.client_stopped);
    assert_eq!(report.log_path, None);
    assert!(!dir.path().join("results/autotests_TEST-SWFOTA-C.log").exists());
    assert!(!portal.calls().contains(&"publish_version".to_string()));
}

#[tokio::test]
async fn unwritable_outcome_log_fails_the_round() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path(), 100, Duration::from_millis(50));
    // A regular file where the results directory should be
    let blocker = dir.path().join("results");
    std::fs::write(&blocker, "not a directory").unwrap();
    cfg.results_dir = blocker;
    let dev = device(0);
    install_emulators(&cfg.layout, &dev, Some("Success"));

    let orchestrator = Orchestrator::new(cfg, Arc::new(ScriptedPortal::default()));
    let report = orchestrator.run_round(&round(dev, 0)).await;

    match &report.status {
        RunStatus::Error(cause) => assert!(cause.contains("Success"), "cause: {}", cause),
        other => panic!("unexpected status {:?}", other),
    }
    assert!(!report.passed());
    assert!(report.elapsed_ticks.is_some());
    assert_eq!(report.log_path, None);
    assert!(report.teardown.server_stopped);
    assert!(report.teardown.client_stopped);
}

#[tokio::test]
async fn outcome_is_logged_before_emulators_stop() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path(), 100, Duration::from_millis(50));
    cfg.stop_grace = Duration::from_secs(2);
    let dev = device(0);
    let log = cfg.results_dir.join(format!("{}.log", dev.group_name()));

    // The server snapshots the outcome log when asked to stop
    let server = cfg.layout.server(&dev);
    write_script(
        &server.binary_path(),
        &format!(
            "trap 'cat \"{log}\" > log_at_stop 2>/dev/null; exit 0' TERM\n\
             touch {ready}\nprintf 'Success' > result\n\
             while :; do sleep 0.1; done\n",
            ready = READY,
            log = log.display()
        ),
    );
    write_script(
        &cfg.layout.client(&dev).binary_path(),
        &format!("touch {}\nexec sleep 30\n", READY),
    );

    let orchestrator = Orchestrator::new(cfg, Arc::new(ScriptedPortal::default()));
    let report = orchestrator.run_round(&round(dev, 0)).await;

    assert_eq!(report.status, RunStatus::Success);
    let snapshot = std::fs::read_to_string(server.folder.join("log_at_stop")).unwrap();
    assert_eq!(snapshot, format!("1, {}, Success\n", report.elapsed_ticks.unwrap()));
}

#[tokio::test]
async fn client_launch_failure_stops_the_running_server() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), 100, Duration::from_millis(50));
    let dev = device(0);
    install_emulators(&cfg.layout, &dev, Some("Success"));
    std::fs::remove_file(cfg.layout.client(&dev).binary_path()).unwrap();

    let portal = Arc::new(ScriptedPortal::default());
    let orchestrator = Orchestrator::new(cfg, portal.clone());
    let report = orchestrator.run_round(&round(dev, 0)).await;

    assert!(matches!(report.status, RunStatus::Error(_)));
    assert!(report.teardown.server_stopped);
    assert!(!report.teardown.client_stopped);
    assert_eq!(report.elapsed_ticks, None);
    assert_eq!(report.log_path, None);
    assert!(portal.calls().is_empty());
}

#[tokio::test]
async fn suite_runs_every_device_and_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), 100, Duration::from_millis(50));
    let devices = vec![device(0), device(1)];
    for dev in &devices {
        install_emulators(&cfg.layout, dev, Some("Success"));
    }

    let orchestrator = Arc::new(Orchestrator::new(cfg, Arc::new(ScriptedPortal::default())));
    let runner = SuiteRunner::new(orchestrator, dir.path().join("results"));
    let plan = SuitePlan {
        devices,
        times: 2,
        upload: upload(),
        group_override: None,
        jobs: 2,
    };

    let result = runner.run(&plan).await.unwrap();
    assert_eq!(result.total, 4);
    assert!(result.all_passed());

    let serials: Vec<(&str, u32)> = result
        .rounds
        .iter()
        .map(|r| (r.serial_number.as_str(), r.iteration))
        .collect();
    assert_eq!(
        serials,
        [
            ("TEST-SWFOTA-C-1", 1),
            ("TEST-SWFOTA-C-1", 2),
            ("TEST-SWFOTA-C-2", 1),
            ("TEST-SWFOTA-C-2", 2)
        ]
    );

    // Both devices share one group log; lines may interleave but stay whole
    let lines = read_log(&dir.path().join("results/autotests_TEST-SWFOTA-C.log")).unwrap();
    let summary = OutcomeSummary::from_lines(&lines);
    assert_eq!(summary.total, 4);
    assert_eq!(summary.succeeded, 4);

    let path = runner.write_results(&result).unwrap();
    assert!(path.ends_with("suite-results.json"));
}
