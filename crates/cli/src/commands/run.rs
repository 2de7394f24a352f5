//! Run Command

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

use fota_e2e::device::family;
use fota_e2e::playwright::{Browser, PlaywrightHandle};
use fota_e2e::{
    FotaConfig, Orchestrator, PlaywrightPortal, RoundReport, SuitePlan, SuiteRunner, VersionUpload,
};

use crate::output::{print_list, print_success, print_warning, OutputFormat, TableDisplay};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Firmware package to upload
    #[arg(long = "swPath", default_value = "D:/SWFOTA/swDesiredVersionCheck3.0.0_Force_Signed.exe")]
    pub sw_path: String,

    /// Version of the firmware package
    #[arg(long = "swVersion", default_value = "3.0.0")]
    pub sw_version: String,

    /// Serial number prefix; devices are `{family}-1..N`
    #[arg(long = "deviceFamily", default_value = "TEST-SWFOTA-C")]
    pub device_family: String,

    #[arg(long = "deviceType", default_value = "GA-0000180")]
    pub device_type: String,

    #[arg(long = "deviceModel", default_value = "Acupulse - 40W ST")]
    pub device_model: String,

    /// Device product group
    #[arg(long = "deviceGroup")]
    pub device_group: Option<String>,

    #[arg(long = "swFileType", default_value = "TESTER_APP")]
    pub sw_file_type: String,

    #[arg(long = "swSupportedVersion", default_value = "*")]
    pub sw_supported_version: String,

    #[arg(long = "swInstallType", default_value = "Force")]
    pub sw_install_type: String,

    #[arg(long = "numberOfDevices", default_value = "1")]
    pub number_of_devices: usize,

    /// Rounds per device
    #[arg(long, default_value = "1")]
    pub times: u32,

    /// Target group instead of the one derived from each serial number
    #[arg(long = "groupName")]
    pub group_name: Option<String>,

    /// Devices processed concurrently
    #[arg(long, default_value = "1")]
    pub jobs: usize,

    /// Directory for outcome logs and suite results
    #[arg(long)]
    pub results_dir: Option<PathBuf>,

    /// Directory with flow files overriding the built-in ones
    #[arg(long)]
    pub flows_dir: Option<PathBuf>,

    /// Portal URL
    #[arg(long, env = "FOTA_BASE_URL")]
    pub base_url: Option<String>,

    /// Browser (chromium, firefox, webkit)
    #[arg(long, env = "FOTA_BROWSER")]
    pub browser: Option<String>,

    #[arg(long, env = "FOTA_HEADLESS")]
    pub headless: Option<bool>,

    /// Default Playwright timeout
    #[arg(long, env = "FOTA_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    #[arg(long, env = "FOTA_PORTAL_USER")]
    pub portal_user: Option<String>,

    #[arg(long, env = "FOTA_PORTAL_PASSWORD", hide_env_values = true)]
    pub portal_password: Option<String>,
}

impl RunArgs {
    /// Fold flag and environment overrides into the file configuration
    fn apply(&self, config: &mut FotaConfig) {
        let portal = &mut config.portal;
        if let Some(url) = &self.base_url {
            portal.base_url = url.clone();
        }
        if let Some(browser) = &self.browser {
            portal.browser = Browser::from_name(browser);
        }
        if let Some(headless) = self.headless {
            portal.headless = headless;
        }
        if let Some(timeout) = self.timeout_ms {
            portal.timeout_ms = timeout;
        }
        if let Some(user) = &self.portal_user {
            portal.username = user.clone();
        }
        if let Some(password) = &self.portal_password {
            portal.password = password.clone();
        }
        if let Some(dir) = &self.flows_dir {
            portal.flows_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.results_dir {
            config.results.dir = dir.clone();
        }
    }

    fn plan(&self) -> SuitePlan {
        SuitePlan {
            devices: family(
                &self.device_family,
                self.number_of_devices,
                &self.device_type,
                &self.device_model,
                self.device_group.as_deref(),
            ),
            times: self.times,
            upload: VersionUpload {
                path: self.sw_path.clone(),
                version: self.sw_version.clone(),
                file_type: self.sw_file_type.clone(),
                supported_version: self.sw_supported_version.clone(),
                install_type: self.sw_install_type.clone(),
            },
            group_override: self.group_name.clone(),
            jobs: self.jobs,
        }
    }
}

impl TableDisplay for RoundReport {
    fn headers() -> Vec<&'static str> {
        vec!["Serial", "Group", "Iteration", "Ticks", "Status", "Stopped", "Duration"]
    }

    fn row(&self) -> Vec<String> {
        let stopped = match (self.teardown.server_stopped, self.teardown.client_stopped) {
            (true, true) => "server, client",
            (true, false) => "server",
            (false, true) => "client",
            (false, false) => "-",
        };

        vec![
            self.serial_number.clone(),
            self.group.clone(),
            self.iteration.to_string(),
            self.elapsed_ticks.map(|t| t.to_string()).unwrap_or_else(|| "-".into()),
            self.status.log_value(),
            stopped.to_string(),
            format!("{:.1}s", self.duration_ms as f64 / 1000.0),
        ]
    }
}

/// Run the suite; `Ok(false)` means at least one round did not pass
pub async fn execute(args: RunArgs, mut config: FotaConfig, format: OutputFormat) -> Result<bool> {
    args.apply(&mut config);
    config.validate()?;

    let browser = PlaywrightHandle::new(config.playwright()).context("preparing the browser")?;
    let portal = PlaywrightPortal::new(browser, config.flows(), config.credentials())?;
    let orchestrator = Arc::new(Orchestrator::new(config.orchestrator(), Arc::new(portal)));
    let runner = SuiteRunner::new(orchestrator, config.results.dir.clone());

    let plan = args.plan();
    let result = runner.run(&plan).await?;
    runner.write_results(&result)?;

    print_list(&result.rounds, format);
    if result.all_passed() {
        print_success(&format!("All {} round(s) passed", result.total));
    } else {
        print_warning(&format!(
            "{} of {} round(s) failed ({} timed out, {} errors)",
            result.failed, result.total, result.timed_out, result.errored
        ));
    }

    Ok(result.all_passed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use fota_e2e::device::Device;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: RunArgs,
    }

    fn parse(argv: &[&str]) -> RunArgs {
        let mut full = vec!["run"];
        full.extend_from_slice(argv);
        Harness::try_parse_from(full).unwrap().args
    }

    #[test]
    fn test_plan_expands_family() {
        let plan = parse(&["--numberOfDevices", "3", "--times", "2", "--deviceGroup", "M22"]).plan();
        assert_eq!(plan.total_rounds(), 6);
        assert_eq!(plan.devices[2].serial_number, "TEST-SWFOTA-C-3");
        assert_eq!(plan.devices[0].group.as_deref(), Some("M22"));
        assert_eq!(plan.upload.install_type, "Force");
        assert_eq!(plan.group_override, None);
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let args = parse(&[
            "--base-url",
            "https://portal.example.com",
            "--browser",
            "firefox",
            "--headless",
            "false",
            "--results-dir",
            "/tmp/fota-results",
        ]);
        let mut config = FotaConfig::default();
        args.apply(&mut config);

        assert_eq!(config.portal.base_url, "https://portal.example.com");
        assert_eq!(config.portal.browser, Browser::Firefox);
        assert!(!config.portal.headless);
        assert_eq!(config.results.dir, PathBuf::from("/tmp/fota-results"));
    }

    #[test]
    fn test_round_row() {
        let device = Device::from_family("TEST-SWFOTA-C", 0, "GA-0000180", "M", None);
        let report = RoundReport {
            serial_number: device.serial_number.clone(),
            group: device.group_name(),
            iteration: 3,
            elapsed_ticks: None,
            status: fota_e2e::RunStatus::Error("launch".into()),
            log_path: None,
            teardown: Default::default(),
            duration_ms: 1500,
        };
        let row = report.row();
        assert_eq!(row[3], "-");
        assert_eq!(row[4], "Error: launch");
        assert_eq!(row[5], "-");
        assert_eq!(row[6], "1.5s");
    }
}
