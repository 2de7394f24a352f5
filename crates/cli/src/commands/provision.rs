//! Provision Command

use anyhow::{Context, Result};
use clap::Args;

use fota_e2e::device::{family, Device};
use fota_e2e::provision::{ApiConfig, ProvisioningClient};
use fota_e2e::FotaConfig;

use crate::output::{print_list, print_success, OutputFormat, TableDisplay};

#[derive(Args, Debug)]
pub struct ProvisionArgs {
    #[arg(long = "deviceFamily", default_value = "TEST-SWFOTA-C")]
    pub device_family: String,

    #[arg(long = "deviceType", default_value = "GA-0000180")]
    pub device_type: String,

    #[arg(long = "deviceModel", default_value = "Acupulse - 40W ST")]
    pub device_model: String,

    #[arg(long = "numberOfDevices", default_value = "1")]
    pub number_of_devices: usize,

    /// API host; endpoint paths are derived from it
    #[arg(long, env = "FOTA_API_BASE")]
    pub api_base: Option<String>,

    #[arg(long, env = "FOTA_API_USER")]
    pub api_user: Option<String>,

    #[arg(long, env = "FOTA_API_PASSWORD", hide_env_values = true)]
    pub api_password: Option<String>,
}

impl ProvisionArgs {
    fn api_config(&self, file: ApiConfig) -> ApiConfig {
        let mut api = match &self.api_base {
            Some(base) => ApiConfig {
                user: file.user,
                password: file.password,
                timeout_secs: file.timeout_secs,
                ..ApiConfig::with_base_url(base)
            },
            None => file,
        };
        if let Some(user) = &self.api_user {
            api.user = user.clone();
        }
        if let Some(password) = &self.api_password {
            api.password = password.clone();
        }
        api
    }
}

impl TableDisplay for Device {
    fn headers() -> Vec<&'static str> {
        vec!["Serial", "Type", "Model", "FOTA Group"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.serial_number.clone(),
            self.device_type.clone(),
            self.model.clone(),
            self.group_name(),
        ]
    }
}

pub async fn execute(args: ProvisionArgs, config: FotaConfig, format: OutputFormat) -> Result<()> {
    let api = args.api_config(config.api);
    let devices = family(
        &args.device_family,
        args.number_of_devices,
        &args.device_type,
        &args.device_model,
        None,
    );

    let client = ProvisioningClient::new(api)?;
    let count = client
        .provision_all(&devices)
        .await
        .context("provisioning devices")?;

    print_list(&devices, format);
    print_success(&format!("{} device(s) inserted and activated", count));
    Ok(())
}
