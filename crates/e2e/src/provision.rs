//! Device provisioning through the vendor REST API
//!
//! Inserts simulated devices into the portal and activates them
//! (certificate generation followed by acknowledgement).

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{E2eError, E2eResult};

/// Endpoints and credentials of the provisioning API
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub login_url: String,
    pub insert_device_url: String,
    /// Template with `{type}` and `{serial}` placeholders
    pub generate_certificate_url: String,
    /// Template with `{type}` and `{serial}` placeholders
    pub ack_certificate_url: String,
    pub user: String,
    pub password: String,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("login_url", &self.login_url)
            .field("insert_device_url", &self.insert_device_url)
            .field("generate_certificate_url", &self.generate_certificate_url)
            .field("ack_certificate_url", &self.ack_certificate_url)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Host of the integration environment
pub const DEFAULT_API_BASE: &str = "https://api.int.lumenisx.lumenis.com";

impl Default for ApiConfig {
    fn default() -> Self {
        Self::with_base_url(DEFAULT_API_BASE)
    }
}

impl ApiConfig {
    /// Standard endpoint paths under `base`
    pub fn with_base_url(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            login_url: format!("{}/ums/v1/users/loginCredentials", base),
            insert_device_url: format!("{}/facade/v1/device", base),
            generate_certificate_url: format!(
                "{}/device/v1/lumDevice/generateCertificate/types/{{type}}/serialNumbers/{{serial}}",
                base
            ),
            ack_certificate_url: format!(
                "{}/device/v1/lumDevice/types/{{type}}/serialNumbers/{{serial}}/acknowledgeCertificate",
                base
            ),
            user: String::new(),
            password: String::new(),
            timeout_secs: 30,
        }
    }
}

fn device_url(template: &str, device: &Device) -> String {
    template
        .replace("{type}", &device.device_type)
        .replace("{serial}", &device.serial_number)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
}

/// Bearer token returned by a successful login
#[derive(Clone)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Client for the provisioning API
pub struct ProvisioningClient {
    http: reqwest::Client,
    config: ApiConfig,
}

impl ProvisioningClient {
    pub fn new(config: ApiConfig) -> E2eResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    /// Log in and return the access token
    pub async fn login(&self) -> E2eResult<AccessToken> {
        let url = &self.config.login_url;
        let resp = self
            .http
            .post(url)
            .json(&json!({
                "email": self.config.user,
                "password": self.config.password,
            }))
            .send()
            .await?;

        let resp = check(url, resp).await?;
        let body: LoginResponse = resp.json().await?;
        debug!("Logged in to provisioning API as {}", self.config.user);
        Ok(AccessToken(body.access_token))
    }

    /// Register a device in the portal
    pub async fn insert_device(&self, token: &AccessToken, device: &Device) -> E2eResult<()> {
        let url = &self.config.insert_device_url;
        let resp = self
            .http
            .post(url)
            .bearer_auth(token.as_str())
            .json(&json!({
                "createLumDeviceRequest": {
                    "deviceSerialNumber": device.serial_number,
                    "deviceType": device.device_type,
                }
            }))
            .send()
            .await?;

        check(url, resp).await?;
        info!("Device {} was inserted", device.serial_number);
        Ok(())
    }

    /// Generate the device certificate, then acknowledge it
    pub async fn activate_device(&self, token: &AccessToken, device: &Device) -> E2eResult<()> {
        let url = device_url(&self.config.generate_certificate_url, device);
        let resp = self.http.get(&url).bearer_auth(token.as_str()).send().await?;
        check(&url, resp).await?;

        let url = device_url(&self.config.ack_certificate_url, device);
        let resp = self.http.post(&url).bearer_auth(token.as_str()).send().await?;
        check(&url, resp).await?;

        info!("Device {} was activated", device.serial_number);
        Ok(())
    }

    /// Insert then activate every device, stopping at the first failure
    pub async fn provision_all(&self, devices: &[Device]) -> E2eResult<usize> {
        let token = self.login().await?;
        for device in devices {
            self.insert_device(&token, device).await?;
            self.activate_device(&token, device).await?;
        }
        Ok(devices.len())
    }
}

async fn check(url: &str, resp: reqwest::Response) -> E2eResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(E2eError::Api {
        url: url.to_string(),
        status: status.as_u16(),
        body,
    })
}
