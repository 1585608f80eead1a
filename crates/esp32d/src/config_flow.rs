//! Onboarding of a device: reachability check and config entry creation.

use std::time::Duration;

use reqwest::StatusCode;
use tracing::debug;
use tracing::info;

use crate::config::DeviceConfig;
use crate::config::DeviceKind;
use crate::registry::Registry;

/// Timeout for the onboarding reachability check.
pub const VALIDATION_TIMEOUT: Duration = Duration::from_secs(10);

/// A device that passed onboarding and can be set up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub entry_id: String,
    pub title: String,
    pub host: String,
    pub kind: DeviceKind,
    pub scan_interval: Duration,
}

impl ConfigEntry {
    pub fn new(
        entry_id: impl Into<String>,
        host: impl Into<String>,
        kind: DeviceKind,
        scan_interval: Duration,
    ) -> Self {
        let host = host.into();
        Self {
            entry_id: entry_id.into(),
            title: format!("ESP32 Modes ({})", host),
            host,
            kind,
            scan_interval,
        }
    }

    pub fn from_device_config(entry_id: &str, device: &DeviceConfig) -> Self {
        Self::new(entry_id, device.host.clone(), device.kind, device.scan_interval())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Cannot connect to {host}: {reason}")]
    CannotConnect { host: String, reason: String },

    #[error("Unexpected error validating {host}: {reason}")]
    Unknown { host: String, reason: String },

    #[error("Device {0} is already configured")]
    AlreadyConfigured(String),
}

/// Check that `host` answers `GET /api/mode` with a JSON body carrying `mode`.
pub async fn validate_host(http: &reqwest::Client, host: &str) -> Result<(), FlowError> {
    let cannot_connect = |reason: String| FlowError::CannotConnect {
        host: host.to_string(),
        reason,
    };

    let response = http
        .get(format!("http://{}/api/mode", host))
        .timeout(VALIDATION_TIMEOUT)
        .send()
        .await
        .map_err(|e| cannot_connect(e.to_string()))?;

    let status = response.status();
    if status != StatusCode::OK {
        return Err(cannot_connect(format!("status {}", status)));
    }

    let body = response
        .text()
        .await
        .map_err(|e| cannot_connect(e.to_string()))?;
    let data: serde_json::Value = serde_json::from_str(&body).map_err(|e| FlowError::Unknown {
        host: host.to_string(),
        reason: e.to_string(),
    })?;

    if data.get("mode").is_none() {
        return Err(cannot_connect("response has no mode".to_string()));
    }

    debug!("[{}] Device answered {}", host, data);
    Ok(())
}

/// Validate a configured device and turn it into a [`ConfigEntry`].
///
/// The host is checked for reachability first; a host already owned by a
/// registered instance is refused afterwards.
pub async fn create_entry(
    registry: &Registry,
    entry_id: &str,
    device: &DeviceConfig,
) -> Result<ConfigEntry, FlowError> {
    validate_host(registry.http(), &device.host).await?;

    if registry.contains_host(&device.host) {
        return Err(FlowError::AlreadyConfigured(device.host.clone()));
    }

    let entry = ConfigEntry::from_device_config(entry_id, device);
    info!("[{}] Created entry {:?}", entry.entry_id, entry.title);
    Ok(entry)
}
