//! The `update_firmware` service.

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::error;
use tracing::info;

use crate::registry::Registry;
use crate::registry::Service;

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateFirmwareRequest {
    pub firmware_path: PathBuf,

    /// Device to flash; the first set up device when absent
    #[serde(default)]
    pub entry_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Firmware file not found: {}", .0.display())]
    FirmwareNotFound(PathBuf),

    #[error("Firmware file must be a .bin file: {}", .0.display())]
    NotFirmwareImage(PathBuf),

    #[error("No device set up with entry id {0}")]
    UnknownEntry(String),

    #[error("No device is set up")]
    NoInstances,

    #[error("Service {0} is not registered")]
    NotRegistered(Service),

    #[error("Firmware update of {host} failed")]
    UpdateFailed { host: String },
}

impl ServiceError {
    /// Whether the call was refused before reaching a device
    pub fn is_validation(&self) -> bool {
        !matches!(self, ServiceError::UpdateFailed { .. })
    }
}

/// Check that `path` is an existing file with a `.bin` name.
pub fn validate_firmware_path(path: &Path) -> Result<(), ServiceError> {
    if !path.is_file() {
        error!("Firmware file not found: {}", path.display());
        return Err(ServiceError::FirmwareNotFound(path.to_path_buf()));
    }

    if !path.to_string_lossy().ends_with(".bin") {
        error!("Invalid firmware file (must be .bin): {}", path.display());
        return Err(ServiceError::NotFirmwareImage(path.to_path_buf()));
    }

    Ok(())
}

/// Validate the request and upload the image to the target device.
///
/// The registry lock is only held while the target is resolved, so other
/// callers are not blocked for the length of the upload.
pub async fn update_firmware(
    registry: &RwLock<Registry>,
    request: UpdateFirmwareRequest,
) -> Result<(), ServiceError> {
    validate_firmware_path(&request.firmware_path)?;

    let api = registry
        .read()
        .await
        .firmware_target(request.entry_id.as_deref())?;

    info!(
        "[{}] Starting OTA update with file: {}",
        api.host(),
        request.firmware_path.display()
    );
    if !api.upload_firmware(&request.firmware_path).await {
        return Err(ServiceError::UpdateFailed {
            host: api.host().to_string(),
        });
    }

    info!("[{}] OTA update finished", api.host());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use insta::assert_snapshot;

    use super::*;
    use crate::client::MockDeviceApi;
    use crate::client::SharedApi;
    use crate::config::DeviceKind;
    use crate::config_flow::ConfigEntry;

    fn registry_with(entries: &[(&str, Arc<MockDeviceApi>)]) -> RwLock<Registry> {
        let mut registry = Registry::new(reqwest::Client::new());
        for (entry_id, api) in entries {
            let entry = ConfigEntry::new(
                *entry_id,
                api.host.clone(),
                DeviceKind::Modes,
                Duration::from_secs(3600),
            );
            let api: SharedApi = api.clone();
            registry.setup_with_api(entry, api).unwrap();
        }
        RwLock::new(registry)
    }

    fn firmware(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"\xe9firmware").unwrap();
        path
    }

    #[test]
    fn test_validate_firmware_path() {
        let dir = tempfile::tempdir().unwrap();

        let err = validate_firmware_path(Path::new("/nonexistent/fw.bin")).unwrap_err();
        assert_snapshot!(err.to_string(), @"Firmware file not found: /nonexistent/fw.bin");
        assert!(err.is_validation());

        let hex = firmware(&dir, "fw.hex");
        let err = validate_firmware_path(&hex).unwrap_err();
        assert!(matches!(err, ServiceError::NotFirmwareImage(_)));

        // Directories are not firmware files, whatever their name
        let bin_dir = dir.path().join("images.bin");
        std::fs::create_dir(&bin_dir).unwrap();
        assert!(matches!(
            validate_firmware_path(&bin_dir),
            Err(ServiceError::FirmwareNotFound(_))
        ));

        validate_firmware_path(&firmware(&dir, "fw.bin")).unwrap();
    }

    #[tokio::test]
    async fn test_invalid_path_makes_no_request() {
        let dir = tempfile::tempdir().unwrap();
        let device = Arc::new(MockDeviceApi::new());
        let registry = registry_with(&[("a", device.clone())]);

        let err = update_firmware(
            &registry,
            UpdateFirmwareRequest {
                firmware_path: firmware(&dir, "fw.txt"),
                entry_id: None,
            },
        )
        .await
        .unwrap_err();
        assert!(err.is_validation());
        assert!(device.calls().is_empty());

        registry.write().await.shutdown().await;
    }

    #[tokio::test]
    async fn test_upload_to_selected_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = firmware(&dir, "fw.bin");
        let a = Arc::new(MockDeviceApi::new().with_host("a.local"));
        let b = Arc::new(MockDeviceApi::new().with_host("b.local"));
        let registry = registry_with(&[("a", a.clone()), ("b", b.clone())]);

        update_firmware(
            &registry,
            UpdateFirmwareRequest {
                firmware_path: path.clone(),
                entry_id: Some("b".to_string()),
            },
        )
        .await
        .unwrap();

        let uploaded = format!("upload_firmware({})", path.display());
        assert!(b.calls().contains(&uploaded));
        assert!(!a.calls().contains(&uploaded));

        update_firmware(
            &registry,
            UpdateFirmwareRequest {
                firmware_path: path.clone(),
                entry_id: None,
            },
        )
        .await
        .unwrap();
        assert!(a.calls().contains(&uploaded));

        registry.write().await.shutdown().await;
    }

    #[tokio::test]
    async fn test_upload_failure_is_runtime_error() {
        let dir = tempfile::tempdir().unwrap();
        let device = Arc::new(MockDeviceApi::new().with_host("a.local"));
        device.reject_writes();
        let registry = registry_with(&[("a", device)]);

        let err = update_firmware(
            &registry,
            UpdateFirmwareRequest {
                firmware_path: firmware(&dir, "fw.bin"),
                entry_id: None,
            },
        )
        .await
        .unwrap_err();
        assert!(!err.is_validation());
        assert_snapshot!(err.to_string(), @"Firmware update of a.local failed");

        registry.write().await.shutdown().await;
    }

    #[tokio::test]
    async fn test_service_gone_after_last_unload() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with(&[("a", Arc::new(MockDeviceApi::new()))]);
        assert!(registry.write().await.unload("a").await);

        let err = update_firmware(
            &registry,
            UpdateFirmwareRequest {
                firmware_path: firmware(&dir, "fw.bin"),
                entry_id: None,
            },
        )
        .await
        .unwrap_err();
        assert_snapshot!(err.to_string(), @"Service update_firmware is not registered");
    }
}
