//! HTTP client for the ESP32 control API.
//!
//! Every call is a single request with a fixed timeout. Failures never reach
//! the caller as errors: reads return `None` and commands return `false`, with
//! the cause logged here.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use reqwest::StatusCode;
use reqwest::multipart;
use serde::de::DeserializeOwned;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::snapshot::Effect;
use crate::snapshot::ModeReading;
use crate::snapshot::Rgb;
use crate::snapshot::StatusSnapshot;
use crate::snapshot::TempReading;
use crate::snapshot::Toggle;

/// Timeout for status reads and commands.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for a firmware upload, which includes the device flashing it.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Client handle shared by every entity of one device.
pub type SharedApi = Arc<dyn DeviceApi>;

/// Operations offered by the ESP32 firmware.
///
/// This trait allows for mocking the device for testing purposes.
#[async_trait]
pub trait DeviceApi: Send + Sync {
    /// Host (IP or name, optionally with port) of the device
    fn host(&self) -> &str;

    /// Current mode of the 3-mode controller
    async fn get_mode(&self) -> Option<u8>;

    /// Full NeoPixel state
    async fn get_status(&self) -> Option<StatusSnapshot>;

    /// Internal temperature in degrees Celsius
    async fn get_temp(&self) -> Option<f64>;

    /// Switch the 3-mode controller to `mode`
    async fn set_mode(&self, mode: u8) -> bool;

    async fn set_text(&self, text: &str) -> bool;

    async fn set_color(&self, color: Rgb) -> bool;

    async fn set_brightness(&self, brightness: u8) -> bool;

    /// Milliseconds between scroll frames
    async fn set_speed(&self, speed_ms: u16) -> bool;

    async fn set_effect(&self, effect: Effect) -> bool;

    async fn set_scroll(&self, on: bool) -> bool;

    async fn set_power(&self, on: bool) -> bool;

    async fn set_matrix(&self, w: u16, h: u16) -> bool;

    async fn reboot(&self) -> bool;

    /// Upload a firmware image for OTA flashing
    async fn upload_firmware(&self, path: &Path) -> bool;
}

/// Real device client over HTTP
#[derive(Debug, Clone)]
pub struct Esp32Client {
    host: String,
    base_url: String,
    http: reqwest::Client,
}

impl Esp32Client {
    /// Create a client for `host` on top of a shared HTTP client.
    pub fn new(host: impl Into<String>, http: reqwest::Client) -> Self {
        let host = host.into();
        let base_url = format!("http://{}", host);
        Self {
            host,
            base_url,
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(format!("{}{}", self.base_url, path))
            .timeout(REQUEST_TIMEOUT)
    }

    async fn fetch_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> Option<T> {
        let response = match self.get(path).send().await {
            Ok(response) => response,
            Err(e) => {
                error!("[{}] Error getting {}: {}", self.host, what, e);
                return None;
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            warn!("[{}] Getting {} returned status {}", self.host, what, status);
            return None;
        }

        match response.json::<T>().await {
            Ok(value) => Some(value),
            Err(e) => {
                error!("[{}] Malformed {} response: {}", self.host, what, e);
                None
            }
        }
    }

    async fn command(&self, request: RequestBuilder, what: &str) -> bool {
        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status == StatusCode::OK {
                    debug!("[{}] {} accepted", self.host, what);
                    true
                } else {
                    warn!("[{}] {} rejected with status {}", self.host, what, status);
                    false
                }
            }
            Err(e) => {
                error!("[{}] Error sending {}: {}", self.host, what, e);
                false
            }
        }
    }
}

#[async_trait]
impl DeviceApi for Esp32Client {
    fn host(&self) -> &str {
        &self.host
    }

    async fn get_mode(&self) -> Option<u8> {
        self.fetch_json::<ModeReading>("/api/mode", "mode")
            .await
            .and_then(|reading| reading.mode)
    }

    async fn get_status(&self) -> Option<StatusSnapshot> {
        self.fetch_json("/api/status", "status").await
    }

    async fn get_temp(&self) -> Option<f64> {
        self.fetch_json::<TempReading>("/api/temp", "temperature")
            .await
            .and_then(|reading| reading.temp)
    }

    async fn set_mode(&self, mode: u8) -> bool {
        self.command(self.get(&format!("/api/mode/set{}", mode)), "set mode")
            .await
    }

    async fn set_text(&self, text: &str) -> bool {
        self.command(self.get("/api/text/set").query(&[("value", text)]), "set text")
            .await
    }

    async fn set_color(&self, color: Rgb) -> bool {
        let request = self
            .get("/api/color/set")
            .query(&[("r", color.r), ("g", color.g), ("b", color.b)]);
        self.command(request, "set color").await
    }

    async fn set_brightness(&self, brightness: u8) -> bool {
        let request = self
            .get("/api/brightness/set")
            .query(&[("value", brightness)]);
        self.command(request, "set brightness").await
    }

    async fn set_speed(&self, speed_ms: u16) -> bool {
        let request = self.get("/api/speed/set").query(&[("value", speed_ms)]);
        self.command(request, "set speed").await
    }

    async fn set_effect(&self, effect: Effect) -> bool {
        let request = self
            .get("/api/mode/set")
            .query(&[("value", effect.as_ref())]);
        self.command(request, "set effect").await
    }

    async fn set_scroll(&self, on: bool) -> bool {
        let request = self
            .get("/api/scroll/set")
            .query(&[("value", Toggle::from(on).as_ref())]);
        self.command(request, "set scroll").await
    }

    async fn set_power(&self, on: bool) -> bool {
        let request = self
            .get("/api/power/set")
            .query(&[("value", Toggle::from(on).as_ref())]);
        self.command(request, "set power").await
    }

    async fn set_matrix(&self, w: u16, h: u16) -> bool {
        let request = self.get("/api/matrix/set").query(&[("w", w), ("h", h)]);
        self.command(request, "set matrix").await
    }

    async fn reboot(&self) -> bool {
        self.command(self.get("/api/reboot"), "reboot").await
    }

    async fn upload_firmware(&self, path: &Path) -> bool {
        let firmware = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) => {
                error!(
                    "[{}] Error reading firmware {}: {}",
                    self.host,
                    path.display(),
                    e
                );
                return false;
            }
        };

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "firmware.bin".to_string());
        let size = firmware.len();

        let part = match multipart::Part::bytes(firmware)
            .file_name(file_name)
            .mime_str("application/octet-stream")
        {
            Ok(part) => part,
            Err(e) => {
                error!("[{}] Error building firmware upload: {}", self.host, e);
                return false;
            }
        };
        let form = multipart::Form::new().part("firmware", part);

        info!(
            "[{}] Uploading firmware ({} bytes) to {}",
            self.host, size, self.base_url
        );

        let response = match self
            .http
            .post(format!("{}/api/update", self.base_url))
            .multipart(form)
            .timeout(UPLOAD_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!("[{}] Error uploading firmware: {}", self.host, e);
                return false;
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            error!("[{}] OTA failed with status {}", self.host, status);
            return false;
        }

        match response.json::<serde_json::Value>().await {
            Ok(result) => {
                info!("[{}] OTA result: {}", self.host, result);
                true
            }
            Err(e) => {
                error!("[{}] Malformed OTA response: {}", self.host, e);
                false
            }
        }
    }
}

/// Mock device for testing entities without a network
#[cfg(test)]
#[derive(Debug)]
pub struct MockDeviceApi {
    pub host: String,
    pub calls: std::sync::Mutex<Vec<String>>,
    pub mode: std::sync::Mutex<Option<u8>>,
    pub status: std::sync::Mutex<Option<StatusSnapshot>>,
    pub temp: std::sync::Mutex<Option<f64>>,
    pub accept_writes: std::sync::atomic::AtomicBool,
    pub reject_calls: std::sync::Mutex<std::collections::HashSet<&'static str>>,
}

#[cfg(test)]
impl MockDeviceApi {
    /// Create a mock that accepts every write and reports nothing
    pub fn new() -> Self {
        Self {
            host: "mock.local".to_string(),
            calls: std::sync::Mutex::new(Vec::new()),
            mode: std::sync::Mutex::new(None),
            status: std::sync::Mutex::new(None),
            temp: std::sync::Mutex::new(None),
            accept_writes: std::sync::atomic::AtomicBool::new(true),
            reject_calls: std::sync::Mutex::new(std::collections::HashSet::new()),
        }
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    pub fn set_mode_reading(&self, mode: Option<u8>) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn set_status(&self, status: Option<StatusSnapshot>) {
        *self.status.lock().unwrap() = status;
    }

    pub fn set_temp_reading(&self, temp: Option<f64>) {
        *self.temp.lock().unwrap() = temp;
    }

    pub fn reject_writes(&self) {
        self.accept_writes
            .store(false, std::sync::atomic::Ordering::SeqCst);
    }

    /// Reject one kind of write, e.g. `"set_brightness"`, and accept the rest
    pub fn reject_call(&self, name: &'static str) {
        self.reject_calls.lock().unwrap().insert(name);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> bool {
        let name = call.split('(').next().unwrap_or_default();
        let rejected = self.reject_calls.lock().unwrap().contains(name);
        self.calls.lock().unwrap().push(call);
        !rejected && self.accept_writes.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl DeviceApi for MockDeviceApi {
    fn host(&self) -> &str {
        &self.host
    }

    async fn get_mode(&self) -> Option<u8> {
        self.calls.lock().unwrap().push("get_mode".to_string());
        *self.mode.lock().unwrap()
    }

    async fn get_status(&self) -> Option<StatusSnapshot> {
        self.calls.lock().unwrap().push("get_status".to_string());
        self.status.lock().unwrap().clone()
    }

    async fn get_temp(&self) -> Option<f64> {
        self.calls.lock().unwrap().push("get_temp".to_string());
        *self.temp.lock().unwrap()
    }

    async fn set_mode(&self, mode: u8) -> bool {
        self.record(format!("set_mode({})", mode))
    }

    async fn set_text(&self, text: &str) -> bool {
        self.record(format!("set_text({})", text))
    }

    async fn set_color(&self, color: Rgb) -> bool {
        self.record(format!("set_color({}, {}, {})", color.r, color.g, color.b))
    }

    async fn set_brightness(&self, brightness: u8) -> bool {
        self.record(format!("set_brightness({})", brightness))
    }

    async fn set_speed(&self, speed_ms: u16) -> bool {
        self.record(format!("set_speed({})", speed_ms))
    }

    async fn set_effect(&self, effect: Effect) -> bool {
        self.record(format!("set_effect({})", effect))
    }

    async fn set_scroll(&self, on: bool) -> bool {
        self.record(format!("set_scroll({})", on))
    }

    async fn set_power(&self, on: bool) -> bool {
        self.record(format!("set_power({})", on))
    }

    async fn set_matrix(&self, w: u16, h: u16) -> bool {
        self.record(format!("set_matrix({}, {})", w, h))
    }

    async fn reboot(&self) -> bool {
        self.record("reboot".to_string())
    }

    async fn upload_firmware(&self, path: &Path) -> bool {
        self.record(format!("upload_firmware({})", path.display()))
    }
}
