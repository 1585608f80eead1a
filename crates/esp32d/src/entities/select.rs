use async_trait::async_trait;
use linkme::distributed_slice;
use tracing::info;
use tracing::warn;

use super::Command;
use super::Entity;
use super::PLATFORMS;
use super::Platform;
use super::PlatformContext;
use super::PlatformSetupResult;
use super::StateDelta;
use crate::client::SharedApi;
use crate::config::DeviceKind;

/// Options shown by the mode selector, in device mode order.
pub const MODE_OPTIONS: [&str; 3] = ["Mode 1", "Mode 2", "Mode 3"];

fn option_to_mode(option: &str) -> Option<u8> {
    MODE_OPTIONS
        .iter()
        .position(|o| *o == option)
        .map(|i| i as u8 + 1)
}

fn mode_to_option(mode: u8) -> Option<&'static str> {
    MODE_OPTIONS.get(usize::from(mode).checked_sub(1)?).copied()
}

/// Mode selector of the 3-mode controller
pub struct ModeSelect {
    api: SharedApi,
    unique_id: String,
    mode: u8,
}

impl ModeSelect {
    pub fn new(api: SharedApi, entry_id: &str) -> Self {
        Self {
            api,
            unique_id: format!("{}_mode", entry_id),
            mode: 1,
        }
    }

    pub fn current_option(&self) -> &'static str {
        mode_to_option(self.mode).unwrap_or(MODE_OPTIONS[0])
    }
}

#[async_trait]
impl Entity for ModeSelect {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn name(&self) -> &str {
        "Mode"
    }

    fn platform(&self) -> Platform {
        Platform::Select
    }

    fn state_json(&self) -> serde_json::Value {
        serde_json::json!({
            "current_option": self.current_option(),
            "options": MODE_OPTIONS,
        })
    }

    async fn poll(&mut self) -> StateDelta {
        let Some(mode) = self.api.get_mode().await else {
            return StateDelta::Stale;
        };

        if mode_to_option(mode).is_none() {
            warn!("{} device reported unknown mode {}", self.unique_id, mode);
            return StateDelta::Unchanged;
        }

        if mode == self.mode {
            StateDelta::Unchanged
        } else {
            self.mode = mode;
            StateDelta::Changed
        }
    }

    async fn apply(&mut self, command: Command) -> bool {
        let Command::SelectOption { option } = command else {
            return super::unsupported(&self.unique_id, &command);
        };

        let Some(mode) = option_to_mode(&option) else {
            warn!("{} unknown option {:?}", self.unique_id, option);
            return false;
        };

        if !self.api.set_mode(mode).await {
            return false;
        }

        info!("{} switched to {}", self.unique_id, option);
        self.mode = mode;
        true
    }
}

#[distributed_slice(PLATFORMS)]
fn setup_select(ctx: &PlatformContext) -> PlatformSetupResult {
    match ctx.entry.kind {
        DeviceKind::Modes => {
            let select: Box<dyn Entity> =
                Box::new(ModeSelect::new(ctx.api.clone(), &ctx.entry.entry_id));
            vec![select]
        }
        DeviceKind::Neopixel => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::client::Esp32Client;
    use crate::client::MockDeviceApi;
    use crate::test_support::FakeDevice;

    #[test]
    fn test_option_mapping() {
        assert_eq!(option_to_mode("Mode 1"), Some(1));
        assert_eq!(option_to_mode("Mode 3"), Some(3));
        assert_eq!(option_to_mode("Mode 4"), None);
        assert_eq!(mode_to_option(2), Some("Mode 2"));
        assert_eq!(mode_to_option(0), None);
        assert_eq!(mode_to_option(4), None);
    }

    #[tokio::test]
    async fn test_write_then_poll_against_device() {
        let device = Arc::new(FakeDevice::new());
        let host = FakeDevice::serve(device.clone()).await;
        let api: SharedApi = Arc::new(Esp32Client::new(host, reqwest::Client::new()));
        let mut select = ModeSelect::new(api, "dev");

        assert!(
            select
                .apply(Command::SelectOption {
                    option: "Mode 2".to_string()
                })
                .await
        );
        assert_eq!(select.poll().await, StateDelta::Unchanged);
        assert_eq!(select.current_option(), "Mode 2");
        assert_eq!(
            device.requests(),
            vec!["GET /api/mode/set2", "GET /api/mode"]
        );
        assert_eq!(device.mode.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejected_write_keeps_option() {
        let mock = Arc::new(MockDeviceApi::new());
        mock.reject_writes();
        let mut select = ModeSelect::new(mock.clone(), "dev");

        assert!(
            !select
                .apply(Command::SelectOption {
                    option: "Mode 3".to_string()
                })
                .await
        );
        assert_eq!(select.current_option(), "Mode 1");
        assert_eq!(mock.calls(), vec!["set_mode(3)"]);
    }

    #[tokio::test]
    async fn test_unknown_option_makes_no_call() {
        let mock = Arc::new(MockDeviceApi::new());
        let mut select = ModeSelect::new(mock.clone(), "dev");

        assert!(
            !select
                .apply(Command::SelectOption {
                    option: "Turbo".to_string()
                })
                .await
        );
        assert!(!select.apply(Command::Press).await);
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_poll_failure_and_unknown_mode_keep_option() {
        let mock = Arc::new(MockDeviceApi::new());
        let mut select = ModeSelect::new(mock.clone(), "dev");

        mock.set_mode_reading(Some(3));
        assert_eq!(select.poll().await, StateDelta::Changed);

        mock.set_mode_reading(None);
        assert_eq!(select.poll().await, StateDelta::Stale);
        assert_eq!(select.current_option(), "Mode 3");

        mock.set_mode_reading(Some(9));
        assert_eq!(select.poll().await, StateDelta::Unchanged);
        assert_eq!(select.current_option(), "Mode 3");
    }
}
