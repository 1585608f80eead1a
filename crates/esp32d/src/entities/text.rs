use async_trait::async_trait;
use linkme::distributed_slice;
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

/// Scrolling text shown on the NeoPixel matrix
pub struct NeoPixelText {
    api: SharedApi,
    unique_id: String,
    value: String,
}

impl NeoPixelText {
    pub const MIN_LEN: usize = 1;
    pub const MAX_LEN: usize = 127;

    pub fn new(api: SharedApi, entry_id: &str) -> Self {
        Self {
            api,
            unique_id: format!("{}_text", entry_id),
            value: String::new(),
        }
    }

    pub fn native_value(&self) -> &str {
        &self.value
    }
}

#[async_trait]
impl Entity for NeoPixelText {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn name(&self) -> &str {
        "Texte défilant"
    }

    fn platform(&self) -> Platform {
        Platform::Text
    }

    fn state_json(&self) -> serde_json::Value {
        serde_json::json!({
            "native_value": self.value,
            "native_min": Self::MIN_LEN,
            "native_max": Self::MAX_LEN,
        })
    }

    async fn poll(&mut self) -> StateDelta {
        let Some(status) = self.api.get_status().await else {
            return StateDelta::Stale;
        };
        match status.text {
            Some(text) if text != self.value => {
                self.value = text;
                StateDelta::Changed
            }
            _ => StateDelta::Unchanged,
        }
    }

    async fn apply(&mut self, command: Command) -> bool {
        let Command::SetText { value } = command else {
            return super::unsupported(&self.unique_id, &command);
        };

        let len = value.chars().count();
        if !(Self::MIN_LEN..=Self::MAX_LEN).contains(&len) {
            warn!(
                "{} text must be {}-{} characters, got {}",
                self.unique_id,
                Self::MIN_LEN,
                Self::MAX_LEN,
                len
            );
            return false;
        }

        if !self.api.set_text(&value).await {
            return false;
        }
        self.value = value;
        true
    }
}

#[distributed_slice(PLATFORMS)]
fn setup_text(ctx: &PlatformContext) -> PlatformSetupResult {
    match ctx.entry.kind {
        DeviceKind::Neopixel => {
            let text: Box<dyn Entity> =
                Box::new(NeoPixelText::new(ctx.api.clone(), &ctx.entry.entry_id));
            vec![text]
        }
        DeviceKind::Modes => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::client::MockDeviceApi;
    use crate::snapshot::StatusSnapshot;

    #[tokio::test]
    async fn test_set_text() {
        let mock = Arc::new(MockDeviceApi::new());
        let mut text = NeoPixelText::new(mock.clone(), "dev");

        assert!(
            text.apply(Command::SetText {
                value: "Bonjour & bienvenue".to_string()
            })
            .await
        );
        assert_eq!(text.native_value(), "Bonjour & bienvenue");
        assert_eq!(mock.calls(), vec!["set_text(Bonjour & bienvenue)"]);
    }

    #[tokio::test]
    async fn test_length_limits() {
        let mock = Arc::new(MockDeviceApi::new());
        let mut text = NeoPixelText::new(mock.clone(), "dev");

        assert!(
            !text
                .apply(Command::SetText {
                    value: String::new()
                })
                .await
        );
        assert!(
            !text
                .apply(Command::SetText {
                    value: "x".repeat(128)
                })
                .await
        );
        // 127 multi-byte characters is still within the limit
        assert!(
            text.apply(Command::SetText {
                value: "é".repeat(127)
            })
            .await
        );
        assert_eq!(mock.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_write_and_poll() {
        let mock = Arc::new(MockDeviceApi::new());
        mock.reject_writes();
        let mut text = NeoPixelText::new(mock.clone(), "dev");

        assert!(
            !text
                .apply(Command::SetText {
                    value: "nope".to_string()
                })
                .await
        );
        assert_eq!(text.native_value(), "");

        mock.set_status(Some(StatusSnapshot {
            text: Some("FROM DEVICE".to_string()),
            ..Default::default()
        }));
        assert_eq!(text.poll().await, StateDelta::Changed);
        assert_eq!(text.native_value(), "FROM DEVICE");
    }
}
