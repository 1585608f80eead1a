use async_trait::async_trait;
use linkme::distributed_slice;
use tracing::info;

use super::Command;
use super::Entity;
use super::PLATFORMS;
use super::Platform;
use super::PlatformContext;
use super::PlatformSetupResult;
use crate::client::SharedApi;

/// Reboot button, offered by both controller kinds
pub struct RebootButton {
    api: SharedApi,
    unique_id: String,
}

impl RebootButton {
    pub fn new(api: SharedApi, entry_id: &str) -> Self {
        Self {
            api,
            unique_id: format!("{}_reboot", entry_id),
        }
    }
}

#[async_trait]
impl Entity for RebootButton {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn name(&self) -> &str {
        "Reboot"
    }

    fn platform(&self) -> Platform {
        Platform::Button
    }

    fn state_json(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    fn should_poll(&self) -> bool {
        false
    }

    async fn apply(&mut self, command: Command) -> bool {
        if command != Command::Press {
            return super::unsupported(&self.unique_id, &command);
        }
        let accepted = self.api.reboot().await;
        if accepted {
            info!("[{}] ESP32 reboot requested", self.api.host());
        }
        accepted
    }
}

#[distributed_slice(PLATFORMS)]
fn setup_button(ctx: &PlatformContext) -> PlatformSetupResult {
    let button: Box<dyn Entity> =
        Box::new(RebootButton::new(ctx.api.clone(), &ctx.entry.entry_id));
    vec![button]
}
