use async_trait::async_trait;
use linkme::distributed_slice;

use super::Command;
use super::Entity;
use super::PLATFORMS;
use super::Platform;
use super::PlatformContext;
use super::PlatformSetupResult;
use super::StateDelta;
use crate::client::SharedApi;
use crate::config::DeviceKind;
use crate::snapshot::Toggle;

/// Whether the text scrolls across the matrix or stays put
pub struct ScrollSwitch {
    api: SharedApi,
    unique_id: String,
    on: bool,
}

impl ScrollSwitch {
    pub fn new(api: SharedApi, entry_id: &str) -> Self {
        Self {
            api,
            unique_id: format!("{}_scroll", entry_id),
            on: true,
        }
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    async fn set(&mut self, on: bool) -> bool {
        if !self.api.set_scroll(on).await {
            return false;
        }
        self.on = on;
        true
    }
}

#[async_trait]
impl Entity for ScrollSwitch {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn name(&self) -> &str {
        "Défilement"
    }

    fn platform(&self) -> Platform {
        Platform::Switch
    }

    fn state_json(&self) -> serde_json::Value {
        serde_json::json!({ "state": Toggle::from(self.on) })
    }

    async fn poll(&mut self) -> StateDelta {
        let Some(status) = self.api.get_status().await else {
            return StateDelta::Stale;
        };
        match status.scrolling.map(Toggle::is_on) {
            Some(on) if on != self.on => {
                self.on = on;
                StateDelta::Changed
            }
            _ => StateDelta::Unchanged,
        }
    }

    async fn apply(&mut self, command: Command) -> bool {
        match command {
            Command::TurnOn { .. } => self.set(true).await,
            Command::TurnOff => self.set(false).await,
            other => super::unsupported(&self.unique_id, &other),
        }
    }
}

#[distributed_slice(PLATFORMS)]
fn setup_switch(ctx: &PlatformContext) -> PlatformSetupResult {
    match ctx.entry.kind {
        DeviceKind::Neopixel => {
            let switch: Box<dyn Entity> =
                Box::new(ScrollSwitch::new(ctx.api.clone(), &ctx.entry.entry_id));
            vec![switch]
        }
        DeviceKind::Modes => Vec::new(),
    }
}
