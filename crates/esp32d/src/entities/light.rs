use async_trait::async_trait;
use linkme::distributed_slice;
use serde::Serialize;
use strum::IntoEnumIterator;
use tracing::info;

use super::Command;
use super::Entity;
use super::PLATFORMS;
use super::Platform;
use super::PlatformContext;
use super::PlatformSetupResult;
use super::StateDelta;
use crate::client::SharedApi;
use crate::config::DeviceKind;
use crate::snapshot::Effect;
use crate::snapshot::Rgb;
use crate::snapshot::StatusSnapshot;
use crate::snapshot::Toggle;

/// State of the NeoPixel matrix seen as a light.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LightState {
    /// Whether the matrix is powered.
    pub on: bool,

    /// Brightness level (0-255).
    pub brightness: u8,

    pub rgb_color: Rgb,

    pub effect: Effect,
}

impl Default for LightState {
    fn default() -> Self {
        Self {
            on: true,
            brightness: 60,
            rgb_color: Rgb::factory(),
            effect: Effect::Solid,
        }
    }
}

impl LightState {
    /// Overlay the fields present in a status snapshot.
    fn merge_status(&mut self, status: &StatusSnapshot) {
        if let Some(power) = status.power {
            self.on = power.is_on();
        }
        if let Some(brightness) = status.brightness {
            self.brightness = brightness;
        }
        if let Some(color) = status.color {
            self.rgb_color = color;
        }
        if let Some(effect) = status.effect() {
            self.effect = effect;
        }
    }
}

/// NeoPixel matrix as an RGB light with effects
pub struct NeoPixelLight {
    api: SharedApi,
    unique_id: String,
    state: LightState,
}

impl NeoPixelLight {
    pub fn new(api: SharedApi, entry_id: &str) -> Self {
        Self {
            api,
            unique_id: format!("{}_light", entry_id),
            state: LightState::default(),
        }
    }

    pub fn state(&self) -> &LightState {
        &self.state
    }

    /// Turn on and apply the requested attributes.
    ///
    /// Each attribute is its own request. A rejected attribute does not undo
    /// the ones already accepted; the next poll reconciles with the device.
    async fn turn_on(
        &mut self,
        rgb_color: Option<Rgb>,
        brightness: Option<u8>,
        effect: Option<Effect>,
    ) -> bool {
        let mut accepted = true;

        if !self.state.on {
            if self.api.set_power(true).await {
                self.state.on = true;
            } else {
                accepted = false;
            }
        }

        if let Some(color) = rgb_color {
            if self.api.set_color(color).await {
                self.state.rgb_color = color;
            } else {
                accepted = false;
            }
        }

        if let Some(brightness) = brightness {
            if self.api.set_brightness(brightness).await {
                self.state.brightness = brightness;
            } else {
                accepted = false;
            }
        }

        if let Some(effect) = effect {
            if self.api.set_effect(effect).await {
                self.state.effect = effect;
            } else {
                accepted = false;
            }
        }

        accepted
    }
}

#[async_trait]
impl Entity for NeoPixelLight {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn name(&self) -> &str {
        "Écran NeoPixel"
    }

    fn platform(&self) -> Platform {
        Platform::Light
    }

    fn state_json(&self) -> serde_json::Value {
        serde_json::json!({
            "state": Toggle::from(self.state.on),
            "brightness": self.state.brightness,
            "rgb_color": [self.state.rgb_color.r, self.state.rgb_color.g, self.state.rgb_color.b],
            "effect": self.state.effect,
            "effect_list": Effect::iter().collect::<Vec<_>>(),
            "color_mode": "rgb",
        })
    }

    async fn poll(&mut self) -> StateDelta {
        let Some(status) = self.api.get_status().await else {
            return StateDelta::Stale;
        };

        let before = self.state.clone();
        self.state.merge_status(&status);
        if self.state == before {
            StateDelta::Unchanged
        } else {
            StateDelta::Changed
        }
    }

    async fn apply(&mut self, command: Command) -> bool {
        match command {
            Command::TurnOn {
                rgb_color,
                brightness,
                effect,
            } => self.turn_on(rgb_color, brightness, effect).await,
            Command::TurnOff => {
                if !self.api.set_power(false).await {
                    return false;
                }
                info!("{} turned off", self.unique_id);
                self.state.on = false;
                true
            }
            other => super::unsupported(&self.unique_id, &other),
        }
    }
}

#[distributed_slice(PLATFORMS)]
fn setup_light(ctx: &PlatformContext) -> PlatformSetupResult {
    match ctx.entry.kind {
        DeviceKind::Neopixel => {
            let light: Box<dyn Entity> =
                Box::new(NeoPixelLight::new(ctx.api.clone(), &ctx.entry.entry_id));
            vec![light]
        }
        DeviceKind::Modes => Vec::new(),
    }
}
