//! Read-only sensors: current mode, internal temperature, free heap.

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

/// Replace `current` with `next`, reporting whether anything changed.
fn store<T: PartialEq>(current: &mut Option<T>, next: T) -> StateDelta {
    if current.as_ref() == Some(&next) {
        StateDelta::Unchanged
    } else {
        *current = Some(next);
        StateDelta::Changed
    }
}

/// Mode of the 3-mode controller as text (`Mode 2`)
pub struct ModeSensor {
    api: SharedApi,
    unique_id: String,
    state: Option<String>,
}

impl ModeSensor {
    pub fn new(api: SharedApi, entry_id: &str) -> Self {
        Self {
            api,
            unique_id: format!("{}_mode_sensor", entry_id),
            state: None,
        }
    }

    pub fn native_value(&self) -> Option<&str> {
        self.state.as_deref()
    }
}

#[async_trait]
impl Entity for ModeSensor {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn name(&self) -> &str {
        "Mode Actuel"
    }

    fn platform(&self) -> Platform {
        Platform::Sensor
    }

    fn state_json(&self) -> serde_json::Value {
        serde_json::json!({ "native_value": self.state })
    }

    async fn poll(&mut self) -> StateDelta {
        match self.api.get_mode().await {
            // Mode 0 is what the firmware reports while booting
            Some(0) => StateDelta::Unchanged,
            Some(mode) => store(&mut self.state, format!("Mode {}", mode)),
            None => StateDelta::Stale,
        }
    }

    async fn apply(&mut self, command: Command) -> bool {
        super::unsupported(&self.unique_id, &command)
    }
}

/// Internal temperature of the ESP32
pub struct TemperatureSensor {
    api: SharedApi,
    unique_id: String,
    state: Option<f64>,
}

impl TemperatureSensor {
    pub const UNIT: &'static str = "°C";

    pub fn new(api: SharedApi, entry_id: &str) -> Self {
        Self {
            api,
            unique_id: format!("{}_temperature", entry_id),
            state: None,
        }
    }

    pub fn native_value(&self) -> Option<f64> {
        self.state
    }
}

#[async_trait]
impl Entity for TemperatureSensor {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn name(&self) -> &str {
        "Température"
    }

    fn platform(&self) -> Platform {
        Platform::Sensor
    }

    fn state_json(&self) -> serde_json::Value {
        serde_json::json!({
            "native_value": self.state,
            "unit_of_measurement": Self::UNIT,
            "device_class": "temperature",
        })
    }

    async fn poll(&mut self) -> StateDelta {
        match self.api.get_temp().await {
            Some(temp) => store(&mut self.state, temp),
            None => StateDelta::Stale,
        }
    }

    async fn apply(&mut self, command: Command) -> bool {
        super::unsupported(&self.unique_id, &command)
    }
}

/// Free heap of the NeoPixel controller, in bytes
pub struct HeapSensor {
    api: SharedApi,
    unique_id: String,
    state: Option<u64>,
}

impl HeapSensor {
    pub fn new(api: SharedApi, entry_id: &str) -> Self {
        Self {
            api,
            unique_id: format!("{}_heap_free", entry_id),
            state: None,
        }
    }
}

#[async_trait]
impl Entity for HeapSensor {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn name(&self) -> &str {
        "Mémoire libre"
    }

    fn platform(&self) -> Platform {
        Platform::Sensor
    }

    fn state_json(&self) -> serde_json::Value {
        serde_json::json!({
            "native_value": self.state,
            "unit_of_measurement": "B",
            "device_class": "data_size",
        })
    }

    async fn poll(&mut self) -> StateDelta {
        let Some(status) = self.api.get_status().await else {
            return StateDelta::Stale;
        };
        match status.heap_free {
            Some(heap) => store(&mut self.state, heap),
            None => StateDelta::Unchanged,
        }
    }

    async fn apply(&mut self, command: Command) -> bool {
        super::unsupported(&self.unique_id, &command)
    }
}

#[distributed_slice(PLATFORMS)]
fn setup_sensor(ctx: &PlatformContext) -> PlatformSetupResult {
    let entry_id = &ctx.entry.entry_id;
    let mut sensors: PlatformSetupResult =
        vec![Box::new(TemperatureSensor::new(ctx.api.clone(), entry_id))];
    match ctx.entry.kind {
        DeviceKind::Modes => {
            sensors.push(Box::new(ModeSensor::new(ctx.api.clone(), entry_id)));
        }
        DeviceKind::Neopixel => {
            sensors.push(Box::new(HeapSensor::new(ctx.api.clone(), entry_id)));
        }
    }
    sensors
}
