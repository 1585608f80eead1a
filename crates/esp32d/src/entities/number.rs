//! Numeric sliders: scroll speed and matrix dimensions.

use async_trait::async_trait;
use linkme::distributed_slice;
use serde::Serialize;
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
use crate::snapshot::MatrixSize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberMode {
    Slider,
    Box,
}

/// Range and presentation of a number entity.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct NumberSpec {
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub unit: &'static str,
    pub mode: NumberMode,
}

impl NumberSpec {
    /// Whether `value` lies within range and on a step.
    pub fn accepts(&self, value: f64) -> bool {
        if !value.is_finite() || value < self.min || value > self.max {
            return false;
        }
        let steps = (value - self.min) / self.step;
        (steps - steps.round()).abs() < 1e-9
    }
}

/// Milliseconds between scroll frames
pub struct ScrollSpeed {
    api: SharedApi,
    unique_id: String,
    value: u16,
}

impl ScrollSpeed {
    pub const SPEC: NumberSpec = NumberSpec {
        min: 5.0,
        max: 500.0,
        step: 5.0,
        unit: "ms",
        mode: NumberMode::Slider,
    };

    pub fn new(api: SharedApi, entry_id: &str) -> Self {
        Self {
            api,
            unique_id: format!("{}_speed", entry_id),
            value: 40,
        }
    }

    pub fn native_value(&self) -> u16 {
        self.value
    }
}

#[async_trait]
impl Entity for ScrollSpeed {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn name(&self) -> &str {
        "Vitesse défilement"
    }

    fn platform(&self) -> Platform {
        Platform::Number
    }

    fn state_json(&self) -> serde_json::Value {
        serde_json::json!({ "native_value": self.value, "spec": Self::SPEC })
    }

    async fn poll(&mut self) -> StateDelta {
        let Some(status) = self.api.get_status().await else {
            return StateDelta::Stale;
        };
        match status.speed {
            Some(speed) if speed != self.value => {
                self.value = speed;
                StateDelta::Changed
            }
            _ => StateDelta::Unchanged,
        }
    }

    async fn apply(&mut self, command: Command) -> bool {
        let Command::SetValue { value } = command else {
            return super::unsupported(&self.unique_id, &command);
        };
        if !Self::SPEC.accepts(value) {
            warn!("{} rejecting out of range value {}", self.unique_id, value);
            return false;
        }

        let speed = value as u16;
        if !self.api.set_speed(speed).await {
            return false;
        }
        self.value = speed;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Width,
    Height,
}

/// One dimension of the LED matrix.
///
/// The device only accepts both dimensions together, so each entity caches
/// the other one from its last poll.
pub struct MatrixDimension {
    api: SharedApi,
    unique_id: String,
    axis: Axis,
    size: MatrixSize,
}

impl MatrixDimension {
    pub const WIDTH_SPEC: NumberSpec = NumberSpec {
        min: 1.0,
        max: 256.0,
        step: 1.0,
        unit: "px",
        mode: NumberMode::Box,
    };

    pub const HEIGHT_SPEC: NumberSpec = NumberSpec {
        min: 1.0,
        max: 64.0,
        step: 1.0,
        unit: "px",
        mode: NumberMode::Box,
    };

    pub fn new(api: SharedApi, entry_id: &str, axis: Axis) -> Self {
        let suffix = match axis {
            Axis::Width => "matrix_w",
            Axis::Height => "matrix_h",
        };
        Self {
            api,
            unique_id: format!("{}_{}", entry_id, suffix),
            axis,
            size: MatrixSize::factory(),
        }
    }

    pub fn spec(&self) -> NumberSpec {
        match self.axis {
            Axis::Width => Self::WIDTH_SPEC,
            Axis::Height => Self::HEIGHT_SPEC,
        }
    }

    pub fn native_value(&self) -> u16 {
        match self.axis {
            Axis::Width => self.size.w,
            Axis::Height => self.size.h,
        }
    }

    pub fn size(&self) -> MatrixSize {
        self.size
    }

    fn resized(&self, value: u16) -> MatrixSize {
        match self.axis {
            Axis::Width => MatrixSize::new(value, self.size.h),
            Axis::Height => MatrixSize::new(self.size.w, value),
        }
    }
}

#[async_trait]
impl Entity for MatrixDimension {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn name(&self) -> &str {
        match self.axis {
            Axis::Width => "Largeur matrice",
            Axis::Height => "Hauteur matrice",
        }
    }

    fn platform(&self) -> Platform {
        Platform::Number
    }

    fn state_json(&self) -> serde_json::Value {
        serde_json::json!({ "native_value": self.native_value(), "spec": self.spec() })
    }

    async fn poll(&mut self) -> StateDelta {
        let Some(status) = self.api.get_status().await else {
            return StateDelta::Stale;
        };
        match status.matrix {
            Some(size) if size != self.size => {
                let before = self.native_value();
                self.size = size;
                if self.native_value() == before {
                    StateDelta::Unchanged
                } else {
                    StateDelta::Changed
                }
            }
            _ => StateDelta::Unchanged,
        }
    }

    async fn apply(&mut self, command: Command) -> bool {
        let Command::SetValue { value } = command else {
            return super::unsupported(&self.unique_id, &command);
        };
        if !self.spec().accepts(value) {
            warn!("{} rejecting out of range value {}", self.unique_id, value);
            return false;
        }

        let size = self.resized(value as u16);
        if !size.fits() {
            warn!(
                "{} {}x{} exceeds {} pixels, ignoring",
                self.unique_id,
                size.w,
                size.h,
                MatrixSize::MAX_PIXELS
            );
            return false;
        }

        if !self.api.set_matrix(size.w, size.h).await {
            return false;
        }
        self.size = size;
        true
    }
}

#[distributed_slice(PLATFORMS)]
fn setup_number(ctx: &PlatformContext) -> PlatformSetupResult {
    let entry_id = &ctx.entry.entry_id;
    match ctx.entry.kind {
        DeviceKind::Neopixel => vec![
            Box::new(ScrollSpeed::new(ctx.api.clone(), entry_id)) as Box<dyn Entity>,
            Box::new(MatrixDimension::new(ctx.api.clone(), entry_id, Axis::Width)),
            Box::new(MatrixDimension::new(ctx.api.clone(), entry_id, Axis::Height)),
        ],
        DeviceKind::Modes => Vec::new(),
    }
}
