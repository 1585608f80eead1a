//! Typed views of the JSON documents the ESP32 firmware returns.
//!
//! The firmware is loose about its payloads: toggles are usually `"ON"`/`"OFF"`
//! strings but some builds send booleans, and older builds omit fields they do
//! not support. Every field is therefore optional, unknown fields are
//! ignored, and a status field with an unexpected value reads as absent
//! instead of failing the whole document.

use serde::Deserialize;
use serde::Serialize;
use strum::AsRefStr;
use strum::Display;
use strum::EnumIter;
use strum::EnumString;

/// An RGB color as the device reports and accepts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default = "Rgb::factory")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Color the NeoPixel firmware boots with.
    pub const fn factory() -> Self {
        Self::new(255, 80, 0)
    }
}

/// Dimensions of the LED matrix in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default = "MatrixSize::factory")]
pub struct MatrixSize {
    pub w: u16,
    pub h: u16,
}

impl MatrixSize {
    /// Pixel budget of the controller (8 rows of 128 columns).
    pub const MAX_PIXELS: u32 = 1024;

    pub const fn new(w: u16, h: u16) -> Self {
        Self { w, h }
    }

    pub const fn factory() -> Self {
        Self::new(64, 8)
    }

    pub fn pixels(&self) -> u32 {
        u32::from(self.w) * u32::from(self.h)
    }

    pub fn fits(&self) -> bool {
        self.pixels() <= Self::MAX_PIXELS
    }
}

/// Two-state value encoded as `ON`/`OFF` on the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub fn is_on(self) -> bool {
        self == Toggle::On
    }
}

impl From<bool> for Toggle {
    fn from(on: bool) -> Self {
        if on {
            Toggle::On
        } else {
            Toggle::Off
        }
    }
}

/// Display effect of the NeoPixel matrix.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Effect {
    #[default]
    Solid,
    Rainbow,
}

impl Effect {
    /// Map the firmware's `mode` string onto an effect.
    ///
    /// Anything the firmware reports that is not `rainbow` renders as a solid
    /// color.
    pub fn from_device(mode: &str) -> Self {
        if mode == "rainbow" {
            Effect::Rainbow
        } else {
            Effect::Solid
        }
    }
}

/// Full NeoPixel state as returned by `GET /api/status` and by every setter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    #[serde(default, deserialize_with = "lenient")]
    pub mode: Option<String>,

    #[serde(default, deserialize_with = "deserialize_toggle")]
    pub power: Option<Toggle>,

    #[serde(default, deserialize_with = "lenient")]
    pub brightness: Option<u8>,

    #[serde(default, deserialize_with = "lenient")]
    pub color: Option<Rgb>,

    /// Milliseconds between scroll frames.
    #[serde(default, deserialize_with = "lenient")]
    pub speed: Option<u16>,

    #[serde(default, deserialize_with = "lenient")]
    pub matrix: Option<MatrixSize>,

    #[serde(default, deserialize_with = "lenient")]
    pub text: Option<String>,

    #[serde(default, deserialize_with = "deserialize_toggle")]
    pub scrolling: Option<Toggle>,

    #[serde(default, deserialize_with = "lenient")]
    pub heap_free: Option<u64>,
}

impl StatusSnapshot {
    pub fn effect(&self) -> Option<Effect> {
        self.mode.as_deref().map(Effect::from_device)
    }
}

/// Body of `GET /api/mode`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct ModeReading {
    #[serde(default)]
    pub mode: Option<u8>,
}

/// Body of `GET /api/temp`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct TempReading {
    #[serde(default)]
    pub temp: Option<f64>,
}

/// Deserialize a field, reading a value of the wrong shape as absent.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).ok())
}

/// Deserialize a toggle that may arrive as a string or a boolean.
///
/// Only the exact string `ON` (or `true`) counts as on, every other string is
/// off.
fn deserialize_toggle<'de, D>(deserializer: D) -> Result<Option<Toggle>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    struct ToggleVisitor;

    impl<'de> de::Visitor<'de> for ToggleVisitor {
        type Value = Option<Toggle>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("\"ON\", \"OFF\", a boolean, or null")
        }

        fn visit_none<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E> {
            Ok(Some(Toggle::from(v)))
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
            Ok(Some(Toggle::from(v == "ON")))
        }

        fn visit_i64<E>(self, _: i64) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_u64<E>(self, _: u64) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_f64<E>(self, _: f64) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            while seq.next_element::<de::IgnoredAny>()?.is_some() {}
            Ok(None)
        }

        fn visit_map<A: de::MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            while map.next_entry::<de::IgnoredAny, de::IgnoredAny>()?.is_some() {}
            Ok(None)
        }
    }

    deserializer.deserialize_any(ToggleVisitor)
}
