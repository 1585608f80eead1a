//! Polling entity adapters.
//!
//! Every device capability is exposed as an entity implementing the
//! [`Entity`] trait. Platforms register a setup function in [`PLATFORMS`]
//! and are asked to build their entities for each configured device.

pub mod button;
pub mod light;
pub mod number;
pub mod select;
pub mod sensor;
pub mod switch;
pub mod text;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use linkme::distributed_slice;
use serde::Deserialize;
use serde::Serialize;
use strum::AsRefStr;
use strum::Display;
use tokio::sync::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::warn;

use crate::client::SharedApi;
use crate::config_flow::ConfigEntry;
use crate::snapshot::Effect;
use crate::snapshot::Rgb;

/// Entity platform, mirroring the Home Assistant entity domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Platform {
    Select,
    Sensor,
    Button,
    Light,
    Text,
    Number,
    Switch,
}

/// Outcome of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateDelta {
    /// Device answered, nothing the entity tracks changed
    Unchanged,
    /// Device answered and the cached state moved
    Changed,
    /// Device did not answer; the previous state is kept
    Stale,
}

/// User-initiated write to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    SelectOption {
        option: String,
    },
    SetValue {
        value: f64,
    },
    SetText {
        value: String,
    },
    TurnOn {
        #[serde(default)]
        rgb_color: Option<Rgb>,
        #[serde(default)]
        brightness: Option<u8>,
        #[serde(default)]
        effect: Option<Effect>,
    },
    TurnOff,
    Press,
}

/// Base trait that all entities must implement
#[async_trait]
pub trait Entity: Send + Sync {
    /// Stable identifier, `{entry_id}_{suffix}`
    fn unique_id(&self) -> &str;

    /// Human-readable name
    fn name(&self) -> &str;

    fn platform(&self) -> Platform;

    /// Serialize the cached state to JSON
    fn state_json(&self) -> serde_json::Value;

    /// Whether the entity is refreshed on the polling interval
    fn should_poll(&self) -> bool {
        true
    }

    /// Refresh the cached state from the device.
    ///
    /// Implementations keep their previous state when the device does not
    /// answer.
    async fn poll(&mut self) -> StateDelta {
        StateDelta::Unchanged
    }

    /// Apply a user command. Returns whether the device accepted it.
    async fn apply(&mut self, command: Command) -> bool;
}

/// Log and refuse a command an entity has no use for.
pub(crate) fn unsupported(unique_id: &str, command: &Command) -> bool {
    warn!("{} does not support command {:?}", unique_id, command);
    false
}

/// Whether the entity is showing its last synced value or talking to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Stale,
    Syncing,
}

/// Shared handle to a running entity.
///
/// The entity sits behind an async mutex; holding the lock is what *syncing*
/// means. A poll that finds the entity syncing is skipped instead of queued,
/// a command waits its turn. The last synced state is published on a watch
/// channel after every poll and command, so readers never wait on the device.
pub struct EntityHandle {
    unique_id: String,
    name: String,
    platform: Platform,
    should_poll: bool,
    entity: Mutex<Box<dyn Entity>>,
    state: watch::Sender<serde_json::Value>,
}

impl std::fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityHandle")
            .field("unique_id", &self.unique_id)
            .field("platform", &self.platform)
            .field("sync_state", &self.sync_state())
            .finish_non_exhaustive()
    }
}

impl EntityHandle {
    pub fn new(entity: Box<dyn Entity>) -> Self {
        Self {
            unique_id: entity.unique_id().to_string(),
            name: entity.name().to_string(),
            platform: entity.platform(),
            should_poll: entity.should_poll(),
            state: watch::Sender::new(entity.state_json()),
            entity: Mutex::new(entity),
        }
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn should_poll(&self) -> bool {
        self.should_poll
    }

    pub fn sync_state(&self) -> SyncState {
        match self.entity.try_lock() {
            Ok(_) => SyncState::Stale,
            Err(_) => SyncState::Syncing,
        }
    }

    /// Poll the device, or return `None` if the entity is already syncing.
    pub async fn poll(&self) -> Option<StateDelta> {
        let Ok(mut entity) = self.entity.try_lock() else {
            debug!("{} is syncing, skipping poll", self.unique_id);
            return None;
        };
        let delta = entity.poll().await;
        if delta == StateDelta::Changed {
            self.state.send_replace(entity.state_json());
        }
        Some(delta)
    }

    pub async fn apply(&self, command: Command) -> bool {
        let mut entity = self.entity.lock().await;
        let accepted = entity.apply(command).await;
        self.state.send_replace(entity.state_json());
        accepted
    }

    /// Entity description plus its last published state
    pub fn state_json(&self) -> serde_json::Value {
        let state = self.state.borrow().clone();
        serde_json::json!({
            "unique_id": self.unique_id,
            "name": self.name,
            "platform": self.platform,
            "state": state,
        })
    }

    /// Spawn the polling loop for this entity.
    ///
    /// The first tick fires immediately so the entity syncs right after setup.
    pub fn spawn_polling(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let handle = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match handle.poll().await {
                    Some(StateDelta::Changed) => debug!("{} updated", handle.unique_id),
                    Some(StateDelta::Stale) => {
                        debug!("{} poll failed, keeping previous state", handle.unique_id)
                    }
                    Some(StateDelta::Unchanged) | None => {}
                }
            }
        })
    }
}

/// What a platform needs to build entities for one device.
pub struct PlatformContext<'a> {
    pub entry: &'a ConfigEntry,
    pub api: &'a SharedApi,
}

/// Result type for platform setup functions
pub type PlatformSetupResult = Vec<Box<dyn Entity>>;

#[distributed_slice]
pub static PLATFORMS: [fn(&PlatformContext) -> PlatformSetupResult];

/// Build every entity the device kind supports.
pub fn build_entities(ctx: &PlatformContext) -> Vec<Box<dyn Entity>> {
    PLATFORMS
        .iter()
        .flat_map(|setup| setup(ctx))
        .filter(|entity| ctx.entry.kind.platforms().contains(&entity.platform()))
        .collect()
}
