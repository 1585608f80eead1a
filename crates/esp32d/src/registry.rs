use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;

use strum::Display;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::client::Esp32Client;
use crate::client::SharedApi;
use crate::config::DeviceConfig;
use crate::config_flow;
use crate::config_flow::ConfigEntry;
use crate::config_flow::FlowError;
use crate::entities::EntityHandle;
use crate::entities::PlatformContext;
use crate::entities::build_entities;
use crate::services::ServiceError;

/// Services exposed while at least one device is set up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Service {
    UpdateFirmware,
}

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Entry {0} is already set up")]
    DuplicateEntry(String),

    #[error(transparent)]
    Flow(#[from] FlowError),
}

/// One set up device with its running entities
pub struct Instance {
    pub entry: ConfigEntry,
    pub api: SharedApi,
    entities: Vec<Arc<EntityHandle>>,
    poll_tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("entry", &self.entry)
            .field("host", &self.api.host())
            .field("entities", &self.entities)
            .finish_non_exhaustive()
    }
}

impl Instance {
    pub fn entities(&self) -> &[Arc<EntityHandle>] {
        &self.entities
    }
}

/// Registry for storing and managing the lifetime of set up devices.
///
/// Instances are keyed by entry id and remember their setup order, which
/// decides the default firmware target.
#[derive(Debug)]
pub struct Registry {
    http: reqwest::Client,
    instances: HashMap<String, Instance>,
    order: Vec<String>,
    services: BTreeSet<Service>,
}

impl Registry {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            instances: HashMap::new(),
            order: Vec::new(),
            services: BTreeSet::new(),
        }
    }

    /// HTTP client shared by every device client
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Run the onboarding checks for a configured device, then set it up.
    pub async fn setup_device(
        &mut self,
        entry_id: &str,
        device: &DeviceConfig,
    ) -> Result<(), SetupError> {
        let entry = config_flow::create_entry(self, entry_id, device).await?;
        self.setup(entry)
    }

    /// Set up an entry with a client built on the shared HTTP client.
    pub fn setup(&mut self, entry: ConfigEntry) -> Result<(), SetupError> {
        let client = Esp32Client::new(entry.host.clone(), self.http.clone());
        let api: SharedApi = Arc::new(client);
        self.setup_with_api(entry, api)
    }

    /// Set up an entry on top of an existing device client.
    ///
    /// Builds every entity the device kind offers, starts their polling and
    /// registers the firmware service if this is the first instance.
    pub fn setup_with_api(
        &mut self,
        entry: ConfigEntry,
        api: SharedApi,
    ) -> Result<(), SetupError> {
        if self.instances.contains_key(&entry.entry_id) {
            return Err(SetupError::DuplicateEntry(entry.entry_id));
        }

        let ctx = PlatformContext {
            entry: &entry,
            api: &api,
        };
        let entities: Vec<Arc<EntityHandle>> = build_entities(&ctx)
            .into_iter()
            .map(|entity| Arc::new(EntityHandle::new(entity)))
            .collect();

        let poll_tasks = entities
            .iter()
            .filter(|handle| handle.should_poll())
            .map(|handle| handle.spawn_polling(entry.scan_interval))
            .collect();

        info!(
            "[{}] Set up {} ({}) with {} entities",
            entry.entry_id,
            entry.title,
            entry.kind,
            entities.len()
        );

        if self.services.insert(Service::UpdateFirmware) {
            info!("Registered service {}", Service::UpdateFirmware);
        }

        let entry_id = entry.entry_id.clone();
        self.order.push(entry_id.clone());
        self.instances.insert(
            entry_id,
            Instance {
                entry,
                api,
                entities,
                poll_tasks,
            },
        );
        Ok(())
    }

    /// Stop an instance and drop it. Returns whether the entry was set up.
    pub async fn unload(&mut self, entry_id: &str) -> bool {
        let Some(instance) = self.instances.remove(entry_id) else {
            warn!("[{}] Unload requested but entry is not set up", entry_id);
            return false;
        };
        self.order.retain(|id| id != entry_id);

        for task in &instance.poll_tasks {
            task.abort();
        }
        for task in instance.poll_tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("[{}] Poll task ended abnormally: {}", entry_id, e);
                }
            }
        }
        info!("[{}] Unloaded", entry_id);

        if self.instances.is_empty() && self.services.remove(&Service::UpdateFirmware) {
            info!("Removed service {}", Service::UpdateFirmware);
        }
        true
    }

    /// Unload every instance, newest first.
    pub async fn shutdown(&mut self) {
        let ids: Vec<String> = self.order.iter().rev().cloned().collect();
        for entry_id in ids {
            self.unload(&entry_id).await;
        }
    }

    pub fn has_service(&self, service: Service) -> bool {
        self.services.contains(&service)
    }

    pub fn contains(&self, entry_id: &str) -> bool {
        self.instances.contains_key(entry_id)
    }

    pub fn contains_host(&self, host: &str) -> bool {
        self.instances.values().any(|i| i.entry.host == host)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Entry ids in setup order
    pub fn entry_ids(&self) -> &[String] {
        &self.order
    }

    pub fn instance(&self, entry_id: &str) -> Option<&Instance> {
        self.instances.get(entry_id)
    }

    /// Every entity, grouped by instance in setup order
    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityHandle>> {
        self.order
            .iter()
            .filter_map(|id| self.instances.get(id))
            .flat_map(|instance| instance.entities().iter())
    }

    pub fn find_entity(&self, unique_id: &str) -> Option<Arc<EntityHandle>> {
        self.entities()
            .find(|handle| handle.unique_id() == unique_id)
            .cloned()
    }

    /// Pick the device a firmware update goes to.
    ///
    /// An explicit entry id must be set up. Without one the first instance
    /// set up is used.
    pub fn firmware_target(&self, entry_id: Option<&str>) -> Result<SharedApi, ServiceError> {
        if !self.has_service(Service::UpdateFirmware) {
            return Err(ServiceError::NotRegistered(Service::UpdateFirmware));
        }

        match entry_id {
            Some(entry_id) => self
                .instances
                .get(entry_id)
                .map(|instance| instance.api.clone())
                .ok_or_else(|| ServiceError::UnknownEntry(entry_id.to_string())),
            None => {
                let first = self
                    .order
                    .first()
                    .and_then(|id| self.instances.get(id))
                    .ok_or(ServiceError::NoInstances)?;
                if self.instances.len() > 1 {
                    warn!(
                        "{} devices configured and no entry_id given, updating [{}]",
                        self.instances.len(),
                        first.entry.entry_id
                    );
                } else {
                    debug!("[{}] Selected as firmware target", first.entry.entry_id);
                }
                Ok(first.api.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::client::MockDeviceApi;
    use crate::config::DeviceKind;
    use crate::test_support::FakeDevice;

    fn entry(entry_id: &str, kind: DeviceKind) -> ConfigEntry {
        ConfigEntry::new(entry_id, format!("{}.local", entry_id), kind, Duration::from_secs(60))
    }

    fn mock(host: &str) -> SharedApi {
        Arc::new(MockDeviceApi::new().with_host(host))
    }

    #[tokio::test]
    async fn test_service_lifecycle() {
        let mut registry = Registry::new(reqwest::Client::new());
        assert!(!registry.has_service(Service::UpdateFirmware));

        registry
            .setup_with_api(entry("a", DeviceKind::Modes), mock("a.local"))
            .unwrap();
        registry
            .setup_with_api(entry("b", DeviceKind::Neopixel), mock("b.local"))
            .unwrap();
        assert!(registry.has_service(Service::UpdateFirmware));
        assert_eq!(registry.len(), 2);

        assert!(registry.unload("a").await);
        assert!(registry.has_service(Service::UpdateFirmware));

        assert!(registry.unload("b").await);
        assert!(!registry.has_service(Service::UpdateFirmware));
        assert!(registry.is_empty());

        assert!(!registry.unload("b").await);
    }

    #[tokio::test]
    async fn test_duplicate_entry_rejected() {
        let mut registry = Registry::new(reqwest::Client::new());
        registry
            .setup_with_api(entry("a", DeviceKind::Modes), mock("a.local"))
            .unwrap();

        let err = registry
            .setup_with_api(entry("a", DeviceKind::Neopixel), mock("other.local"))
            .unwrap_err();
        assert!(matches!(err, SetupError::DuplicateEntry(id) if id == "a"));
        assert_eq!(registry.len(), 1);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_entities_and_lookup() {
        let mut registry = Registry::new(reqwest::Client::new());
        registry
            .setup_with_api(entry("a", DeviceKind::Modes), mock("a.local"))
            .unwrap();
        registry
            .setup_with_api(entry("b", DeviceKind::Neopixel), mock("b.local"))
            .unwrap();

        assert_eq!(registry.instance("a").unwrap().entities().len(), 4);
        assert_eq!(registry.entities().count(), 4 + 9);
        assert!(registry.find_entity("b_light").is_some());
        assert!(registry.find_entity("a_light").is_none());
        assert!(registry.contains_host("b.local"));
        assert_eq!(registry.entry_ids(), ["a".to_string(), "b".to_string()]);
        registry.shutdown().await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_firmware_target() {
        let mut registry = Registry::new(reqwest::Client::new());
        assert!(matches!(
            registry.firmware_target(None),
            Err(ServiceError::NotRegistered(_))
        ));

        registry
            .setup_with_api(entry("b", DeviceKind::Modes), mock("b.local"))
            .unwrap();
        registry
            .setup_with_api(entry("a", DeviceKind::Modes), mock("a.local"))
            .unwrap();

        // Setup order, not entry id order
        assert_eq!(registry.firmware_target(None).unwrap().host(), "b.local");
        assert_eq!(registry.firmware_target(Some("a")).unwrap().host(), "a.local");
        assert!(matches!(
            registry.firmware_target(Some("zzz")),
            Err(ServiceError::UnknownEntry(id)) if id == "zzz"
        ));
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_setup_device_runs_flow() {
        let fake = Arc::new(FakeDevice::new());
        let host = FakeDevice::serve(fake).await;
        let mut registry = Registry::new(reqwest::Client::new());
        let device = DeviceConfig {
            host: host.clone(),
            kind: DeviceKind::Neopixel,
            scan_interval_secs: Some(3600),
            enabled: true,
        };

        registry.setup_device("matrix", &device).await.unwrap();
        assert!(registry.contains("matrix"));
        assert_eq!(
            registry.instance("matrix").unwrap().entry.title,
            format!("ESP32 Modes ({})", host)
        );

        let err = registry.setup_device("again", &device).await.unwrap_err();
        assert!(matches!(
            err,
            SetupError::Flow(FlowError::AlreadyConfigured(_))
        ));
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_polling_starts_on_setup() {
        let device = Arc::new(MockDeviceApi::new());
        device.set_temp_reading(Some(21.0));
        let mut registry = Registry::new(reqwest::Client::new());
        registry
            .setup_with_api(entry("a", DeviceKind::Modes), device.clone())
            .unwrap();

        // First tick is immediate
        tokio::time::sleep(Duration::from_millis(100)).await;
        let calls = device.calls();
        assert!(calls.contains(&"get_temp".to_string()));
        assert!(calls.contains(&"get_mode".to_string()));
        assert!(!calls.contains(&"reboot".to_string()));

        let state = registry.find_entity("a_temperature").unwrap().state_json();
        assert_eq!(state["state"]["native_value"], 21.0);
        registry.shutdown().await;
    }
}
