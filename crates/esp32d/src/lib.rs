pub mod api;
pub mod client;
pub mod config;
pub mod config_flow;
pub mod entities;
pub mod registry;
pub mod services;
pub mod snapshot;

#[cfg(test)]
mod test_support;

pub use client::DeviceApi;
pub use client::Esp32Client;
pub use config::Config;
pub use config::DeviceKind;
pub use config::LogLevel;
pub use config_flow::ConfigEntry;
pub use entities::Command;
pub use entities::Entity;
pub use entities::EntityHandle;
pub use registry::Registry;
pub use services::ServiceError;
