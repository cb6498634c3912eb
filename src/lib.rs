//! # minim2mqtt
//!
//! Bridge between the Minim alarm cloud and MQTT / Home Assistant.
//!
//! The cloud is polled on a fixed interval; the cached snapshot feeds one
//! alarm control panel entity per configured panel plus a connectivity
//! sensor, all exposed through Home Assistant MQTT discovery. Commands on
//! the panel command topics are translated into cloud scenario activations.

use std::sync::Arc;

pub mod api;
pub mod binary_sensor;
pub mod config;
pub mod coordinator;
pub mod mqtt;
pub mod panel;

// Re-exports for convenience
pub use api::{ApiClient, ApiError, MinimDeviceData, MinimResult};
pub use config::{Config, ConfigError, MqttConfig, PanelConfig, ScenarioMap};
pub use coordinator::{Coordinator, SetupError};
pub use panel::{AlarmPanel, AlarmState};

/// Everything built at setup time: the coordinator and the single cloud
/// client it shares with every entity. Passed explicitly into each entity
/// setup function.
pub struct Runtime {
    pub coordinator: Arc<Coordinator>,
    pub client: Arc<ApiClient>,
}
