use log::debug;
use rumqttc::{AsyncClient, ClientError, QoS};
use serde_json::json;

use crate::api::MinimResult;
use crate::config::Config;
use crate::panel::MANUFACTURER;
use crate::Runtime;

/// Connectivity sensor for the alarm device: on while the cloud reports the
/// device as reachable. Reads the same cached snapshot as the panels.
pub struct ConnectivitySensor {
    device_id: String,
    unique_id: String,
    name: String,
}

impl ConnectivitySensor {
    pub fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            unique_id: format!("{device_id}_connectivity"),
            name: "Connectivity".to_string(),
        }
    }

    fn base_topic(&self) -> String {
        format!("homeassistant/binary_sensor/{}", self.unique_id)
    }

    pub fn state_topic(&self) -> String {
        format!("{}/state", self.base_topic())
    }

    pub fn config_topic(&self) -> String {
        format!("{}/config", self.base_topic())
    }

    /// ON/OFF payload, or nothing when the device is absent from the
    /// snapshot.
    pub fn state(&self, result: Option<&MinimResult>) -> Option<&'static str> {
        let device = result?.device(&self.device_id)?;
        Some(if device.connected { "ON" } else { "OFF" })
    }

    pub async fn publish_discovery(
        &self,
        mqtt: &AsyncClient,
        sw_version: &str,
    ) -> Result<(), ClientError> {
        let payload = json!({
            "name": self.name,
            "unique_id": self.unique_id,
            "state_topic": self.state_topic(),
            "device_class": "connectivity",
            "payload_on": "ON",
            "payload_off": "OFF",
            "device": {
                "identifiers": [self.device_id],
                "name": self.device_id,
                "manufacturer": MANUFACTURER,
                "sw_version": sw_version,
            },
        });
        mqtt.publish(
            self.config_topic(),
            QoS::AtLeastOnce,
            true,
            payload.to_string(),
        )
        .await
    }

    pub async fn publish_state(
        &self,
        mqtt: &AsyncClient,
        result: Option<&MinimResult>,
    ) -> Result<(), ClientError> {
        let Some(state) = self.state(result) else {
            debug!(
                "sensor {}: device absent from snapshot, nothing to publish",
                self.unique_id
            );
            return Ok(());
        };
        mqtt.publish(self.state_topic(), QoS::AtLeastOnce, true, state)
            .await
    }
}

pub fn setup(_runtime: &Runtime, config: &Config) -> ConnectivitySensor {
    ConnectivitySensor::new(&config.device_id)
}
