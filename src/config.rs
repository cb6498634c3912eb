use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::panel::AlarmState;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no panels configured")]
    NoPanels,

    #[error("duplicate panel unique_id: {0}")]
    DuplicatePanelId(String),

    #[error("scan_interval_secs must be at least 1")]
    ZeroInterval,
}

/// Bridge configuration, loaded once at startup from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub device_id: String,
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    #[serde(default)]
    pub mqtt: MqttConfig,
    pub panels: Vec<PanelConfig>,
}

fn default_scan_interval() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_mqtt_client_id")]
    pub client_id: String,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_mqtt_client_id() -> String {
    "minim2mqtt".to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_mqtt_client_id(),
        }
    }
}

/// One physical alarm panel and its state-to-scenario wiring.
#[derive(Debug, Clone, Deserialize)]
pub struct PanelConfig {
    pub name: String,
    pub unique_id: String,
    pub scenarios: ScenarioMap,
}

/// Vendor scenario code for each arm state. Every field is required, so a
/// panel missing one of the five mappings is rejected when the file is
/// parsed rather than at the first state read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ScenarioMap {
    pub disarmed: u32,
    pub armed_away: u32,
    pub armed_home: u32,
    pub armed_night: u32,
    pub armed_vacation: u32,
}

impl ScenarioMap {
    pub fn code_for(&self, state: AlarmState) -> u32 {
        match state {
            AlarmState::Disarmed => self.disarmed,
            AlarmState::ArmedAway => self.armed_away,
            AlarmState::ArmedHome => self.armed_home,
            AlarmState::ArmedNight => self.armed_night,
            AlarmState::ArmedVacation => self.armed_vacation,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.panels.is_empty() {
            return Err(ConfigError::NoPanels);
        }
        if self.scan_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        let mut seen = HashSet::new();
        for panel in &self.panels {
            if !seen.insert(panel.unique_id.as_str()) {
                return Err(ConfigError::DuplicatePanelId(panel.unique_id.clone()));
            }
        }
        Ok(())
    }

    /// Look up a panel by its unique id, falling back to its display name.
    pub fn panel(&self, id: &str) -> Option<&PanelConfig> {
        self.panels
            .iter()
            .find(|p| p.unique_id == id)
            .or_else(|| self.panels.iter().find(|p| p.name == id))
    }
}
