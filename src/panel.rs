use std::sync::Arc;

use log::{debug, info, warn};
use rumqttc::{AsyncClient, ClientError, QoS};
use serde_json::json;

use crate::api::{ApiClient, MinimResult};
use crate::config::{Config, PanelConfig, ScenarioMap};
use crate::Runtime;

pub const MANUFACTURER: &str = "Minim";

/// Abstract arm state of one alarm panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmState {
    Disarmed,
    ArmedAway,
    ArmedHome,
    ArmedNight,
    ArmedVacation,
}

impl AlarmState {
    /// Match order when scanning active scenario codes. When a code is
    /// shared by several states (a misconfiguration), away wins over
    /// disarmed, disarmed over night, night over home, home over vacation.
    pub const PRIORITY: [AlarmState; 5] = [
        AlarmState::ArmedAway,
        AlarmState::Disarmed,
        AlarmState::ArmedNight,
        AlarmState::ArmedHome,
        AlarmState::ArmedVacation,
    ];

    /// Home Assistant state string.
    pub fn as_str(self) -> &'static str {
        match self {
            AlarmState::Disarmed => "disarmed",
            AlarmState::ArmedAway => "armed_away",
            AlarmState::ArmedHome => "armed_home",
            AlarmState::ArmedNight => "armed_night",
            AlarmState::ArmedVacation => "armed_vacation",
        }
    }

    /// Command payload published by Home Assistant on the command topic.
    pub fn command_payload(self) -> &'static str {
        match self {
            AlarmState::Disarmed => "DISARM",
            AlarmState::ArmedAway => "ARM_AWAY",
            AlarmState::ArmedHome => "ARM_HOME",
            AlarmState::ArmedNight => "ARM_NIGHT",
            AlarmState::ArmedVacation => "ARM_VACATION",
        }
    }

    pub fn from_command(payload: &str) -> Option<AlarmState> {
        match payload {
            "DISARM" => Some(AlarmState::Disarmed),
            "ARM_AWAY" => Some(AlarmState::ArmedAway),
            "ARM_HOME" => Some(AlarmState::ArmedHome),
            "ARM_NIGHT" => Some(AlarmState::ArmedNight),
            "ARM_VACATION" => Some(AlarmState::ArmedVacation),
            _ => None,
        }
    }
}

/// Map the device's active scenario list onto an arm state.
///
/// Active codes are scanned in the order the cloud reports them; each code is
/// checked against the configured states in [`AlarmState::PRIORITY`] order
/// and the first match wins. No match means the panel state is unknown.
pub fn scenario_state(scenarios: &ScenarioMap, active: &str) -> Option<AlarmState> {
    for code in active
        .split(',')
        .filter_map(|part| part.trim().parse::<u32>().ok())
    {
        for state in AlarmState::PRIORITY {
            if scenarios.code_for(state) == code {
                return Some(state);
            }
        }
    }
    None
}

/// One alarm control panel entity, bound to the shared cloud client and a
/// single [`PanelConfig`].
#[derive(Clone)]
pub struct AlarmPanel {
    client: Arc<ApiClient>,
    device_id: String,
    config: PanelConfig,
}

impl AlarmPanel {
    pub fn new(client: Arc<ApiClient>, device_id: &str, config: PanelConfig) -> Self {
        Self {
            client,
            device_id: device_id.to_string(),
            config,
        }
    }

    pub fn unique_id(&self) -> &str {
        &self.config.unique_id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    fn base_topic(&self) -> String {
        format!("homeassistant/alarm_control_panel/{}", self.config.unique_id)
    }

    pub fn state_topic(&self) -> String {
        format!("{}/state", self.base_topic())
    }

    pub fn command_topic(&self) -> String {
        format!("{}/set", self.base_topic())
    }

    pub fn config_topic(&self) -> String {
        format!("{}/config", self.base_topic())
    }

    /// Current arm state, computed from the cached snapshot. Never fails:
    /// a missing snapshot, a missing device entry or an unmatched scenario
    /// list all read as unknown.
    pub fn alarm_state(&self, result: Option<&MinimResult>) -> Option<AlarmState> {
        let Some(result) = result else {
            debug!("panel {}: no snapshot yet", self.config.unique_id);
            return None;
        };
        let Some(device) = result.device(&self.device_id) else {
            debug!(
                "panel {}: device {} absent from snapshot",
                self.config.unique_id, self.device_id
            );
            return None;
        };
        scenario_state(&self.config.scenarios, &device.active_scenarios)
    }

    /// Publish the Home Assistant discovery config. Custom bypass is
    /// deliberately not announced; the vendor has no scenario for it.
    pub async fn publish_discovery(
        &self,
        mqtt: &AsyncClient,
        sw_version: &str,
    ) -> Result<(), ClientError> {
        let payload = json!({
            "name": self.config.name,
            "unique_id": self.config.unique_id,
            "state_topic": self.state_topic(),
            "command_topic": self.command_topic(),
            "code_arm_required": false,
            "payload_disarm": AlarmState::Disarmed.command_payload(),
            "payload_arm_away": AlarmState::ArmedAway.command_payload(),
            "payload_arm_home": AlarmState::ArmedHome.command_payload(),
            "payload_arm_night": AlarmState::ArmedNight.command_payload(),
            "payload_arm_vacation": AlarmState::ArmedVacation.command_payload(),
            "supported_features": ["arm_away", "arm_home", "arm_night", "arm_vacation"],
            "device": {
                "identifiers": [self.config.unique_id],
                "name": self.config.name,
                "manufacturer": MANUFACTURER,
                "model": self.config.name,
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

    pub async fn subscribe(&self, mqtt: &AsyncClient) -> Result<(), ClientError> {
        mqtt.subscribe(self.command_topic(), QoS::AtLeastOnce).await
    }

    /// Publish the current state, retained. Unknown is published literally
    /// so a stale retained value never passes for a current one.
    pub async fn publish_state(
        &self,
        mqtt: &AsyncClient,
        result: Option<&MinimResult>,
    ) -> Result<(), ClientError> {
        let state = self
            .alarm_state(result)
            .map(AlarmState::as_str)
            .unwrap_or("unknown");
        mqtt.publish(self.state_topic(), QoS::AtLeastOnce, true, state)
            .await
    }

    /// Handle a command payload from the command topic.
    pub async fn handle_command(&self, payload: &str) {
        let Some(target) = AlarmState::from_command(payload) else {
            warn!(
                "panel {}: unknown command payload {payload:?}",
                self.config.unique_id
            );
            return;
        };
        self.arm(target).await;
    }

    /// Activate the scenario configured for the target state. Fire and
    /// forget: the cloud does not report the panel's verdict and the next
    /// poll cycle shows whether the command took effect.
    async fn arm(&self, target: AlarmState) {
        let code = self.config.scenarios.code_for(target);
        info!(
            "panel {}: activating scenario {code} for {}",
            self.config.unique_id,
            target.as_str()
        );
        if let Err(err) = self.client.activate_scenario(&self.device_id, code).await {
            warn!(
                "panel {}: scenario activation failed: {err}",
                self.config.unique_id
            );
        }
    }
}

/// Build one alarm panel entity per configured panel, all sharing the
/// runtime's cloud client.
pub fn setup(runtime: &Runtime, config: &Config) -> Vec<AlarmPanel> {
    config
        .panels
        .iter()
        .map(|panel| AlarmPanel::new(runtime.client.clone(), &config.device_id, panel.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn scenarios() -> ScenarioMap {
        ScenarioMap {
            armed_away: 2,
            disarmed: 0,
            armed_night: 4,
            armed_home: 1,
            armed_vacation: 3,
        }
    }

    fn panel_config() -> PanelConfig {
        PanelConfig {
            name: "House".to_string(),
            unique_id: "minim_house".to_string(),
            scenarios: scenarios(),
        }
    }

    fn snapshot(active: &str) -> MinimResult {
        serde_json::from_str(&format!(
            r#"{{"Data": {{"dev-1": {{"Name": "House", "ActiveScenarios": "{active}", "Connected": true, "Firmware": "2.13"}}}}}}"#
        ))
        .unwrap()
    }

    fn offline_panel() -> AlarmPanel {
        let client = Arc::new(ApiClient::with_base_url("http://127.0.0.1:1", "u", "p", "c"));
        AlarmPanel::new(client, "dev-1", panel_config())
    }

    #[test]
    fn test_active_order_wins_over_priority_order() {
        // 4 is scanned first and matches night before 1 is ever looked at.
        assert_eq!(
            scenario_state(&scenarios(), "4,1"),
            Some(AlarmState::ArmedNight)
        );
        // Reversed list: 1 is scanned first and matches home.
        assert_eq!(
            scenario_state(&scenarios(), "1,4"),
            Some(AlarmState::ArmedHome)
        );
    }

    #[test]
    fn test_priority_order_breaks_shared_code_ties() {
        // All five states share code 7: away wins.
        let shared = ScenarioMap {
            disarmed: 7,
            armed_away: 7,
            armed_home: 7,
            armed_night: 7,
            armed_vacation: 7,
        };
        assert_eq!(scenario_state(&shared, "7"), Some(AlarmState::ArmedAway));

        // Away out of the tie: disarmed wins over night, home, vacation.
        let shared = ScenarioMap {
            disarmed: 7,
            armed_away: 2,
            armed_home: 7,
            armed_night: 7,
            armed_vacation: 7,
        };
        assert_eq!(scenario_state(&shared, "7"), Some(AlarmState::Disarmed));
    }

    #[test]
    fn test_each_state_maps_from_its_code() {
        let map = scenarios();
        assert_eq!(scenario_state(&map, "2"), Some(AlarmState::ArmedAway));
        assert_eq!(scenario_state(&map, "0"), Some(AlarmState::Disarmed));
        assert_eq!(scenario_state(&map, "4"), Some(AlarmState::ArmedNight));
        assert_eq!(scenario_state(&map, "1"), Some(AlarmState::ArmedHome));
        assert_eq!(scenario_state(&map, "3"), Some(AlarmState::ArmedVacation));
    }

    #[test]
    fn test_unmatched_and_empty_lists_are_unknown() {
        assert_eq!(scenario_state(&scenarios(), ""), None);
        assert_eq!(scenario_state(&scenarios(), "99"), None);
        assert_eq!(scenario_state(&scenarios(), "99,98,97"), None);
    }

    #[test]
    fn test_junk_entries_are_skipped() {
        assert_eq!(
            scenario_state(&scenarios(), "zzz, 4"),
            Some(AlarmState::ArmedNight)
        );
    }

    #[test]
    fn test_alarm_state_fails_soft() {
        let panel = offline_panel();
        assert_eq!(panel.alarm_state(None), None);

        let empty: MinimResult = serde_json::from_str(r#"{"Data": {}}"#).unwrap();
        assert_eq!(panel.alarm_state(Some(&empty)), None);
    }

    #[test]
    fn test_alarm_state_is_idempotent_over_unchanged_snapshot() {
        let panel = offline_panel();
        let snap = snapshot("4,1");
        let first = panel.alarm_state(Some(&snap));
        let second = panel.alarm_state(Some(&snap));
        assert_eq!(first, Some(AlarmState::ArmedNight));
        assert_eq!(first, second);
    }

    #[test]
    fn test_command_payload_round_trip() {
        for state in AlarmState::PRIORITY {
            assert_eq!(AlarmState::from_command(state.command_payload()), Some(state));
        }
        assert_eq!(AlarmState::from_command("ARM_CUSTOM_BYPASS"), None);
    }

    #[test]
    fn test_topics_derive_from_unique_id() {
        let panel = offline_panel();
        assert_eq!(
            panel.state_topic(),
            "homeassistant/alarm_control_panel/minim_house/state"
        );
        assert_eq!(
            panel.command_topic(),
            "homeassistant/alarm_control_panel/minim_house/set"
        );
        assert_eq!(
            panel.config_topic(),
            "homeassistant/alarm_control_panel/minim_house/config"
        );
    }

    #[tokio::test]
    async fn test_arm_away_activates_configured_code_exactly_once() {
        let mut server = Server::new_async().await;
        let _login = server
            .mock("POST", "/api/auth/login")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"Token": "tok", "ExpiresIn": 3600}"#)
            .create_async()
            .await;
        let activation = server
            .mock("POST", "/api/devices/dev-1/scenarios/2/activate")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let client = Arc::new(ApiClient::with_base_url(&server.url(), "u", "p", "c"));
        let panel = AlarmPanel::new(client, "dev-1", panel_config());
        panel.handle_command("ARM_AWAY").await;

        activation.assert_async().await;
    }

    #[tokio::test]
    async fn test_disarm_activates_disarm_code() {
        let mut server = Server::new_async().await;
        let _login = server
            .mock("POST", "/api/auth/login")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"Token": "tok", "ExpiresIn": 3600}"#)
            .create_async()
            .await;
        let activation = server
            .mock("POST", "/api/devices/dev-1/scenarios/0/activate")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let client = Arc::new(ApiClient::with_base_url(&server.url(), "u", "p", "c"));
        let panel = AlarmPanel::new(client, "dev-1", panel_config());
        panel.handle_command("DISARM").await;

        activation.assert_async().await;
    }

    #[tokio::test]
    async fn test_unknown_command_payload_activates_nothing() {
        let mut server = Server::new_async().await;
        let activation = server
            .mock("POST", mockito::Matcher::Regex("/activate".to_string()))
            .with_status(200)
            .expect(0)
            .create_async()
            .await;

        let client = Arc::new(ApiClient::with_base_url(&server.url(), "u", "p", "c"));
        let panel = AlarmPanel::new(client, "dev-1", panel_config());
        panel.handle_command("SELF_DESTRUCT").await;

        activation.assert_async().await;
    }
}
