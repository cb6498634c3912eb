use std::sync::Arc;

use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet};
use tokio::task;
use tokio::time::Duration;

use crate::binary_sensor::ConnectivitySensor;
use crate::config::MqttConfig;
use crate::coordinator::Coordinator;
use crate::panel::AlarmPanel;

fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(30));
    options
}

pub fn get_mqtt_client(config: &MqttConfig) -> (AsyncClient, EventLoop) {
    AsyncClient::new(mqtt_options(config), 10)
}

/// Publish discovery configs and subscribe to every panel's command topic.
pub async fn announce_entities(
    mqtt: &AsyncClient,
    panels: &[AlarmPanel],
    sensor: &ConnectivitySensor,
    sw_version: &str,
) -> Result<(), rumqttc::ClientError> {
    for panel in panels {
        panel.publish_discovery(mqtt, sw_version).await?;
        panel.subscribe(mqtt).await?;
        debug!("announced panel {}", panel.unique_id());
    }
    sensor.publish_discovery(mqtt, sw_version).await?;
    Ok(())
}

/// Publish the current state of every entity from the coordinator's cached
/// snapshot. Individual publish failures are logged and skipped.
pub async fn publish_states(
    mqtt: &AsyncClient,
    coordinator: &Coordinator,
    panels: &[AlarmPanel],
    sensor: &ConnectivitySensor,
) {
    let snapshot = coordinator.data();
    for panel in panels {
        if let Err(err) = panel.publish_state(mqtt, snapshot.as_ref()).await {
            error!("failed to publish state for {}: {err}", panel.unique_id());
        }
    }
    if let Err(err) = sensor.publish_state(mqtt, snapshot.as_ref()).await {
        error!("failed to publish connectivity state: {err}");
    }
}

/// Drive the MQTT event loop, routing inbound command publishes to the
/// owning panel. Each command runs as its own task so a slow cloud call
/// never blocks the loop. Connection errors are logged and the loop keeps
/// polling; rumqttc reconnects on the next poll.
pub async fn handle_mqtt_events(mut eventloop: EventLoop, panels: Arc<Vec<AlarmPanel>>) {
    loop {
        let notification = match eventloop.poll().await {
            Ok(notification) => notification,
            Err(err) => {
                warn!("MQTT connection error: {err}");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        if let Event::Incoming(Packet::Publish(publish)) = notification {
            let payload = match String::from_utf8(publish.payload.to_vec()) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!("failed to parse MQTT payload as UTF-8: {err}");
                    continue;
                }
            };

            for panel in panels.iter() {
                if publish.topic == panel.command_topic() {
                    info!(
                        "received command for panel {}: {}",
                        panel.unique_id(),
                        payload.trim()
                    );
                    let panel = panel.clone();
                    let payload = payload.trim().to_string();
                    task::spawn(async move {
                        panel.handle_command(&payload).await;
                    });
                }
            }
        }
    }
}
