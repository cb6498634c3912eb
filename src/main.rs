use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::info;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task;

use minim2mqtt::api::ApiClient;
use minim2mqtt::config::Config;
use minim2mqtt::coordinator::Coordinator;
use minim2mqtt::{binary_sensor, mqtt, panel, Runtime};

type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "minim2mqtt")]
#[command(about = "Bridge between the Minim alarm cloud and MQTT")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

enum Exit {
    Reload,
    Shutdown,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    loop {
        match run(&cli.config).await? {
            Exit::Reload => info!("reloading configuration"),
            Exit::Shutdown => {
                info!("shutting down");
                return Ok(());
            }
        }
    }
}

async fn run(config_path: &str) -> Result<Exit, BoxError> {
    let config = Config::load(config_path)?;
    info!("starting minim2mqtt for device {}", config.device_id);

    let client = Arc::new(ApiClient::new(
        &config.username,
        &config.password,
        &config.client_id,
    ));
    info!("logging in to the Minim cloud");
    client.login().await?;

    let coordinator = Arc::new(Coordinator::new(
        client.clone(),
        &config.device_id,
        Duration::from_secs(config.scan_interval_secs),
    ));
    // No data on the first refresh aborts setup; the nonzero exit lets the
    // process supervisor retry with its own backoff.
    coordinator.first_refresh().await?;

    let runtime = Runtime {
        coordinator: coordinator.clone(),
        client,
    };

    let panels = Arc::new(panel::setup(&runtime, &config));
    let sensor = Arc::new(binary_sensor::setup(&runtime, &config));
    info!("configured {} alarm panel(s)", panels.len());

    let sw_version = coordinator
        .data()
        .and_then(|result| result.device(&config.device_id).map(|d| d.firmware.clone()))
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

    info!(
        "connecting to MQTT broker at {}:{}",
        config.mqtt.host, config.mqtt.port
    );
    let (mqtt_client, eventloop) = mqtt::get_mqtt_client(&config.mqtt);

    // The event loop must be polled before anything can be published.
    let commands = task::spawn(mqtt::handle_mqtt_events(eventloop, panels.clone()));

    mqtt::announce_entities(&mqtt_client, &panels, &sensor, &sw_version).await?;

    // Re-publish entity states whenever the coordinator applies a snapshot.
    // This task holds the subscription that keeps the poll loop fetching.
    let publisher = task::spawn({
        let coordinator = coordinator.clone();
        let panels = panels.clone();
        let sensor = sensor.clone();
        let mqtt_client = mqtt_client.clone();
        let mut updates = coordinator.subscribe();
        async move {
            loop {
                updates.borrow_and_update();
                mqtt::publish_states(&mqtt_client, &coordinator, &panels, &sensor).await;
                if updates.changed().await.is_err() {
                    break;
                }
            }
        }
    });

    let poller = task::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.run().await }
    });

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;

    let exit = tokio::select! {
        _ = hangup.recv() => Exit::Reload,
        _ = terminate.recv() => Exit::Shutdown,
        _ = tokio::signal::ctrl_c() => Exit::Shutdown,
    };

    poller.abort();
    publisher.abort();
    commands.abort();
    Ok(exit)
}
