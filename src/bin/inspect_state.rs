// Debug tool to inspect the raw snapshot returned by the Minim cloud
// Run with: RUST_LOG=info cargo run --bin inspect_state

use minim2mqtt::api::ApiClient;
use minim2mqtt::config::Config;
use std::error::Error;

type BoxError = Box<dyn Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let config = Config::load(&config_path)?;

    println!("Logging in to the Minim cloud...");
    let client = ApiClient::new(&config.username, &config.password, &config.client_id);
    client.login().await?;

    println!("Polling device {}...", config.device_id);
    client.poll(&config.device_id).await?;
    let result = client.fetch_state(&config.device_id).await?;

    let mut count = 0;
    for (id, device) in result.devices() {
        println!("Device: {}", device.name);
        println!("  ID: {}", id);
        println!("  Firmware: {}", device.firmware);
        println!("  Connected: {}", device.connected);
        println!("  Active scenarios: {}", device.active_scenarios);
        println!("{}", "=".repeat(60));
        count += 1;
    }

    if count == 0 {
        println!("Snapshot contains no devices.");
    }

    Ok(())
}
