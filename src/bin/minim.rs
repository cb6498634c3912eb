// Command-line utility for the Minim alarm cloud
// Run with: cargo run --bin minim -- <command>

use clap::{Parser, Subcommand};
use minim2mqtt::api::{ApiClient, MinimResult};
use minim2mqtt::config::Config;
use minim2mqtt::panel::{scenario_state, AlarmState};
use std::error::Error;

type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "minim")]
#[command(about = "Command-line utility for the Minim alarm cloud", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current state of every configured panel
    Panels,

    /// Show the device snapshot
    Status,

    /// Arm a panel
    Arm {
        /// Panel unique id or display name
        panel: String,
        /// Arm mode: away, home, night or vacation
        mode: String,
    },

    /// Disarm a panel
    Disarm {
        /// Panel unique id or display name
        panel: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Initialize logger with INFO as default level unless RUST_LOG is set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    let client = ApiClient::new(&config.username, &config.password, &config.client_id);
    client.login().await?;

    match cli.command {
        Commands::Panels => show_panels(&client, &config).await?,
        Commands::Status => show_status(&client, &config).await?,
        Commands::Arm { panel, mode } => {
            arm(&client, &config, &panel, parse_mode(&mode)?).await?
        }
        Commands::Disarm { panel } => arm(&client, &config, &panel, AlarmState::Disarmed).await?,
    }

    Ok(())
}

fn parse_mode(mode: &str) -> Result<AlarmState, BoxError> {
    match mode.to_lowercase().as_str() {
        "away" => Ok(AlarmState::ArmedAway),
        "home" => Ok(AlarmState::ArmedHome),
        "night" => Ok(AlarmState::ArmedNight),
        "vacation" => Ok(AlarmState::ArmedVacation),
        other => {
            Err(format!("unknown arm mode '{other}', expected away, home, night or vacation").into())
        }
    }
}

async fn fetch_snapshot(client: &ApiClient, config: &Config) -> Result<MinimResult, BoxError> {
    client.poll(&config.device_id).await?;
    Ok(client.fetch_state(&config.device_id).await?)
}

async fn show_panels(client: &ApiClient, config: &Config) -> Result<(), BoxError> {
    let result = fetch_snapshot(client, config).await?;
    let device = result
        .device(&config.device_id)
        .ok_or_else(|| format!("device '{}' not present in snapshot", config.device_id))?;

    println!("Active scenarios: {}\n", device.active_scenarios);
    for panel in &config.panels {
        let state = scenario_state(&panel.scenarios, &device.active_scenarios)
            .map(AlarmState::as_str)
            .unwrap_or("unknown");
        println!("  {} ({}): {}", panel.name, panel.unique_id, state);
    }

    Ok(())
}

async fn show_status(client: &ApiClient, config: &Config) -> Result<(), BoxError> {
    let result = fetch_snapshot(client, config).await?;
    let device = result
        .device(&config.device_id)
        .ok_or_else(|| format!("device '{}' not present in snapshot", config.device_id))?;

    println!("Device: {}", device.name);
    println!("  ID: {}", config.device_id);
    println!("  Firmware: {}", device.firmware);
    println!("  Connected: {}", device.connected);
    println!("  Active scenarios: {}", device.active_scenarios);

    Ok(())
}

async fn arm(
    client: &ApiClient,
    config: &Config,
    panel_id: &str,
    target: AlarmState,
) -> Result<(), BoxError> {
    let panel = config
        .panel(panel_id)
        .ok_or_else(|| format!("no panel named '{panel_id}' in the configuration"))?;

    let code = panel.scenarios.code_for(target);
    client.activate_scenario(&config.device_id, code).await?;

    println!(
        "✓ Requested {} for panel {} (scenario {})",
        target.as_str(),
        panel.name,
        code
    );
    println!("The next poll will show whether the panel accepted it.");

    Ok(())
}
