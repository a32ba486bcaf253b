//! Weather Fusion bridge
//!
//! Usage:
//!   weather-fusion -c config.yaml
//!   weather-fusion --latitude 40.69 --longitude -74.04 --radius 3
//!   weather-fusion --mqtt-url mqtts://broker:8883

use anyhow::Context;
use argh::FromArgs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use weather_fusion::config::{self, Config};
use weather_fusion::discovery::DiscoveryPayload;
use weather_fusion::scheduler::{self, TICK_INTERVAL};
use weather_fusion::{mqtt, StationClient};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(FromArgs)]
/// Publish consensus readings from nearby public weather stations over MQTT
struct Args {
    /// path to the YAML configuration file (default: config.yaml)
    #[argh(option, short = 'c', default = "PathBuf::from(\"config.yaml\")")]
    config: PathBuf,

    /// center latitude in degrees
    #[argh(option)]
    latitude: Option<f64>,

    /// center longitude in degrees
    #[argh(option)]
    longitude: Option<f64>,

    /// search radius in miles
    #[argh(option)]
    radius: Option<f64>,

    /// broker URL, e.g. mqtt://localhost:1883
    #[argh(option)]
    mqtt_url: Option<String>,

    /// show version information
    #[argh(switch, short = 'V')]
    version: bool,
}

fn load(args: &Args) -> Result<Config, config::ConfigError> {
    let mut config: Config = config::load_config_or_default(&args.config)?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;

    if let Some(latitude) = args.latitude {
        config.location.latitude = latitude;
    }
    if let Some(longitude) = args.longitude {
        config.location.longitude = longitude;
    }
    if let Some(radius) = args.radius {
        config.location.radius_miles = radius;
    }
    if let Some(url) = &args.mqtt_url {
        config.mqtt.url = url.clone();
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Args = argh::from_env();
    if args.version {
        println!("weather-fusion {}", weather_fusion::VERSION);
        return Ok(ExitCode::SUCCESS);
    }

    let config = match load(&args) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    let fetch = config.fetch_settings()?;
    log::info!(
        "Starting weather-fusion {} around {} (radius {} mi)",
        weather_fusion::VERSION,
        config.center(),
        config.location.radius_miles
    );
    log::info!("  Query box: {} to {}", fetch.bbox.min, fetch.bbox.max);

    let source = Arc::new(StationClient::new(fetch).context("building HTTP client")?);

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    ctrlc::set_handler({
        let shutdown_tx = shutdown_tx.clone();
        move || {
            log::info!("Received Ctrl+C, shutting down gracefully...");
            shutdown_tx.send(()).ok();
        }
    })?;

    let topics = config.session_topics();
    let discovery = DiscoveryPayload::new(&config.device_identity());
    let (session, driver) = mqtt::connect(&config.mqtt_settings()?, topics, discovery)
        .await
        .context("connecting to MQTT broker")?;

    log::info!("Publishing to '{}'. Press Ctrl+C to exit.", session.topics().data);
    scheduler::run_scheduler(source, session.clone(), TICK_INTERVAL, shutdown_rx).await;

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, session.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!("{}", e),
        Err(_) => log::error!("Session shutdown timed out after {:?}", SHUTDOWN_TIMEOUT),
    }
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, driver).await.is_err() {
        log::warn!("MQTT event loop did not stop in time");
    }

    log::info!("weather-fusion stopped.");
    Ok(ExitCode::SUCCESS)
}
