//! Configuration: YAML file, environment overlay and validation.
//!
//! Every field has a default, so an empty or missing file is a valid
//! starting point. The center point has no usable default and must come
//! from the file, the environment or the command line.

use crate::discovery::DeviceIdentity;
use crate::geo::{BoundingBox, Point};
use crate::ingest::FetchSettings;
use crate::mqtt::{self, MqttSettings};
use crate::session::SessionTopics;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_PREFIX: &str = "WEATHER_FUSION_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found or unreadable
    #[error("Config error: {0}")]
    Read(String),

    /// YAML did not match the expected shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// Parsed, but unusable
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

// ── Loading ─────────────────────────────────────────────────────────

/// Load configuration from a YAML file.
pub fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Read(format!("Failed to read {}: {}", path.display(), e)))?;

    serde_yaml::from_str(&contents)
        .map_err(|e| ConfigError::Parse(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Load configuration from a file, or use the default if it doesn't exist.
pub fn load_config_or_default<T: DeserializeOwned + Default>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();

    if !path.exists() {
        log::info!("Config file not found, using defaults: {}", path.display());
        return Ok(T::default());
    }

    load_config(path)
}

/// Parse configuration from a YAML string.
pub fn parse_config<T: DeserializeOwned>(yaml: &str) -> Result<T> {
    Ok(serde_yaml::from_str(yaml)?)
}

// ── Sections ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub location: LocationConfig,
    pub upstream: UpstreamConfig,
    pub mqtt: MqttConfig,
    pub home_assistant: HomeAssistantConfig,
    /// Data topic; status and discovery topics are derived from it.
    pub base_topic: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            location: LocationConfig::default(),
            upstream: UpstreamConfig::default(),
            mqtt: MqttConfig::default(),
            home_assistant: HomeAssistantConfig::default(),
            base_topic: "weather_fusion".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_miles: f64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            radius_miles: 4.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub request_url: String,
    /// Maximum number of stations requested per cycle.
    pub limit: u32,
    pub max_reading_age_secs: u64,
    pub timeout_secs: u64,
    pub user_agent: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            request_url: "https://lightning.ambientweather.net/devices".to_string(),
            limit: 100,
            max_reading_age_secs: 600,
            timeout_secs: 60,
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    /// Defaults to the base topic.
    pub client_id: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            url: "mqtt://localhost:1883".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 20,
            connect_timeout_secs: 10,
            client_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeAssistantConfig {
    pub discovery_prefix: String,
    /// Hub birth topic. Empty disables replay on hub restart.
    pub status_topic: String,
    pub device_name: String,
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            discovery_prefix: "homeassistant".to_string(),
            status_topic: "homeassistant/status".to_string(),
            device_name: "Weather Fusion".to_string(),
        }
    }
}

// ── Overlay and validation ──────────────────────────────────────────

fn parse_env<T: FromStr>(field: &'static str, key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| invalid(field, format!("{}{}={:?}: {}", ENV_PREFIX, key, value, e)))
}

impl Config {
    /// Overlay `WEATHER_FUSION_*` variables. `lookup` receives the full
    /// variable name; the binary passes `std::env::var`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(&format!("{}{}", ENV_PREFIX, key));

        if let Some(v) = get("LATITUDE") {
            self.location.latitude = parse_env("latitude", "LATITUDE", &v)?;
        }
        if let Some(v) = get("LONGITUDE") {
            self.location.longitude = parse_env("longitude", "LONGITUDE", &v)?;
        }
        if let Some(v) = get("RADIUS") {
            self.location.radius_miles = parse_env("radius", "RADIUS", &v)?;
        }
        if let Some(v) = get("MQTT_URL") {
            self.mqtt.url = v;
        }
        if let Some(v) = get("MQTT_USERNAME") {
            self.mqtt.username = Some(v);
        }
        if let Some(v) = get("MQTT_PASSWORD") {
            self.mqtt.password = Some(v);
        }
        if let Some(v) = get("BASE_TOPIC") {
            self.base_topic = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let loc = &self.location;
        if !loc.latitude.is_finite() || loc.latitude == 0.0 {
            return Err(invalid("latitude", "must be set"));
        }
        if !(-90.0..=90.0).contains(&loc.latitude) {
            return Err(invalid("latitude", format!("{} is out of range", loc.latitude)));
        }
        if !loc.longitude.is_finite() || loc.longitude == 0.0 {
            return Err(invalid("longitude", "must be set"));
        }
        if !(-180.0..=180.0).contains(&loc.longitude) {
            return Err(invalid("longitude", format!("{} is out of range", loc.longitude)));
        }
        if !loc.radius_miles.is_finite() || loc.radius_miles <= 0.0 {
            return Err(invalid("radius", "must be greater than zero"));
        }

        if self.base_topic.is_empty() {
            return Err(invalid("base_topic", "must not be empty"));
        }
        if self.base_topic.contains(['+', '#']) {
            return Err(invalid("base_topic", "must not contain MQTT wildcards"));
        }
        if self.home_assistant.discovery_prefix.is_empty() {
            return Err(invalid("discovery_prefix", "must not be empty"));
        }

        if self.upstream.limit == 0 {
            return Err(invalid("limit", "must be greater than zero"));
        }
        self.request_url()?;
        self.broker_url()?;
        Ok(())
    }

    pub fn center(&self) -> Point {
        Point::new(self.location.latitude, self.location.longitude)
    }

    fn request_url(&self) -> Result<Url> {
        let url = Url::parse(&self.upstream.request_url)
            .map_err(|e| invalid("request_url", e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(invalid("request_url", format!("unsupported scheme '{}'", other))),
        }
    }

    fn broker_url(&self) -> Result<Url> {
        let url = Url::parse(&self.mqtt.url).map_err(|e| invalid("mqtt.url", e.to_string()))?;
        if mqtt::scheme_uses_tls(url.scheme()).is_none() {
            return Err(invalid(
                "mqtt.url",
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(invalid("mqtt.url", "missing host"));
        }
        Ok(url)
    }

    // ── Runtime settings ────────────────────────────────────────────

    pub fn fetch_settings(&self) -> Result<FetchSettings> {
        let upstream = &self.upstream;
        Ok(FetchSettings {
            request_url: self.request_url()?,
            bbox: BoundingBox::around(self.center(), self.location.radius_miles),
            limit: upstream.limit,
            max_reading_age: Duration::from_secs(upstream.max_reading_age_secs),
            timeout: Duration::from_secs(upstream.timeout_secs),
            user_agent: upstream
                .user_agent
                .clone()
                .unwrap_or_else(|| format!("{}/{}", env!("CARGO_PKG_NAME"), crate::VERSION)),
        })
    }

    pub fn mqtt_settings(&self) -> Result<MqttSettings> {
        let mqtt = &self.mqtt;
        Ok(MqttSettings {
            url: self.broker_url()?,
            username: mqtt.username.clone(),
            password: mqtt.password.clone(),
            client_id: mqtt
                .client_id
                .clone()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| self.base_topic.clone()),
            keep_alive: Duration::from_secs(mqtt.keep_alive_secs),
            connect_timeout: Duration::from_secs(mqtt.connect_timeout_secs),
        })
    }

    pub fn session_topics(&self) -> SessionTopics {
        SessionTopics::new(
            &self.base_topic,
            &self.home_assistant.discovery_prefix,
            Some(self.home_assistant.status_topic.clone()),
        )
    }

    pub fn device_identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            base_topic: self.base_topic.clone(),
            device_name: self.home_assistant.device_name.clone(),
            status_topic: self.session_topics().status,
            version: crate::VERSION.to_string(),
        }
    }
}
