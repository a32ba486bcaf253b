//! Home Assistant device discovery descriptor.
//!
//! One retained message under `<prefix>/device/<base_topic>/config` declares
//! the device and every metric of the consensus payload as a sensor
//! component. Keys use Home Assistant's abbreviated form.

use serde::Serialize;
use std::collections::BTreeMap;

/// Static description of one published metric.
#[derive(Debug, Clone, Copy)]
pub struct MetricSpec {
    pub key: &'static str,
    pub name: Option<&'static str>,
    pub unit: Option<&'static str>,
    pub device_class: Option<&'static str>,
    pub state_class: Option<&'static str>,
    pub precision: Option<u8>,
    pub enabled_by_default: bool,
    pub icon: Option<&'static str>,
}

const fn metric(
    key: &'static str,
    name: Option<&'static str>,
    unit: Option<&'static str>,
    device_class: Option<&'static str>,
    state_class: Option<&'static str>,
    precision: Option<u8>,
) -> MetricSpec {
    MetricSpec {
        key,
        name,
        unit,
        device_class,
        state_class,
        precision,
        enabled_by_default: true,
        icon: None,
    }
}

const fn disabled(spec: MetricSpec) -> MetricSpec {
    MetricSpec {
        enabled_by_default: false,
        ..spec
    }
}

const MEASUREMENT: Option<&str> = Some("measurement");
const TOTAL: Option<&str> = Some("total");

/// Every key the consensus payload can carry, in payload order.
pub const METRICS: [MetricSpec; 16] = [
    metric("temperature", None, Some("°F"), Some("temperature"), MEASUREMENT, Some(1)),
    metric("humidity", None, Some("%"), Some("humidity"), MEASUREMENT, Some(1)),
    metric("wind_speed", None, Some("mph"), Some("wind_speed"), MEASUREMENT, Some(1)),
    metric("wind_gust", Some("Wind gust"), Some("mph"), Some("wind_speed"), MEASUREMENT, Some(1)),
    metric(
        "max_daily_gust",
        Some("Max daily gust"),
        Some("mph"),
        Some("wind_speed"),
        MEASUREMENT,
        Some(1),
    ),
    metric("uv_index", Some("UV index"), Some("index"), None, MEASUREMENT, Some(1)),
    disabled(metric(
        "solar_radiation",
        None,
        Some("W/m²"),
        Some("irradiance"),
        MEASUREMENT,
        Some(1),
    )),
    metric(
        "hourly_rain",
        Some("Hourly rain"),
        Some("in/h"),
        Some("precipitation_intensity"),
        MEASUREMENT,
        Some(2),
    ),
    metric("daily_rain", Some("Daily rain"), Some("in"), Some("precipitation"), TOTAL, Some(2)),
    disabled(metric(
        "weekly_rain",
        Some("Weekly rain"),
        Some("in"),
        Some("precipitation"),
        TOTAL,
        Some(2),
    )),
    disabled(metric(
        "monthly_rain",
        Some("Monthly rain"),
        Some("in"),
        Some("precipitation"),
        TOTAL,
        Some(2),
    )),
    metric(
        "relative_pressure",
        Some("Relative pressure"),
        Some("inHg"),
        Some("pressure"),
        MEASUREMENT,
        Some(2),
    ),
    disabled(metric(
        "absolute_pressure",
        Some("Absolute pressure"),
        Some("inHg"),
        Some("pressure"),
        MEASUREMENT,
        Some(2),
    )),
    MetricSpec {
        icon: Some("mdi:water"),
        ..disabled(metric("last_rain", Some("Last rain"), None, Some("timestamp"), None, None))
    },
    metric("feels_like", Some("Feels like"), Some("°F"), Some("temperature"), MEASUREMENT, Some(1)),
    metric("dew_point", Some("Dew point"), Some("°F"), Some("temperature"), MEASUREMENT, Some(1)),
];

// ── Wire format ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryPayload {
    pub avty_t: String,
    pub dev: DeviceInfo,
    pub o: OriginInfo,
    pub stat_t: String,
    pub cmps: BTreeMap<String, Component>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub ids: String,
    pub name: String,
    pub sw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OriginInfo {
    pub name: String,
    pub sw: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Component {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub p: String,
    pub obj_id: String,
    pub uniq_id: String,
    pub val_tpl: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_meas: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev_cla: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stat_cla: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sug_dsp_prc: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub en: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ic: Option<String>,
}

/// Identity and topics the descriptor is built from.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub base_topic: String,
    pub device_name: String,
    pub status_topic: String,
    pub version: String,
}

impl Component {
    fn for_metric(base_topic: &str, spec: &MetricSpec) -> Self {
        let id = format!("{}_{}", base_topic, spec.key);
        Self {
            name: spec.name.map(str::to_string),
            p: "sensor".to_string(),
            obj_id: id.clone(),
            uniq_id: id,
            val_tpl: format!("{{{{ value_json.{} }}}}", spec.key),
            unit_of_meas: spec.unit.map(str::to_string),
            dev_cla: spec.device_class.map(str::to_string),
            stat_cla: spec.state_class.map(str::to_string),
            sug_dsp_prc: spec.precision,
            en: (!spec.enabled_by_default).then_some(false),
            ic: spec.icon.map(str::to_string),
        }
    }
}

impl DiscoveryPayload {
    pub fn new(identity: &DeviceIdentity) -> Self {
        let cmps = METRICS
            .iter()
            .map(|spec| {
                (
                    spec.key.to_string(),
                    Component::for_metric(&identity.base_topic, spec),
                )
            })
            .collect();

        Self {
            avty_t: identity.status_topic.clone(),
            dev: DeviceInfo {
                ids: identity.base_topic.clone(),
                name: identity.device_name.clone(),
                sw: identity.version.clone(),
            },
            o: OriginInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                sw: identity.version.clone(),
                url: option_env!("CARGO_PKG_REPOSITORY")
                    .filter(|url| !url.is_empty())
                    .map(str::to_string),
            },
            stat_t: identity.base_topic.clone(),
            cmps,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// `<prefix>/device/<base_topic>/config`
pub fn discovery_topic(prefix: &str, base_topic: &str) -> String {
    format!("{}/device/{}/config", prefix, base_topic)
}
