//! Station records as served by the public station network, and the flat
//! report the rest of the pipeline works on.

use serde::Deserialize;

// ── Wire format ─────────────────────────────────────────────────────

/// One element of the `data` array in the upstream response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StationRecord {
    #[serde(default)]
    pub info: StationInfo,
    #[serde(rename = "lastData", default)]
    pub last_data: LastData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StationInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub slug: String,
    pub indoor: Option<bool>,
}

/// Latest observation bundle. Every metric is optional: stations only report
/// the sensors they have, and zero is a legitimate reading.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LastData {
    pub dateutc: Option<i64>,
    pub created_at: Option<i64>,
    pub tempf: Option<f64>,
    pub humidity: Option<i32>,
    pub windspeedmph: Option<f64>,
    pub windgustmph: Option<f64>,
    pub maxdailygust: Option<f64>,
    pub uv: Option<i32>,
    pub solarradiation: Option<f64>,
    pub hourlyrainin: Option<f64>,
    pub dailyrainin: Option<f64>,
    pub weeklyrainin: Option<f64>,
    pub monthlyrainin: Option<f64>,
    pub baromrelin: Option<f64>,
    pub baromabsin: Option<f64>,
    #[serde(rename = "lastRain")]
    pub last_rain: Option<i64>,
    #[serde(rename = "feelsLike")]
    pub feels_like: Option<f64>,
    #[serde(rename = "dewPoint")]
    pub dew_point: Option<f64>,
}

impl LastData {
    /// Observation time in epoch milliseconds. `created_at` wins over
    /// `dateutc`; zero means the field was not filled in.
    pub fn observed_at_ms(&self) -> Option<i64> {
        self.created_at
            .filter(|&ms| ms != 0)
            .or(self.dateutc.filter(|&ms| ms != 0))
    }
}

// ── Sanitized report ────────────────────────────────────────────────

/// A single outdoor station's reading that passed sanitization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationReport {
    pub name: String,
    pub observed_at_ms: i64,
    pub temperature_f: Option<f64>,
    pub humidity_pct: Option<i32>,
    pub wind_speed_mph: Option<f64>,
    pub wind_gust_mph: Option<f64>,
    pub max_daily_gust_mph: Option<f64>,
    pub uv_index: Option<i32>,
    pub solar_radiation: Option<f64>,
    pub hourly_rain_in: Option<f64>,
    pub daily_rain_in: Option<f64>,
    pub weekly_rain_in: Option<f64>,
    pub monthly_rain_in: Option<f64>,
    pub relative_pressure_inhg: Option<f64>,
    pub absolute_pressure_inhg: Option<f64>,
    pub last_rain_ms: Option<i64>,
    pub feels_like_f: Option<f64>,
    pub dew_point_f: Option<f64>,
}

impl StationReport {
    /// Flatten a wire record with an already-resolved observation time.
    pub fn from_record(record: StationRecord, observed_at_ms: i64) -> Self {
        let name = if record.info.name.is_empty() {
            record.info.slug
        } else {
            record.info.name
        };
        let d = record.last_data;
        Self {
            name,
            observed_at_ms,
            temperature_f: d.tempf,
            humidity_pct: d.humidity,
            wind_speed_mph: d.windspeedmph,
            wind_gust_mph: d.windgustmph,
            max_daily_gust_mph: d.maxdailygust,
            uv_index: d.uv,
            solar_radiation: d.solarradiation,
            hourly_rain_in: d.hourlyrainin,
            daily_rain_in: d.dailyrainin,
            weekly_rain_in: d.weeklyrainin,
            monthly_rain_in: d.monthlyrainin,
            relative_pressure_inhg: d.baromrelin,
            absolute_pressure_inhg: d.baromabsin,
            last_rain_ms: d.last_rain,
            feels_like_f: d.feels_like,
            dew_point_f: d.dew_point,
        }
    }
}
