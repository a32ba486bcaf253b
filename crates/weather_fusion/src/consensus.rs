//! Median consensus across a cycle's sanitized station reports.
//!
//! Every metric is reduced independently over the stations that reported it.
//! A metric nobody reported stays absent; absence is never turned into zero.

use crate::station::StationReport;
use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// ── Median reducer ──────────────────────────────────────────────────

/// Numeric kinds the reducer handles. The midpoint of an even-sized set is
/// kind-specific: integers truncate toward zero, floats take the exact mean.
pub trait MedianKind: Copy {
    fn compare(&self, other: &Self) -> Ordering;
    fn midpoint(a: Self, b: Self) -> Self;
}

impl MedianKind for i32 {
    fn compare(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }

    fn midpoint(a: Self, b: Self) -> Self {
        // Widened so the sum cannot overflow; the quotient always fits back.
        ((i64::from(a) + i64::from(b)) / 2) as i32
    }
}

impl MedianKind for i64 {
    fn compare(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }

    fn midpoint(a: Self, b: Self) -> Self {
        a.wrapping_add(b) / 2
    }
}

impl MedianKind for f64 {
    fn compare(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }

    fn midpoint(a: Self, b: Self) -> Self {
        (a + b) / 2.0
    }
}

/// Median of `values`, or `None` for an empty set.
pub fn median<K: MedianKind>(mut values: Vec<K>) -> Option<K> {
    values.sort_by(|a, b| a.compare(b));
    let n = values.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(values[n / 2]),
        _ => Some(K::midpoint(values[n / 2 - 1], values[n / 2])),
    }
}

/// Median of one metric across all reports that carry it.
pub fn median_of<K, F>(reports: &[StationReport], field: F) -> Option<K>
where
    K: MedianKind,
    F: Fn(&StationReport) -> Option<K>,
{
    median(reports.iter().filter_map(field).collect())
}

// ── Payload ─────────────────────────────────────────────────────────

/// One cycle's fused reading, serialized as the retained state message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsensusPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_gust: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_daily_gust: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uv_index: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solar_radiation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hourly_rain: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_rain: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly_rain: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monthly_rain: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative_pressure: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absolute_pressure: Option<f64>,
    /// RFC 3339, UTC.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_rain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feels_like: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dew_point: Option<f64>,
}

impl ConsensusPayload {
    /// Reduce reports to one value per metric. Derived values must already
    /// have been injected.
    pub fn from_reports(reports: &[StationReport]) -> Self {
        // The median runs over raw epoch millis; formatting comes after.
        let last_rain = median_of(reports, |r| r.last_rain_ms).and_then(format_epoch_ms);

        Self {
            temperature: median_of(reports, |r| r.temperature_f),
            humidity: median_of(reports, |r| r.humidity_pct),
            wind_speed: median_of(reports, |r| r.wind_speed_mph),
            wind_gust: median_of(reports, |r| r.wind_gust_mph),
            max_daily_gust: median_of(reports, |r| r.max_daily_gust_mph),
            uv_index: median_of(reports, |r| r.uv_index),
            solar_radiation: median_of(reports, |r| r.solar_radiation),
            hourly_rain: median_of(reports, |r| r.hourly_rain_in),
            daily_rain: median_of(reports, |r| r.daily_rain_in),
            weekly_rain: median_of(reports, |r| r.weekly_rain_in),
            monthly_rain: median_of(reports, |r| r.monthly_rain_in),
            relative_pressure: median_of(reports, |r| r.relative_pressure_inhg),
            absolute_pressure: median_of(reports, |r| r.absolute_pressure_inhg),
            last_rain,
            feels_like: median_of(reports, |r| r.feels_like_f),
            dew_point: median_of(reports, |r| r.dew_point_f),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

fn format_epoch_ms(ms: i64) -> Option<String> {
    DateTime::from_timestamp_millis(ms).map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_single_and_odd() {
        assert_eq!(median(vec![42.5]), Some(42.5));
        assert_eq!(median(vec![30, 10, 20]), Some(20));
        assert_eq!(median(vec![5.0, 1.0, 3.0, 9.0, 7.0]), Some(5.0));
    }

    #[test]
    fn median_even_float_is_mean() {
        assert_eq!(median(vec![10.0, 20.0, 30.0, 41.0]), Some(25.0));
        assert_eq!(median(vec![1.0, 2.0]), Some(1.5));
    }

    #[test]
    fn median_even_int_truncates() {
        assert_eq!(median(vec![10, 21]), Some(15));
        assert_eq!(median(vec![1_i64, 4]), Some(2));
        // Truncation is toward zero, not toward negative infinity.
        assert_eq!(median(vec![-10, -21]), Some(-15));
        assert_eq!(median(vec![-3_i64, 0]), Some(-1));
    }

    #[test]
    fn median_int_does_not_overflow() {
        assert_eq!(median(vec![i32::MAX, i32::MAX - 2]), Some(i32::MAX - 1));
    }

    #[test]
    fn median_empty_is_none() {
        assert_eq!(median::<f64>(Vec::new()), None);
        assert_eq!(median::<i32>(Vec::new()), None);
    }

    fn temps(values: &[Option<f64>]) -> Vec<StationReport> {
        values
            .iter()
            .map(|&t| StationReport {
                temperature_f: t,
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn absent_values_are_skipped_not_zeroed() {
        let reports = temps(&[Some(60.0), None, Some(70.0), None]);
        assert_eq!(median_of(&reports, |r| r.temperature_f), Some(65.0));
    }

    #[test]
    fn zero_is_a_real_reading() {
        let reports: Vec<StationReport> = [Some(0.0), Some(0.0), Some(0.5)]
            .into_iter()
            .map(|rain| StationReport {
                temperature_f: Some(50.0),
                daily_rain_in: rain,
                ..Default::default()
            })
            .collect();
        let payload = ConsensusPayload::from_reports(&reports);
        assert_eq!(payload.daily_rain, Some(0.0));
    }

    #[test]
    fn unreported_metrics_are_absent() {
        let payload = ConsensusPayload::from_reports(&temps(&[Some(68.0), Some(72.0)]));
        assert_eq!(payload.temperature, Some(70.0));
        assert_eq!(payload.humidity, None);
        assert_eq!(payload.last_rain, None);

        let json: serde_json::Value = serde_json::from_slice(&payload.to_json().unwrap()).unwrap();
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["temperature"]);
    }

    #[test]
    fn last_rain_median_then_formatted() {
        let reports: Vec<StationReport> = [1_700_000_000_000, 1_700_000_060_000]
            .into_iter()
            .map(|ms| StationReport {
                last_rain_ms: Some(ms),
                ..Default::default()
            })
            .collect();
        let payload = ConsensusPayload::from_reports(&reports);
        // Midpoint of the two epochs, 30 s after the first.
        assert_eq!(payload.last_rain.as_deref(), Some("2023-11-14T22:13:50Z"));
    }

    #[test]
    fn integer_metrics_use_integer_median() {
        let reports: Vec<StationReport> = [(10, 3), (21, 4)]
            .into_iter()
            .map(|(h, uv)| StationReport {
                humidity_pct: Some(h),
                uv_index: Some(uv),
                ..Default::default()
            })
            .collect();
        let payload = ConsensusPayload::from_reports(&reports);
        assert_eq!(payload.humidity, Some(15));
        assert_eq!(payload.uv_index, Some(3));
    }
}
