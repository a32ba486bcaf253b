//! Fills dew point and feels-like on reports whose station didn't supply them.
//!
//! Runs once per report before aggregation so derived values take part in the
//! consensus like any measured value. Station-supplied values are never
//! overwritten, and a derivation is skipped when its inputs are missing.

use crate::climate;
use crate::station::StationReport;

/// Derive missing values on a single report. Calling it twice is a no-op.
pub fn inject_derived(report: &mut StationReport) {
    if report.dew_point_f.is_none() {
        if let (Some(temp_f), Some(humidity)) = (report.temperature_f, report.humidity_pct) {
            let dew_point = climate::dew_point_f(temp_f, f64::from(humidity));
            // 0% humidity has no dew point (ln 0).
            if dew_point.is_finite() {
                report.dew_point_f = Some(dew_point);
            }
        }
    }

    if report.feels_like_f.is_none() {
        if let (Some(temp_f), Some(humidity), Some(gust_mph)) = (
            report.temperature_f,
            report.humidity_pct,
            report.wind_gust_mph,
        ) {
            let feels_like = climate::feels_like_f(temp_f, f64::from(humidity), gust_mph);
            if feels_like.is_finite() {
                report.feels_like_f = Some(feels_like);
            }
        }
    }
}

pub fn inject_all(reports: &mut [StationReport]) {
    reports.iter_mut().for_each(inject_derived);
}
