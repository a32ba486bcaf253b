//! Meteorological formulas used to fill in readings a station didn't report.
//!
//! Fahrenheit functions are the primary implementations; the Celsius variants
//! convert in, delegate, and convert back.

const MAGNUS_A: f64 = 17.27;
const MAGNUS_B: f64 = 237.7;

const KMH_TO_MPH: f64 = 0.621371192;

// ── Unit conversion ─────────────────────────────────────────────────

pub fn c_to_f(c: f64) -> f64 {
    c * 9.0 / 5.0 + 32.0
}

pub fn f_to_c(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}

pub fn kmh_to_mph(kmh: f64) -> f64 {
    kmh * KMH_TO_MPH
}

pub fn mph_to_kmh(mph: f64) -> f64 {
    mph / KMH_TO_MPH
}

// ── Dew point ───────────────────────────────────────────────────────

/// Magnus-Tetens dew point in Celsius. Humidity is a percentage, clamped at 100.
pub fn dew_point_c(temp_c: f64, humidity: f64) -> f64 {
    let humidity = humidity.min(100.0);
    let gamma = MAGNUS_A * temp_c / (MAGNUS_B + temp_c) + (humidity / 100.0).ln();
    MAGNUS_B * gamma / (MAGNUS_A - gamma)
}

pub fn dew_point_f(temp_f: f64, humidity: f64) -> f64 {
    c_to_f(dew_point_c(f_to_c(temp_f), humidity))
}

// ── Wind chill ──────────────────────────────────────────────────────

/// NWS wind chill. Outside its domain (above 50°F or under 3 mph) the air
/// temperature is returned unchanged.
pub fn wind_chill_f(temp_f: f64, wind_mph: f64) -> f64 {
    if wind_mph < 3.0 || temp_f > 50.0 {
        return temp_f;
    }
    let exp = wind_mph.powf(0.16);
    35.74 + 0.6215 * temp_f - 35.75 * exp + 0.4275 * temp_f * exp
}

pub fn wind_chill_c(temp_c: f64, wind_kmh: f64) -> f64 {
    f_to_c(wind_chill_f(c_to_f(temp_c), kmh_to_mph(wind_kmh)))
}

// ── Heat index ──────────────────────────────────────────────────────

/// NWS heat index: the simple Steadman estimate below 80°F, otherwise the
/// Rothfusz regression with its low- and high-humidity adjustments.
pub fn heat_index_f(temp_f: f64, humidity: f64) -> f64 {
    let t = temp_f;
    let h = humidity;
    if t < 80.0 {
        return 0.5 * (t + 61.0 + (t - 68.0) * 1.2 + h * 0.094);
    }

    let base = -42.379 + 2.04901523 * t + 10.14333127 * h
        - 0.22475541 * t * h
        - 0.00683783 * t * t
        - 0.05481717 * h * h
        + 0.00122874 * t * t * h
        + 0.00085282 * t * h * h
        - 0.00000199 * t * t * h * h;

    if h < 13.0 && t <= 112.0 {
        base - (13.0 - h) / 4.0 * ((17.0 - (t - 95.0).abs()) / 17.0).sqrt()
    } else if h > 85.0 && t <= 87.0 {
        base + (h - 85.0) / 10.0 * ((87.0 - t) / 5.0)
    } else {
        base
    }
}

pub fn heat_index_c(temp_c: f64, humidity: f64) -> f64 {
    f_to_c(heat_index_f(c_to_f(temp_c), humidity))
}

// ── Feels like ──────────────────────────────────────────────────────

/// Apparent temperature: wind chill when cold and windy, heat index when
/// warm, the air temperature otherwise.
pub fn feels_like_f(temp_f: f64, humidity: f64, wind_mph: f64) -> f64 {
    if temp_f < 50.0 && wind_mph > 3.0 {
        wind_chill_f(temp_f, wind_mph)
    } else if temp_f > 68.0 {
        heat_index_f(temp_f, humidity)
    } else {
        temp_f
    }
}

pub fn feels_like_c(temp_c: f64, humidity: f64, wind_kmh: f64) -> f64 {
    f_to_c(feels_like_f(c_to_f(temp_c), humidity, kmh_to_mph(wind_kmh)))
}
