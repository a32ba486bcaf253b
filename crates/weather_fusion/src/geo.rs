//! Flat-earth geofence math for building the station query box.
//!
//! The shift treats the neighbourhood of the center as a plane, which is
//! accurate enough for the few-miles radii used to query nearby stations.

use std::f64::consts::PI;
use std::fmt;

/// Mean radius of the Earth in miles.
pub const EARTH_RADIUS_MILES: f64 = 3959.0;

/// A geographic coordinate in degrees (or radians, after `radians()`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub latitude: f64,
    pub longitude: f64,
}

impl Point {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    fn scale(self, k: f64) -> Self {
        Self::new(self.latitude * k, self.longitude * k)
    }

    pub fn radians(self) -> Self {
        self.scale(PI / 180.0)
    }

    pub fn degrees(self) -> Self {
        self.scale(180.0 / PI)
    }

    /// Shift by `delta` miles: `delta.latitude` north/south, `delta.longitude`
    /// east/west. The east/west offset is widened by `1 / cos(lat)` to account
    /// for meridians converging toward the poles.
    pub fn shift_point(self, delta: Point) -> Self {
        let radians = self.radians();
        let angular = delta.scale(1.0 / EARTH_RADIUS_MILES);
        Self::new(
            radians.latitude + angular.latitude,
            radians.longitude + angular.longitude / radians.latitude.cos(),
        )
        .degrees()
    }

    /// Shorthand for `shift_point(Point::new(lat_miles, lon_miles))`.
    pub fn shift(self, lat_miles: f64, lon_miles: f64) -> Self {
        self.shift_point(Self::new(lat_miles, lon_miles))
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.latitude, self.longitude)
    }
}

/// Query region around a center point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Point,
    pub max: Point,
}

impl BoundingBox {
    /// Box whose corners are `center` shifted by `-radius` and `+radius` miles
    /// on both axes. A zero radius collapses the box onto the center.
    pub fn around(center: Point, radius_miles: f64) -> Self {
        Self {
            min: center.shift(-radius_miles, -radius_miles),
            max: center.shift(radius_miles, radius_miles),
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        (self.min.latitude..=self.max.latitude).contains(&p.latitude)
            && (self.min.longitude..=self.max.longitude).contains(&p.longitude)
    }
}
