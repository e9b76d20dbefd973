//! Geographic points and distance helpers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::error::{GeoError, GeoResult};

/// Length of a degree of latitude at the equator, in meters.
pub const METERS_PER_DEGREE_LATITUDE: f64 = 110_574.0;

/// Equatorial radius of the earth, in meters.
pub const EARTH_EQ_RADIUS: f64 = 6_378_137.0;

/// Polar radius of the earth, in meters.
pub const EARTH_POLAR_RADIUS: f64 = 6_357_852.3;

/// Mean radius used for great-circle distances, in meters.
pub const EARTH_MEAN_RADIUS: f64 = (EARTH_EQ_RADIUS + EARTH_POLAR_RADIUS) / 2.0;

/// Largest radius a query may use, in kilometers.
pub const MAX_SUPPORTED_RADIUS_KM: f64 = 8587.0;

/// A validated latitude/longitude pair.
///
/// Serialized as a two-element `[latitude, longitude]` array; out-of-range
/// values are rejected on deserialize.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 2]", into = "[f64; 2]")]
pub struct GeoPoint {
    latitude: f64,
    longitude: f64,
}

impl GeoPoint {
    /// Create a point, rejecting coordinates outside [-90, 90] x [-180, 180].
    pub fn new(latitude: f64, longitude: f64) -> GeoResult<Self> {
        if !Self::coordinates_valid(latitude, longitude) {
            return Err(GeoError::invalid_coordinates(latitude, longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Check if the pair lies within the valid coordinate ranges.
    ///
    /// NaN fails every comparison and is therefore rejected.
    pub fn coordinates_valid(latitude: f64, longitude: f64) -> bool {
        (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude)
    }

    /// Latitude in degrees.
    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    /// Longitude in degrees.
    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Great-circle distance to `other` in meters.
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        distance(self, other)
    }
}

impl TryFrom<[f64; 2]> for GeoPoint {
    type Error = GeoError;

    fn try_from(pair: [f64; 2]) -> GeoResult<Self> {
        Self::new(pair[0], pair[1])
    }
}

impl From<GeoPoint> for [f64; 2] {
    fn from(point: GeoPoint) -> Self {
        [point.latitude, point.longitude]
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.latitude, self.longitude)
    }
}

/// Haversine distance between two points on the mean-radius sphere, in meters.
pub fn distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat_delta = (a.latitude - b.latitude).to_radians();
    let lon_delta = (a.longitude - b.longitude).to_radians();

    let h = (lat_delta / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos()
            * b.latitude.to_radians().cos()
            * (lon_delta / 2.0).sin().powi(2);
    EARTH_MEAN_RADIUS * 2.0 * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Convert a north-south distance to degrees of latitude.
pub fn distance_to_latitude_degrees(distance: f64) -> f64 {
    distance / METERS_PER_DEGREE_LATITUDE
}

/// Half-width in degrees of longitude of a circle of `distance` meters
/// centered at `latitude`.
///
/// Exact for the mean-radius sphere: the widest parallel crossing of a
/// spherical cap of angular radius d is asin(sin d / cos lat). Returns 180
/// when the circle reaches a pole.
pub fn distance_to_longitude_degrees(distance: f64, latitude: f64) -> f64 {
    let angular = distance / EARTH_MEAN_RADIUS;
    let lat = latitude.to_radians();
    if lat.abs() + angular >= std::f64::consts::FRAC_PI_2 {
        return 180.0;
    }
    (angular.sin() / lat.cos()).min(1.0).asin().to_degrees()
}

/// Wrap a longitude into [-180, 180].
pub fn wrap_longitude(longitude: f64) -> f64 {
    if (-180.0..=180.0).contains(&longitude) {
        return longitude;
    }
    let adjusted = longitude + 180.0;
    if adjusted > 0.0 {
        (adjusted % 360.0) - 180.0
    } else {
        180.0 - (-adjusted % 360.0)
    }
}

/// Clamp a radius in kilometers to `max_km`, warning when it applies.
pub fn cap_radius_km(radius_km: f64, max_km: f64) -> f64 {
    if radius_km > max_km {
        tracing::warn!(
            radius_km,
            max_km,
            "radius exceeds the supported maximum, clamping"
        );
        return max_km;
    }
    radius_km
}
