//! Great-circle distance on a spherical Earth.

use serde::Serialize;

use crate::constants::EARTH_RADIUS_M;
use crate::error::GeoError;

/// A validated WGS84 coordinate pair.
///
/// Both fields are always set together, and only through [`Position::new`],
/// so a half-known position cannot exist.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    latitude: f64,
    longitude: f64,
}

impl Position {
    /// Rejects non-finite values and anything outside lat ∈ [-90, 90],
    /// lon ∈ [-180, 180].
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, GeoError> {
        let lat_ok = latitude.is_finite() && (-90.0..=90.0).contains(&latitude);
        let lon_ok = longitude.is_finite() && (-180.0..=180.0).contains(&longitude);
        if !(lat_ok && lon_ok) {
            return Err(GeoError::InvalidPosition {
                lat: latitude,
                lon: longitude,
            });
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        distance_meters(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// Haversine distance in meters between two coordinates given in degrees.
pub fn distance_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_identical_points_are_zero() {
        assert_eq!(distance_meters(0.0, 0.0, 0.0, 0.0), 0.0);
        assert_eq!(distance_meters(37.5665, 126.978, 37.5665, 126.978), 0.0);
        assert_eq!(distance_meters(-89.9, 179.9, -89.9, 179.9), 0.0);
    }

    #[test]
    fn test_symmetry() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let (lat1, lon1) = (rng.gen_range(-90.0..=90.0), rng.gen_range(-180.0..=180.0));
            let (lat2, lon2) = (rng.gen_range(-90.0..=90.0), rng.gen_range(-180.0..=180.0));
            let ab = distance_meters(lat1, lon1, lat2, lon2);
            let ba = distance_meters(lat2, lon2, lat1, lon1);
            assert_eq!(ab, ba);
        }
    }

    #[test]
    fn test_small_equatorial_offset() {
        // 0.0002 degrees of longitude on the equator is ~22.24 m
        let d = distance_meters(0.0, 0.0, 0.0, 0.0002);
        assert!((d - 22.239).abs() < 0.01, "got {d}");
    }

    #[test]
    fn test_known_city_pair() {
        // Seoul City Hall -> Busan City Hall, roughly 325 km
        let d = distance_meters(37.5663, 126.9779, 35.1798, 129.0750);
        assert!((d / 1000.0 - 325.0).abs() < 5.0, "got {d}");
    }

    #[test]
    fn test_position_validation() {
        assert!(Position::new(90.0, 180.0).is_ok());
        assert!(Position::new(-90.0, -180.0).is_ok());
        assert!(Position::new(90.0001, 0.0).is_err());
        assert!(Position::new(0.0, -180.5).is_err());
        assert!(Position::new(f64::NAN, 0.0).is_err());
        assert!(Position::new(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_position_distance_matches_free_function() {
        let a = Position::new(10.0, 20.0).unwrap();
        let b = Position::new(10.0001, 20.0001).unwrap();
        assert_eq!(a.distance_to(&b), distance_meters(10.0, 20.0, 10.0001, 20.0001));
    }
}
