//! Great-circle geofence checks used for lobby admission and location-bound answers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0088;
/// Central angle (radians) within which two points count as antipodal, about 6 m.
const ANTIPODAL_TOLERANCE_RAD: f64 = 1e-6;

/// WGS84 position reported by a client or attached to a POI.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in degrees, `[-90, 90]`.
    pub latitude: f64,
    /// Longitude in degrees, `[-180, 180]`.
    pub longitude: f64,
}

/// Raised when a coordinate (or radius) cannot be used for a distance computation.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("invalid coordinate ({latitude}, {longitude})")]
pub struct InvalidCoordinate {
    /// Offending latitude.
    pub latitude: f64,
    /// Offending longitude.
    pub longitude: f64,
}

/// Outcome of a geofence check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admission {
    /// Whether the point lies inside the fence (inclusive boundary).
    pub admitted: bool,
    /// Great-circle distance between the point and the fence centre.
    pub distance_km: f64,
}

impl Coordinate {
    /// Build a coordinate without validating it.
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Ensure both components are finite and inside their valid ranges.
    pub fn validate(&self) -> Result<(), InvalidCoordinate> {
        let lat_ok = self.latitude.is_finite() && (-90.0..=90.0).contains(&self.latitude);
        let lon_ok = self.longitude.is_finite() && (-180.0..=180.0).contains(&self.longitude);
        if lat_ok && lon_ok {
            Ok(())
        } else {
            Err(InvalidCoordinate {
                latitude: self.latitude,
                longitude: self.longitude,
            })
        }
    }
}

/// Haversine distance in kilometres between two validated coordinates.
///
/// Antipodal pairs have no unique great circle and are rejected with the first coordinate.
pub fn distance_km(from: Coordinate, to: Coordinate) -> Result<f64, InvalidCoordinate> {
    from.validate()?;
    to.validate()?;

    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let d_lat = lat2 - lat1;
    let d_lon = (to.longitude - from.longitude).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push `a` slightly outside [0, 1] for antipodal points.
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    if std::f64::consts::PI - c < ANTIPODAL_TOLERANCE_RAD {
        return Err(InvalidCoordinate {
            latitude: from.latitude,
            longitude: from.longitude,
        });
    }

    Ok(EARTH_RADIUS_KM * c)
}

/// Decide whether `point` lies within `radius_km` of `centre`.
pub fn check(
    point: Coordinate,
    centre: Coordinate,
    radius_km: f64,
) -> Result<Admission, InvalidCoordinate> {
    let distance_km = distance_km(point, centre)?;
    Ok(Admission {
        admitted: radius_km.is_finite() && distance_km <= radius_km,
        distance_km,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHELTER: Coordinate = Coordinate::new(35.67, 139.81);

    #[test]
    fn identical_points_are_zero_apart_and_always_admitted() {
        let admission = check(SHELTER, SHELTER, 0.0).unwrap();
        assert_eq!(admission.distance_km, 0.0);
        assert!(admission.admitted);
    }

    #[test]
    fn known_city_distance_is_close_to_reference() {
        // Tokyo Station to Osaka Station is roughly 403 km along the great circle.
        let tokyo = Coordinate::new(35.6812, 139.7671);
        let osaka = Coordinate::new(34.7025, 135.4959);
        let d = distance_km(tokyo, osaka).unwrap();
        assert!((d - 403.0).abs() < 3.0, "unexpected distance {d}");
    }

    #[test]
    fn distance_is_symmetric() {
        let other = Coordinate::new(35.68, 139.80);
        let ab = distance_km(SHELTER, other).unwrap();
        let ba = distance_km(other, SHELTER).unwrap();
        assert!((ab - ba).abs() < 1e-12);
    }

    #[test]
    fn antipodal_points_are_rejected() {
        let err = distance_km(Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 180.0)).unwrap_err();
        assert_eq!((err.latitude, err.longitude), (0.0, 0.0));

        let antipode = Coordinate::new(-35.67, -40.19);
        assert!(check(antipode, SHELTER, 1.0).is_err());

        // Just short of the antipode still has a distance.
        let near = distance_km(Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 179.9)).unwrap();
        assert!(near > 19_990.0 && near < std::f64::consts::PI * EARTH_RADIUS_KM);
    }

    #[test]
    fn boundary_is_inclusive() {
        let point = Coordinate::new(35.675, 139.81);
        let d = distance_km(point, SHELTER).unwrap();
        assert!(check(point, SHELTER, d).unwrap().admitted);
        assert!(!check(point, SHELTER, d - 1e-9).unwrap().admitted);
    }

    #[test]
    fn out_of_range_or_non_finite_coordinates_are_rejected() {
        for bad in [
            Coordinate::new(90.1, 0.0),
            Coordinate::new(-91.0, 0.0),
            Coordinate::new(0.0, 180.5),
            Coordinate::new(0.0, -181.0),
            Coordinate::new(f64::NAN, 0.0),
            Coordinate::new(0.0, f64::INFINITY),
        ] {
            let err = check(bad, SHELTER, 1.0).unwrap_err();
            assert_eq!(err.latitude.to_bits(), bad.latitude.to_bits());
        }
    }
}
