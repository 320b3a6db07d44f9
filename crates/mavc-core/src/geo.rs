//! Flat-earth geodesy used by the geofence and relative moves.
//!
//! Both helpers are small-angle approximations: good to a few meters over a
//! kilometer, wrong near the poles.

/// Meters per degree used by the planar distance approximation.
pub const METERS_PER_DEGREE: f64 = 1.113195e5;

/// Radius of the spherical earth used for meter offsets.
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Planar approximate distance in meters between two lat/lon points.
pub fn planar_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = lat2 - lat1;
    let d_lon = lon2 - lon1;
    (d_lat * d_lat + d_lon * d_lon).sqrt() * METERS_PER_DEGREE
}

/// Offset a position by meters north/east.
/// Returns (lat, lon).
pub fn offset_position(lat: f64, lon: f64, north_m: f64, east_m: f64) -> (f64, f64) {
    let d_lat = north_m / EARTH_RADIUS_M;
    let d_lon = east_m / (EARTH_RADIUS_M * lat.to_radians().cos());
    (lat + d_lat.to_degrees(), lon + d_lon.to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planar_distance_one_degree() {
        let dist = planar_distance_m(0.0, 0.0, 1.0, 0.0);
        assert!((dist - METERS_PER_DEGREE).abs() < 1e-6);
    }

    #[test]
    fn test_planar_distance_is_symmetric() {
        let a = planar_distance_m(31.8871, 118.8134, 31.8880, 118.8140);
        let b = planar_distance_m(31.8880, 118.8140, 31.8871, 118.8134);
        assert!((a - b).abs() < 1e-9);
        assert!(a > 0.0);
    }

    #[test]
    fn test_offset_position_round_trip_distance() {
        let (lat, lon) = offset_position(31.8871, 118.8134, 30.0, 40.0);
        assert!(lat > 31.8871);
        assert!(lon > 118.8134);

        // 50 m offset; the planar approximation ignores the longitude shrink.
        let dist = planar_distance_m(31.8871, 118.8134, lat, lon);
        assert!((dist - 50.0).abs() < 10.0, "distance was {dist}");
    }

    #[test]
    fn test_zero_offset_is_identity() {
        let (lat, lon) = offset_position(38.0, -114.0, 0.0, 0.0);
        assert_eq!((lat, lon), (38.0, -114.0));
    }
}
