//! Great-circle distance between positions.

use crate::models::Position;

/// Mean Earth radius in meters, used for every distance in the crate
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance between two coordinates in meters
pub fn distance_between(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lng = (lng2 - lng1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    // Rounding can push `a` slightly above 1 for antipodal points
    let c = 2.0 * a.min(1.0).sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Distance between two samples in meters
pub fn distance(a: &Position, b: &Position) -> f64 {
    distance_between(a.lat, a.lng, b.lat, b.lng)
}

/// Total length of a track, summing consecutive legs
pub fn path_length(track: &[Position]) -> f64 {
    track.windows(2).map(|leg| distance(&leg[0], &leg[1])).sum()
}

/// Whether `b` lies within `radius_m` meters of `a`
pub fn within_radius(a: &Position, b: &Position, radius_m: f64) -> bool {
    distance(a, b) <= radius_m
}
