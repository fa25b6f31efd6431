//! Great-circle geometry used by the topology generator and the mobility
//! driver: Haversine distance, forward geodesy ("target point"), and axial
//! hex-grid enumeration.
//!
//! Mirrors the teacher's `simulation::geometry` module in spirit (small,
//! independently testable pure functions operating on plain coordinate
//! structs) but the underlying math is great-circle, not planar, since the
//! topology here is laid out in latitude/longitude rather than a flat
//! simulation canvas.

use crate::model::GeoPoint;

/// Mean Earth radius in meters, per §4.A.
pub const EARTH_RADIUS_M: f64 = 6_378_100.0;

fn to_radians(deg: f64) -> f64 {
    deg * std::f64::consts::PI / 180.0
}

fn to_degrees(rad: f64) -> f64 {
    rad * 180.0 / std::f64::consts::PI
}

/// Great-circle distance between two points, in meters.
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = to_radians(a.lat);
    let lat2 = to_radians(b.lat);
    let dlat = lat2 - lat1;
    let dlng = to_radians(b.lng - a.lng);

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlng = (dlng / 2.0).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlng * sin_dlng;
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Initial bearing (degrees, `[0, 360)`) from `a` to `b` along the
/// great circle connecting them.
pub fn bearing_deg(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = to_radians(a.lat);
    let lat2 = to_radians(b.lat);
    let dlng = to_radians(b.lng - a.lng);

    let y = dlng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlng.cos();
    let deg = to_degrees(y.atan2(x));
    (deg + 360.0) % 360.0
}

/// Forward geodesy: the point reached by travelling `distance_m` meters
/// from `origin` along initial `bearing_deg`.
///
/// Used both by the topology generator (a sector's "reach point", §4.A
/// step 5) and the mobility driver (advancing a UE along its heading,
/// §4.C step 1).
pub fn target_point(origin: GeoPoint, bearing_deg: f64, distance_m: f64) -> GeoPoint {
    let lat1 = to_radians(origin.lat);
    let lng1 = to_radians(origin.lng);
    let brng = to_radians(bearing_deg);
    let delta = distance_m / EARTH_RADIUS_M;

    let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * brng.cos()).asin();
    let lng2 = lng1 + (brng.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());

    GeoPoint {
        lat: to_degrees(lat2),
        lng: to_degrees(lng2),
    }
}

/// Absolute angular difference between two bearings, folded into `[0, 180]`.
pub fn angular_diff_deg(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    if d > 180.0 {
        360.0 - d
    } else {
        d
    }
}

/// Axial hex coordinate (pointy-top layout), per §4.A step 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Axial {
    pub q: i32,
    pub r: i32,
}

/// Every axial coordinate within `radius` rings of the origin, inclusive.
///
/// Ring `0` is just the origin; ring `k` adds `6k` cells. The classic
/// hex-ring enumeration using cube-coordinate bounds.
pub fn hex_range(radius: i32) -> Vec<Axial> {
    let mut out = Vec::new();
    for q in -radius..=radius {
        let r_min = (-radius).max(-q - radius);
        let r_max = radius.min(-q + radius);
        for r in r_min..=r_max {
            out.push(Axial { q, r });
        }
    }
    out
}

/// Smallest ring count `r` such that `3r^2 + 3r + 1 >= num_towers` (§4.A
/// step 1). `num_towers == 0` maps to `r == 0`.
pub fn ring_count_for(num_towers: u32) -> u32 {
    let mut r: u32 = 0;
    while 3 * r * r + 3 * r + 1 < num_towers {
        r += 1;
    }
    r
}

/// Convert a pointy-top axial coordinate to a (dx, dy) planar offset in
/// meters, with both spacing components equal to `pitch` (§4.A step 2).
pub fn axial_to_offset_m(a: Axial, pitch: f64) -> (f64, f64) {
    let dx = pitch * (3f64.sqrt() * a.q as f64 + (3f64.sqrt() / 2.0) * a.r as f64);
    let dy = pitch * (1.5 * a.r as f64);
    (dx, dy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_zero_distance_for_same_point() {
        let p = GeoPoint { lat: 52.52, lng: 13.41 };
        assert!(haversine_m(p, p) < 1e-6);
    }

    #[test]
    fn haversine_known_distance_is_reasonable() {
        // Berlin to Paris is roughly 880 km.
        let berlin = GeoPoint { lat: 52.52, lng: 13.41 };
        let paris = GeoPoint { lat: 48.8566, lng: 2.3522 };
        let d = haversine_m(berlin, paris) / 1000.0;
        assert!((d - 878.0).abs() < 15.0, "distance was {d} km");
    }

    #[test]
    fn target_point_round_trips_distance() {
        let origin = GeoPoint { lat: 52.52, lng: 13.41 };
        let dest = target_point(origin, 45.0, 1000.0);
        let d = haversine_m(origin, dest);
        assert!((d - 1000.0).abs() < 1.0);
    }

    #[test]
    fn ring_count_matches_bucketed_table() {
        assert_eq!(ring_count_for(1), 0);
        assert_eq!(ring_count_for(7), 1);
        assert_eq!(ring_count_for(8), 2);
        assert_eq!(ring_count_for(19), 2);
        assert_eq!(ring_count_for(20), 3);
        assert_eq!(ring_count_for(37), 3);
    }

    #[test]
    fn hex_range_counts_match_ring_formula() {
        for r in 0..5 {
            let count = hex_range(r).len() as i32;
            assert_eq!(count, 3 * r * r + 3 * r + 1);
        }
    }

    #[test]
    fn angular_diff_wraps_correctly() {
        assert!((angular_diff_deg(350.0, 10.0) - 20.0).abs() < 1e-9);
        assert!((angular_diff_deg(10.0, 350.0) - 20.0).abs() < 1e-9);
        assert!((angular_diff_deg(0.0, 180.0) - 180.0).abs() < 1e-9);
    }
}
