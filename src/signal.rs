//! Signal strength model used by the mobility driver (§4.C step 2).
//!
//! The spec leaves the exact functional form open (§9): it only requires
//! that strength be deterministic given (UE position, cell geometry),
//! strictly decreasing in distance, and `<= 0` outside the sector arc.
//! This follows the same log-distance shape as the teacher's
//! `signal_calculations::calculate_path_loss`, minus the random shadowing
//! term (shadowing would break the "deterministic given position"
//! requirement) and with an added angular falloff for the sector arc.

use crate::geometry::{angular_diff_deg, bearing_deg, haversine_m};
use crate::model::{GeoPoint, SectorGeometry};

/// Penalty (dB-like units) applied at the edge of the sector arc, on top
/// of the distance term. Keeps the in-arc score continuous as the angular
/// offset approaches the boundary.
const ARC_EDGE_PENALTY: f64 = 5.0;

/// Deterministic signal strength from a cell to a point, given the cell's
/// transmit power and sector geometry.
///
/// Strictly decreasing in distance; `<= 0` whenever `point` falls outside
/// the sector's arc.
pub fn strength_db(tx_power_db: f64, sector: &SectorGeometry, point: GeoPoint) -> f64 {
    let distance_m = haversine_m(sector.center, point);
    let bearing = bearing_deg(sector.center, point);
    let half_arc = sector.arc / 2.0;
    let angular_offset = angular_diff_deg(bearing, sector.azimuth);

    if angular_offset > half_arc {
        // Outside the arc: negative, and worse the further outside —
        // satisfies the `<= 0` invariant unconditionally.
        return -(angular_offset - half_arc) - 1.0;
    }

    let distance_term = tx_power_db - 10.0 * (1.0 + distance_m / 1000.0).log10();
    let angular_term = -(angular_offset / half_arc.max(1e-9)) * ARC_EDGE_PENALTY;
    distance_term + angular_term
}
