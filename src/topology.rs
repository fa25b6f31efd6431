//! Deterministic honeycomb topology generator (§4.A).
//!
//! Seeds a hex grid of towers around a center point, fans each tower out
//! into 1, 3, or 6 sector cells, and computes neighbor relations from
//! sector geometry. This is the only place in the crate that reasons about
//! the *shape* of the network; the mobility driver (`mobility.rs`) reasons
//! about individual UEs moving through whatever shape this produced.

use crate::error::{Error, Result};
use crate::geometry::{angular_diff_deg, axial_to_offset_m, haversine_m, hex_range, ring_count_for, target_point, EARTH_RADIUS_M};
use crate::model::{Cell, Ecgi, GeoPoint, Node, NodeId, NodeStatus, PlmnId, SectorGeometry};
use std::collections::HashMap;

/// Maximum tower count the generator supports (§8 boundary property).
pub const MAX_TOWERS: u32 = 469;

#[derive(Debug, Clone)]
pub struct TopologyParams {
    pub center: GeoPoint,
    pub num_towers: u32,
    pub sectors_per_tower: u8,
    pub plmn_id: PlmnId,
    pub enb_start: u32,
    /// Spacing between adjacent towers, in meters.
    pub pitch: f64,
    /// Max distance (meters) used by the neighbor-relation test.
    pub max_distance: f64,
    pub max_neighbors: usize,
    pub controllers: Vec<String>,
    pub service_models: Vec<String>,
    /// When true, every cell belongs to a single node instead of one node
    /// per tower (§4.A step 4).
    pub single_node: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GeneratedTopology {
    pub nodes: Vec<Node>,
    pub cells: Vec<Cell>,
}

fn meters_per_degree_lat() -> f64 {
    (std::f64::consts::PI / 180.0) * EARTH_RADIUS_M
}

/// Convert a planar (dx, dy) meter offset around `center` into a
/// geographic point, correcting the eastward component for longitude
/// compression at `center`'s latitude.
fn offset_to_point(center: GeoPoint, dx: f64, dy: f64) -> GeoPoint {
    let aspect_ratio = (center.lat * std::f64::consts::PI / 180.0).cos();
    let m_per_deg = meters_per_degree_lat();
    let lat_offset = dy / m_per_deg;
    let lng_offset = (dx / aspect_ratio) / m_per_deg;
    GeoPoint {
        lat: center.lat + lat_offset,
        lng: center.lng + lng_offset,
    }
}

/// The "reach point" of a sector: the point `max_distance` meters out
/// along the bisector of its arc (§4.A step 5).
fn reach_point(sector: &SectorGeometry, max_distance: f64) -> GeoPoint {
    target_point(sector.center, (sector.azimuth + sector.arc / 2.0) % 360.0, max_distance)
}

/// Run the generator end to end, producing fully populated nodes and cells
/// with neighbor sets filled in.
pub fn generate(params: &TopologyParams) -> Result<GeneratedTopology> {
    if params.num_towers == 0 {
        return Err(Error::Invalid("num_towers must be >= 1".into()));
    }
    if params.num_towers > MAX_TOWERS {
        return Err(Error::Invalid(format!("num_towers {} exceeds maximum of {}", params.num_towers, MAX_TOWERS)));
    }
    if !matches!(params.sectors_per_tower, 1 | 3 | 6) {
        return Err(Error::Invalid(format!("sectors_per_tower must be 1, 3, or 6, got {}", params.sectors_per_tower)));
    }

    let ring = ring_count_for(params.num_towers) as i32;
    let coords = hex_range(ring);

    let mut nodes: Vec<Node> = Vec::new();
    let mut cells: Vec<Cell> = Vec::new();
    let mut node_index: HashMap<NodeId, usize> = HashMap::new();

    for (t, axial) in coords.iter().take(params.num_towers as usize).enumerate() {
        let (dx, dy) = axial_to_offset_m(*axial, params.pitch);
        let position = offset_to_point(params.center, dx, dy);

        let node_id = if params.single_node {
            NodeId(params.enb_start)
        } else {
            NodeId(params.enb_start + t as u32)
        };

        let azimuth_offset = if params.sectors_per_tower == 6 { 30.0 * (t % 2) as f64 } else { 0.0 };

        for s in 0..params.sectors_per_tower as u32 {
            let azimuth = (360.0 * s as f64 / params.sectors_per_tower as f64 + azimuth_offset).rem_euclid(360.0);
            let arc = 360.0 / params.sectors_per_tower as f64;

            let cell_index: u16 = if params.single_node {
                (t as u32 * params.sectors_per_tower as u32 + s + 1) as u16
            } else if params.sectors_per_tower == 1 {
                (t as u32 + 1) as u16
            } else {
                (s + 1) as u16
            };

            let ecgi = Ecgi {
                plmn: params.plmn_id,
                enb_id: node_id,
                cell_index,
            };

            cells.push(Cell {
                ecgi,
                sector: SectorGeometry {
                    center: position,
                    azimuth,
                    arc,
                },
                tx_power_db: 40.0,
                max_ues: 100,
                neighbors: Vec::new(),
                color: format!("tower-{t}"),
                node_id,
            });

            let idx = *node_index.entry(node_id).or_insert_with(|| {
                nodes.push(Node {
                    node_id,
                    cells: Vec::new(),
                    controllers: params.controllers.clone(),
                    service_models: params.service_models.clone(),
                    status: NodeStatus::Running,
                });
                nodes.len() - 1
            });
            nodes[idx].cells.push(ecgi);
        }
    }

    compute_neighbors(&mut cells, params.sectors_per_tower, params.max_distance, params.max_neighbors);

    Ok(GeneratedTopology { nodes, cells })
}

/// Fill in `neighbors` for every cell per the ordered-pair rule of §4.A
/// step 5. Iterates in cell-creation order; callers must not depend on any
/// ordering beyond set membership, as the spec notes.
fn compute_neighbors(cells: &mut [Cell], sectors_per_tower: u8, max_distance: f64, max_neighbors: usize) {
    let reach: Vec<GeoPoint> = cells.iter().map(|c| reach_point(&c.sector, max_distance)).collect();
    let n = cells.len();

    for b in 0..n {
        let mut found: Vec<Ecgi> = Vec::new();
        for a in 0..n {
            if a == b {
                continue;
            }
            if found.len() >= max_neighbors {
                break;
            }
            if cells[a].ecgi == cells[b].ecgi {
                continue;
            }

            let co_located = cells[a].sector.center == cells[b].sector.center;
            let single_sector_in_range = sectors_per_tower == 1 && haversine_m(cells[a].sector.center, cells[b].sector.center) <= max_distance;
            let reach_overlap = haversine_m(reach[a], reach[b]) <= max_distance / 2.0;

            if co_located || single_sector_in_range || reach_overlap {
                found.push(cells[a].ecgi);
            }
        }
        cells[b].neighbors = found;
    }
}

/// Returns true if `bearing` (degrees, from a cell toward some point) is
/// within the sector's arc, used by the mobility driver's signal model.
pub fn within_sector_arc(sector: &SectorGeometry, bearing: f64) -> bool {
    angular_diff_deg(bearing, sector.azimuth) <= sector.arc / 2.0
}
