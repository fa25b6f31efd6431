//! MHO (mobility handover) indication builder (§4.F).

use crate::e2::{MhoFormat1Message, MhoFormat2Message, MhoHeader, MhoMeasurementEntry};
use crate::model::{Ecgi, Imsi, NeighborMeasurement, PlmnId, RrcState, ServingCell};

pub fn build_mho_header(plmn: PlmnId, ecgi: Ecgi, timestamp_unix_secs: u32) -> MhoHeader {
    MhoHeader { plmn, ecgi, timestamp_unix_secs }
}

/// Format 1: measurement report, serving cell first then ranked neighbors
/// (§4.F). Returns `None` when the UE has no neighbor measurements —
/// the spec requires the indication be suppressed entirely in that case.
pub fn build_mho_format1(ue_id: Imsi, serving: ServingCell, neighbors: &[NeighborMeasurement]) -> Option<MhoFormat1Message> {
    if neighbors.is_empty() {
        return None;
    }
    let mut measurements = Vec::with_capacity(neighbors.len() + 1);
    measurements.push(MhoMeasurementEntry { ecgi: serving.ecgi, rsrp_db: serving.strength_db });
    measurements.extend(neighbors.iter().map(|n| MhoMeasurementEntry { ecgi: n.ecgi, rsrp_db: n.strength_db }));
    Some(MhoFormat1Message { ue_id, measurements })
}

/// Format 2: RRC state change, emitted on every `RrcUpdateChan` entry (§4.F).
pub fn build_mho_format2(ue_id: Imsi, rrc_state: RrcState) -> MhoFormat2Message {
    MhoFormat2Message { ue_id, rrc_state }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeId;

    fn ecgi(idx: u16) -> Ecgi {
        Ecgi { plmn: PlmnId::new(1), enb_id: NodeId(1), cell_index: idx }
    }

    #[test]
    fn format1_lists_serving_cell_first() {
        let serving = ServingCell { ecgi: ecgi(1), strength_db: -70.0 };
        let neighbors = vec![NeighborMeasurement { ecgi: ecgi(2), strength_db: -80.0 }];
        let message = build_mho_format1(Imsi(1_000_001), serving, &neighbors).unwrap();
        assert_eq!(message.measurements[0].ecgi, ecgi(1));
        assert_eq!(message.measurements[1].ecgi, ecgi(2));
    }

    #[test]
    fn format1_is_suppressed_for_empty_neighbor_list() {
        let serving = ServingCell { ecgi: ecgi(1), strength_db: -70.0 };
        assert!(build_mho_format1(Imsi(1_000_001), serving, &[]).is_none());
    }

    #[test]
    fn format2_carries_the_new_rrc_state() {
        let message = build_mho_format2(Imsi(1_000_001), RrcState::Connected);
        assert_eq!(message.rrc_state, RrcState::Connected);
    }
}
